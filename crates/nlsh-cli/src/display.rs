//! Terminal rendering of turn progress.

use std::io::{self, Write};

use nlsh::TurnObserver;
use nlsh::agent::ToolCall;
use nlsh::executor::CommandResult;

/// Prints turn progress to the terminal.
///
/// With `live` set, command output has already been streamed by the
/// executor and only the exit status is printed afterwards.
#[derive(Debug, Clone, Copy)]
pub struct TerminalObserver {
    live: bool,
}

impl TerminalObserver {
    /// Create an observer for buffered (`live == false`) or streamed output.
    pub fn new(live: bool) -> Self {
        Self { live }
    }
}

impl TurnObserver for TerminalObserver {
    fn commands_generated(&self, commands: &[String]) {
        if commands.is_empty() {
            eprintln!("No commands generated.");
            return;
        }
        eprintln!("Generated commands:");
        for (i, command) in commands.iter().enumerate() {
            eprintln!("  {}. {command}", i + 1);
        }
    }

    fn command_started(&self, command: &str) {
        eprintln!("$ {command}");
    }

    fn command_finished(&self, result: &CommandResult) {
        if !self.live {
            print_output(result);
        }
        if result.interrupted {
            eprintln!("(interrupted)");
        } else if result.exit_code != 0 {
            eprintln!("(exit {})", result.exit_code);
        }
    }

    fn command_skipped(&self, command: &str) {
        eprintln!("Skipped: {command}");
    }

    fn tool_called(&self, call: &ToolCall) {
        if call.arguments.is_empty() {
            eprintln!("[tool] {}", call.name);
        } else {
            eprintln!(
                "[tool] {} {}",
                call.name,
                serde_json::Value::Object(call.arguments.clone())
            );
        }
    }
}

/// Write a buffered command's output to the terminal.
pub fn print_output(result: &CommandResult) {
    let mut out = io::stdout().lock();
    let _ = out.write_all(result.stdout.as_bytes()).and_then(|_| out.flush());
    let mut err = io::stderr().lock();
    let _ = err.write_all(result.stderr.as_bytes()).and_then(|_| err.flush());
}
