//! Plain-text rendering of history events.
//!
//! Every event renders as one header line followed by indented detail lines:
//!
//! ```text
//! #3 [2026-10-19 14:03:22] ✅ Manual: ls -la
//!    total 8
//! #4 [2026-10-19 14:03:40] ✅ User: find python files
//!    AI: Here you go
//!    Generated commands (1):
//!      - find . -name '*.py'
//!    Executed commands (1):
//!      ✅ find . -name '*.py' (exit 0)
//! #5 [2026-10-19 14:04:02] ❌ Tool: read_file {"path":"missing.txt"}
//!    Error: No such file or directory
//! ```

use super::event::{EventKind, HistoryEvent, HistoryStats, InteractionEvent};
use crate::executor::CommandResult;

const INDENT: &str = "   ";
const MAX_OUTPUT_LINES: usize = 3;
const MAX_RESPONSE_LINES: usize = 5;
const MAX_LINE_CHARS: usize = 160;

/// Glyph shown in front of an event.
pub fn status_glyph(success: bool) -> &'static str {
    if success { "✅" } else { "❌" }
}

/// Render one event.
pub fn render_event(event: &HistoryEvent) -> String {
    let mut out = format!(
        "{} [{}] {} ",
        event.id,
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        status_glyph(event.kind.succeeded()),
    );

    match &event.kind {
        EventKind::Shell(shell) => {
            out.push_str("Manual: ");
            push_lines(&mut out, &shell.command, usize::MAX);
            out.push_str(&format!(" (exit {})", shell.result.exit_code));
            push_output(&mut out, &shell.result);
        }
        EventKind::Interaction(interaction) => {
            out.push_str("User: ");
            push_lines(&mut out, &interaction.user_prompt, usize::MAX);
            push_interaction(&mut out, interaction);
        }
        EventKind::ToolCall(call) => {
            let args = serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string());
            out.push_str(&format!("Tool: {} {args}", call.tool_name));
            if !call.result_text.trim().is_empty() {
                out.push('\n');
                out.push_str(INDENT);
                push_lines(&mut out, &call.result_text, MAX_OUTPUT_LINES);
            }
        }
    }
    out
}

/// Render a list of events, one after another.
pub fn render_events(events: &[HistoryEvent]) -> String {
    events
        .iter()
        .map(render_event)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summarise statistics for display.
pub fn render_stats(stats: &HistoryStats) -> String {
    let rate = match stats.success_rate() {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => "n/a".to_string(),
    };
    format!(
        "Total entries: {}\n\
         Shell commands: {}\n\
         Interactions: {}\n\
         Tool calls: {}\n\
         Shell success rate: {rate} ({} ok, {} failed)",
        stats.total_entries,
        stats.per_kind.shell,
        stats.per_kind.interaction,
        stats.per_kind.tool_call,
        stats.shell_successes,
        stats.shell_failures,
    )
}

fn push_interaction(out: &mut String, interaction: &InteractionEvent) {
    if !interaction.model_response.trim().is_empty() {
        out.push('\n');
        out.push_str(INDENT);
        out.push_str("AI: ");
        push_lines(out, &interaction.model_response, MAX_RESPONSE_LINES);
    }

    if !interaction.generated_commands.is_empty() {
        out.push_str(&format!(
            "\n{INDENT}Generated commands ({}):",
            interaction.generated_commands.len()
        ));
        for command in &interaction.generated_commands {
            out.push_str(&format!("\n{INDENT}  - {}", clip(command)));
        }
    }

    if !interaction.executed_commands.is_empty() {
        out.push_str(&format!(
            "\n{INDENT}Executed commands ({}):",
            interaction.executed_commands.len()
        ));
        for (i, command) in interaction.executed_commands.iter().enumerate() {
            match interaction.execution_results.get(i) {
                Some(result) => out.push_str(&format!(
                    "\n{INDENT}  {} {} (exit {})",
                    status_glyph(result.success()),
                    clip(command),
                    result.exit_code
                )),
                None => out.push_str(&format!("\n{INDENT}  - {}", clip(command))),
            }
        }
    }
}

fn push_output(out: &mut String, result: &CommandResult) {
    let shown = if result.success() || result.stderr.trim().is_empty() {
        &result.stdout
    } else {
        &result.stderr
    };
    if !shown.trim().is_empty() {
        out.push('\n');
        out.push_str(INDENT);
        push_lines(out, shown.trim_end(), MAX_OUTPUT_LINES);
    }
    if result.interrupted {
        out.push_str(&format!("\n{INDENT}(interrupted)"));
    }
}

/// Append `text`, indenting continuation lines and stopping after
/// `max_lines` with a count of what was left out.
fn push_lines(out: &mut String, text: &str, max_lines: usize) {
    let total = text.lines().count();
    for (i, line) in text.lines().take(max_lines).enumerate() {
        if i > 0 {
            out.push('\n');
            out.push_str(INDENT);
        }
        out.push_str(&clip(line));
    }
    if total > max_lines {
        out.push_str(&format!("\n{INDENT}... ({} more lines)", total - max_lines));
    }
}

fn clip(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line.to_string();
    }
    let mut clipped: String = line.chars().take(MAX_LINE_CHARS).collect();
    clipped.push('…');
    clipped
}
