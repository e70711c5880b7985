//! Interactive confirmation of candidate commands.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

use super::handler::{RiskClassifier, RiskDecision};

/// The user's answer to a confirmation prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Run the command.
    Approved,
    /// Skip the command.
    Rejected,
    /// Skip the command and end the session.
    QuitSession,
}

/// One reply read from the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptReply {
    /// A line of input, without its line terminator.
    Line(String),
    /// The user pressed Ctrl-C while the prompt was shown.
    Interrupted,
    /// Input is closed.
    Closed,
}

/// A source of user replies.
#[async_trait]
pub trait PromptInput: Send {
    /// Show `prompt` and wait for one reply.
    async fn read_reply(&mut self, prompt: &str) -> PromptReply;
}

/// Reads replies from the terminal, printing prompts to stderr.
pub struct TerminalInput {
    reader: BufReader<Stdin>,
    pending: Vec<u8>,
}

impl fmt::Debug for TerminalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalInput").finish_non_exhaustive()
    }
}

impl Default for TerminalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalInput {
    /// Create a reader over the process's stdin.
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl PromptInput for TerminalInput {
    async fn read_reply(&mut self, prompt: &str) -> PromptReply {
        {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(prompt.as_bytes()).and_then(|_| err.flush());
        }

        tokio::select! {
            read = self.reader.read_until(b'\n', &mut self.pending) => match read {
                Ok(0) if self.pending.is_empty() => PromptReply::Closed,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&self.pending)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    self.pending.clear();
                    PromptReply::Line(line)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read from stdin");
                    PromptReply::Closed
                }
            },
            () = crate::executor::ctrl_c() => {
                self.pending.clear();
                eprintln!();
                PromptReply::Interrupted
            }
        }
    }
}

/// Replays a fixed list of replies, then reports closed input.
///
/// Records every prompt it was shown.
#[derive(Debug, Default, Clone)]
pub struct ScriptedInput {
    replies: VecDeque<PromptReply>,
    prompts: Arc<std::sync::Mutex<Vec<String>>>,
}

impl ScriptedInput {
    /// Create a script from replies.
    pub fn new(replies: impl IntoIterator<Item = PromptReply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            prompts: Arc::default(),
        }
    }

    /// Create a script of plain text lines.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines.into_iter().map(|l| PromptReply::Line(l.into())))
    }

    /// A handle on the prompts shown so far, shared with clones.
    pub fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl PromptInput for ScriptedInput {
    async fn read_reply(&mut self, prompt: &str) -> PromptReply {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.replies.pop_front().unwrap_or(PromptReply::Closed)
    }
}

/// Map one line of input to a decision, None if it is not a valid answer.
pub fn interpret_reply(line: &str) -> Option<Decision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "y" | "yes" => Some(Decision::Approved),
        "n" | "no" => Some(Decision::Rejected),
        "q" | "quit" => Some(Decision::QuitSession),
        _ => None,
    }
}

/// Safety checkpoint in front of every command the model proposes.
///
/// Approval only ever comes from an explicit answer (or the classifier's
/// auto-approve). Interrupts and closed input reject.
pub struct ConfirmationGate {
    classifier: Arc<dyn RiskClassifier>,
    input: Mutex<Box<dyn PromptInput>>,
}

impl fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationGate").finish_non_exhaustive()
    }
}

impl ConfirmationGate {
    /// Create a gate from a classifier and an input source.
    pub fn new(classifier: Arc<dyn RiskClassifier>, input: impl PromptInput + 'static) -> Self {
        Self {
            classifier,
            input: Mutex::new(Box::new(input)),
        }
    }

    /// Classify without prompting.
    pub fn classify(&self, command: &str) -> RiskDecision {
        self.classifier.classify(command)
    }

    /// Classify, and prompt only if the classifier asks for confirmation.
    pub async fn check(&self, command: &str) -> Decision {
        match self.classify(command) {
            RiskDecision::AutoApprove => {
                tracing::debug!(command = %command, "auto-approved");
                Decision::Approved
            }
            RiskDecision::Confirm(reason) => self.prompt(command, Some(&reason)).await,
        }
    }

    /// Always ask the user about `command`.
    pub async fn confirm(&self, command: &str) -> Decision {
        self.prompt(command, None).await
    }

    /// Read a free-form line through the same input the gate prompts on.
    pub async fn read_line(&self, prompt: &str) -> PromptReply {
        self.input.lock().await.read_reply(prompt).await
    }

    async fn prompt(&self, command: &str, reason: Option<&str>) -> Decision {
        let mut input = self.input.lock().await;
        let mut prompt = match reason {
            Some(reason) => format!("Execute `{command}` ({reason})? [Y/n/q] "),
            None => format!("Execute `{command}`? [Y/n/q] "),
        };

        loop {
            let decision = match input.read_reply(&prompt).await {
                PromptReply::Line(line) => interpret_reply(&line),
                PromptReply::Interrupted | PromptReply::Closed => Some(Decision::Rejected),
            };
            if let Some(decision) = decision {
                tracing::debug!(command = %command, ?decision, "confirmation answered");
                return decision;
            }
            prompt = format!("Please answer y, n or q. Execute `{command}`? [Y/n/q] ");
        }
    }
}
