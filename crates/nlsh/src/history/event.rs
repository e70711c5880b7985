//! Event types stored in the history log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::CommandResult;

/// Sequence id of a stored event. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A command the user typed and ran directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellEvent {
    /// The command line.
    pub command: String,
    /// What running it produced.
    pub result: CommandResult,
}

/// One prompt/response exchange with the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// What the user asked.
    pub user_prompt: String,
    /// The model's final text.
    pub model_response: String,
    /// Commands the model proposed, in order.
    #[serde(default)]
    pub generated_commands: Vec<String>,
    /// The subset of proposed commands that actually ran, in order.
    #[serde(default)]
    pub executed_commands: Vec<String>,
    /// Results of the executed commands, parallel to `executed_commands`.
    #[serde(default)]
    pub execution_results: Vec<CommandResult>,
    /// Model that produced the response.
    pub model_name: String,
}

/// A single tool invocation made on the model's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    /// Name of the tool.
    pub tool_name: String,
    /// Arguments the model supplied.
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// Text returned to the model.
    pub result_text: String,
    /// The interaction this call was made for. Calls made outside a chat or
    /// command turn have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_interaction_id: Option<EventId>,
}

impl ToolCallEvent {
    /// Tool results that report an error start with `Error`.
    pub fn is_error(&self) -> bool {
        self.result_text
            .trim_start()
            .get(..5)
            .is_some_and(|head| head.eq_ignore_ascii_case("error"))
    }
}

/// The three kinds of recorded activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A manual shell command.
    Shell(ShellEvent),
    /// A model interaction.
    Interaction(InteractionEvent),
    /// A tool call.
    ToolCall(ToolCallEvent),
}

impl EventKind {
    /// The discriminant stored alongside the event.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Shell(_) => SHELL,
            EventKind::Interaction(_) => INTERACTION,
            EventKind::ToolCall(_) => TOOL_CALL,
        }
    }

    /// Whether the event counts as successful for display.
    pub fn succeeded(&self) -> bool {
        match self {
            EventKind::Shell(e) => e.result.success(),
            EventKind::Interaction(e) => e.execution_results.iter().all(CommandResult::success),
            EventKind::ToolCall(e) => !e.is_error(),
        }
    }
}

pub(crate) const SHELL: &str = "shell";
pub(crate) const INTERACTION: &str = "interaction";
pub(crate) const TOOL_CALL: &str = "tool_call";

/// A stored event with its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Sequence id assigned by the store.
    pub id: EventId,
    /// When the event was appended.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Counts per event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    /// Manual shell commands.
    pub shell: u64,
    /// Model interactions.
    pub interaction: u64,
    /// Tool calls.
    pub tool_call: u64,
}

/// Aggregate statistics over the whole log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Number of stored events.
    pub total_entries: u64,
    /// Breakdown by kind.
    pub per_kind: KindCounts,
    /// Shell events that exited 0 and were not interrupted.
    pub shell_successes: u64,
    /// Shell events that failed or were interrupted.
    pub shell_failures: u64,
}

impl HistoryStats {
    /// Fraction of shell events that succeeded, None when there are none.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.shell_successes + self.shell_failures;
        (total > 0).then(|| self.shell_successes as f64 / total as f64)
    }
}
