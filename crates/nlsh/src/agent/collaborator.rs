//! The narrow interface to the language model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tools::ToolDefinition;

/// What kind of answer the model should give.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Free-form answer.
    Chat,
    /// Shell command lines only.
    Command,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON object.
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// A tool call and the text it produced, fed back on the next round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    /// The call the model made.
    pub call: ToolCall,
    /// What the tool returned.
    pub result: String,
}

/// Everything the model sees for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Requested answer style.
    pub mode: Mode,
    /// Instructions for the mode.
    pub system: String,
    /// Rendered context snapshot.
    pub context: String,
    /// The user's prompt.
    pub prompt: String,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
    /// Tool calls made earlier in this turn, in order.
    #[serde(default)]
    pub exchanges: Vec<ToolExchange>,
}

/// The model's answer for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelReply {
    /// Final text for this turn.
    Text(String),
    /// Run these tools and ask again.
    ToolCalls(Vec<ToolCall>),
}

/// Failures talking to the model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No backend is configured.
    #[error("{0}")]
    Unavailable(String),
    /// The backend failed.
    #[error("model backend failed: {0}")]
    Backend(String),
    /// The backend answered with something unusable.
    #[error("invalid model reply: {0}")]
    InvalidReply(String),
}

/// A language model that answers prompts, possibly by calling tools first.
#[async_trait]
pub trait ModelCollaborator: Send + Sync {
    /// Name recorded with each interaction.
    fn model_name(&self) -> &str;

    /// Answer one round of a turn.
    async fn respond(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

#[async_trait]
impl ModelCollaborator for Arc<dyn ModelCollaborator> {
    fn model_name(&self) -> &str {
        self.as_ref().model_name()
    }

    async fn respond(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.as_ref().respond(request).await
    }
}

/// Stands in when no backend could be configured. Every turn fails with
/// [`ModelError::Unavailable`].
#[derive(Debug, Clone)]
pub struct NoCollaborator {
    reason: String,
}

impl NoCollaborator {
    /// Create with the message reported on every turn.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ModelCollaborator for NoCollaborator {
    fn model_name(&self) -> &str {
        "none"
    }

    async fn respond(&self, _request: &ModelRequest) -> Result<ModelReply, ModelError> {
        Err(ModelError::Unavailable(self.reason.clone()))
    }
}

/// Instructions sent with every request in `mode`.
pub fn system_prompt(mode: Mode, shell_name: &str) -> String {
    match mode {
        Mode::Chat => "You are a helpful assistant working in the user's terminal, with tools \
             for inspecting files, directories, git repositories and the system.\n\
             Use the tools when the question is about the current environment, then answer \
             clearly and concisely."
            .to_string(),
        Mode::Command => format!(
            "You generate {shell_name} commands for the user's request.\n\
             You may call tools to inspect the environment first.\n\
             Reply with one or more commands, one per line, that run as-is in {shell_name}.\n\
             Do not add explanations, comments, numbering, markdown or backticks.\n\
             Prefer safe, non-destructive commands unless the user explicitly asks otherwise.\n\
             Take the working directory and the files in it into account."
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_wire_format() {
        let text: ModelReply = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert_eq!(text, ModelReply::Text("hello".to_string()));

        let calls: ModelReply = serde_json::from_str(
            r#"{"tool_calls": [{"name": "git_status"}, {"name": "read_file", "arguments": {"path": "a"}}]}"#,
        )
        .unwrap();
        match calls {
            ModelReply::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert!(calls[0].arguments.is_empty());
                assert_eq!(calls[1].arguments["path"], "a");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_system_prompt_names_shell() {
        assert!(system_prompt(Mode::Command, "zsh").contains("zsh commands"));
        assert!(!system_prompt(Mode::Chat, "zsh").contains("zsh"));
    }

    #[tokio::test]
    async fn test_no_collaborator_reports_reason() {
        let model: Arc<dyn ModelCollaborator> =
            Arc::new(NoCollaborator::new("No valid API key found"));
        let request = ModelRequest {
            mode: Mode::Chat,
            system: String::new(),
            context: String::new(),
            prompt: "hi".to_string(),
            tools: Vec::new(),
            exchanges: Vec::new(),
        };
        let err = model.respond(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "No valid API key found");
    }
}
