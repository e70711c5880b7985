//! Model backend run as an external process.
//!
//! The request is written to the process's stdin as one JSON object (the
//! model request plus `provider` and `model`). The process answers on
//! stdout with either plain text, `{"text": "..."}`, or
//! `{"tool_calls": [{"name": "...", "arguments": {...}}]}`.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use nlsh::agent::{ModelCollaborator, ModelError, ModelReply, ModelRequest};

use crate::provider::ProviderChoice;

const MODEL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct Envelope<'a> {
    provider: &'a str,
    model: &'a str,
    #[serde(flatten)]
    request: &'a ModelRequest,
}

/// Runs a backend command once per model round.
#[derive(Debug, Clone)]
pub struct ProcessCollaborator {
    command: String,
    provider: ProviderChoice,
    timeout: Duration,
}

impl ProcessCollaborator {
    /// Create a collaborator that runs `command` through the system shell.
    pub fn new(command: impl Into<String>, provider: ProviderChoice) -> Self {
        Self {
            command: command.into(),
            provider,
            timeout: MODEL_TIMEOUT,
        }
    }

    /// Override the per-round timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn(&self) -> io::Result<tokio::process::Child> {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(&self.command);
            cmd
        };
        cmd.env("NLSH_PROVIDER", &self.provider.name)
            .env("NLSH_MODEL", &self.provider.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    async fn exchange(&self, input: Vec<u8>) -> Result<String, ModelError> {
        let mut child = self
            .spawn()
            .map_err(|e| ModelError::Backend(format!("failed to start `{}`: {e}", self.command)))?;

        // The request is written while stdout and stderr are drained. A
        // backend that exits without reading it is not an error.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                match stdin.write_all(&input).await {
                    Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                }
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModelError::Backend(format!(
                "backend exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| ModelError::Backend(e.to_string()))?
                .map_err(|e| ModelError::Backend(format!("failed to send request: {e}")))?;
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ModelCollaborator for ProcessCollaborator {
    fn model_name(&self) -> &str {
        &self.provider.model
    }

    async fn respond(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let input = serde_json::to_vec(&Envelope {
            provider: &self.provider.name,
            model: &self.provider.model,
            request,
        })
        .map_err(|e| ModelError::InvalidReply(format!("could not encode request: {e}")))?;

        tracing::debug!(
            provider = %self.provider.name,
            model = %self.provider.model,
            exchanges = request.exchanges.len(),
            "calling model backend"
        );
        let stdout = tokio::time::timeout(self.timeout, self.exchange(input))
            .await
            .map_err(|_| ModelError::Backend(format!("timed out after {:?}", self.timeout)))??;
        parse_reply(&stdout)
    }
}

/// Interpret backend output.
pub fn parse_reply(stdout: &str) -> Result<ModelReply, ModelError> {
    let text = stdout.trim();
    if text.is_empty() {
        return Err(ModelError::InvalidReply("empty reply".to_string()));
    }
    if text.starts_with('{') {
        return serde_json::from_str(text).map_err(|e| ModelError::InvalidReply(e.to_string()));
    }
    Ok(ModelReply::Text(text.to_string()))
}
