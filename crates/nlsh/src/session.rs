//! Turn sequencing.
//!
//! A [`Session`] owns nothing global: the executor, confirmation gate,
//! history store and model are all handed in through [`SessionBuilder`].
//! Each turn goes context → model → gate → executor → history. Storage
//! failures are logged at `warn` and never fail a turn.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::agent::{
    EXECUTE_SHELL_COMMAND, LocalTools, Mode, ModelCollaborator, ModelError, ModelReply,
    ModelRequest, ToolCall, ToolExchange, ToolRegistry, builtin_tools, parse_commands,
    system_prompt,
};
use crate::config::SessionConfig;
use crate::context::ContextAssembler;
use crate::executor::{CommandResult, ExecutionError, ShellExecutor};
use crate::history::{EventId, HistoryStats, HistoryEvent, HistoryStore, InteractionEvent};
use crate::policy::{ConfirmationGate, Decision, PromptReply};

/// Errors that end a turn.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A command could not be run.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// The model could not answer.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The user chose to quit at a confirmation prompt.
    #[error("session ended at user request")]
    ConfirmationAborted,
}

/// Progress callbacks for the user interface. All methods default to no-ops.
pub trait TurnObserver: Send + Sync {
    /// The model proposed these commands.
    fn commands_generated(&self, _commands: &[String]) {}
    /// A command is about to run.
    fn command_started(&self, _command: &str) {}
    /// A command finished.
    fn command_finished(&self, _result: &CommandResult) {}
    /// The user declined a command.
    fn command_skipped(&self, _command: &str) {}
    /// The model called a tool.
    fn tool_called(&self, _call: &ToolCall) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuietObserver;

impl TurnObserver for QuietObserver {}

/// Result of a chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// The model's answer.
    pub response: String,
    /// Where the interaction was recorded, if it was.
    pub interaction_id: Option<EventId>,
}

/// Result of a command-generation turn.
#[derive(Debug, Clone)]
pub struct CommandTurn {
    /// The model's raw reply.
    pub response: String,
    /// Commands extracted from the reply.
    pub generated: Vec<String>,
    /// Results of the commands that ran, in order, including any run for
    /// tool calls.
    pub executed: Vec<CommandResult>,
    /// Commands the user declined.
    pub skipped: Vec<String>,
    /// Where the interaction was recorded, if it was.
    pub interaction_id: Option<EventId>,
}

impl CommandTurn {
    /// Exit code of the last command that ran, 0 if none did.
    pub fn exit_code(&self) -> i32 {
        self.executed.last().map_or(0, |r| r.exit_code)
    }
}

/// Assembles a [`Session`] from explicit dependencies.
pub struct SessionBuilder {
    executor: Arc<ShellExecutor>,
    gate: ConfirmationGate,
    model: Arc<dyn ModelCollaborator>,
    history: Option<HistoryStore>,
    tools: Arc<dyn ToolRegistry>,
    observer: Arc<dyn TurnObserver>,
    config: SessionConfig,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("history", &self.history)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionBuilder {
    /// Record activity in `store`.
    pub fn history(mut self, store: HistoryStore) -> Self {
        self.history = Some(store);
        self
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Offer these tools instead of the built-in set.
    pub fn tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Report progress to `observer`.
    pub fn observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Finish building.
    pub fn build(self) -> Session {
        Session {
            assembler: ContextAssembler::new(self.executor.clone(), &self.config),
            local_tools: LocalTools::new(self.config.tool_timeout),
            executor: self.executor,
            gate: self.gate,
            model: self.model,
            history: self.history,
            tools: self.tools,
            observer: self.observer,
            config: self.config,
        }
    }
}

/// One interactive session.
pub struct Session {
    executor: Arc<ShellExecutor>,
    gate: ConfirmationGate,
    model: Arc<dyn ModelCollaborator>,
    history: Option<HistoryStore>,
    assembler: ContextAssembler,
    tools: Arc<dyn ToolRegistry>,
    local_tools: LocalTools,
    observer: Arc<dyn TurnObserver>,
    config: SessionConfig,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("executor", &self.executor)
            .field("history", &self.history)
            .field("model", &self.model.model_name())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start building a session around its three required collaborators.
    pub fn builder(
        executor: Arc<ShellExecutor>,
        gate: ConfirmationGate,
        model: Arc<dyn ModelCollaborator>,
    ) -> SessionBuilder {
        SessionBuilder {
            executor,
            gate,
            model,
            history: None,
            tools: Arc::new(builtin_tools()),
            observer: Arc::new(QuietObserver),
            config: SessionConfig::default(),
        }
    }

    /// The executor commands run through.
    pub fn executor(&self) -> &ShellExecutor {
        &self.executor
    }

    /// The history store, if one is attached.
    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_ref()
    }

    /// Aggregate history statistics, None without a readable store.
    pub async fn stats(&self) -> Option<HistoryStats> {
        let store = self.history.as_ref()?;
        record(store.stats().await, "stats")
    }

    /// Recent history events, oldest first. Empty without a readable store.
    pub async fn recent(&self, limit: usize) -> Vec<HistoryEvent> {
        match &self.history {
            Some(store) => record(store.recent(limit).await, "recent").unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Read a line of user input through the gate's input source.
    pub async fn read_line(&self, prompt: &str) -> PromptReply {
        self.gate.read_line(prompt).await
    }

    /// Run a command the user typed. No confirmation is asked.
    pub async fn run_manual(&self, command: &str) -> Result<CommandResult, SessionError> {
        let result = self.execute(command).await?;
        if let Some(store) = &self.history {
            record(store.log_shell(command, result.clone()).await, "shell command");
        }
        Ok(result)
    }

    /// Ask the model a question and record the exchange.
    pub async fn chat(&self, prompt: &str) -> Result<ChatTurn, SessionError> {
        let mut activity = ToolActivity::default();
        let response = match self.converse(Mode::Chat, prompt, &mut activity).await {
            Ok(response) => response,
            Err(e) => {
                self.abandon_turn(prompt, activity).await;
                return Err(e);
            }
        };
        let interaction_id = self.finish_turn(prompt, &response, Vec::new(), activity).await;
        Ok(ChatTurn {
            response,
            interaction_id,
        })
    }

    /// Ask the model for commands, confirm and run each, and record the
    /// exchange.
    ///
    /// Quitting at a prompt records what ran so far, then returns
    /// [`SessionError::ConfirmationAborted`].
    pub async fn command(&self, prompt: &str) -> Result<CommandTurn, SessionError> {
        let mut activity = ToolActivity::default();
        let response = match self.converse(Mode::Command, prompt, &mut activity).await {
            Ok(response) => response,
            Err(e) => {
                self.abandon_turn(prompt, activity).await;
                return Err(e);
            }
        };
        let generated = parse_commands(&response, self.config.max_commands);
        tracing::debug!(count = generated.len(), "commands generated");
        self.observer.commands_generated(&generated);

        let mut skipped = Vec::new();
        let mut outcome = Ok(());

        for command in &generated {
            match self.gate.check(command).await {
                Decision::Approved => match self.execute(command).await {
                    Ok(result) => activity.executed.push(result),
                    Err(e) => {
                        outcome = Err(SessionError::from(e));
                        break;
                    }
                },
                Decision::Rejected => {
                    self.observer.command_skipped(command);
                    skipped.push(command.clone());
                }
                Decision::QuitSession => {
                    outcome = Err(SessionError::ConfirmationAborted);
                    break;
                }
            }
        }

        let executed = activity.executed.clone();
        let interaction_id = self.finish_turn(prompt, &response, generated.clone(), activity).await;
        outcome?;

        Ok(CommandTurn {
            response,
            generated,
            executed,
            skipped,
            interaction_id,
        })
    }

    /// Run one tool call for the model and record it without a parent
    /// interaction.
    ///
    /// Tool failures and unknown tools come back as error text. Only a quit
    /// at a confirmation prompt, or a shell that cannot start, fails; the
    /// call is still recorded first.
    pub async fn invoke_tool(&self, call: &ToolCall) -> Result<String, SessionError> {
        let mut activity = ToolActivity::default();
        let outcome = self.run_tool(call.clone(), &mut activity).await;
        self.log_tool_calls(&activity.exchanges, None).await;
        outcome?;
        Ok(activity
            .exchanges
            .pop()
            .map(|exchange| exchange.result)
            .unwrap_or_default())
    }

    async fn run_tool(
        &self,
        call: ToolCall,
        activity: &mut ToolActivity,
    ) -> Result<(), SessionError> {
        self.observer.tool_called(&call);
        let outcome = if !self.tools.has_tool(&call.name) {
            Ok(format!("Error: unknown tool '{}'", call.name))
        } else if call.name == EXECUTE_SHELL_COMMAND {
            self.shell_tool(&call, &mut activity.executed).await
        } else {
            Ok(self
                .local_tools
                .invoke(&self.executor.working_directory(), &call)
                .await)
        };

        let result = match &outcome {
            Ok(text) => text.clone(),
            Err(SessionError::ConfirmationAborted) => USER_QUIT.to_string(),
            Err(e) => format!("Error: {e}"),
        };
        tracing::debug!(tool = %call.name, "tool call finished");
        activity.exchanges.push(ToolExchange { call, result });
        outcome.map(drop)
    }

    async fn shell_tool(
        &self,
        call: &ToolCall,
        executed: &mut Vec<CommandResult>,
    ) -> Result<String, SessionError> {
        let Some(command) = call
            .arguments
            .get("command")
            .and_then(serde_json::Value::as_str)
            .filter(|c| !c.trim().is_empty())
        else {
            return Ok("Error: missing or invalid argument 'command'".to_string());
        };

        match self.gate.check(command).await {
            Decision::Approved => {
                let result = self.execute(command).await?;
                let text = describe_result(&result);
                executed.push(result);
                Ok(text)
            }
            Decision::Rejected => {
                self.observer.command_skipped(command);
                Ok(format!("The user declined to run `{command}`."))
            }
            Decision::QuitSession => Err(SessionError::ConfirmationAborted),
        }
    }

    async fn converse(
        &self,
        mode: Mode,
        prompt: &str,
        activity: &mut ToolActivity,
    ) -> Result<String, SessionError> {
        let snapshot = self.assembler.build(self.history.as_ref()).await;
        let mut request = ModelRequest {
            mode,
            system: system_prompt(mode, &self.executor.shell().name),
            context: self.assembler.format_for_model(&snapshot),
            prompt: prompt.to_string(),
            tools: self.tools.definitions(),
            exchanges: Vec::new(),
        };

        for round in 0..=self.config.max_tool_rounds {
            request.exchanges.clone_from(&activity.exchanges);
            match self.model.respond(&request).await? {
                ModelReply::Text(text) => return Ok(text),
                ModelReply::ToolCalls(calls) => {
                    tracing::debug!(round, calls = calls.len(), "model requested tools");
                    if round == self.config.max_tool_rounds {
                        break;
                    }
                    for call in calls {
                        self.run_tool(call, activity).await?;
                    }
                }
            }
        }

        Err(ModelError::InvalidReply(format!(
            "no answer after {} tool rounds",
            self.config.max_tool_rounds
        ))
        .into())
    }

    async fn execute(&self, command: &str) -> Result<CommandResult, ExecutionError> {
        self.observer.command_started(command);
        let result = if self.config.live_output {
            self.executor.run_live(command).await?
        } else {
            self.executor.run(command).await?
        };
        self.observer.command_finished(&result);
        Ok(result)
    }

    /// Record the interaction, then the tool calls made on its behalf.
    async fn finish_turn(
        &self,
        prompt: &str,
        response: &str,
        generated_commands: Vec<String>,
        activity: ToolActivity,
    ) -> Option<EventId> {
        let store = self.history.as_ref()?;
        let interaction = InteractionEvent {
            user_prompt: prompt.to_string(),
            model_response: response.to_string(),
            generated_commands,
            executed_commands: activity.executed.iter().map(|r| r.command.clone()).collect(),
            execution_results: activity.executed,
            model_name: self.model.model_name().to_string(),
        };
        let id = record(store.log_interaction(interaction).await, "interaction");
        self.log_tool_calls(&activity.exchanges, id).await;
        id
    }

    /// Record a turn that failed after tools already did something.
    async fn abandon_turn(&self, prompt: &str, activity: ToolActivity) {
        if activity.exchanges.is_empty() {
            return;
        }
        self.finish_turn(prompt, "", Vec::new(), activity).await;
    }

    async fn log_tool_calls(&self, exchanges: &[ToolExchange], parent: Option<EventId>) {
        let Some(store) = &self.history else {
            return;
        };
        for exchange in exchanges {
            let ToolExchange { call, result } = exchange;
            record(
                store
                    .log_tool_call(&call.name, call.arguments.clone(), result.clone(), parent)
                    .await,
                "tool call",
            );
        }
    }
}

/// Result text recorded for a tool call the user quit at.
const USER_QUIT: &str = "The user quit the session.";

/// What tool calls did during one turn.
#[derive(Debug, Default)]
struct ToolActivity {
    exchanges: Vec<ToolExchange>,
    executed: Vec<CommandResult>,
}

fn record<T>(outcome: crate::history::Result<T>, what: &'static str) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, event = what, "history unavailable");
            None
        }
    }
}

fn describe_result(result: &CommandResult) -> String {
    let mut text = format!("Exit code: {}", result.exit_code);
    if result.interrupted {
        text.push_str(" (interrupted)");
    }
    if !result.stdout.is_empty() {
        text.push_str(&format!("\nstdout:\n{}", result.stdout.trim_end()));
    }
    if !result.stderr.is_empty() {
        text.push_str(&format!("\nstderr:\n{}", result.stderr.trim_end()));
    }
    text
}
