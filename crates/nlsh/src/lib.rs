//! nlsh: the core of a natural-language shell assistant
//!
//! Commands run in the user's real shell through [`ShellExecutor`], every
//! model-proposed command passes a [`ConfirmationGate`], all activity is
//! appended to a SQLite-backed [`HistoryStore`], and a [`ContextAssembler`]
//! turns live system facts plus recent history into the text a model sees.
//! A thin [`Session`] sequences these for each turn; the model itself is an
//! external [`ModelCollaborator`].

pub mod agent;
pub mod config;
pub mod context;
pub mod executor;
pub mod history;
pub mod policy;
pub mod session;

#[cfg(test)]
mod tests;

pub use agent::{Mode, ModelCollaborator, ModelError, ModelReply, ModelRequest, parse_commands};
pub use config::{EnvSelection, SessionConfig};
pub use context::{ContextAssembler, ContextBuildError, ContextSnapshot};
pub use executor::{CommandResult, ExecutionError, ShellDescriptor, ShellExecutor};
pub use history::{EventId, HistoryEvent, HistoryStats, HistoryStore, StorageError};
pub use policy::{ConfirmationGate, Decision, RiskPolicy, RiskPolicyBuilder};
pub use session::{ChatTurn, CommandTurn, Session, SessionBuilder, SessionError, TurnObserver};
