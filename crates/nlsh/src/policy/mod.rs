//! Confirmation gate for commands proposed by the model.
//!
//! The gate has two layers:
//!
//! - **Classification**: a [`RiskClassifier`] decides whether a command may
//!   run straight away or needs the user's say-so. The default
//!   [`RiskPolicy`] auto-approves a small set of read-only commands, flags
//!   known destructive patterns with a reason, and asks about everything
//!   else.
//! - **Prompting**: [`ConfirmationGate`] shows a `[Y/n/q]` prompt and maps
//!   the answer to a [`Decision`]. Invalid answers re-ask about the same
//!   command; Ctrl-C and closed input reject.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nlsh::policy::{ConfirmationGate, Decision, TerminalInput, default_risk_policy};
//!
//! let gate = ConfirmationGate::new(Arc::new(default_risk_policy(&[])), TerminalInput::new());
//!
//! // Runs without asking.
//! assert_eq!(gate.check("ls -la").await, Decision::Approved);
//!
//! // Prompts: Execute `rm -rf build` (recursive delete)? [Y/n/q]
//! let decision = gate.check("rm -rf build").await;
//! ```

mod gate;
mod handler;

pub use gate::{
    ConfirmationGate, Decision, PromptInput, PromptReply, ScriptedInput, TerminalInput,
    interpret_reply,
};
pub use handler::{
    AlwaysConfirm, RiskClassifier, RiskDecision, RiskPolicy, RiskPolicyBuilder,
    default_risk_policy,
};
