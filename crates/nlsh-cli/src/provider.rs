//! Choosing a model provider from the credentials that are present.

use std::sync::Arc;

use nlsh::agent::{ModelCollaborator, NoCollaborator};

use crate::process::ProcessCollaborator;

/// Reported on every model turn when no provider has credentials.
pub const NO_API_KEY: &str = "No valid API key found. Set ANTHROPIC_API_KEY or OPENAI_API_KEY.";

/// How to recognise one provider in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    /// Provider name passed to the backend.
    pub name: &'static str,
    /// Variable holding the credential.
    pub key_var: &'static str,
    /// Variable overriding the model.
    pub model_var: &'static str,
    /// Model used when `model_var` is unset.
    pub default_model: &'static str,
}

/// The provider picked for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderChoice {
    /// Provider name.
    pub name: String,
    /// Model to request.
    pub model: String,
}

/// An ordered list of providers; the first with a credential wins.
#[derive(Debug, Clone)]
pub struct ProviderPolicy {
    order: Vec<ProviderSpec>,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        Self::new(vec![
            ProviderSpec {
                name: "anthropic",
                key_var: "ANTHROPIC_API_KEY",
                model_var: "ANTHROPIC_MODEL",
                default_model: "claude-3-5-sonnet-latest",
            },
            ProviderSpec {
                name: "openai",
                key_var: "OPENAI_API_KEY",
                model_var: "OPENAI_MODEL",
                default_model: "gpt-4o-mini",
            },
        ])
    }
}

impl ProviderPolicy {
    /// Create a policy with a custom order.
    pub fn new(order: Vec<ProviderSpec>) -> Self {
        Self { order }
    }

    /// Pick the first provider whose credential `lookup` finds. Empty values
    /// count as unset.
    pub fn select(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<ProviderChoice> {
        let present = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        self.order.iter().find(|spec| present(spec.key_var).is_some()).map(|spec| {
            ProviderChoice {
                name: spec.name.to_string(),
                model: present(spec.model_var).unwrap_or_else(|| spec.default_model.to_string()),
            }
        })
    }
}

/// Build the collaborator for this session.
///
/// Without credentials, or without a backend command, every model turn
/// fails with an explanatory message; manual commands keep working.
pub fn build_collaborator(
    policy: &ProviderPolicy,
    lookup: impl Fn(&str) -> Option<String>,
    model_command: Option<&str>,
) -> Arc<dyn ModelCollaborator> {
    let Some(choice) = policy.select(lookup) else {
        tracing::warn!("no provider credentials found");
        return Arc::new(NoCollaborator::new(NO_API_KEY));
    };
    tracing::debug!(provider = %choice.name, model = %choice.model, "selected provider");

    match model_command.map(str::trim).filter(|c| !c.is_empty()) {
        Some(command) => Arc::new(ProcessCollaborator::new(command, choice)),
        None => Arc::new(NoCollaborator::new(format!(
            "No model backend configured for {}. Set NLSH_MODEL_COMMAND.",
            choice.name
        ))),
    }
}
