//! Context assembly for model turns.
//!
//! A [`ContextSnapshot`] is built fresh for every turn from cheap local
//! probes plus a bounded read of recent history. It is never persisted.
//! Probe failures never abort the build; the failed field is left out and
//! the failure is recorded in [`ContextSnapshot::probe_errors`].

mod format;
mod probe;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{EnvSelection, SessionConfig};
use crate::executor::{ShellDescriptor, ShellExecutor};
use crate::history::{HistoryEvent, HistoryStore};

pub use format::format_snapshot;
pub use probe::{EntryKind, FsEntry, OsDescriptor};

/// A live probe that could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextBuildError {
    /// One field of the snapshot is unavailable.
    #[error("could not determine {field}: {message}")]
    Probe {
        /// Which part of the snapshot was affected.
        field: &'static str,
        /// What went wrong.
        message: String,
    },
}

impl ContextBuildError {
    pub(crate) fn probe(field: &'static str, err: impl std::fmt::Display) -> Self {
        ContextBuildError::Probe {
            field,
            message: err.to_string(),
        }
    }
}

/// Point-in-time facts about the environment plus recent history.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    /// Where commands currently run.
    pub working_directory: PathBuf,
    /// The shell commands run in.
    pub shell: ShellDescriptor,
    /// Operating system facts.
    pub os: OsDescriptor,
    /// Selected environment variables, secrets masked.
    pub environment: BTreeMap<String, String>,
    /// Listing of the working directory, None if it could not be read.
    pub filesystem: Option<Vec<FsEntry>>,
    /// Number of entries in the working directory before capping.
    pub filesystem_total: usize,
    /// Recent events, oldest first. None when no store was given or it
    /// could not be read.
    pub recent_history: Option<Vec<HistoryEvent>>,
    /// Probes that failed while building this snapshot.
    pub probe_errors: Vec<ContextBuildError>,
}

/// Builds [`ContextSnapshot`]s.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    executor: Arc<ShellExecutor>,
    history_limit: usize,
    history_char_budget: usize,
    environment: EnvSelection,
    filesystem_limit: usize,
}

impl ContextAssembler {
    /// Create an assembler reading from `executor`'s shell and directory.
    pub fn new(executor: Arc<ShellExecutor>, config: &SessionConfig) -> Self {
        Self {
            executor,
            history_limit: config.history_limit,
            history_char_budget: config.history_char_budget,
            environment: config.environment.clone(),
            filesystem_limit: config.filesystem_limit,
        }
    }

    /// Gather a fresh snapshot. History is included only when a store is
    /// given and readable.
    pub async fn build(&self, history: Option<&HistoryStore>) -> ContextSnapshot {
        let mut probe_errors = Vec::new();
        let working_directory = self.executor.working_directory();

        let (filesystem, filesystem_total) =
            match probe::list_directory(&working_directory, self.filesystem_limit) {
                Ok((entries, total)) => (Some(entries), total),
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        dir = %working_directory.display(),
                        "directory listing failed"
                    );
                    probe_errors.push(ContextBuildError::probe("filesystem", e));
                    (None, 0)
                }
            };

        let os = probe::probe_os(&mut probe_errors);
        let environment = probe::collect_environment(
            &self.environment,
            std::env::vars_os().map(|(k, v)| {
                (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned())
            }),
        );

        let recent_history = match history {
            Some(store) => match store.recent(self.history_limit).await {
                Ok(events) => Some(events),
                Err(e) => {
                    tracing::warn!(error = %e, "history unavailable, building context without it");
                    probe_errors.push(ContextBuildError::probe("history", e));
                    None
                }
            },
            None => None,
        };

        ContextSnapshot {
            working_directory,
            shell: self.executor.shell().clone(),
            os,
            environment,
            filesystem,
            filesystem_total,
            recent_history,
            probe_errors,
        }
    }

    /// Render a snapshot using this assembler's history budget.
    pub fn format_for_model(&self, snapshot: &ContextSnapshot) -> String {
        format_snapshot(snapshot, self.history_char_budget)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::*;
    use crate::executor::CommandResult;

    fn assembler(dir: &std::path::Path, config: &SessionConfig) -> ContextAssembler {
        let executor = Arc::new(ShellExecutor::new(ShellDescriptor::fallback(), dir));
        ContextAssembler::new(executor, config)
    }

    fn result(command: &str) -> CommandResult {
        CommandResult {
            command: command.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            working_directory: PathBuf::from("/tmp"),
            timestamp: Utc::now(),
            interrupted: false,
            duration_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_build_without_history() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        let assembler = assembler(dir.path(), &SessionConfig::default());

        let snapshot = assembler.build(None).await;
        assert_eq!(snapshot.working_directory, dir.path());
        assert!(snapshot.recent_history.is_none());
        let fs = snapshot.filesystem.as_ref().unwrap();
        assert_eq!(fs[0].name, "notes.txt");

        let text = assembler.format_for_model(&snapshot);
        assert!(!text.contains("Session History"));
        assert!(text.contains("notes.txt (2B)"));
    }

    #[tokio::test]
    async fn test_section_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open_in_memory().unwrap();
        store.log_shell("echo hi", result("echo hi")).await.unwrap();
        let assembler = assembler(dir.path(), &SessionConfig::default());

        let text = assembler.format_for_model(&assembler.build(Some(&store)).await);
        let positions: Vec<usize> = [
            "Working Directory:",
            "Shell Information:",
            "System Information:",
            "Session History (Recent Activity):",
            "Filesystem (",
            "Environment Variables:",
        ]
        .iter()
        .map(|header| text.find(header).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{text}");
        assert!(text.contains("Manual: echo hi"));
    }

    #[tokio::test]
    async fn test_missing_directory_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let assembler = assembler(&gone, &SessionConfig::default());

        let snapshot = assembler.build(None).await;
        assert!(snapshot.filesystem.is_none());
        assert!(
            snapshot
                .probe_errors
                .iter()
                .any(|e| matches!(e, ContextBuildError::Probe { field: "filesystem", .. }))
        );
        let text = assembler.format_for_model(&snapshot);
        assert!(text.contains("Working Directory:"));
        assert!(!text.contains("Filesystem ("));
    }

    #[tokio::test]
    async fn test_history_limit_applied() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open_in_memory().unwrap();
        for i in 0..5 {
            let cmd = format!("echo {i}");
            store.log_shell(cmd.clone(), result(&cmd)).await.unwrap();
        }
        let config = SessionConfig {
            history_limit: 2,
            ..Default::default()
        };
        let snapshot = assembler(dir.path(), &config).build(Some(&store)).await;
        let events = snapshot.recent_history.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].id < events[1].id);
    }
}
