//! Detection of the user's interactive shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Shells searched for on `PATH` when `$SHELL` is unusable, in order.
const CANDIDATE_SHELLS: &[&str] = &["bash", "zsh", "fish", "sh"];

/// Upper bound for the `--version` probe. The probe is informational only.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Description of the shell commands are executed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellDescriptor {
    /// Short name, e.g. `bash`.
    pub name: String,
    /// Absolute path of the shell executable.
    pub path: PathBuf,
    /// First line of `<shell> --version`, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// True when detection failed and the fixed default was chosen.
    #[serde(default)]
    pub fallback: bool,
}

impl ShellDescriptor {
    /// Locate the shell and probe its version.
    ///
    /// Never fails: if nothing usable is found the POSIX default is returned
    /// with [`fallback`](Self::fallback) set.
    pub async fn detect() -> Self {
        let mut shell = Self::locate();
        shell.version = probe_version(&shell.path).await;
        tracing::debug!(
            name = %shell.name,
            path = %shell.path.display(),
            version = ?shell.version,
            fallback = shell.fallback,
            "detected shell"
        );
        shell
    }

    /// Locate the shell without spawning anything.
    pub fn locate() -> Self {
        std::env::var_os("SHELL")
            .map(PathBuf::from)
            .filter(|path| path.is_file())
            .map(Self::from_path)
            .or_else(search_path)
            .unwrap_or_else(Self::fallback)
    }

    /// Build a descriptor for a known shell executable.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sh".to_string());
        Self {
            name,
            path,
            version: None,
            fallback: false,
        }
    }

    /// The fixed default used when detection fails.
    #[cfg(not(windows))]
    pub fn fallback() -> Self {
        Self {
            name: "sh".to_string(),
            path: PathBuf::from("/bin/sh"),
            version: None,
            fallback: true,
        }
    }

    /// The fixed default used when detection fails.
    #[cfg(windows)]
    pub fn fallback() -> Self {
        let path = std::env::var_os("COMSPEC")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cmd.exe"));
        Self {
            name: "cmd".to_string(),
            path,
            version: None,
            fallback: true,
        }
    }

    /// The flag that makes this shell run the following argument as a script.
    pub(crate) fn command_flag(&self) -> &'static str {
        match self.name.to_ascii_lowercase().as_str() {
            "cmd" => "/C",
            "powershell" | "pwsh" => "-Command",
            _ => "-c",
        }
    }
}

fn search_path() -> Option<ShellDescriptor> {
    CANDIDATE_SHELLS
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(ShellDescriptor::from_path)
}

async fn probe_version(path: &Path) -> Option<String> {
    let output = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(VERSION_PROBE_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return None,
        Ok(Err(e)) => {
            tracing::debug!(path = %path.display(), error = %e, "shell version probe failed");
            return None;
        }
        Err(_) => {
            tracing::debug!(path = %path.display(), "shell version probe timed out");
            return None;
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
