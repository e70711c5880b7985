//! Tool definitions offered to the model, and their local implementations.
//!
//! - [`ToolDefinition`] - A tool's schema (name, description, JSON Schema parameters)
//! - [`ToolRegistry`] - Trait for listing and retrieving tool definitions
//! - [`VecToolRegistry`] - Simple in-memory implementation
//! - [`LocalTools`] - Runs the read-only built-in tools against the filesystem
//!
//! `execute_shell_command` is declared here but run by the session, since it
//! must pass through the confirmation gate.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::collaborator::ToolCall;

/// List a directory.
pub const LIST_FILES: &str = "list_files";
/// Read a text file.
pub const READ_FILE: &str = "read_file";
/// Find files by glob pattern.
pub const FIND_FILES: &str = "find_files";
/// Show a directory tree.
pub const DIRECTORY_TREE: &str = "directory_tree";
/// `git status`.
pub const GIT_STATUS: &str = "git_status";
/// `git log`.
pub const GIT_LOG: &str = "git_log";
/// OS, hardware and user facts.
pub const GET_SYSTEM_INFO: &str = "get_system_info";
/// Run a shell command after confirmation.
pub const EXECUTE_SHELL_COMMAND: &str = "execute_shell_command";

const DEFAULT_MAX_BYTES: u64 = 10_000;
const MAX_FIND_RESULTS: usize = 100;
const MAX_TREE_ENTRIES: usize = 200;
const MAX_TREE_DEPTH: u64 = 5;

/// Full definition of a tool including its parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique identifier).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a tool definition with no parameters.
    pub fn no_params(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(
            name,
            description,
            json!({ "type": "object", "properties": {}, "required": [] }),
        )
    }
}

/// Trait for providing tool definitions to the model.
pub trait ToolRegistry: Send + Sync {
    /// Get the full definition of a specific tool.
    fn get_tool(&self, name: &str) -> Option<ToolDefinition>;

    /// Every full definition, in registration order.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Check if a tool exists.
    fn has_tool(&self, name: &str) -> bool {
        self.get_tool(name).is_some()
    }
}

/// Simple in-memory tool registry backed by a Vec.
#[derive(Debug, Default, Clone)]
pub struct VecToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl VecToolRegistry {
    /// Create a tool registry from a collection of tool definitions.
    pub fn with_tools(tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        Self {
            tools: tools.into_iter().collect(),
        }
    }
}

impl ToolRegistry for VecToolRegistry {
    fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.clone()
    }
}

fn path_param(description: &str) -> Value {
    json!({ "type": "string", "description": description, "default": "." })
}

/// The built-in tools.
pub fn builtin_tools() -> VecToolRegistry {
    VecToolRegistry::with_tools([
        ToolDefinition::new(
            LIST_FILES,
            "List files and directories in a directory",
            json!({
                "type": "object",
                "properties": {
                    "path": path_param("Directory to list"),
                    "show_hidden": { "type": "boolean", "default": false }
                },
                "required": []
            }),
        ),
        ToolDefinition::new(
            READ_FILE,
            "Read the contents of a text file",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File to read" },
                    "max_bytes": { "type": "integer", "default": DEFAULT_MAX_BYTES }
                },
                "required": ["path"]
            }),
        ),
        ToolDefinition::new(
            FIND_FILES,
            "Find files matching a glob pattern such as *.py",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Glob pattern" },
                    "path": path_param("Directory to search under")
                },
                "required": ["pattern"]
            }),
        ),
        ToolDefinition::new(
            DIRECTORY_TREE,
            "Show the directory structure as a tree",
            json!({
                "type": "object",
                "properties": {
                    "path": path_param("Root of the tree"),
                    "depth": { "type": "integer", "default": 2 }
                },
                "required": []
            }),
        ),
        ToolDefinition::no_params(GIT_STATUS, "Show git status of the current repository"),
        ToolDefinition::new(
            GIT_LOG,
            "Show recent git commits",
            json!({
                "type": "object",
                "properties": { "count": { "type": "integer", "default": 10 } },
                "required": []
            }),
        ),
        ToolDefinition::no_params(GET_SYSTEM_INFO, "Get operating system and hardware information"),
        ToolDefinition::new(
            EXECUTE_SHELL_COMMAND,
            "Run a shell command in the current directory. The user is asked to confirm it.",
            json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            }),
        ),
    ])
}

/// Errors from running a local tool. Reported to the model as text.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A required argument is absent or has the wrong type.
    #[error("missing or invalid argument '{0}'")]
    Argument(&'static str),
    /// A filesystem operation failed.
    #[error("{path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The glob pattern is malformed.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    /// git failed or is not installed.
    #[error("git: {0}")]
    Git(String),
    /// No tool has this name.
    #[error("unknown tool '{0}'")]
    Unknown(String),
    /// The worker running the tool failed.
    #[error("tool task failed: {0}")]
    Task(String),
}

/// Runs the read-only built-in tools.
#[derive(Debug, Clone)]
pub struct LocalTools {
    timeout: Duration,
}

impl LocalTools {
    /// Create with a timeout for helper processes such as git.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `call` with relative paths resolved against `cwd`.
    ///
    /// Never fails: errors come back as text starting with `Error:`.
    pub async fn invoke(&self, cwd: &Path, call: &ToolCall) -> String {
        match self.try_invoke(cwd, call).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "tool failed");
                format!("Error: {e}")
            }
        }
    }

    async fn try_invoke(&self, cwd: &Path, call: &ToolCall) -> Result<String, ToolError> {
        let args = &call.arguments;
        match call.name.as_str() {
            LIST_FILES => {
                let dir = resolve(cwd, opt_str(args, "path"));
                let show_hidden = args
                    .get("show_hidden")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                blocking(move || list_files(&dir, show_hidden)).await
            }
            READ_FILE => {
                let path = resolve(cwd, Some(req_str(args, "path")?));
                let max_bytes = opt_u64(args, "max_bytes").unwrap_or(DEFAULT_MAX_BYTES);
                read_file(&path, max_bytes).await
            }
            FIND_FILES => {
                let pattern = req_str(args, "pattern")?.to_string();
                let base = resolve(cwd, opt_str(args, "path"));
                blocking(move || find_files(&base, &pattern)).await
            }
            DIRECTORY_TREE => {
                let root = resolve(cwd, opt_str(args, "path"));
                let depth = opt_u64(args, "depth").unwrap_or(2).min(MAX_TREE_DEPTH);
                blocking(move || directory_tree(&root, depth)).await
            }
            GIT_STATUS => self.git(cwd, &["status", "--short", "--branch"]).await,
            GIT_LOG => {
                let count = opt_u64(args, "count").unwrap_or(10).max(1).to_string();
                let text = self.git(cwd, &["log", "--oneline", "-n", count.as_str()]).await?;
                Ok(if text.is_empty() { "(no commits)".to_string() } else { text })
            }
            GET_SYSTEM_INFO => Ok(system_info()),
            other => Err(ToolError::Unknown(other.to_string())),
        }
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String, ToolError> {
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| ToolError::Git(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ToolError::Git(e.to_string()))?;
        if !output.status.success() {
            return Err(ToolError::Git(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

async fn blocking<F>(f: F) -> Result<String, ToolError>
where
    F: FnOnce() -> Result<String, ToolError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::Task(e.to_string()))?
}

fn resolve(cwd: &Path, path: Option<&str>) -> PathBuf {
    match path {
        None | Some("") | Some(".") => cwd.to_path_buf(),
        Some(p) => {
            if let Some(rest) = p.strip_prefix("~/")
                && let Some(home) = dirs::home_dir()
            {
                return home.join(rest);
            }
            cwd.join(p)
        }
    }
}

fn opt_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn req_str<'a>(args: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, ToolError> {
    opt_str(args, key)
        .filter(|s| !s.is_empty())
        .ok_or(ToolError::Argument(key))
}

fn opt_u64(args: &Map<String, Value>, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ToolError + '_ {
    move |source| ToolError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn sorted_entries(dir: &Path, show_hidden: bool) -> Result<Vec<(String, bool)>, ToolError> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(io_err(dir))?
        .flatten()
        .map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let is_dir = e.file_type().is_ok_and(|t| t.is_dir());
            (name, is_dir)
        })
        .filter(|(name, _)| show_hidden || !name.starts_with('.'))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn list_files(dir: &Path, show_hidden: bool) -> Result<String, ToolError> {
    let entries = sorted_entries(dir, show_hidden)?;
    if entries.is_empty() {
        return Ok("(empty directory)".to_string());
    }
    let lines: Vec<String> = entries
        .into_iter()
        .map(|(name, is_dir)| if is_dir { format!("{name}/") } else { name })
        .collect();
    Ok(lines.join("\n"))
}

async fn read_file(path: &Path, max_bytes: u64) -> Result<String, ToolError> {
    let bytes = tokio::fs::read(path).await.map_err(io_err(path))?;
    let limit = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    if bytes.len() <= limit {
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }
    let mut text = String::from_utf8_lossy(&bytes[..limit]).into_owned();
    text.push_str(&format!("\n... (truncated, {} bytes total)", bytes.len()));
    Ok(text)
}

fn find_files(base: &Path, pattern: &str) -> Result<String, ToolError> {
    let full = if pattern.contains('/') {
        base.join(pattern)
    } else {
        base.join("**").join(pattern)
    };
    let mut found = Vec::new();
    let mut total = 0;
    for path in glob::glob(&full.to_string_lossy())?.flatten() {
        total += 1;
        if found.len() < MAX_FIND_RESULTS {
            let shown = path.strip_prefix(base).unwrap_or(&path);
            found.push(shown.display().to_string());
        }
    }
    if found.is_empty() {
        return Ok(format!("No files matching '{pattern}'"));
    }
    let mut text = found.join("\n");
    if total > found.len() {
        text.push_str(&format!("\n... and {} more", total - found.len()));
    }
    Ok(text)
}

fn directory_tree(root: &Path, depth: u64) -> Result<String, ToolError> {
    let name = match root.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => root.display().to_string(),
    };
    let mut lines = vec![format!("{name}/")];
    // Fail on an unreadable root; unreadable subdirectories are skipped.
    let top = sorted_entries(root, false)?;
    walk_tree(root, top, depth, "", &mut lines);
    if lines.len() > MAX_TREE_ENTRIES {
        lines.truncate(MAX_TREE_ENTRIES);
        lines.push("... (truncated)".to_string());
    }
    Ok(lines.join("\n"))
}

fn walk_tree(
    dir: &Path,
    entries: Vec<(String, bool)>,
    depth: u64,
    prefix: &str,
    lines: &mut Vec<String>,
) {
    let count = entries.len();
    for (i, (name, is_dir)) in entries.into_iter().enumerate() {
        if lines.len() > MAX_TREE_ENTRIES {
            return;
        }
        let last = i + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        let suffix = if is_dir { "/" } else { "" };
        lines.push(format!("{prefix}{branch}{name}{suffix}"));

        if is_dir && depth > 1 {
            let child = dir.join(&name);
            if let Ok(children) = sorted_entries(&child, false) {
                let next = format!("{prefix}{}", if last { "    " } else { "│   " });
                walk_tree(&child, children, depth - 1, &next, lines);
            }
        }
    }
}

fn system_info() -> String {
    let cpus = std::thread::available_parallelism().map_or(0, |n| n.get());
    let mut lines = vec![
        format!("OS: {}", std::env::consts::OS),
        format!("Architecture: {}", std::env::consts::ARCH),
        format!("CPUs: {cpus}"),
    ];
    if let Ok(user) = std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
        lines.push(format!("User: {user}"));
    }
    if let Some(home) = dirs::home_dir() {
        lines.push(format!("Home: {}", home.display()));
    }
    if let Ok(shell) = std::env::var("SHELL") {
        lines.push(format!("Shell: {shell}"));
    }
    lines.join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments: args.as_object().cloned().unwrap_or_default(),
        }
    }

    fn tools() -> LocalTools {
        LocalTools::new(Duration::from_secs(5))
    }

    fn sample_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/agent")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub mod agent;\n").unwrap();
        std::fs::write(dir.path().join("src/agent/mod.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        dir
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_tools();
        assert_eq!(registry.definitions().len(), 8);
        assert!(registry.has_tool(EXECUTE_SHELL_COMMAND));
        let read = registry.get_tool(READ_FILE).unwrap();
        assert_eq!(read.parameters["required"][0], "path");
        assert!(!registry.has_tool("rm"));
    }

    #[tokio::test]
    async fn test_list_files() {
        let dir = sample_dir();
        let out = tools().invoke(dir.path(), &call(LIST_FILES, json!({}))).await;
        assert_eq!(out, "README.md\nsrc/");

        let out = tools()
            .invoke(dir.path(), &call(LIST_FILES, json!({"show_hidden": true})))
            .await;
        assert!(out.starts_with(".hidden\n"));
    }

    #[tokio::test]
    async fn test_read_file_truncates() {
        let dir = sample_dir();
        let out = tools()
            .invoke(dir.path(), &call(READ_FILE, json!({"path": "src/lib.rs", "max_bytes": 3})))
            .await;
        assert!(out.starts_with("pub\n... (truncated, 15 bytes total)"));

        let out = tools()
            .invoke(dir.path(), &call(READ_FILE, json!({"path": "README.md"})))
            .await;
        assert_eq!(out, "# demo\n");
    }

    #[tokio::test]
    async fn test_find_files() {
        let dir = sample_dir();
        let out = tools()
            .invoke(dir.path(), &call(FIND_FILES, json!({"pattern": "*.rs"})))
            .await;
        let mut lines: Vec<&str> = out.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["src/agent/mod.rs", "src/lib.rs"]);

        let out = tools()
            .invoke(dir.path(), &call(FIND_FILES, json!({"pattern": "*.py"})))
            .await;
        assert_eq!(out, "No files matching '*.py'");
    }

    #[tokio::test]
    async fn test_directory_tree() {
        let dir = sample_dir();
        let out = tools()
            .invoke(dir.path(), &call(DIRECTORY_TREE, json!({"path": "src", "depth": 3})))
            .await;
        assert_eq!(out, "src/\n├── agent/\n│   └── mod.rs\n└── lib.rs");

        let shallow = tools()
            .invoke(dir.path(), &call(DIRECTORY_TREE, json!({"path": "src", "depth": 1})))
            .await;
        assert!(!shallow.contains("mod.rs"));
    }

    #[tokio::test]
    async fn test_errors_become_text() {
        let dir = sample_dir();
        let out = tools()
            .invoke(dir.path(), &call(READ_FILE, json!({"path": "nope.txt"})))
            .await;
        assert!(out.starts_with("Error: "), "{out}");

        let out = tools().invoke(dir.path(), &call(READ_FILE, json!({}))).await;
        assert_eq!(out, "Error: missing or invalid argument 'path'");

        let out = tools().invoke(dir.path(), &call("launch_rockets", json!({}))).await;
        assert_eq!(out, "Error: unknown tool 'launch_rockets'");
    }

    #[tokio::test]
    async fn test_system_info() {
        let dir = sample_dir();
        let out = tools().invoke(dir.path(), &call(GET_SYSTEM_INFO, json!({}))).await;
        assert!(out.contains(std::env::consts::OS));
    }
}
