//! Cheap, local probes of the live system.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use super::ContextBuildError;
use crate::config::EnvSelection;

const REDACTED: &str = "<redacted>";
const SECRET_MARKERS: &[&str] = &["KEY", "TOKEN", "SECRET", "PASSWORD"];

/// Operating system facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsDescriptor {
    /// OS family, e.g. `linux` or `macos`.
    pub family: String,
    /// CPU architecture.
    pub arch: String,
    /// Distribution or product name.
    pub release: Option<String>,
    /// Kernel version.
    pub kernel: Option<String>,
    /// Host name.
    pub hostname: Option<String>,
}

/// What a directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Anything else.
    Other,
}

/// One entry of the working directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsEntry {
    /// File name.
    pub name: String,
    /// Entry type.
    pub kind: EntryKind,
    /// Size in bytes for regular files.
    pub size: Option<u64>,
}

pub(crate) fn probe_os(errors: &mut Vec<ContextBuildError>) -> OsDescriptor {
    OsDescriptor {
        family: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        release: read_probe("os release", "/etc/os-release", errors)
            .and_then(|text| os_release_name(&text)),
        kernel: read_probe("kernel", "/proc/sys/kernel/osrelease", errors)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        hostname: read_probe("hostname", "/proc/sys/kernel/hostname", errors)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok()),
    }
}

/// Read a small system file. Absence is normal on other platforms.
fn read_probe(
    field: &'static str,
    path: &str,
    errors: &mut Vec<ContextBuildError>,
) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            errors.push(ContextBuildError::probe(field, e));
            None
        }
    }
}

fn os_release_name(text: &str) -> Option<String> {
    let value = |key: &str| {
        text.lines()
            .find_map(|l| l.strip_prefix(key))
            .map(|v| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    };
    value("PRETTY_NAME=").or_else(|| value("NAME="))
}

/// List `dir`, sorted by name, keeping at most `limit` entries.
///
/// Returns the kept entries and the total number found.
pub(crate) fn list_directory(
    dir: &Path,
    limit: usize,
) -> std::io::Result<(Vec<FsEntry>, usize)> {
    let mut entries = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let (kind, size) = match entry.file_type() {
                Ok(t) if t.is_symlink() => (EntryKind::Symlink, None),
                Ok(t) if t.is_dir() => (EntryKind::Directory, None),
                Ok(t) if t.is_file() => (EntryKind::File, entry.metadata().ok().map(|m| m.len())),
                _ => (EntryKind::Other, None),
            };
            FsEntry { name, kind, size }
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let total = entries.len();
    entries.truncate(limit);
    Ok((entries, total))
}

/// Select environment variables, masking anything that looks like a secret.
pub(crate) fn collect_environment<I>(selection: &EnvSelection, vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut all: BTreeMap<String, String> = vars.into_iter().collect();
    if let EnvSelection::Subset(keys) = selection {
        all.retain(|k, _| keys.iter().any(|wanted| wanted == k));
    }
    for (key, value) in all.iter_mut() {
        if looks_secret(key) {
            *value = REDACTED.to_string();
        }
    }
    all
}

fn looks_secret(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|m| upper.contains(m))
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_collect_environment_subset() {
        let selection = EnvSelection::Subset(vec!["HOME".into(), "MISSING".into()]);
        let env = collect_environment(&selection, vars(&[("HOME", "/h"), ("OTHER", "x")]));
        assert_eq!(env.len(), 1);
        assert_eq!(env["HOME"], "/h");
    }

    #[test]
    fn test_collect_environment_masks_secrets() {
        let env = collect_environment(
            &EnvSelection::All,
            vars(&[
                ("OPENAI_API_KEY", "sk-123"),
                ("GITHUB_TOKEN", "ghp"),
                ("db_password", "hunter2"),
                ("EDITOR", "vim"),
            ]),
        );
        assert_eq!(env["OPENAI_API_KEY"], REDACTED);
        assert_eq!(env["GITHUB_TOKEN"], REDACTED);
        assert_eq!(env["db_password"], REDACTED);
        assert_eq!(env["EDITOR"], "vim");
    }

    #[test]
    fn test_list_directory_sorted_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();

        let (entries, total) = list_directory(dir.path(), 2).unwrap();
        assert_eq!(total, 3);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[1].name, "b.txt");
        assert_eq!(entries[1].size, Some(5));

        let (entries, _) = list_directory(dir.path(), 10).unwrap();
        assert_eq!(entries[2].kind, EntryKind::Directory);
    }

    #[test]
    fn test_list_directory_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_directory(&dir.path().join("gone"), 10).is_err());
    }

    #[test]
    fn test_os_release_name() {
        let text = "NAME=\"Ubuntu\"\nPRETTY_NAME=\"Ubuntu 24.04 LTS\"\n";
        assert_eq!(os_release_name(text).as_deref(), Some("Ubuntu 24.04 LTS"));
        assert_eq!(os_release_name("NAME=Arch\n").as_deref(), Some("Arch"));
        assert_eq!(os_release_name(""), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(10), "10B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }
}
