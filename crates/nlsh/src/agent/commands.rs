//! Extracting runnable command lines from a model reply.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Default cap on commands taken from one reply.
pub const DEFAULT_MAX_COMMANDS: usize = 5;

const PROSE_PREFIXES: &[&str] = &["Here", "The command", "I ", "Based on", "After"];

static NUMBERING: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d+\.?\s+").ok());

/// Pull at most `cap` command lines out of `text`.
///
/// Blank lines, comments, markdown fences and lines that read as prose are
/// skipped. List numbering, bullets and wrapping backticks are stripped.
pub fn parse_commands(text: &str, cap: usize) -> Vec<String> {
    text.lines()
        .filter_map(clean_line)
        .take(cap)
        .collect()
}

fn clean_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty()
        || line.starts_with('#')
        || line.starts_with("//")
        || line.contains("```")
        || PROSE_PREFIXES.iter().any(|p| line.starts_with(p))
    {
        return None;
    }

    let line = match NUMBERING.as_ref().and_then(|re| re.find(line)) {
        Some(m) => &line[m.end()..],
        None => line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line),
    };

    let line = line.trim();
    let line = line
        .strip_prefix('`')
        .and_then(|l| l.strip_suffix('`'))
        .unwrap_or(line)
        .trim();

    (!line.is_empty()).then(|| line.to_string())
}
