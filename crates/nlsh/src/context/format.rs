//! Rendering a [`ContextSnapshot`] as text for the model.

use super::ContextSnapshot;
use super::probe::{EntryKind, format_size};
use crate::history::render_event;

/// Room kept inside the budget for the truncation marker.
const MARKER_RESERVE: usize = 80;

/// Render `snapshot` with a fixed section order. The history block is held
/// to `history_budget` characters.
pub fn format_snapshot(snapshot: &ContextSnapshot, history_budget: usize) -> String {
    let mut sections = Vec::with_capacity(6);

    sections.push(format!(
        "Working Directory: {}",
        snapshot.working_directory.display()
    ));

    let shell = &snapshot.shell;
    let mut text = format!(
        "Shell Information:\n  Name: {}\n  Path: {}",
        shell.name,
        shell.path.display()
    );
    if let Some(version) = &shell.version {
        text.push_str(&format!("\n  Version: {version}"));
    }
    if shell.fallback {
        text.push_str("\n  (no login shell found, using fallback)");
    }
    sections.push(text);

    let os = &snapshot.os;
    let mut text = format!("System Information:\n  OS: {} ({})", os.family, os.arch);
    for (label, value) in [
        ("Release", &os.release),
        ("Kernel", &os.kernel),
        ("Hostname", &os.hostname),
    ] {
        if let Some(value) = value {
            text.push_str(&format!("\n  {label}: {value}"));
        }
    }
    sections.push(text);

    if let Some(events) = snapshot.recent_history.as_deref()
        && !events.is_empty()
    {
        let blocks: Vec<String> = events.iter().map(render_event).collect();
        sections.push(format!(
            "Session History (Recent Activity):\n{}",
            fit_history(&blocks, history_budget)
        ));
    }

    if let Some(entries) = &snapshot.filesystem {
        let mut text = format!("Filesystem ({} entries):", snapshot.filesystem_total);
        for entry in entries {
            match (entry.kind, entry.size) {
                (EntryKind::Directory, _) => text.push_str(&format!("\n  {}/", entry.name)),
                (EntryKind::Symlink, _) => text.push_str(&format!("\n  {}@", entry.name)),
                (_, Some(size)) => {
                    text.push_str(&format!("\n  {} ({})", entry.name, format_size(size)))
                }
                (_, None) => text.push_str(&format!("\n  {}", entry.name)),
            }
        }
        let hidden = snapshot.filesystem_total.saturating_sub(entries.len());
        if hidden > 0 {
            text.push_str(&format!("\n  ... and {hidden} more"));
        }
        sections.push(text);
    }

    let mut text = String::from("Environment Variables:");
    for (key, value) in &snapshot.environment {
        text.push_str(&format!("\n  {key}={value}"));
    }
    sections.push(text);

    sections.join("\n\n")
}

/// Join rendered events, dropping the oldest until the result fits in
/// `budget` characters. The newest event is always kept, and a marker
/// follows whenever anything was dropped.
pub(crate) fn fit_history(blocks: &[String], budget: usize) -> String {
    let full = blocks.join("\n");
    if full.chars().count() <= budget {
        return full;
    }

    let room = budget.saturating_sub(MARKER_RESERVE);
    let mut used = 0;
    let mut kept = 0;
    for block in blocks.iter().rev() {
        let cost = block.chars().count() + 1;
        if kept > 0 && used + cost > room {
            break;
        }
        used += cost;
        kept += 1;
    }

    let omitted = blocks.len() - kept;
    let mut out = blocks[omitted..].join("\n");
    out.push_str(&format!(
        "\n[history truncated: {omitted} older {} omitted]",
        if omitted == 1 { "entry" } else { "entries" }
    ));
    out
}
