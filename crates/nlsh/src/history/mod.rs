//! Durable log of shell commands, model interactions and tool calls.
//!
//! Events are appended to a SQLite database and never edited. Ids are
//! assigned by the store and strictly increase, so "most recent" is always
//! "highest id".
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), nlsh::history::StorageError> {
//! use nlsh::history::{HistoryStore, render_events};
//!
//! let store = HistoryStore::open("/tmp/nlsh-history.db")?;
//! let recent = store.recent(10).await?;
//! println!("{}", render_events(&recent));
//! # Ok(())
//! # }
//! ```

mod event;
mod render;
mod store;

pub use event::{
    EventId, EventKind, HistoryEvent, HistoryStats, InteractionEvent, KindCounts, ShellEvent,
    ToolCallEvent,
};
pub use render::{render_event, render_events, render_stats, status_glyph};
pub use store::{HistoryStore, Result, StorageError};
