//! The boundary with the language model.
//!
//! The model itself lives outside this crate behind [`ModelCollaborator`].
//! This module defines what crosses that boundary: requests carrying the
//! rendered context, replies that are either final text or tool calls, the
//! built-in tools the model may call, and [`parse_commands`] for turning a
//! command-mode reply into runnable lines.

mod collaborator;
mod commands;
mod tools;

pub use collaborator::{
    Mode, ModelCollaborator, ModelError, ModelReply, ModelRequest, NoCollaborator, ToolCall,
    ToolExchange, system_prompt,
};
pub use commands::{DEFAULT_MAX_COMMANDS, parse_commands};
pub use tools::{
    DIRECTORY_TREE, EXECUTE_SHELL_COMMAND, FIND_FILES, GET_SYSTEM_INFO, GIT_LOG, GIT_STATUS,
    LIST_FILES, LocalTools, READ_FILE, ToolDefinition, ToolError, ToolRegistry, VecToolRegistry,
    builtin_tools,
};
