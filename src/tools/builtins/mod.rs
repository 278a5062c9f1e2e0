//! Built-in tool implementations.
//!
//! Each sub-module implements one (or a small family of) tool(s) the
//! model can invoke.

pub mod git;
pub mod list_files;
pub mod read_file;
pub mod write_file;

use super::ToolRegistry;

/// Register every built-in tool.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Box::new(list_files::ListFiles));
    registry.register(Box::new(read_file::ReadFile));
    registry.register(Box::new(write_file::WriteFile));
    registry.register(Box::new(git::GitShowChanges));
    registry.register(Box::new(git::GitLog));
    registry.register(Box::new(git::GitCommit));
}
