use thiserror::Error;

/// Failures that end a turn and that callers need to tell apart.
///
/// They travel inside `anyhow::Error`; recover them with
/// `err.downcast_ref::<SessionError>()`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Context window exceeded ({current} / {ceiling}). Please start a new session")]
    ContextWindowExceeded { current: usize, ceiling: usize },

    #[error(
        "Session {name} was created with provider '{expected}' but current provider is '{actual}'."
    )]
    ProviderMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("tool result '{tool_call_id}' does not answer a call from the preceding assistant message")]
    OrphanToolResult { tool_call_id: String },
}
