//! Transcript entries: [`Message`], [`Role`] and [`ToolCall`].
//!
//! These are the persisted shapes.  Provider modules translate them into
//! whatever wire format their backend expects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Name and structured arguments of a requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A tool invocation emitted by the model inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within the transcript; tool results refer back to it.
    #[serde(default)]
    pub id: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.function.arguments
    }

    /// Compact JSON rendering of the arguments, used in logs and prompts.
    pub fn arguments_json(&self) -> String {
        serde_json::to_string(&self.function.arguments).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One transcript entry.
///
/// `thinking` is kept apart from `content` so reasoning text never leaks
/// into the visible reply or the token estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `role: tool` only.  Older transcripts stored this as `name`.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Set on `role: tool` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            thinking: None,
            tool_calls: Vec::new(),
            tool_name: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Assistant reply.  Empty strings are stored as absent fields.
    pub fn assistant(content: String, thinking: String, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content).filter(|c| !c.is_empty()),
            thinking: Some(thinking).filter(|t| !t.is_empty()),
            tool_calls,
            tool_name: None,
            tool_call_id: None,
        }
    }

    /// Result of executing `call`, bound to it by id.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            thinking: None,
            tool_calls: Vec::new(),
            tool_name: Some(call.name().to_string()),
            tool_call_id: Some(call.id.clone()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}
