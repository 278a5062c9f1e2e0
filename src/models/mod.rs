//! Model provider abstractions.
//!
//! Defines the [`ChatProvider`] trait, the streamed [`ChatChunk`] type and
//! the two concrete backends ([`OllamaProvider`], [`OpenAIProvider`]).
//! Providers translate [`Message`]s into their own wire format and turn
//! the backend's streaming response into chunks; reassembly happens in
//! the conversation loop.

pub mod ollama;
pub mod openai;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::session::{Message, Role};
use crate::tools::ToolDescriptor;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

// ---------------------------------------------------------------------------
// Streamed chunks
// ---------------------------------------------------------------------------

/// Fragment of a tool call.  Fragments sharing an `index` belong to the
/// same call; `arguments` pieces are concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One streamed piece of an assistant reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    pub role: Option<Role>,
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
}

impl ChatChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            thinking: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Default::default()
        }
    }
}

pub type ChatStream<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<ChatChunk>> + Send + 'a>>;

/// Everything one model round needs.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolDescriptor],
    pub thinking: bool,
    pub model: &'a str,
    pub context_window: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub context_length: Option<u64>,
    pub supports_thinking: Option<bool>,
}

// ---------------------------------------------------------------------------
// ChatProvider trait
// ---------------------------------------------------------------------------

/// Trait implemented by every LLM backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Binding string recorded in session metadata.
    fn name(&self) -> &str;

    /// Stream one assistant reply for `request`.
    fn chat<'a>(&'a self, request: ChatRequest<'a>) -> ChatStream<'a>;

    async fn model_info(&self, model: &str) -> anyhow::Result<ModelInfo>;

    async fn available_models(&self) -> anyhow::Result<Vec<ModelInfo>>;
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAI => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAI),
            other => anyhow::bail!("'{other}' is not one of ollama, openai"),
        }
    }
}

/// Construct the provider selected by `config`.
pub fn build_provider(config: &Config) -> anyhow::Result<Box<dyn ChatProvider>> {
    Ok(match config.provider {
        ProviderKind::Ollama => Box::new(OllamaProvider::new(&config.ollama_host)),
        ProviderKind::OpenAI => {
            let key = config.openai_api_key.clone().ok_or_else(|| {
                anyhow::anyhow!("openai provider selected but no API key is configured (set OCLA_OPENAI_API_KEY or OPENAI_API_KEY)")
            })?;
            Box::new(OpenAIProvider::new(&config.openai_base_url, key))
        }
    })
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Function definitions in the `{"type": "function", ...}` shape both
/// backends accept.
pub(crate) fn tool_definitions(tools: &[ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

/// Splits a byte stream into trimmed text lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Whatever is left once the stream has ended.
    pub fn rest(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&std::mem::take(&mut self.buf))
            .trim()
            .to_string();
        (!line.is_empty()).then_some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_handles_split_utf8() {
        let mut lb = LineBuffer::default();
        let text = "héllo\nwor".as_bytes();
        lb.push(&text[..2]);
        assert!(lb.next_line().is_none());
        lb.push(&text[2..]);
        assert_eq!(lb.next_line().as_deref(), Some("héllo"));
        assert!(lb.next_line().is_none());
        assert_eq!(lb.rest().as_deref(), Some("wor"));
        assert!(lb.rest().is_none());
    }

    #[test]
    fn provider_kind_parses() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert!("anthropic".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn tool_definitions_shape() {
        let defs = tool_definitions(&[ToolDescriptor {
            name: "read_file".into(),
            description: "read".into(),
            parameters: json!({"type": "object"}),
            permission: crate::tools::PermissionClass::Autonomous,
        }]);
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["function"]["name"], "read_file");
    }
}
