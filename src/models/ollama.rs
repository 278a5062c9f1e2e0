//! Ollama provider: `/api/chat` with newline-delimited JSON streaming.

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio_stream::StreamExt as _;
use tracing::debug;

use super::{
    http_client, tool_definitions, ChatChunk, ChatProvider, ChatRequest, ChatStream, LineBuffer,
    ModelInfo, ToolCallDelta,
};
use crate::session::{Message, Role};

pub const DEFAULT_HOST: &str = "http://localhost:11434";

pub struct OllamaProvider {
    host: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            client: http_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }
}

/// Ollama message JSON: tool arguments stay objects, tool results carry
/// the tool name.
pub fn serialize_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({ "role": m.role.as_str(), "content": m.text() });
            if let Some(thinking) = &m.thinking {
                msg["thinking"] = json!(thinking);
            }
            if !m.tool_calls.is_empty() {
                msg["tool_calls"] = m
                    .tool_calls
                    .iter()
                    .map(|c| json!({ "function": { "name": c.name(), "arguments": c.arguments() } }))
                    .collect();
            }
            if let Some(name) = &m.tool_name {
                msg["tool_name"] = json!(name);
            }
            msg
        })
        .collect()
}

/// Routes inline `<think>...</think>` content to the thinking channel.
#[derive(Debug, Default)]
pub struct ThinkTagSplitter {
    inside: bool,
}

impl ThinkTagSplitter {
    const OPEN: &'static str = "<think>";
    const CLOSE: &'static str = "</think>";

    /// Split one content fragment into `(content, thinking)`.
    pub fn split(&mut self, mut text: &str) -> (String, String) {
        let mut content = String::new();
        let mut thinking = String::new();
        while !text.is_empty() {
            let tag = if self.inside { Self::CLOSE } else { Self::OPEN };
            let (before, after) = match text.find(tag) {
                Some(pos) => (&text[..pos], Some(&text[pos + tag.len()..])),
                None => (text, None),
            };
            if self.inside {
                thinking.push_str(before);
            } else {
                content.push_str(before);
            }
            match after {
                Some(rest) => {
                    self.inside = !self.inside;
                    text = rest;
                }
                None => break,
            }
        }
        (content, thinking)
    }
}

/// Decode one NDJSON line.  Returns the chunk and whether the stream is done.
fn parse_line(
    line: &str,
    splitter: &mut ThinkTagSplitter,
    next_index: &mut usize,
) -> anyhow::Result<(ChatChunk, bool)> {
    let parsed: Value =
        serde_json::from_str(line).with_context(|| format!("invalid Ollama stream line: {line}"))?;
    if let Some(err) = parsed.get("error").and_then(Value::as_str) {
        anyhow::bail!("Ollama error: {err}");
    }

    let message = &parsed["message"];
    let mut chunk = ChatChunk {
        role: match message["role"].as_str() {
            Some("assistant") => Some(Role::Assistant),
            _ => None,
        },
        ..Default::default()
    };

    let mut thinking = message["thinking"].as_str().unwrap_or_default().to_string();
    if let Some(text) = message["content"].as_str() {
        let (content, inline_thinking) = splitter.split(text);
        thinking.push_str(&inline_thinking);
        chunk.content = Some(content).filter(|c| !c.is_empty());
    }
    chunk.thinking = Some(thinking).filter(|t| !t.is_empty());

    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let function = &call["function"];
            let arguments = match &function["arguments"] {
                Value::String(s) => s.clone(),
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            chunk.tool_calls.push(ToolCallDelta {
                index: *next_index,
                id: call["id"].as_str().map(str::to_string),
                name: function["name"].as_str().map(str::to_string),
                arguments: Some(arguments),
            });
            *next_index += 1;
        }
    }

    Ok((chunk, parsed["done"].as_bool() == Some(true)))
}

fn context_length(show: &Value) -> Option<u64> {
    let info = show.get("model_info")?.as_object()?;
    info.iter()
        .filter(|(key, _)| key.ends_with("context_length") || key.ends_with("num_ctx"))
        .find_map(|(_, v)| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn chat<'a>(&'a self, request: ChatRequest<'a>) -> ChatStream<'a> {
        Box::pin(async_stream::try_stream! {
            let mut body = json!({
                "model": request.model,
                "messages": serialize_messages(request.messages),
                "stream": true,
                "think": request.thinking,
            });
            if !request.tools.is_empty() {
                body["tools"] = Value::Array(tool_definitions(request.tools));
            }
            if let Some(ctx) = request.context_window {
                body["options"] = json!({ "num_ctx": ctx });
            }

            let resp = self
                .client
                .post(self.url("/api/chat"))
                .json(&body)
                .send()
                .await
                .with_context(|| format!("connect to Ollama at {}", self.host))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                Err(anyhow::anyhow!("Ollama API returned {status}: {text}"))?;
                return;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut splitter = ThinkTagSplitter::default();
            let mut next_index = 0usize;

            while let Some(bytes) = byte_stream.next().await {
                lines.push(&bytes.context("read Ollama stream")?);
                while let Some(line) = lines.next_line() {
                    if line.is_empty() {
                        continue;
                    }
                    let (chunk, done) = parse_line(&line, &mut splitter, &mut next_index)?;
                    yield chunk;
                    if done {
                        return;
                    }
                }
            }
            if let Some(line) = lines.rest() {
                let (chunk, _) = parse_line(&line, &mut splitter, &mut next_index)?;
                yield chunk;
            }
        })
    }

    async fn model_info(&self, model: &str) -> anyhow::Result<ModelInfo> {
        let resp = self
            .client
            .post(self.url("/api/show"))
            .json(&json!({ "model": model }))
            .send()
            .await
            .with_context(|| format!("connect to Ollama at {}", self.host))?;

        if resp.status() == StatusCode::NOT_FOUND {
            anyhow::bail!("model '{model}' not found");
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API returned {status}: {text}");
        }

        let show: Value = resp.json().await.context("parse /api/show response")?;
        let supports_thinking = show["capabilities"]
            .as_array()
            .map(|caps| caps.iter().any(|c| c.as_str() == Some("thinking")));
        Ok(ModelInfo {
            name: model.to_string(),
            context_length: context_length(&show),
            supports_thinking,
        })
    }

    async fn available_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .with_context(|| format!("connect to Ollama at {}", self.host))?
            .error_for_status()
            .context("list Ollama models")?;
        let tags: Value = resp.json().await.context("parse /api/tags response")?;

        let names: Vec<String> = tags["models"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| m["model"].as_str().or_else(|| m["name"].as_str()))
            .map(str::to_string)
            .collect();

        let mut models = Vec::with_capacity(names.len());
        for name in names {
            match self.model_info(&name).await {
                Ok(info) => models.push(info),
                Err(e) => debug!(model = %name, error = %e, "skipping model without details"),
            }
        }
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    #[test]
    fn splitter_routes_think_blocks() {
        let mut s = ThinkTagSplitter::default();
        assert_eq!(s.split("<think>"), (String::new(), String::new()));
        assert_eq!(s.split("hmm"), (String::new(), "hmm".to_string()));
        assert_eq!(s.split("ok</think>Hello"), ("Hello".to_string(), "ok".to_string()));
        assert_eq!(s.split(" there"), (" there".to_string(), String::new()));
    }

    #[test]
    fn tool_messages_carry_names() {
        let mut args = serde_json::Map::new();
        args.insert("n".into(), json!(3));
        let call = ToolCall::new("call_1", "git_log", args);
        let msgs = serialize_messages(&[
            Message::assistant(String::new(), String::new(), vec![call.clone()]),
            Message::tool_result(&call, "abc"),
        ]);
        assert_eq!(msgs[0]["tool_calls"][0]["function"]["arguments"]["n"], 3);
        assert_eq!(msgs[1]["tool_name"], "git_log");
        assert_eq!(msgs[1]["role"], "tool");
    }

    #[test]
    fn tool_calls_get_sequential_indices() {
        let mut s = ThinkTagSplitter::default();
        let mut idx = 0;
        let line = r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"a","arguments":{}}},{"function":{"name":"b","arguments":{"x":1}}}]},"done":false}"#;
        let (chunk, done) = parse_line(line, &mut s, &mut idx).unwrap();
        assert!(!done);
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[1].index, 1);
        assert_eq!(chunk.tool_calls[1].arguments.as_deref(), Some(r#"{"x":1}"#));
        assert_eq!(idx, 2);
    }

    #[test]
    fn context_length_from_model_info() {
        let show = json!({ "model_info": { "general.architecture": "qwen3", "qwen3.context_length": 40960 } });
        assert_eq!(context_length(&show), Some(40960));
        assert_eq!(context_length(&json!({})), None);
    }
}
