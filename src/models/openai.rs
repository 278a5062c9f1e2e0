//! OpenAI chat-completions provider with SSE streaming.

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio_stream::StreamExt as _;

use super::{
    http_client, tool_definitions, ChatChunk, ChatProvider, ChatRequest, ChatStream, LineBuffer,
    ModelInfo, ToolCallDelta,
};
use crate::session::{Message, Role};

/// Default API base for OpenAI.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider that talks to the OpenAI-compatible chat completions API.
pub struct OpenAIProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(base_url: &str, api_key: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// OpenAI message JSON: tool arguments are JSON strings and content is
/// `null` on assistant messages that only carry tool calls.  Thinking text
/// is not sent back.
pub fn serialize_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({ "role": m.role.as_str() });
            if m.tool_calls.is_empty() {
                msg["content"] = json!(m.text());
            } else {
                msg["content"] = match &m.content {
                    Some(c) if !c.is_empty() => json!(c),
                    _ => Value::Null,
                };
                msg["tool_calls"] = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name(), "arguments": c.arguments_json() }
                        })
                    })
                    .collect();
            }
            if let Some(id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

/// Decode one SSE `data:` payload.
fn parse_event(data: &str) -> anyhow::Result<Option<ChatChunk>> {
    let event: Value =
        serde_json::from_str(data).with_context(|| format!("invalid OpenAI stream event: {data}"))?;
    if let Some(err) = event.get("error") {
        let msg = err["message"].as_str().unwrap_or("unknown error");
        anyhow::bail!("OpenAI error: {msg}");
    }

    let Some(delta) = event["choices"].get(0).map(|c| &c["delta"]) else {
        return Ok(None);
    };

    let tool_calls = delta["tool_calls"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|tc| ToolCallDelta {
            index: tc["index"].as_u64().unwrap_or(0) as usize,
            id: tc["id"].as_str().map(str::to_string),
            name: tc["function"]["name"].as_str().map(str::to_string),
            arguments: tc["function"]["arguments"].as_str().map(str::to_string),
        })
        .collect();

    Ok(Some(ChatChunk {
        role: match delta["role"].as_str() {
            Some("assistant") => Some(Role::Assistant),
            _ => None,
        },
        content: delta["content"].as_str().filter(|s| !s.is_empty()).map(str::to_string),
        thinking: delta["reasoning_content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        tool_calls,
    }))
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn chat<'a>(&'a self, request: ChatRequest<'a>) -> ChatStream<'a> {
        Box::pin(async_stream::try_stream! {
            let mut body = json!({
                "model": request.model,
                "messages": serialize_messages(request.messages),
                "stream": true,
            });
            if !request.tools.is_empty() {
                body["tools"] = Value::Array(tool_definitions(request.tools));
            }

            let resp = self
                .client
                .post(self.url("/chat/completions"))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("connect to {}", self.base_url))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                Err(anyhow::anyhow!("OpenAI streaming API returned {status}: {text}"))?;
                return;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(bytes) = byte_stream.next().await {
                lines.push(&bytes.context("read OpenAI stream")?);
                while let Some(line) = lines.next_line() {
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    if let Some(chunk) = parse_event(data)? {
                        yield chunk;
                    }
                }
            }
        })
    }

    async fn model_info(&self, model: &str) -> anyhow::Result<ModelInfo> {
        let resp = self
            .client
            .get(self.url(&format!("/models/{model}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("connect to {}", self.base_url))?;

        if resp.status() == StatusCode::NOT_FOUND {
            anyhow::bail!("model '{model}' not found");
        }
        let resp = resp.error_for_status().context("query OpenAI model")?;
        let body: Value = resp.json().await.context("parse model response")?;
        Ok(ModelInfo {
            name: body["id"].as_str().unwrap_or(model).to_string(),
            context_length: None,
            supports_thinking: Some(false),
        })
    }

    async fn available_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let resp = self
            .client
            .get(self.url("/models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("connect to {}", self.base_url))?
            .error_for_status()
            .context("list OpenAI models")?;
        let body: Value = resp.json().await.context("parse models response")?;

        let mut models: Vec<ModelInfo> = body["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| m["id"].as_str())
            .map(|id| ModelInfo {
                name: id.to_string(),
                context_length: None,
                supports_thinking: Some(false),
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    #[test]
    fn assistant_tool_calls_stringify_arguments() {
        let mut args = serde_json::Map::new();
        args.insert("path".into(), json!("a.rs"));
        let call = ToolCall::new("call_9", "read_file", args);
        let msgs = serialize_messages(&[
            Message::assistant(String::new(), "private".into(), vec![call.clone()]),
            Message::tool_result(&call, "fn main() {}"),
        ]);
        assert!(msgs[0]["content"].is_null());
        assert!(msgs[0].get("thinking").is_none());
        assert_eq!(msgs[0]["tool_calls"][0]["type"], "function");
        assert_eq!(msgs[0]["tool_calls"][0]["function"]["arguments"], r#"{"path":"a.rs"}"#);
        assert_eq!(msgs[1]["tool_call_id"], "call_9");
    }

    #[test]
    fn parses_indexed_tool_call_fragments() {
        let chunk = parse_event(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"pa"}}]}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk.tool_calls[0].index, 1);
        assert_eq!(chunk.tool_calls[0].arguments.as_deref(), Some("{\"pa"));
        assert!(chunk.tool_calls[0].name.is_none());
    }

    #[test]
    fn error_events_fail() {
        assert!(parse_event(r#"{"error":{"message":"rate limited"}}"#).is_err());
        assert!(parse_event(r#"{"choices":[]}"#).unwrap().is_none());
    }
}
