//! Turn engine: drives one user turn through as many model rounds as the
//! model needs.
//!
//! Each round streams a reply from the [`ChatProvider`], coalesces it into
//! one assistant message and appends it.  When the reply requests tools,
//! every call is preflighted, confirmed and executed in model order, its
//! result appended, and the model is asked again.  A reply without tool
//! calls ends the turn.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};
use tokio_stream::StreamExt as _;
use tracing::{debug, info};

use crate::models::{ChatChunk, ChatProvider, ChatRequest};
use crate::permission::PermissionPolicy;
use crate::session::{Message, Session, ToolCall};
use crate::tools::{ToolDescriptor, ToolRegistry};

/// Tool result recorded when the user refuses a call.
pub const SKIPPED_RESULT: &str = "skipped tool execution because the user did not allow it";

/// Receives progress while a turn runs.
pub trait TurnObserver: Send {
    fn on_content(&mut self, _text: &str) {}
    fn on_thinking(&mut self, _text: &str) {}
    fn on_tool_start(&mut self, _call: &ToolCall) {}
    fn on_tool_result(&mut self, _call: &ToolCall, _result: &str) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

// ── Reply accumulation ───────────────────────────────────────

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Coalesces streamed chunks into one assistant [`Message`].
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    content: String,
    thinking: String,
    calls: BTreeMap<usize, PartialCall>,
}

impl ReplyAccumulator {
    pub fn push(&mut self, chunk: &ChatChunk) {
        if let Some(c) = &chunk.content {
            self.content.push_str(c);
        }
        if let Some(t) = &chunk.thinking {
            self.thinking.push_str(t);
        }
        for delta in &chunk.tool_calls {
            let call = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
                call.id.get_or_insert_with(|| id.to_string());
            }
            if let Some(name) = delta.name.as_deref() {
                if call.name.is_empty() {
                    call.name = name.to_string();
                }
            }
            if let Some(args) = &delta.arguments {
                call.arguments.push_str(args);
            }
        }
    }

    /// Build the message.  Calls without an id get a synthetic one;
    /// arguments must parse as a JSON object.
    pub fn finish(self) -> anyhow::Result<Message> {
        let mut seen = HashSet::new();
        let mut tool_calls = Vec::with_capacity(self.calls.len());

        for (index, partial) in self.calls {
            if partial.name.is_empty() {
                anyhow::bail!("tool call #{index} from the model has no function name");
            }
            let arguments = parse_arguments(&partial.name, &partial.arguments)?;
            let id = match partial.id {
                Some(id) if !seen.contains(&id) => id,
                _ => format!("call_{}", uuid::Uuid::new_v4().simple()),
            };
            seen.insert(id.clone());
            tool_calls.push(ToolCall::new(id, partial.name, arguments));
        }

        Ok(Message::assistant(self.content, self.thinking, tool_calls))
    }
}

fn parse_arguments(name: &str, raw: &str) -> anyhow::Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => anyhow::bail!("arguments for tool '{name}' are not a JSON object: {other}"),
        Err(e) => anyhow::bail!("arguments for tool '{name}' are not valid JSON ({e}): {raw}"),
    }
}

// ── Conversation ─────────────────────────────────────────────

/// Per-turn model settings.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub model: String,
    /// Request thinking output from the backend.
    pub thinking: bool,
    pub context_window: Option<usize>,
}

pub struct Conversation<'a> {
    provider: &'a dyn ChatProvider,
    tools: &'a ToolRegistry,
    policy: &'a PermissionPolicy,
    options: TurnOptions,
}

impl<'a> Conversation<'a> {
    pub fn new(
        provider: &'a dyn ChatProvider,
        tools: &'a ToolRegistry,
        policy: &'a PermissionPolicy,
        options: TurnOptions,
    ) -> Self {
        Self {
            provider,
            tools,
            policy,
            options,
        }
    }

    /// Run one turn for `prompt` and return the assistant text of every
    /// round, concatenated.
    ///
    /// Errors from the backend, from reply assembly and from appends
    /// (including the context ceiling) end the turn.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        prompt: &str,
        observer: &mut dyn TurnObserver,
    ) -> anyhow::Result<String> {
        session.append(Message::user(prompt)).await?;

        let descriptors = self.tools.descriptors();
        let mut reply = String::new();
        let mut round = 0usize;

        loop {
            round += 1;
            let message = self.request_reply(session, &descriptors, observer).await?;
            let calls = message.tool_calls.clone();
            if let Some(content) = &message.content {
                reply.push_str(content);
            }
            session.append(message).await?;

            if calls.is_empty() {
                info!(session = %session.name(), rounds = round, tokens = session.tokens(), "turn complete");
                return Ok(reply);
            }

            debug!(round, calls = calls.len(), "model requested tools");
            for call in &calls {
                let result = self.dispatch(call, observer).await;
                session.append(Message::tool_result(call, result)).await?;
            }
        }
    }

    async fn request_reply(
        &self,
        session: &Session,
        descriptors: &[ToolDescriptor],
        observer: &mut dyn TurnObserver,
    ) -> anyhow::Result<Message> {
        let request = ChatRequest {
            messages: session.messages(),
            tools: descriptors,
            thinking: self.options.thinking,
            model: &self.options.model,
            context_window: self.options.context_window,
        };

        let mut stream = self.provider.chat(request);
        let mut acc = ReplyAccumulator::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(t) = &chunk.thinking {
                observer.on_thinking(t);
            }
            if let Some(c) = &chunk.content {
                observer.on_content(c);
            }
            acc.push(&chunk);
        }
        acc.finish()
    }

    /// Preflight, confirm and execute one call; returns the tool message
    /// content.
    async fn dispatch(&self, call: &ToolCall, observer: &mut dyn TurnObserver) -> String {
        if let Some(reason) = self.tools.preflight(call) {
            debug!(tool = %call.name(), %reason, "tool call rejected in preflight");
            observer.on_tool_result(call, &reason);
            return reason;
        }
        let Some(tool) = self.tools.get(call.name()) else {
            return format!("Unknown tool: {}", call.name());
        };

        if !self.policy.confirm(tool, self.tools.root(), call).await {
            observer.on_tool_result(call, SKIPPED_RESULT);
            return SKIPPED_RESULT.to_string();
        }

        observer.on_tool_start(call);
        let output = self.tools.execute(call).await;
        let content = output.content().to_string();
        observer.on_tool_result(call, &content);
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolCallDelta;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ChatChunk {
        ChatChunk::tool_call(ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: args.map(str::to_string),
        })
    }

    #[test]
    fn coalesces_content_and_thinking() {
        let mut acc = ReplyAccumulator::default();
        acc.push(&ChatChunk::thinking("let me "));
        acc.push(&ChatChunk::thinking("see"));
        acc.push(&ChatChunk::content("po"));
        acc.push(&ChatChunk::content("ng"));
        let m = acc.finish().unwrap();
        assert_eq!(m.content.as_deref(), Some("pong"));
        assert_eq!(m.thinking.as_deref(), Some("let me see"));
        assert!(m.tool_calls.is_empty());
    }

    #[test]
    fn reassembles_fragments_per_index() {
        let mut acc = ReplyAccumulator::default();
        acc.push(&delta(0, Some("call_a"), Some("read_file"), Some("{\"pa")));
        acc.push(&delta(1, Some("call_b"), Some("git_log"), Some("")));
        acc.push(&delta(0, None, None, Some("th\": \"x.rs\"}")));
        let m = acc.finish().unwrap();
        assert_eq!(m.tool_calls.len(), 2);
        assert_eq!(m.tool_calls[0].id, "call_a");
        assert_eq!(m.tool_calls[0].arguments()["path"], "x.rs");
        assert_eq!(m.tool_calls[1].name(), "git_log");
        assert!(m.tool_calls[1].arguments().is_empty());
    }

    #[test]
    fn missing_and_duplicate_ids_are_synthesised() {
        let mut acc = ReplyAccumulator::default();
        acc.push(&delta(0, None, Some("git_log"), None));
        acc.push(&delta(1, Some("same"), Some("git_log"), None));
        acc.push(&delta(2, Some("same"), Some("git_log"), None));
        let m = acc.finish().unwrap();
        assert!(m.tool_calls[0].id.starts_with("call_"));
        assert_eq!(m.tool_calls[1].id, "same");
        assert_ne!(m.tool_calls[2].id, "same");
    }

    #[test]
    fn invalid_arguments_fail_the_round() {
        let mut acc = ReplyAccumulator::default();
        acc.push(&delta(0, Some("c"), Some("read_file"), Some("{not json")));
        assert!(acc.finish().is_err());

        let mut acc = ReplyAccumulator::default();
        acc.push(&delta(0, Some("c"), Some("read_file"), Some("[1,2]")));
        assert!(acc.finish().is_err());
    }
}
