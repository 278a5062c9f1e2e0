//! Built-in `write_file` tool — replace a file's content.  Always confirmed;
//! the prompt shows a unified diff of the change.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use similar::TextDiff;

use crate::session::ToolCall;
use crate::tools::{access_denied, can_access_path, resolve, str_arg, PermissionClass, Tool, ToolDescriptor, ToolOutput};

pub struct WriteFile;

/// Unified diff between the current and proposed content of `path`.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[async_trait]
impl Tool for WriteFile {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "write_file".into(),
            description: "Create a file or replace its entire content. Parent directories are \
                          created as needed. The user reviews a diff before anything is written."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the project root."
                    },
                    "new_content": {
                        "type": "string",
                        "description": "The complete new content of the file."
                    }
                },
                "required": ["path", "new_content"]
            }),
            permission: PermissionClass::Confirm,
        }
    }

    fn preflight(&self, root: &Path, args: &Map<String, Value>) -> Option<String> {
        let raw = args.get("path").and_then(Value::as_str)?;
        (!can_access_path(root, raw, true)).then(|| access_denied(raw))
    }

    async fn prompt(&self, root: &Path, call: &ToolCall) -> String {
        let args = call.arguments();
        let raw = args.get("path").and_then(Value::as_str).unwrap_or_default();
        let new = args.get("new_content").and_then(Value::as_str).unwrap_or_default();
        let old = tokio::fs::read_to_string(resolve(root, raw))
            .await
            .unwrap_or_default();

        let diff = unified_diff(raw, &old, new);
        if diff.is_empty() {
            format!("Rewrite '{raw}' with identical content?")
        } else {
            format!("Apply this change to '{raw}'?\n{diff}")
        }
    }

    async fn execute(&self, root: &Path, args: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        let (raw, content) = match (str_arg(args, "path"), str_arg(args, "new_content")) {
            (Ok(raw), Ok(content)) => (raw, content),
            (Err(out), _) | (_, Err(out)) => return Ok(out),
        };
        let path = resolve(root, raw);

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::err(format!("cannot create parent of '{raw}': {e}")));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolOutput::ok(format!("wrote {} bytes to {raw}", content.len()))),
            Err(e) => Ok(ToolOutput::err(format!("cannot write '{raw}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(path: &str, content: &str) -> ToolCall {
        let args = json!({ "path": path, "new_content": content });
        ToolCall::new("w1", "write_file", args.as_object().cloned().unwrap())
    }

    #[test]
    fn diff_has_headers_and_hunks() {
        let d = unified_diff("src/a.rs", "one\ntwo\n", "one\nthree\n");
        assert!(d.contains("--- a/src/a.rs"));
        assert!(d.contains("+++ b/src/a.rs"));
        assert!(d.contains("-two"));
        assert!(d.contains("+three"));
    }

    #[tokio::test]
    async fn prompt_shows_diff_against_current_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.md"), "old line\n").unwrap();
        let prompt = WriteFile.prompt(tmp.path(), &call("notes.md", "new line\n")).await;
        assert!(prompt.starts_with("Apply this change to 'notes.md'?"));
        assert!(prompt.contains("-old line"));
        assert!(prompt.contains("+new line"));
    }

    #[tokio::test]
    async fn writes_and_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let c = call("docs/guide/intro.md", "# Intro\n");
        let out = WriteFile.execute(tmp.path(), c.arguments()).await.unwrap();
        assert!(out.error.is_none());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("docs/guide/intro.md")).unwrap(),
            "# Intro\n"
        );
    }

    #[test]
    fn preflight_refuses_hidden_target() {
        let tmp = TempDir::new().unwrap();
        let c = call(".github/workflows/ci.yml", "on: push");
        assert!(WriteFile.preflight(tmp.path(), c.arguments()).is_some());
    }
}
