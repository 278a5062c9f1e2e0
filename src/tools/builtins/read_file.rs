//! Built-in `read_file` tool — return a file's full content.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{access_denied, can_access_path, resolve, str_arg, PermissionClass, Tool, ToolDescriptor, ToolOutput};

pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "read_file".into(),
            description: "Read the full content of a text file in the project.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the project root."
                    }
                },
                "required": ["path"]
            }),
            permission: PermissionClass::Autonomous,
        }
    }

    fn preflight(&self, root: &Path, args: &Map<String, Value>) -> Option<String> {
        let raw = args.get("path").and_then(Value::as_str)?;
        (!can_access_path(root, raw, false)).then(|| access_denied(raw))
    }

    async fn execute(&self, root: &Path, args: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        let raw = match str_arg(args, "path") {
            Ok(raw) => raw,
            Err(out) => return Ok(out),
        };
        let path = resolve(root, raw);
        if !path.is_file() {
            return Ok(ToolOutput::err(format!("'{raw}' is not an existing file")));
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Ok(ToolOutput::ok(text)),
                Err(_) => Ok(ToolOutput::err(format!("'{raw}' is not a UTF-8 text file"))),
            },
            Err(e) => Ok(ToolOutput::err(format!("cannot read '{raw}': {e}"))),
        }
    }
}
