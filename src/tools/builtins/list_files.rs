//! Built-in `list_files` tool — list directory contents under the working
//! directory, optionally recursing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{access_denied, can_access_path, resolve, PermissionClass, Tool, ToolDescriptor, ToolOutput};

const MAX_ENTRIES: usize = 1000;

pub struct ListFiles;

fn target(args: &Map<String, Value>) -> &str {
    args.get("path").and_then(Value::as_str).unwrap_or(".")
}

#[async_trait]
impl Tool for ListFiles {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "list_files".into(),
            description: "List files in a directory of the project. Directories end with '/'. \
                          Hidden entries are never shown."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory relative to the project root. Default: \".\"."
                    },
                    "recursive": {
                        "type": "boolean",
                        "description": "List every file below the directory. Default: false."
                    }
                }
            }),
            permission: PermissionClass::Autonomous,
        }
    }

    fn preflight(&self, root: &Path, args: &Map<String, Value>) -> Option<String> {
        let raw = target(args);
        (!can_access_path(root, raw, false)).then(|| access_denied(raw))
    }

    async fn execute(&self, root: &Path, args: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        let raw = target(args);
        let recursive = args.get("recursive").and_then(Value::as_bool).unwrap_or(false);
        let dir = resolve(root, raw);

        if !dir.is_dir() {
            return Ok(ToolOutput::err(format!("'{raw}' is not a directory")));
        }

        let mut entries = Vec::new();
        let truncated = collect(&dir, &dir, recursive, &mut entries).await?;
        entries.sort();

        let mut out = entries.join("\n");
        if truncated {
            out.push_str(&format!("\n[listing stopped after {MAX_ENTRIES} entries]"));
        }
        Ok(ToolOutput::ok(out))
    }
}

/// Fill `entries` up to [`MAX_ENTRIES`].  Returns `true` when a visible
/// entry had to be left out.
async fn collect(base: &Path, dir: &Path, recursive: bool, entries: &mut Vec<String>) -> anyhow::Result<bool> {
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut rd = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let ft = entry.file_type().await?;
            let listed = ft.is_file() || (ft.is_dir() && !recursive);
            if listed && entries.len() >= MAX_ENTRIES {
                return Ok(true);
            }
            let rel = entry
                .path()
                .strip_prefix(base)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or(name);

            if ft.is_dir() {
                if recursive {
                    pending.push(entry.path());
                } else {
                    entries.push(format!("{rel}/"));
                }
            } else if ft.is_file() {
                entries.push(rel);
            }
        }
    }
    Ok(false)
}
