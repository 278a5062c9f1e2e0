//! Built-in git tools — `git_show_changes`, `git_log`, `git_commit`.
//!
//! Each runs the `git` binary in the project root and reports stdout, or
//! stderr when git exits non-zero.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tools::{str_arg, PermissionClass, Tool, ToolDescriptor, ToolOutput};

const DEFAULT_LOG_ENTRIES: u64 = 5;

/// Run `git <args>` in `root`.
async fn git(root: &Path, args: &[&str]) -> ToolOutput {
    debug!(?args, "running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            ToolOutput::ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string())
        }
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let detail = if stderr.is_empty() { stdout } else { stderr };
            ToolOutput::err(format!("git {} failed ({}): {detail}", args.join(" "), out.status))
        }
        Err(e) => ToolOutput::err(format!("could not run git: {e}")),
    }
}

// ── git_show_changes ─────────────────────────────────────────

pub struct GitShowChanges;

#[async_trait]
impl Tool for GitShowChanges {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "git_show_changes".into(),
            description: "Show the working tree status and the diff of uncommitted changes.".into(),
            parameters: json!({ "type": "object", "properties": {} }),
            permission: PermissionClass::Autonomous,
        }
    }

    async fn execute(&self, root: &Path, _args: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        let status = git(root, &["status", "--short"]).await;
        if status.error.is_some() {
            return Ok(status);
        }
        let diff = git(root, &["diff", "HEAD"]).await;
        // a repository without commits has no HEAD to diff against
        let diff = if diff.error.is_some() {
            git(root, &["diff"]).await
        } else {
            diff
        };
        if diff.error.is_some() {
            return Ok(diff);
        }

        if status.result.is_empty() && diff.result.is_empty() {
            return Ok(ToolOutput::ok("no uncommitted changes"));
        }
        Ok(ToolOutput::ok(format!(
            "status:\n{}\n\ndiff:\n{}",
            status.result, diff.result
        )))
    }
}

// ── git_log ──────────────────────────────────────────────────

pub struct GitLog;

#[async_trait]
impl Tool for GitLog {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "git_log".into(),
            description: "Show the most recent commits, one per line.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "n": {
                        "type": "integer",
                        "description": "Number of commits to show. Default: 5."
                    }
                }
            }),
            permission: PermissionClass::Autonomous,
        }
    }

    async fn execute(&self, root: &Path, args: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        let n = args
            .get("n")
            .and_then(Value::as_u64)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LOG_ENTRIES);
        let count = format!("-n{n}");
        Ok(git(root, &["log", "--oneline", "--decorate", &count]).await)
    }
}

// ── git_commit ───────────────────────────────────────────────

pub struct GitCommit;

#[async_trait]
impl Tool for GitCommit {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "git_commit".into(),
            description: "Commit every change to already tracked files with the given message. \
                          Untracked files are left out."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Commit message."
                    }
                },
                "required": ["message"]
            }),
            permission: PermissionClass::Confirm,
        }
    }

    async fn execute(&self, root: &Path, args: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        let message = match str_arg(args, "message") {
            Ok(m) if !m.trim().is_empty() => m,
            Ok(_) => return Ok(ToolOutput::err("commit message must not be empty")),
            Err(out) => return Ok(out),
        };
        Ok(git(root, &["commit", "-a", "-m", message]).await)
    }
}
