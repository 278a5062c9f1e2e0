//! Tests for tool sandboxing: hidden segments, escapes from the project
//! root, and rejection before any permission prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ocla::permission::{PermissionMode, PermissionPolicy, Prompter};
use ocla::session::ToolCall;
use ocla::tools::{can_access_path, ToolRegistry};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

fn workspace() -> TempDir {
    let ws = tempfile::tempdir().expect("failed to create temp dir");
    std::fs::create_dir_all(ws.path().join("src")).unwrap();
    std::fs::write(ws.path().join("src/main.rs"), "fn main() {}\n").unwrap();
    std::fs::create_dir_all(ws.path().join(".git")).unwrap();
    std::fs::write(ws.path().join(".git/config"), "[core]\n").unwrap();
    std::fs::write(ws.path().join(".env"), "TOKEN=secret\n").unwrap();
    ws
}

fn call(name: &str, args: Value) -> ToolCall {
    let args: Map<String, Value> = args.as_object().cloned().unwrap();
    ToolCall::new("call_1", name, args)
}

/// Counts questions and always says yes.
#[derive(Default)]
struct CountingPrompter {
    asked: AtomicUsize,
}

impl Prompter for CountingPrompter {
    fn ask(&self, _question: &str) -> Option<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Some("y".into())
    }
}

// ── can_access_path ──────────────────────────────────────────

#[test]
fn plain_relative_paths_are_allowed() {
    let ws = workspace();
    assert!(can_access_path(ws.path(), "src/main.rs", false));
    assert!(can_access_path(ws.path(), ".", false));
    assert!(can_access_path(ws.path(), "src/new.rs", true));
}

#[test]
fn hidden_segments_are_rejected() {
    let ws = workspace();
    assert!(!can_access_path(ws.path(), ".env", false));
    assert!(!can_access_path(ws.path(), ".git/config", false));
    assert!(!can_access_path(ws.path(), "src/.cache/x", true));
}

#[test]
fn escapes_from_root_are_rejected() {
    let ws = workspace();
    assert!(!can_access_path(ws.path(), "/etc/passwd", false));
    assert!(!can_access_path(ws.path(), "../outside.txt", false));
    assert!(!can_access_path(ws.path(), "src/../../outside.txt", true));
}

#[test]
fn absolute_path_inside_root_is_allowed() {
    let ws = workspace();
    let inside = ws.path().canonicalize().unwrap().join("src/main.rs");
    assert!(can_access_path(ws.path(), inside.to_str().unwrap(), false));
}

#[test]
fn writes_to_directories_are_rejected() {
    let ws = workspace();
    assert!(!can_access_path(ws.path(), "src", true));
}

#[cfg(unix)]
#[test]
fn symlink_out_of_root_is_rejected() {
    let ws = workspace();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), "nope").unwrap();
    std::os::unix::fs::symlink(outside.path().join("secret.txt"), ws.path().join("link.txt")).unwrap();

    assert!(!can_access_path(ws.path(), "link.txt", false));
    assert!(!can_access_path(ws.path(), "link.txt", true));
}

// ── Registry preflight ───────────────────────────────────────

#[tokio::test]
async fn read_file_denies_hidden_file() {
    let ws = workspace();
    let tools = ToolRegistry::with_builtins(ws.path());

    let reason = tools.preflight(&call("read_file", json!({ "path": ".env" })));
    assert_eq!(
        reason.as_deref(),
        Some("Access denied: OCLA cannot access '.env'")
    );
}

#[tokio::test]
async fn list_files_denies_parent_directory() {
    let ws = workspace();
    let tools = ToolRegistry::with_builtins(ws.path());
    assert!(tools
        .preflight(&call("list_files", json!({ "path": ".." })))
        .is_some());
}

#[tokio::test]
async fn recursive_listing_skips_hidden_entries() {
    let ws = workspace();
    let tools = ToolRegistry::with_builtins(ws.path());

    let out = tools
        .execute(&call("list_files", json!({ "recursive": true })))
        .await;
    assert!(out.error.is_none());
    assert!(out.result.contains("main.rs"));
    assert!(!out.result.contains(".git"));
    assert!(!out.result.contains(".env"));
}

// ── Rejection happens before the prompt ──────────────────────

#[tokio::test]
async fn hidden_write_is_rejected_before_prompt() {
    let ws = workspace();
    let tools = ToolRegistry::with_builtins(ws.path());
    let prompter = Arc::new(CountingPrompter::default());
    let policy = PermissionPolicy::new(PermissionMode::AlwaysAsk, prompter.clone());

    let write = call(
        "write_file",
        json!({ "path": ".git/hooks/pre-commit", "new_content": "rm -rf ~" }),
    );

    // Same order the conversation loop uses: preflight first, and a
    // rejection short-circuits the permission prompt.
    let reason = tools.preflight(&write);
    assert_eq!(
        reason.as_deref(),
        Some("Access denied: OCLA cannot access '.git/hooks/pre-commit'")
    );
    assert_eq!(prompter.asked.load(Ordering::SeqCst), 0);
    assert!(!ws.path().join(".git/hooks/pre-commit").exists());

    // An allowed path does reach the prompt.
    let ok = call("write_file", json!({ "path": "notes.txt", "new_content": "hi" }));
    assert!(tools.preflight(&ok).is_none());
    let tool = tools.get("write_file").unwrap();
    assert!(policy.confirm(tool, tools.root(), &ok).await);
    assert_eq!(prompter.asked.load(Ordering::SeqCst), 1);
}
