//! Tool registry.
//!
//! Provides the [`Tool`] trait, the [`ToolRegistry`] that maps tool names
//! to implementations, and the path checks every filesystem tool runs in
//! its preflight step.  All tools are rooted at the process working
//! directory.

pub mod builtins;

use std::fmt;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::session::ToolCall;
use crate::utils::{expand_home, truncate_str};

pub const NO_OUTPUT: &str = "[[ no output from tool ]]";

// ── Descriptors ──────────────────────────────────────────────

/// Whether a tool may run without asking the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionClass {
    Autonomous,
    Confirm,
}

impl fmt::Display for PermissionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionClass::Autonomous => "autonomous",
            PermissionClass::Confirm => "confirm",
        })
    }
}

/// Metadata describing a tool to the model and to the permission policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Short machine-friendly name (e.g. `"read_file"`).
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments.
    pub parameters: Value,
    pub permission: PermissionClass,
}

/// Outcome of one execution.  The tool message carries `error` when set,
/// `result` otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub result: String,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn content(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.result)
    }
}

// ── Tool trait ───────────────────────────────────────────────

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Reject a call before anyone is asked about it.  `Some(reason)` becomes
    /// the tool result.
    fn preflight(&self, _root: &Path, _args: &Map<String, Value>) -> Option<String> {
        None
    }

    /// Question shown when the call needs confirmation.
    async fn prompt(&self, _root: &Path, call: &ToolCall) -> String {
        format!(
            "Run tool '{}' with arguments {}?",
            call.name(),
            truncate_str(&call.arguments_json(), 50)
        )
    }

    /// Expected failures are reported through [`ToolOutput::err`]; an `Err`
    /// is treated as an unexpected fault.
    async fn execute(&self, root: &Path, args: &Map<String, Value>) -> anyhow::Result<ToolOutput>;
}

/// String argument `key`, or a ready-made error output.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolOutput> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolOutput::err(format!("missing required string argument '{key}'")))
}

// ── Registry ─────────────────────────────────────────────────

pub struct ToolRegistry {
    root: PathBuf,
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tools: Vec::new(),
        }
    }

    /// Registry holding every built-in tool, rooted at `root`.
    pub fn with_builtins(root: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new(root);
        builtins::register_all(&mut registry);
        registry
    }

    /// Duplicate names are ignored (first registration wins).
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.descriptor().name;
        if self.get(&name).is_some() {
            debug!(tool = %name, "duplicate tool registration ignored");
            return;
        }
        self.tools.push(tool);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.descriptor().name == name)
            .map(|t| t.as_ref())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Preflight rejection for `call`, including unknown tool names.
    pub fn preflight(&self, call: &ToolCall) -> Option<String> {
        match self.get(call.name()) {
            Some(tool) => tool.preflight(&self.root, call.arguments()),
            None => Some(format!("Unknown tool: {}", call.name())),
        }
    }

    /// Run `call`.  Never fails: every problem ends up in the output.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.get(call.name()) else {
            return ToolOutput::err(format!("Unknown tool: {}", call.name()));
        };

        match tool.execute(&self.root, call.arguments()).await {
            Ok(out) if out.error.is_none() && out.result.is_empty() => ToolOutput::ok(NO_OUTPUT),
            Ok(out) => out,
            Err(e) => {
                warn!(tool = %call.name(), error = %format!("{e:#}"), "tool execution failed");
                ToolOutput::err("Unknown error")
            }
        }
    }
}

// ── Path access ──────────────────────────────────────────────

fn has_hidden_segment(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(seg) => seg.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Whether a tool may touch `raw` under `root`.
///
/// The path must stay inside `root` once symlinks are resolved, and
/// neither the literal path nor the resolved path (relative to `root`)
/// may contain a segment starting with `.`.  With `for_write`, symlinks
/// and existing directories are refused as targets.
pub fn can_access_path(root: &Path, raw: &str, for_write: bool) -> bool {
    let Ok(root) = root.canonicalize() else {
        return false;
    };
    let literal = expand_home(raw);
    let literal_tail = if literal.is_absolute() {
        literal.strip_prefix(&root).unwrap_or(&literal)
    } else {
        literal.as_path()
    };
    if has_hidden_segment(literal_tail) {
        return false;
    }
    let candidate = root.join(&literal);

    let Ok(resolved) = canon_or_resolve(&candidate) else {
        return false;
    };
    let Ok(relative) = resolved.strip_prefix(&root) else {
        return false;
    };
    if has_hidden_segment(relative) {
        return false;
    }

    if for_write {
        if let Ok(meta) = std::fs::symlink_metadata(&candidate) {
            if meta.file_type().is_symlink() || meta.is_dir() {
                return false;
            }
        }
    }
    true
}

/// Resolve `raw` against `root` for a tool that already passed
/// [`can_access_path`].
pub fn resolve(root: &Path, raw: &str) -> PathBuf {
    root.join(expand_home(raw))
}

/// Best-effort canonicalize: if the full path doesn't exist yet,
/// canonicalize the longest existing prefix and append the rest.
pub(crate) fn canon_or_resolve(p: &Path) -> anyhow::Result<PathBuf> {
    if p.exists() {
        return Ok(p.canonicalize()?);
    }
    let mut existing = p.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        if let Some(file) = existing.file_name() {
            tail.push(file.to_os_string());
        } else {
            anyhow::bail!("cannot resolve path: {}", p.display());
        }
        existing = existing
            .parent()
            .ok_or_else(|| anyhow::anyhow!("cannot resolve path: {}", p.display()))?
            .to_path_buf();
    }
    let mut resolved = existing.canonicalize()?;
    for component in tail.into_iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}

/// Preflight message for a path that failed [`can_access_path`].
pub(crate) fn access_denied(raw: &str) -> String {
    format!("Access denied: OCLA cannot access '{raw}'")
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".into(),
                description: "echo text".into(),
                parameters: json!({"type": "object"}),
                permission: PermissionClass::Autonomous,
            }
        }

        async fn execute(&self, _root: &Path, args: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
            match args.get("text").and_then(Value::as_str) {
                Some("boom") => anyhow::bail!("exploded"),
                Some(t) => Ok(ToolOutput::ok(t)),
                None => Ok(ToolOutput::ok("")),
            }
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        let Value::Object(map) = args else { panic!("object expected") };
        ToolCall::new("c1", name, map)
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let reg = ToolRegistry::new(".");
        let out = reg.execute(&call("nope", json!({}))).await;
        assert_eq!(out.content(), "Unknown tool: nope");
        assert_eq!(reg.preflight(&call("nope", json!({}))).as_deref(), Some("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn empty_and_failing_results_are_normalised() {
        let mut reg = ToolRegistry::new(".");
        reg.register(Box::new(Echo));
        reg.register(Box::new(Echo));
        assert_eq!(reg.descriptors().len(), 1);

        assert_eq!(reg.execute(&call("echo", json!({"text": "hi"}))).await.content(), "hi");
        assert_eq!(reg.execute(&call("echo", json!({}))).await.content(), NO_OUTPUT);
        assert_eq!(
            reg.execute(&call("echo", json!({"text": "boom"}))).await.content(),
            "Unknown error"
        );
    }

    #[tokio::test]
    async fn default_prompt_truncates_arguments() {
        let long = "x".repeat(200);
        let c = call("echo", json!({ "text": long }));
        let prompt = Echo.prompt(Path::new("."), &c).await;
        assert!(prompt.starts_with("Run tool 'echo' with arguments"));
        assert!(prompt.contains("truncated"));
    }

    #[test]
    fn paths_inside_root_are_allowed() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/lib.rs"), "").unwrap();

        assert!(can_access_path(tmp.path(), ".", false));
        assert!(can_access_path(tmp.path(), "src/lib.rs", false));
        assert!(can_access_path(tmp.path(), "src/new.rs", true));
        assert!(can_access_path(tmp.path(), "./src/../src/lib.rs", false));
    }

    #[test]
    fn escapes_and_hidden_segments_are_denied() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();

        assert!(!can_access_path(tmp.path(), "../outside.txt", false));
        assert!(!can_access_path(tmp.path(), "/etc/passwd", false));
        assert!(!can_access_path(tmp.path(), ".git/config", false));
        assert!(!can_access_path(tmp.path(), "src/.env", true));
        assert!(!can_access_path(tmp.path(), "src", true));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_checked_after_resolution() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        std::fs::create_dir_all(root.join(".secret")).unwrap();
        std::fs::write(root.join(".secret/key"), "k").unwrap();
        std::fs::write(root.join("real.txt"), "r").unwrap();
        std::os::unix::fs::symlink(root.join(".secret/key"), root.join("key")).unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("alias.txt")).unwrap();

        assert!(!can_access_path(&root, "key", false));
        assert!(can_access_path(&root, "alias.txt", false));
        assert!(!can_access_path(&root, "alias.txt", true));
    }
}
