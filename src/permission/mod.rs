//! Permission policy: decides whether a tool call may run.
//!
//! Autonomous tools run without asking in the default mode; confirm-class
//! tools always ask.  `ALWAYS_ASK` asks for everything and `ALWAYS_ALLOW`
//! asks for nothing (with a warning on every call).

use std::fmt;
use std::io::{BufRead, BufReader, IsTerminal, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::session::ToolCall;
use crate::tools::{PermissionClass, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    #[default]
    Default,
    AlwaysAsk,
    AlwaysAllow,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "DEFAULT",
            PermissionMode::AlwaysAsk => "ALWAYS_ASK",
            PermissionMode::AlwaysAllow => "ALWAYS_ALLOW",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "DEFAULT" => Ok(PermissionMode::Default),
            "ALWAYS_ASK" => Ok(PermissionMode::AlwaysAsk),
            "ALWAYS_ALLOW" => Ok(PermissionMode::AlwaysAllow),
            other => anyhow::bail!("'{other}' is not one of DEFAULT, ALWAYS_ASK, ALWAYS_ALLOW"),
        }
    }
}

// ── Prompting ────────────────────────────────────────────────

/// Source of yes/no answers.  `None` means nobody can be asked.
pub trait Prompter: Send + Sync {
    fn ask(&self, question: &str) -> Option<String>;
}

/// Asks on stdin when it is a terminal, otherwise on the controlling
/// terminal (`/dev/tty`).
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str) -> Option<String> {
        if std::io::stdin().is_terminal() {
            return dialoguer::Input::<String>::new()
                .with_prompt(question)
                .allow_empty(true)
                .interact_text()
                .ok();
        }
        ask_controlling_terminal(question)
    }
}

fn ask_controlling_terminal(question: &str) -> Option<String> {
    let mut tty = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")
        .ok()?;
    write!(tty, "{question} ").ok()?;
    tty.flush().ok()?;
    let mut line = String::new();
    BufReader::new(tty).read_line(&mut line).ok()?;
    Some(line)
}

// ── Policy ───────────────────────────────────────────────────

pub struct PermissionPolicy {
    mode: PermissionMode,
    prompter: Arc<dyn Prompter>,
}

impl PermissionPolicy {
    pub fn new(mode: PermissionMode, prompter: Arc<dyn Prompter>) -> Self {
        Self { mode, prompter }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Whether `call` may run, asking the user when the mode and the
    /// tool's permission class require it.
    pub async fn confirm(&self, tool: &dyn Tool, root: &Path, call: &ToolCall) -> bool {
        let class = tool.descriptor().permission;

        if self.mode == PermissionMode::AlwaysAllow {
            warn!(tool = %call.name(), args = %call.arguments_json(), "running tool without confirmation (ALWAYS_ALLOW)");
            return true;
        }
        if self.mode == PermissionMode::Default && class == PermissionClass::Autonomous {
            debug!(tool = %call.name(), "autonomous tool allowed");
            return true;
        }

        let question = format!("{} [y/N]", tool.prompt(root, call).await);
        let prompter = Arc::clone(&self.prompter);
        let answer = tokio::task::spawn_blocking(move || prompter.ask(&question))
            .await
            .ok()
            .flatten();

        match answer {
            Some(reply) => {
                let allowed = reply.trim_start().starts_with(|c: char| c.eq_ignore_ascii_case(&'y'));
                debug!(tool = %call.name(), allowed, "permission answered");
                allowed
            }
            None => {
                warn!(tool = %call.name(), "no interactive terminal to confirm tool call, denying");
                false
            }
        }
    }
}
