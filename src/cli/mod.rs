//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the logic lives here.

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::agent::{Conversation, TurnObserver, TurnOptions};
use crate::config::{Config, PromptMode, ThinkingMode};
use crate::context;
use crate::models::{build_provider, ChatProvider, ModelInfo};
use crate::permission::{PermissionPolicy, TerminalPrompter};
use crate::session::catalog::{generate_session_name, AppState, SessionCatalog};
use crate::session::{Session, ToolCall};
use crate::tools::ToolRegistry;
use crate::utils::truncate_str;

// ── Rendering helpers ────────────────────────────────────────────────────────

/// Left-aligned plain-text table.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(headers.to_vec())];
    out.push(
        widths
            .iter()
            .map(|w| "─".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.join("\n")
}

/// "just now", "5 minutes ago", "3 days ago".
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (n, unit) = match secs {
        0..=59 => return "just now".to_string(),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        86_400..=2_591_999 => (secs / 86_400, "day"),
        2_592_000..=31_535_999 => (secs / 2_592_000, "month"),
        _ => (secs / 31_536_000, "year"),
    };
    let plural = if n == 1 { "" } else { "s" };
    format!("{n} {unit}{plural} ago")
}

// ── Session commands ─────────────────────────────────────────────────────────

/// Open or create a session, persist it and make it current.
///
/// Naming an existing session reuses it.
pub async fn new_session(cfg: &Config, name: Option<String>) -> anyhow::Result<String> {
    let name = name.unwrap_or_else(generate_session_name);
    let mut session = Session::open(&name, &cfg.session_settings()).await?;
    session.persist().await?;
    let state = AppState {
        current_session: Some(name.clone()),
    };
    state.save(&cfg.state_file).await?;
    println!("{name}");
    Ok(name)
}

pub async fn list_sessions(cfg: &Config) -> anyhow::Result<()> {
    let catalog = SessionCatalog::new(&cfg.session_dir, cfg.storage_mode);
    let sessions = catalog.list().await?;
    if sessions.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }

    let current = AppState::load(&cfg.state_file).await.current_session;
    let now = Utc::now();
    let rows: Vec<Vec<String>> = sessions
        .iter()
        .map(|s| {
            vec![
                (if current.as_deref() == Some(s.name.as_str()) { ">" } else { "" }).to_string(),
                s.name.clone(),
                relative_time(s.created, now),
                relative_time(s.used, now),
                s.tokens.to_string(),
                s.usage(cfg.context_window),
                s.provider.clone().unwrap_or_else(|| "-".into()),
                s.storage_mode.to_string(),
            ]
        })
        .collect();

    println!(
        "{}",
        render_table(
            &["", "NAME", "CREATED", "LAST USED", "TOKENS", "USAGE", "PROVIDER", "STORAGE"],
            &rows
        )
    );
    Ok(())
}

pub async fn set_session(cfg: &Config, name: &str) -> anyhow::Result<()> {
    let catalog = SessionCatalog::new(&cfg.session_dir, cfg.storage_mode);
    if !catalog.exists(name) {
        anyhow::bail!("unknown session '{name}' (see `ocla session list`)");
    }
    let mut state = AppState::load(&cfg.state_file).await;
    state.current_session = Some(name.to_string());
    state.save(&cfg.state_file).await?;
    println!("Current session is now {name}");
    Ok(())
}

// ── Config / tools ───────────────────────────────────────────────────────────

pub fn show_config(cfg: &Config) {
    let rows: Vec<Vec<String>> = cfg
        .report()
        .into_iter()
        .map(|r| {
            vec![
                r.var.name.to_string(),
                r.value.unwrap_or_else(|| "(unset)".into()),
                r.origin.map(|o| o.to_string()).unwrap_or_default(),
                r.var.env.join(", "),
                r.var.key.unwrap_or("-").to_string(),
                r.var.flag.unwrap_or_default().to_string(),
                r.var.default.unwrap_or_default().to_string(),
                r.var.allowed.join("|"),
                r.var.description.to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        render_table(
            &["NAME", "VALUE", "SOURCE", "ENV", "KEY", "FLAG", "DEFAULT", "ALLOWED", "DESCRIPTION"],
            &rows
        )
    );
    println!("\nConfig file: {}", cfg.config_file.display());
}

pub fn list_tools() {
    let registry = ToolRegistry::with_builtins(".");
    let rows: Vec<Vec<String>> = registry
        .descriptors()
        .into_iter()
        .map(|d| vec![d.name, d.permission.to_string(), d.description])
        .collect();
    println!("{}", render_table(&["TOOL", "PERMISSION", "DESCRIPTION"], &rows));
}

// ── Model commands ───────────────────────────────────────────────────────────

/// The model's own limit when `context_window` exceeds it.
pub fn window_over_limit(context_window: usize, info: &ModelInfo) -> Option<u64> {
    info.context_length.filter(|limit| context_window as u64 > *limit)
}

/// Look up the configured model, failing with the list of what exists.
pub async fn check_model(provider: &dyn ChatProvider, cfg: &Config, model: &str) -> anyhow::Result<ModelInfo> {
    match provider.model_info(model).await {
        Ok(info) => {
            if let Some(limit) = window_over_limit(cfg.context_window, &info) {
                warn!(
                    model,
                    configured = cfg.context_window,
                    limit,
                    "context window is larger than the model supports"
                );
            }
            Ok(info)
        }
        Err(e) => {
            let available = provider
                .available_models()
                .await
                .map(|models| models.into_iter().map(|m| m.name).collect::<Vec<_>>().join(", "))
                .unwrap_or_else(|_| "(could not list models)".into());
            anyhow::bail!(
                "model '{model}' is not available from {} ({e:#}). Available models: {available}",
                provider.name()
            )
        }
    }
}

pub async fn list_models(cfg: &Config) -> anyhow::Result<()> {
    let provider = build_provider(cfg)?;
    let models = provider.available_models().await?;
    let rows: Vec<Vec<String>> = models
        .into_iter()
        .map(|m| {
            vec![
                (if m.name == cfg.model { ">" } else { "" }).to_string(),
                m.name,
                m.context_length.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                m.supports_thinking.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();
    println!("{}", render_table(&["", "MODEL", "CONTEXT", "THINKING"], &rows));
    Ok(())
}

pub async fn model_info(cfg: &Config, name: Option<&str>) -> anyhow::Result<()> {
    let provider = build_provider(cfg)?;
    let model = name.unwrap_or(&cfg.model);
    let info = check_model(provider.as_ref(), cfg, model).await?;
    println!("{}", serde_json::to_string_pretty(&info).context("serialize model info")?);
    Ok(())
}

// ── Chat ─────────────────────────────────────────────────────────────────────

/// Prints the reply as it streams.  Content goes to stdout, everything
/// else to stderr.
pub struct ConsoleObserver {
    show_thinking: bool,
    thinking_open: bool,
}

impl ConsoleObserver {
    pub fn new(show_thinking: bool) -> Self {
        Self {
            show_thinking,
            thinking_open: false,
        }
    }

    fn close_thinking(&mut self) {
        if self.thinking_open {
            eprintln!("\n[/thinking]");
            self.thinking_open = false;
        }
    }
}

impl TurnObserver for ConsoleObserver {
    fn on_content(&mut self, text: &str) {
        self.close_thinking();
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_thinking(&mut self, text: &str) {
        if !self.show_thinking {
            return;
        }
        if !self.thinking_open {
            eprintln!("[thinking]");
            self.thinking_open = true;
        }
        eprint!("{text}");
    }

    fn on_tool_start(&mut self, call: &ToolCall) {
        self.close_thinking();
        eprintln!("\n→ {}({})", call.name(), truncate_str(&call.arguments_json(), 80));
    }

    fn on_tool_result(&mut self, call: &ToolCall, result: &str) {
        eprintln!("← {}: {}", call.name(), truncate_str(result.trim(), 200));
    }
}

/// Read one line from the terminal; `None` on EOF or when no terminal.
async fn read_prompt() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        dialoguer::Input::<String>::new()
            .with_prompt(">")
            .allow_empty(true)
            .interact_text()
            .ok()
    })
    .await
    .ok()
    .flatten()
}

async fn initial_prompt(args: &[String]) -> anyhow::Result<String> {
    let joined = args.join(" ");
    if !joined.trim().is_empty() {
        return Ok(joined.trim().to_string());
    }
    if std::io::stdin().is_terminal() {
        return Ok(read_prompt().await.unwrap_or_default().trim().to_string());
    }
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .context("read prompt from stdin")?;
    Ok(buf.trim().to_string())
}

/// Run the assistant on the current (or a fresh) session.
pub async fn chat(cfg: &Config, new_session: bool, args: &[String]) -> anyhow::Result<()> {
    let mut state = AppState::load(&cfg.state_file).await;
    let name = match (&state.current_session, new_session) {
        (Some(current), false) => current.clone(),
        _ => {
            let name = generate_session_name();
            state.current_session = Some(name.clone());
            state.save(&cfg.state_file).await?;
            info!(session = %name, "started new session");
            name
        }
    };

    let prompt = initial_prompt(args).await?;
    if prompt.is_empty() {
        anyhow::bail!("No prompt supplied via arguments or stdin.");
    }

    let provider = build_provider(cfg)?;
    let info = check_model(provider.as_ref(), cfg, &cfg.model).await?;
    let thinking = cfg.thinking != ThinkingMode::Disabled && info.supports_thinking.unwrap_or(false);

    let mut session = Session::open(&name, &cfg.session_settings()).await?;
    let root = std::env::current_dir().context("resolve working directory")?;
    let registry = ToolRegistry::with_builtins(root);
    let policy = PermissionPolicy::new(cfg.permission_mode, Arc::new(TerminalPrompter));
    let conversation = Conversation::new(
        provider.as_ref(),
        &registry,
        &policy,
        TurnOptions {
            model: cfg.model.clone(),
            thinking,
            context_window: Some(cfg.context_window),
        },
    );
    let mut observer = ConsoleObserver::new(cfg.thinking == ThinkingMode::Enabled);

    let interactive = cfg.prompt_mode == PromptMode::Interactive && std::io::stdin().is_terminal();
    let mut prompt = prompt;
    loop {
        conversation.run_turn(&mut session, &prompt, &mut observer).await?;
        observer.close_thinking();
        println!();

        if !interactive {
            return Ok(());
        }
        eprintln!(
            "[{} · {} tokens · {}]",
            session.name(),
            session.tokens(),
            context::usage_percent(session.tokens(), session.ceiling())
        );
        match read_prompt().await.map(|p| p.trim().to_string()) {
            None => return Ok(()),
            Some(p) if p == "exit" || p == "quit" => return Ok(()),
            Some(p) if p.is_empty() => return Ok(()),
            Some(p) => prompt = p,
        }
    }
}
