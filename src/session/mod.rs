//! Persistent, token-bounded session transcripts.
//!
//! Each session named `<name>` owns two files in the session directory:
//!
//! * `<name>.meta` holds JSON metadata (timestamps, storage mode, token
//!   estimate, provider binding).
//! * `<name>.session` holds `{"messages": [...]}`, encoded with the
//!   storage mode recorded in the metadata.
//!
//! Both files are replaced wholesale through a temporary file and a
//! rename, so a crash never leaves a half-written file behind.

pub mod catalog;
pub mod error;
pub mod message;

use std::ffi::OsString;
use std::fmt;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

pub use error::SessionError;
pub use message::{FunctionCall, Message, Role, ToolCall};

use crate::context;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are OCLA, a coding assistant running in the user's terminal inside a \
project directory.

Answer concisely. Prefer concrete edits and commands over general advice.

You can inspect and change the project through tools:
- list_files and read_file to explore the code before answering questions about it.
- write_file to replace a file's full content; the user reviews a diff first.
- git_show_changes, git_log and git_commit for version control.

Read a file before rewriting it. Never guess at file contents. When a tool \
call is refused or fails, explain what happened instead of retrying blindly.";

// ── StorageMode ──────────────────────────────────────────────

/// On-disk encoding of a session body.  Fixed when the session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageMode {
    #[serde(rename = "PLAIN")]
    Plain,
    #[default]
    #[serde(rename = "COMPRESS")]
    Compressed,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Plain => "PLAIN",
            StorageMode::Compressed => "COMPRESS",
        }
    }

    pub fn encode(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        match self {
            StorageMode::Plain => Ok(raw.to_vec()),
            StorageMode::Compressed => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(raw).context("gzip session body")?;
                encoder.finish().context("gzip session body")
            }
        }
    }

    pub fn decode(&self, stored: &[u8]) -> anyhow::Result<Vec<u8>> {
        match self {
            StorageMode::Plain => Ok(stored.to_vec()),
            StorageMode::Compressed => {
                let mut out = Vec::new();
                GzDecoder::new(stored)
                    .read_to_end(&mut out)
                    .context("gunzip session body")?;
                Ok(out)
            }
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(StorageMode::Plain),
            "COMPRESS" | "COMPRESSED" => Ok(StorageMode::Compressed),
            other => anyhow::bail!("'{other}' is not one of PLAIN, COMPRESS"),
        }
    }
}

// ── Metadata ─────────────────────────────────────────────────

/// Contents of `<name>.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub used: DateTime<Utc>,
    /// Filled from the configured mode by [`read_meta`] when absent.
    #[serde(alias = "storageMode")]
    pub storage_mode: StorageMode,
    #[serde(default)]
    pub tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Body {
    #[serde(default)]
    messages: Vec<Message>,
}

pub fn meta_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.meta"))
}

pub fn body_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.session"))
}

/// Read and parse `<name>.meta`.  `Ok(None)` when the session does not exist.
///
/// Metadata without a storage mode gets `fallback`, the configured mode.
pub async fn read_meta(dir: &Path, name: &str, fallback: StorageMode) -> anyhow::Result<Option<SessionMeta>> {
    let path = meta_path(dir, name);
    match fs::read_to_string(&path).await {
        Ok(raw) => {
            let mut value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("parse session metadata {}", path.display()))?;
            if let Some(fields) = value.as_object_mut() {
                if !fields.contains_key("storage_mode") && !fields.contains_key("storageMode") {
                    fields.insert("storage_mode".into(), fallback.as_str().into());
                }
            }
            let meta = serde_json::from_value(value)
                .with_context(|| format!("parse session metadata {}", path.display()))?;
            Ok(Some(meta))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

/// Replace `path` with `bytes` via a sibling temp file and a rename.
async fn replace_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

// ── Session ──────────────────────────────────────────────────

/// What a session needs from the active configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub dir: PathBuf,
    /// Storage mode for sessions created from now on.
    pub storage_mode: StorageMode,
    /// Binding string of the active provider (`ollama`, `openai`).
    pub provider: String,
    /// Model name, used to pick a tokenizer.
    pub model: String,
    /// Token ceiling enforced on every append.
    pub context_window: usize,
    pub project_context_file: Option<PathBuf>,
}

/// A loaded session.  Mutated only through [`Session::append`].
#[derive(Debug)]
pub struct Session {
    name: String,
    dir: PathBuf,
    meta: SessionMeta,
    messages: Vec<Message>,
    model: String,
    ceiling: usize,
}

impl Session {
    /// Load the session `name`, creating it when it does not exist yet.
    ///
    /// A session bound to a different provider fails with
    /// [`SessionError::ProviderMismatch`] before anything is written.
    pub async fn open(name: &str, settings: &SessionSettings) -> anyhow::Result<Session> {
        let dir = settings.dir.clone();

        let meta = match read_meta(&dir, name, settings.storage_mode).await? {
            Some(mut meta) => match meta.provider.as_deref() {
                Some(bound) if bound != settings.provider => {
                    return Err(SessionError::ProviderMismatch {
                        name: name.to_string(),
                        expected: bound.to_string(),
                        actual: settings.provider.clone(),
                    }
                    .into());
                }
                Some(_) => meta,
                None => {
                    info!(session = %name, provider = %settings.provider, "binding legacy session to provider");
                    meta.provider = Some(settings.provider.clone());
                    write_meta(&dir, name, &meta).await?;
                    meta
                }
            },
            None => {
                let now = Utc::now();
                let meta = SessionMeta {
                    created: now,
                    used: now,
                    storage_mode: settings.storage_mode,
                    tokens: 0,
                    provider: Some(settings.provider.clone()),
                };
                fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("create session dir {}", dir.display()))?;
                write_meta(&dir, name, &meta).await?;
                debug!(session = %name, storage_mode = %meta.storage_mode, "session created");
                meta
            }
        };

        let messages = load_body(&dir, name, meta.storage_mode).await?;

        let mut session = Session {
            name: name.to_string(),
            dir,
            meta,
            messages,
            model: settings.model.clone(),
            ceiling: settings.context_window,
        };

        if session.messages.is_empty() {
            session.append(Message::system(DEFAULT_SYSTEM_PROMPT)).await?;
            if let Some(path) = &settings.project_context_file {
                if let Some(extra) = read_project_context(path).await {
                    session
                        .append(Message::system(format!("Additional project context:\n{extra}")))
                        .await?;
                }
            }
        } else {
            session.meta.tokens = context::estimate(&session.messages, &session.model);
        }

        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tokens(&self) -> usize {
        self.meta.tokens
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Append `message`, enforce the token ceiling, then persist.
    ///
    /// Over the ceiling the message stays in memory only and
    /// [`SessionError::ContextWindowExceeded`] is returned; the files on
    /// disk keep their previous content.
    pub async fn append(&mut self, message: Message) -> anyhow::Result<()> {
        if message.role == Role::Tool {
            self.check_tool_binding(&message)?;
        }

        self.messages.push(message);
        self.meta.tokens = context::estimate(&self.messages, &self.model);
        if self.meta.tokens > self.ceiling {
            return Err(SessionError::ContextWindowExceeded {
                current: self.meta.tokens,
                ceiling: self.ceiling,
            }
            .into());
        }

        self.persist().await
    }

    /// A tool result must answer a call of the assistant message that
    /// precedes the current run of tool results, and only once.
    fn check_tool_binding(&self, message: &Message) -> anyhow::Result<()> {
        let orphan = || SessionError::OrphanToolResult {
            tool_call_id: message.tool_call_id.clone().unwrap_or_default(),
        };
        let id = message.tool_call_id.as_deref().ok_or_else(orphan)?;

        let mut answered = Vec::new();
        for prev in self.messages.iter().rev() {
            match prev.role {
                Role::Tool => answered.push(prev.tool_call_id.as_deref()),
                Role::Assistant => {
                    let issued = prev.tool_calls.iter().any(|c| c.id == id);
                    if issued && !answered.contains(&Some(id)) {
                        return Ok(());
                    }
                    break;
                }
                _ => break,
            }
        }
        Err(orphan().into())
    }

    /// Write the body and metadata files.
    pub async fn persist(&mut self) -> anyhow::Result<()> {
        let body = Body {
            messages: self.messages.clone(),
        };
        let raw = serde_json::to_vec(&body).context("serialize session body")?;
        let encoded = self.meta.storage_mode.encode(&raw)?;
        replace_file(&body_path(&self.dir, &self.name), &encoded).await?;

        self.meta.used = Utc::now();
        write_meta(&self.dir, &self.name, &self.meta).await?;

        debug!(
            session = %self.name,
            messages = self.messages.len(),
            tokens = self.meta.tokens,
            "session persisted"
        );
        Ok(())
    }
}

async fn write_meta(dir: &Path, name: &str, meta: &SessionMeta) -> anyhow::Result<()> {
    let raw = serde_json::to_vec_pretty(meta).context("serialize session metadata")?;
    replace_file(&meta_path(dir, name), &raw).await
}

async fn load_body(dir: &Path, name: &str, mode: StorageMode) -> anyhow::Result<Vec<Message>> {
    let path = body_path(dir, name);
    let stored = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let raw = mode
        .decode(&stored)
        .with_context(|| format!("decode {} as {mode}", path.display()))?;
    let body: Body = serde_json::from_slice(&raw)
        .with_context(|| format!("parse session body {}", path.display()))?;
    Ok(body.messages)
}

async fn read_project_context(path: &Path) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => {
            debug!(path = %path.display(), "project context file is empty");
            None
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "project context file not loaded");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
