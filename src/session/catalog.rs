//! Session enumeration and the process-wide "current session" pointer.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::{meta_path, read_meta, StorageMode};
use crate::context;

/// Generate a session name from the local wall clock.
pub fn generate_session_name() -> String {
    Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Summary row for one persisted session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub name: String,
    pub created: DateTime<Utc>,
    pub used: DateTime<Utc>,
    pub tokens: usize,
    pub storage_mode: StorageMode,
    pub provider: Option<String>,
}

impl SessionInfo {
    pub fn usage(&self, ceiling: usize) -> String {
        context::usage_percent(self.tokens, ceiling)
    }
}

/// Read-only view over the session directory.
#[derive(Debug, Clone)]
pub struct SessionCatalog {
    dir: PathBuf,
    /// Reported for metadata that records no storage mode.
    storage_mode: StorageMode,
}

impl SessionCatalog {
    pub fn new(dir: impl Into<PathBuf>, storage_mode: StorageMode) -> Self {
        Self {
            dir: dir.into(),
            storage_mode,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self, name: &str) -> bool {
        meta_path(&self.dir, name).is_file()
    }

    pub async fn info(&self, name: &str) -> anyhow::Result<Option<SessionInfo>> {
        Ok(read_meta(&self.dir, name, self.storage_mode).await?.map(|meta| SessionInfo {
            name: name.to_string(),
            created: meta.created,
            used: meta.used,
            tokens: meta.tokens,
            storage_mode: meta.storage_mode,
            provider: meta.provider,
        }))
    }

    /// Every session with readable metadata, most recently used first.
    ///
    /// Unreadable metadata is logged and skipped.
    pub async fn list(&self) -> anyhow::Result<Vec<SessionInfo>> {
        let mut rd = match fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read session dir {}", self.dir.display()))
            }
        };

        let mut sessions = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.info(name).await {
                Ok(Some(info)) => sessions.push(info),
                Ok(None) => {}
                Err(e) => warn!(session = %name, error = %format!("{e:#}"), "skipping unreadable session metadata"),
            }
        }

        sessions.sort_by(|a, b| b.used.cmp(&a.used));
        Ok(sessions)
    }
}

// ── AppState ─────────────────────────────────────────────────

/// Process state persisted between invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session: Option<String>,
}

impl AppState {
    /// Load the state file.  Missing or malformed files yield the default.
    pub async fn load(path: &Path) -> AppState {
        match fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring malformed state file");
                AppState::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "state file not readable");
                }
                AppState::default()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let raw = serde_json::to_vec_pretty(self).context("serialize state")?;
        fs::write(path, raw)
            .await
            .with_context(|| format!("write state file {}", path.display()))?;
        debug!(current_session = ?self.current_session, "state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionSettings};

    fn settings(dir: &Path) -> SessionSettings {
        SessionSettings {
            dir: dir.to_path_buf(),
            storage_mode: StorageMode::Compressed,
            provider: "ollama".into(),
            model: "qwen3".into(),
            context_window: 16384,
            project_context_file: None,
        }
    }

    #[test]
    fn generated_names_are_timestamps() {
        let name = generate_session_name();
        assert_eq!(name.len(), 14);
        assert!(name.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn list_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = SessionCatalog::new(tmp.path().join("none"), StorageMode::Compressed);
        assert!(catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_sorts_by_last_use_and_skips_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = settings(tmp.path());

        let mut older = Session::open("older", &cfg).await.unwrap();
        Session::open("newer", &cfg).await.unwrap();
        std::fs::write(tmp.path().join("broken.meta"), "{not json").unwrap();

        // touching a session moves it to the front
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        older.persist().await.unwrap();

        let catalog = SessionCatalog::new(tmp.path(), StorageMode::Compressed);
        let names: Vec<_> = catalog
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["older", "newer"]);
        assert!(catalog.exists("newer"));
        assert!(!catalog.exists("missing"));
    }

    #[tokio::test]
    async fn state_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        assert_eq!(AppState::load(&path).await, AppState::default());

        let state = AppState {
            current_session: Some("20240101120000".into()),
        };
        state.save(&path).await.unwrap();
        assert_eq!(AppState::load(&path).await, state);
    }

    #[tokio::test]
    async fn malformed_state_falls_back_to_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(AppState::load(&path).await.current_session.is_none());
    }
}
