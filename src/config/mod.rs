//! Layered configuration.
//!
//! Every setting is a declared [`ConfigVar`].  A value is looked up in the
//! command-line overrides, then the environment, then the JSON config
//! file, then the declared default.  [`Config::resolve`] validates every
//! value up front so a bad setting fails at startup.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context as _;
use serde_yaml_ng::Value as Yaml;

use crate::logs::LogLevel;
use crate::models::ProviderKind;
use crate::permission::PermissionMode;
use crate::session::{SessionSettings, StorageMode};
use crate::utils::expand_home;

// ── Declarations ─────────────────────────────────────────────

#[derive(Debug)]
pub struct ConfigVar {
    pub name: &'static str,
    pub description: &'static str,
    /// Environment variables, first non-empty wins.
    pub env: &'static [&'static str],
    /// Property in the config file; `None` when the file cannot set it.
    pub key: Option<&'static str>,
    pub default: Option<&'static str>,
    /// Accepted values (case-insensitive); empty when free-form.
    pub allowed: &'static [&'static str],
    pub flag: Option<&'static str>,
    /// Hide the current value in reports.
    pub secret: bool,
}

const fn var(name: &'static str, description: &'static str, env: &'static [&'static str]) -> ConfigVar {
    ConfigVar {
        name,
        description,
        env,
        key: None,
        default: None,
        allowed: &[],
        flag: None,
        secret: false,
    }
}

impl ConfigVar {
    const fn key(mut self, key: &'static str) -> Self {
        self.key = Some(key);
        self
    }

    const fn default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    const fn allowed(mut self, values: &'static [&'static str]) -> Self {
        self.allowed = values;
        self
    }

    const fn flag(mut self, flag: &'static str) -> Self {
        self.flag = Some(flag);
        self
    }

    const fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

pub const CONFIG_FILE: ConfigVar = var("config_file", "Path of the JSON config file", &["OCLA_CONFIG_FILE"])
    .default(".ocla/config.json");
pub const PROVIDER: ConfigVar = var("provider", "Model backend", &["OCLA_PROVIDER"])
    .key("provider")
    .default("ollama")
    .allowed(&["ollama", "openai"])
    .flag("--provider");
pub const MODEL: ConfigVar = var("model", "Model name at the backend", &["OCLA_MODEL"])
    .key("model")
    .default("qwen3")
    .flag("-m/--model");
pub const CONTEXT_WINDOW: ConfigVar = var("context_window", "Token ceiling for a session", &["OCLA_CONTEXT_WINDOW"])
    .key("contextWindow")
    .default("16384");
pub const LOG_LEVEL: ConfigVar = var("log_level", "Log verbosity on stderr", &["OCLA_LOG_LEVEL"])
    .key("logLevel")
    .default("WARNING")
    .allowed(&["CRITICAL", "ERROR", "WARNING", "INFO", "DEBUG", "TRACE"]);
pub const SESSION_DIR: ConfigVar = var("session_dir", "Directory holding session files", &["OCLA_SESSION_DIR"])
    .key("sessionDir")
    .default(".ocla/sessions");
pub const STATE_FILE: ConfigVar = var("state_file", "File recording the current session", &["OCLA_STATE_FILE"])
    .key("stateFile")
    .default(".ocla/state.json");
pub const TOOL_PERMISSION_MODE: ConfigVar = var(
    "tool_permission_mode",
    "When tool calls need confirmation",
    &["OCLA_TOOL_PERMISSION_MODE"],
)
.key("toolPermissionMode")
.default("DEFAULT")
.allowed(&["DEFAULT", "ALWAYS_ASK", "ALWAYS_ALLOW"])
.flag("--permission-mode");
pub const THINKING: ConfigVar = var("thinking", "Request and show model thinking", &["OCLA_THINKING"])
    .key("displayThinking")
    .default("ENABLED")
    .allowed(&["DISABLED", "HIDDEN", "ENABLED"])
    .flag("-t/--thinking");
pub const PROJECT_CONTEXT_FILE: ConfigVar = var(
    "project_context_file",
    "File added to new sessions as project context",
    &["OCLA_PROJECT_CONTEXT_FILE"],
)
.key("projectContextFiles")
.default("AGENTS.md");
pub const SESSION_STORAGE_MODE: ConfigVar = var(
    "session_storage_mode",
    "Encoding of newly created session files",
    &["OCLA_SESSION_STORAGE_MODE"],
)
.key("sessionStorageMode")
.default("COMPRESS")
.allowed(&["PLAIN", "COMPRESS"]);
pub const PROMPT_MODE: ConfigVar = var("prompt_mode", "Exit after one turn or keep prompting", &["OCLA_PROMPT_MODE"])
    .key("promptMode")
    .default("INTERACTIVE")
    .allowed(&["ONESHOT", "INTERACTIVE"])
    .flag("-p/--prompt-mode");
pub const OLLAMA_HOST: ConfigVar = var("ollama_host", "Ollama server URL", &["OCLA_OLLAMA_HOST", "OLLAMA_HOST"])
    .key("ollamaHost")
    .default(crate::models::ollama::DEFAULT_HOST);
pub const OPENAI_API_KEY: ConfigVar =
    var("openai_api_key", "OpenAI API key", &["OCLA_OPENAI_API_KEY", "OPENAI_API_KEY"])
        .key("openaiApiKey")
        .secret();
pub const OPENAI_BASE_URL: ConfigVar = var("openai_base_url", "OpenAI API base URL", &["OCLA_OPENAI_BASE_URL"])
    .key("openaiBaseUrl")
    .default(crate::models::openai::DEFAULT_BASE_URL);

pub const ALL: &[&ConfigVar] = &[
    &CONFIG_FILE,
    &PROVIDER,
    &MODEL,
    &CONTEXT_WINDOW,
    &LOG_LEVEL,
    &SESSION_DIR,
    &STATE_FILE,
    &TOOL_PERMISSION_MODE,
    &THINKING,
    &PROJECT_CONTEXT_FILE,
    &SESSION_STORAGE_MODE,
    &PROMPT_MODE,
    &OLLAMA_HOST,
    &OPENAI_API_KEY,
    &OPENAI_BASE_URL,
];

// ── Enumerated settings ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkingMode {
    Disabled,
    Hidden,
    #[default]
    Enabled,
}

impl FromStr for ThinkingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DISABLED" => Ok(ThinkingMode::Disabled),
            "HIDDEN" => Ok(ThinkingMode::Hidden),
            "ENABLED" => Ok(ThinkingMode::Enabled),
            other => anyhow::bail!("'{other}' is not one of DISABLED, HIDDEN, ENABLED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMode {
    Oneshot,
    #[default]
    Interactive,
}

impl FromStr for PromptMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONESHOT" => Ok(PromptMode::Oneshot),
            "INTERACTIVE" => Ok(PromptMode::Interactive),
            other => anyhow::bail!("'{other}' is not one of ONESHOT, INTERACTIVE"),
        }
    }
}

// ── Sources ──────────────────────────────────────────────────

/// Where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Cli,
    Env(String),
    File,
    Default,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Cli => f.write_str("command line"),
            Origin::Env(name) => write!(f, "env {name}"),
            Origin::File => f.write_str("config file"),
            Origin::Default => f.write_str("default"),
        }
    }
}

/// Raw values from every layer, before validation.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    /// Command-line overrides keyed by variable name.
    pub cli: HashMap<&'static str, String>,
    pub env: HashMap<String, String>,
    /// Config file entries keyed by config key.
    pub file: HashMap<String, String>,
    /// Problems found while reading the layers; logged once logging is up.
    pub warnings: Vec<String>,
}

impl Sources {
    /// Gather the process environment and the config file it points to.
    pub fn gather(cli: HashMap<&'static str, String>) -> Self {
        let mut sources = Sources {
            cli,
            env: std::env::vars().collect(),
            ..Default::default()
        };
        sources.load_file();
        sources
    }

    /// Read the config file named by `config_file`.  A missing file is
    /// fine; an unreadable or malformed one is recorded as a warning.
    pub fn load_file(&mut self) {
        let Some((raw, _)) = self.lookup(&CONFIG_FILE) else {
            return;
        };
        let path = expand_home(&raw);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                self.warnings
                    .push(format!("config file {} is not readable: {e}", path.display()));
                return;
            }
        };
        match parse_file(&text) {
            Ok(entries) => self.file = entries,
            Err(e) => self
                .warnings
                .push(format!("ignoring config file {}: {e:#}", path.display())),
        }
    }

    /// First value for `var` along CLI > env > file > default.
    pub fn lookup(&self, var: &ConfigVar) -> Option<(String, Origin)> {
        if let Some(v) = self.cli.get(var.name) {
            return Some((v.clone(), Origin::Cli));
        }
        for name in var.env {
            if let Some(v) = self.env.get(*name).filter(|v| !v.is_empty()) {
                return Some((v.clone(), Origin::Env(name.to_string())));
            }
        }
        if let Some(v) = var.key.and_then(|key| self.file.get(key)) {
            return Some((v.clone(), Origin::File));
        }
        var.default.map(|d| (d.to_string(), Origin::Default))
    }
}

fn parse_file(text: &str) -> anyhow::Result<HashMap<String, String>> {
    let doc: Yaml = serde_yaml_ng::from_str(text).context("invalid JSON")?;
    let mapping = match doc {
        Yaml::Null => return Ok(HashMap::new()),
        Yaml::Mapping(m) => m,
        _ => anyhow::bail!("top level must be a mapping"),
    };

    let mut entries = HashMap::new();
    for (key, value) in mapping {
        let Yaml::String(key) = key else {
            anyhow::bail!("keys must be strings");
        };
        let value = match value {
            Yaml::String(s) => s,
            Yaml::Number(n) => n.to_string(),
            Yaml::Bool(b) => b.to_string(),
            Yaml::Null => continue,
            _ => anyhow::bail!("value of '{key}' must be a scalar"),
        };
        entries.insert(key, value);
    }
    Ok(entries)
}

// ── Config ───────────────────────────────────────────────────

/// Validated settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub config_file: PathBuf,
    pub provider: ProviderKind,
    pub model: String,
    pub context_window: usize,
    pub log_level: LogLevel,
    pub session_dir: PathBuf,
    pub state_file: PathBuf,
    pub permission_mode: PermissionMode,
    pub thinking: ThinkingMode,
    pub project_context_file: Option<PathBuf>,
    pub storage_mode: StorageMode,
    pub prompt_mode: PromptMode,
    pub ollama_host: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    sources: Sources,
}

/// One row of `ocla config`.
#[derive(Debug, Clone)]
pub struct VarReport {
    pub var: &'static ConfigVar,
    pub value: Option<String>,
    pub origin: Option<Origin>,
}

fn parse_as<T>(sources: &Sources, var: &ConfigVar) -> anyhow::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let (raw, _) = sources
        .lookup(var)
        .ok_or_else(|| anyhow::anyhow!("Invalid value for {}: no value set", var.name))?;
    raw.parse()
        .map_err(|e: anyhow::Error| anyhow::anyhow!("Invalid value for {}: {e}", var.name))
}

fn string(sources: &Sources, var: &ConfigVar) -> Option<String> {
    sources.lookup(var).map(|(v, _)| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn path(sources: &Sources, var: &ConfigVar) -> Option<PathBuf> {
    string(sources, var).map(|v| expand_home(&v))
}

impl Config {
    /// Load from the process environment, the config file and `cli`.
    pub fn load(cli: HashMap<&'static str, String>) -> anyhow::Result<Self> {
        Self::resolve(Sources::gather(cli))
    }

    pub fn resolve(sources: Sources) -> anyhow::Result<Self> {
        let context_window = {
            let raw = sources
                .lookup(&CONTEXT_WINDOW)
                .map(|(v, _)| v)
                .unwrap_or_default();
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => anyhow::bail!(
                    "Invalid value for {}: '{raw}' is not a positive integer",
                    CONTEXT_WINDOW.name
                ),
            }
        };
        let model = string(&sources, &MODEL)
            .ok_or_else(|| anyhow::anyhow!("Invalid value for {}: must not be empty", MODEL.name))?;

        Ok(Config {
            config_file: path(&sources, &CONFIG_FILE).unwrap_or_default(),
            provider: parse_as(&sources, &PROVIDER)?,
            model,
            context_window,
            log_level: parse_as(&sources, &LOG_LEVEL)?,
            session_dir: path(&sources, &SESSION_DIR).unwrap_or_else(|| PathBuf::from(".ocla/sessions")),
            state_file: path(&sources, &STATE_FILE).unwrap_or_else(|| PathBuf::from(".ocla/state.json")),
            permission_mode: parse_as(&sources, &TOOL_PERMISSION_MODE)?,
            thinking: parse_as(&sources, &THINKING)?,
            project_context_file: path(&sources, &PROJECT_CONTEXT_FILE),
            storage_mode: parse_as(&sources, &SESSION_STORAGE_MODE)?,
            prompt_mode: parse_as(&sources, &PROMPT_MODE)?,
            ollama_host: string(&sources, &OLLAMA_HOST).unwrap_or_else(|| crate::models::ollama::DEFAULT_HOST.to_string()),
            openai_api_key: string(&sources, &OPENAI_API_KEY),
            openai_base_url: string(&sources, &OPENAI_BASE_URL)
                .unwrap_or_else(|| crate::models::openai::DEFAULT_BASE_URL.to_string()),
            sources,
        })
    }

    /// Problems met while reading the config layers.
    pub fn warnings(&self) -> &[String] {
        &self.sources.warnings
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            dir: self.session_dir.clone(),
            storage_mode: self.storage_mode,
            provider: self.provider.to_string(),
            model: self.model.clone(),
            context_window: self.context_window,
            project_context_file: self.project_context_file.clone(),
        }
    }

    /// Every variable with its current value and origin.
    pub fn report(&self) -> Vec<VarReport> {
        ALL.iter()
            .map(|&var| {
                let found = self.sources.lookup(var);
                let value = found.as_ref().map(|(v, _)| {
                    if var.secret {
                        "********".to_string()
                    } else {
                        v.clone()
                    }
                });
                VarReport {
                    var,
                    value,
                    origin: found.map(|(_, o)| o),
                }
            })
            .collect()
    }
}
