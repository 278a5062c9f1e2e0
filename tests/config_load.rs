//! Integration test: layered configuration from a JSON file, environment
//! variables and command-line overrides.

use std::collections::HashMap;

use ocla::config::{self, Config, Origin, PromptMode, Sources, ThinkingMode};
use ocla::models::ProviderKind;
use ocla::permission::PermissionMode;
use ocla::session::StorageMode;
use tempfile::TempDir;

const SAMPLE: &str = r#"{
  "provider": "openai",
  "model": "gpt-4o-mini",
  "contextWindow": 32000,
  "sessionStorageMode": "PLAIN",
  "displayThinking": "HIDDEN",
  "openaiApiKey": "sk-from-file"
}"#;

/// Sources with `env` as the whole environment and the config file at
/// `<dir>/config.json`.
fn sources(dir: &TempDir, env: &[(&str, &str)], cli: &[(&'static str, &str)]) -> Sources {
    let mut env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.insert(
        "OCLA_CONFIG_FILE".into(),
        dir.path().join("config.json").to_string_lossy().into_owned(),
    );
    let mut sources = Sources {
        cli: cli.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        env,
        ..Default::default()
    };
    sources.load_file();
    sources
}

#[test]
fn defaults_without_file_or_env() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::resolve(sources(&dir, &[], &[])).unwrap();

    assert_eq!(cfg.provider, ProviderKind::Ollama);
    assert_eq!(cfg.model, "qwen3");
    assert_eq!(cfg.context_window, 16384);
    assert_eq!(cfg.permission_mode, PermissionMode::Default);
    assert_eq!(cfg.storage_mode, StorageMode::Compressed);
    assert_eq!(cfg.prompt_mode, PromptMode::Interactive);
    assert_eq!(cfg.thinking, ThinkingMode::Enabled);
    assert!(cfg.openai_api_key.is_none());
    assert!(cfg.warnings().is_empty());
}

#[test]
fn file_values_are_used() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), SAMPLE).unwrap();
    let cfg = Config::resolve(sources(&dir, &[], &[])).unwrap();

    assert_eq!(cfg.provider, ProviderKind::OpenAI);
    assert_eq!(cfg.model, "gpt-4o-mini");
    assert_eq!(cfg.context_window, 32000);
    assert_eq!(cfg.storage_mode, StorageMode::Plain);
    assert_eq!(cfg.thinking, ThinkingMode::Hidden);
    assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-from-file"));
}

#[test]
fn cli_beats_env_beats_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), SAMPLE).unwrap();

    let src = sources(
        &dir,
        &[("OCLA_MODEL", "from-env"), ("OCLA_CONTEXT_WINDOW", "8000")],
        &[(config::MODEL.name, "from-cli")],
    );
    assert_eq!(src.lookup(&config::MODEL), Some(("from-cli".into(), Origin::Cli)));
    assert_eq!(
        src.lookup(&config::CONTEXT_WINDOW),
        Some(("8000".into(), Origin::Env("OCLA_CONTEXT_WINDOW".into())))
    );
    assert_eq!(src.lookup(&config::PROVIDER), Some(("openai".into(), Origin::File)));
    assert_eq!(src.lookup(&config::LOG_LEVEL), Some(("WARNING".into(), Origin::Default)));

    let cfg = Config::resolve(src).unwrap();
    assert_eq!(cfg.model, "from-cli");
    assert_eq!(cfg.context_window, 8000);
}

#[test]
fn second_env_name_is_a_fallback() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::resolve(sources(&dir, &[("OLLAMA_HOST", "http://gpu:11434")], &[])).unwrap();
    assert_eq!(cfg.ollama_host, "http://gpu:11434");

    let cfg = Config::resolve(sources(
        &dir,
        &[("OLLAMA_HOST", "http://gpu:11434"), ("OCLA_OLLAMA_HOST", "http://local:1")],
        &[],
    ))
    .unwrap();
    assert_eq!(cfg.ollama_host, "http://local:1");
}

#[test]
fn invalid_values_name_the_variable() {
    let dir = TempDir::new().unwrap();

    let err = Config::resolve(sources(&dir, &[("OCLA_CONTEXT_WINDOW", "lots")], &[])).unwrap_err();
    assert!(err.to_string().contains("context_window"), "{err}");

    let err = Config::resolve(sources(&dir, &[("OCLA_TOOL_PERMISSION_MODE", "YOLO")], &[])).unwrap_err();
    assert!(err.to_string().contains("tool_permission_mode"), "{err}");
}

#[test]
fn malformed_file_is_a_warning() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), r#"["just", "a list"]"#).unwrap();

    let cfg = Config::resolve(sources(&dir, &[], &[])).unwrap();
    assert_eq!(cfg.model, "qwen3");
    assert_eq!(cfg.warnings().len(), 1);
}

#[test]
fn camel_case_keys_map_onto_variables() {
    let dir = TempDir::new().unwrap();
    let json = r#"{
        "contextWindow": 2048,
        "logLevel": "DEBUG",
        "sessionDir": "/tmp/ocla-json-sessions",
        "stateFile": "/tmp/ocla-json-state.json",
        "toolPermissionMode": "ALWAYS_ASK",
        "projectContextFiles": "CONTEXT.md",
        "promptMode": "ONESHOT"
    }"#;
    std::fs::write(dir.path().join("config.json"), json).unwrap();
    let cfg = Config::resolve(sources(&dir, &[], &[])).unwrap();

    assert_eq!(cfg.context_window, 2048);
    assert_eq!(cfg.log_level, ocla::logs::LogLevel::Debug);
    assert_eq!(cfg.session_dir, std::path::PathBuf::from("/tmp/ocla-json-sessions"));
    assert_eq!(cfg.state_file, std::path::PathBuf::from("/tmp/ocla-json-state.json"));
    assert_eq!(cfg.permission_mode, PermissionMode::AlwaysAsk);
    assert_eq!(cfg.project_context_file, Some(std::path::PathBuf::from("CONTEXT.md")));
    assert_eq!(cfg.prompt_mode, PromptMode::Oneshot);
    assert!(cfg.warnings().is_empty());
}

#[test]
fn snake_case_names_are_not_file_keys() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), r#"{"context_window": 2048}"#).unwrap();
    let cfg = Config::resolve(sources(&dir, &[], &[])).unwrap();
    assert_eq!(cfg.context_window, 16384);
}

#[test]
fn default_config_file_is_json() {
    assert_eq!(config::CONFIG_FILE.default, Some(".ocla/config.json"));
    assert_eq!(config::CONFIG_FILE.key, None);
    assert_eq!(config::CONTEXT_WINDOW.key, Some("contextWindow"));
}

#[test]
fn report_masks_secrets() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), SAMPLE).unwrap();
    let cfg = Config::resolve(sources(&dir, &[], &[])).unwrap();

    let report = cfg.report();
    assert_eq!(report.len(), config::ALL.len());
    let key = report
        .iter()
        .find(|r| r.var.name == config::OPENAI_API_KEY.name)
        .unwrap();
    assert_eq!(key.value.as_deref(), Some("********"));
    assert_eq!(key.origin, Some(Origin::File));
}

#[test]
fn session_settings_follow_config() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::resolve(sources(&dir, &[("OCLA_SESSION_DIR", "/tmp/ocla-sessions")], &[])).unwrap();
    let settings = cfg.session_settings();
    assert_eq!(settings.dir, std::path::PathBuf::from("/tmp/ocla-sessions"));
    assert_eq!(settings.provider, "ollama");
    assert_eq!(settings.context_window, 16384);
}
