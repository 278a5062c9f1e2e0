//! Shared utility helpers.

use std::path::PathBuf;

/// Truncate `s` to `max` chars, noting how much was cut.
pub fn truncate_str(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    format!("{head}… (truncated, {} chars more)", total - max)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
