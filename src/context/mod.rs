//! Token budget: transcript size estimation against the context window.
//!
//! Only message `content` is counted.  Tool-call arguments, thinking text
//! and per-message framing are not, so the estimate runs low for
//! tool-heavy sessions.  The ceiling is enforced on this estimate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

use crate::session::Message;

// ---------------------------------------------------------------------------
// Tokenizer resolution
// ---------------------------------------------------------------------------

type Encoder = Option<Arc<CoreBPE>>;

fn fallback_bpe() -> Encoder {
    static CL100K: OnceLock<Encoder> = OnceLock::new();
    CL100K
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                warn!(error = %e, "cl100k_base unavailable, counting words");
                None
            }
        })
        .clone()
}

/// Tokenizer for `model`, resolved once per model name.
///
/// `None` means no BPE could be loaded and words are counted instead.
fn encoder_for(model: &str) -> Encoder {
    static CACHE: OnceLock<Mutex<HashMap<String, Encoder>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    if let Ok(guard) = cache.lock() {
        if let Some(enc) = guard.get(model) {
            return enc.clone();
        }
    }

    let enc = match tiktoken_rs::get_bpe_from_model(model) {
        Ok(bpe) => Some(Arc::new(bpe)),
        Err(_) => {
            debug!(model, "no model-specific tokenizer, using cl100k_base");
            fallback_bpe()
        }
    };

    if let Ok(mut guard) = cache.lock() {
        guard.insert(model.to_string(), enc.clone());
    }
    enc
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Token count for one string under `model`'s tokenizer.
pub fn estimate_tokens(text: &str, model: &str) -> usize {
    match encoder_for(model) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.split_whitespace().count(),
    }
}

/// Sum of the content estimates of every message.
pub fn estimate(messages: &[Message], model: &str) -> usize {
    messages
        .iter()
        .filter_map(|m| m.content.as_deref())
        .filter(|c| !c.is_empty())
        .map(|c| estimate_tokens(c, model))
        .sum()
}

/// `"42%"`, or `"130% (!)"` when over the ceiling.
pub fn usage_percent(tokens: usize, ceiling: usize) -> String {
    if ceiling == 0 {
        return "n/a".to_string();
    }
    let ratio = tokens as f64 / ceiling as f64;
    let pct = (ratio * 100.0).round() as u64;
    if ratio > 1.0 {
        format!("{pct}% (!)")
    } else {
        format!("{pct}%")
    }
}
