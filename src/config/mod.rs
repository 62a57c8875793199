//! Evaluation settings, read once by the composition root.
//!
//! Nothing below main.rs looks at the environment; components receive an
//! [`EvalConfig`] at construction.

use serde_json::{Map, Value};
use std::time::Duration;

use crate::consts::{DEFAULT_GRADER_BASE_URL, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_TEMPLATE: &str = "OPENAI_EVAL_TEMPLATE";
pub const ENV_POLL_INTERVAL: &str = "OPENAI_EVAL_POLL_INTERVAL";
pub const ENV_POLL_TIMEOUT: &str = "OPENAI_EVAL_TIMEOUT";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";

/// Base payload for every evaluation request.
pub type EvalTemplate = Map<String, Value>;

/// Immutable evaluation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    /// Grading credential. Without it evaluation never runs.
    pub api_key: Option<String>,
    pub base_url: String,
    pub template: Option<EvalTemplate>,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_GRADER_BASE_URL.to_string(),
            template: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

impl EvalConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            api_key: non_blank(ENV_API_KEY),
            base_url: non_blank(ENV_BASE_URL)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GRADER_BASE_URL.to_string()),
            template: non_blank(ENV_TEMPLATE).and_then(|raw| parse_template(&raw)),
            poll_interval: parse_millis(
                lookup(ENV_POLL_INTERVAL).as_deref(),
                DEFAULT_POLL_INTERVAL_MS,
            ),
            poll_timeout: parse_millis(lookup(ENV_POLL_TIMEOUT).as_deref(), DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

/// Interpret a configured template.
///
/// A JSON object is used as is. Anything else non-empty is an evaluation
/// template id and gets wrapped as `{"evaluation_template_id": ...}`; a JSON
/// string literal is unquoted first.
pub fn parse_template(raw: &str) -> Option<EvalTemplate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let id = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => return Some(map),
        Ok(Value::String(s)) => s.trim().to_string(),
        _ => raw.to_string(),
    };
    if id.is_empty() {
        return None;
    }
    let mut template = Map::new();
    template.insert("evaluation_template_id".to_string(), Value::String(id));
    Some(template)
}

/// Milliseconds from text, falling back to `default_ms` for anything that
/// is not a finite positive number.
pub fn parse_millis(raw: Option<&str>, default_ms: u64) -> Duration {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_micros(((ms * 1000.0).round() as u64).max(1)))
        .unwrap_or_else(|| Duration::from_millis(default_ms))
}
