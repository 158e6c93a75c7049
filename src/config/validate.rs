//! Configuration validation with unknown field detection.
//!
//! Startup validation has two layers: structural checks against a raw JSON
//! value (unknown fields with "did you mean?" suggestions) and semantic
//! checks against a parsed [`Config`] (required credentials, sane bounds).

use serde_json::Value;
use std::collections::HashSet;

use super::Config;
use crate::error::{Result, TriggerError};

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "agent",
    "subscriber",
    "session",
    "router",
    "planner",
    "history",
    "logging",
];

/// Known fields for the agent section.
const KNOWN_AGENT: &[&str] = &[
    "max_steps",
    "execute_max_retries",
    "retry_base_delay_ms",
    "retry_max_delay_ms",
    "planner_timeout_secs",
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.len();
    let b_len = b.len();
    let mut matrix = vec![vec![0usize; b_len + 1]; a_len + 1];

    for (i, row) in matrix.iter_mut().enumerate().take(a_len + 1) {
        row[0] = i;
    }
    for (j, val) in matrix[0].iter_mut().enumerate().take(b_len + 1) {
        *val = j;
    }

    for (i, ca) in a.chars().enumerate() {
        for (j, cb) in b.chars().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            matrix[i + 1][j + 1] = std::cmp::min(
                std::cmp::min(matrix[i][j + 1] + 1, matrix[i + 1][j] + 1),
                matrix[i][j] + cost,
            );
        }
    }
    matrix[a_len][b_len]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

/// Validate a raw JSON config value against known field names.
pub fn validate_raw(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: String::new(),
                message: "Config must be a JSON object".to_string(),
            });
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Ok,
        path: String::new(),
        message: "Valid JSON".to_string(),
    });

    let known_set: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if !known_set.contains(key.as_str()) {
            has_unknown = true;
            let suggestion = suggest_field(key, KNOWN_TOP_LEVEL).unwrap_or_default();
            let msg = if suggestion.is_empty() {
                format!("Unknown field '{}'", key)
            } else {
                format!("Unknown field '{}' \u{2014} {}", key, suggestion)
            };
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: key.clone(),
                message: msg,
            });
        }
    }

    if let Some(agent) = obj.get("agent").and_then(|v| v.as_object()) {
        let known_set: HashSet<&str> = KNOWN_AGENT.iter().copied().collect();
        for key in agent.keys() {
            if !known_set.contains(key.as_str()) {
                has_unknown = true;
                let suggestion = suggest_field(key, KNOWN_AGENT).unwrap_or_default();
                let msg = if suggestion.is_empty() {
                    format!("Unknown field '{}'", key)
                } else {
                    format!("Unknown field '{}' \u{2014} {}", key, suggestion)
                };
                diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Error,
                    path: format!("agent.{}", key),
                    message: msg,
                });
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Ok,
            path: String::new(),
            message: "All fields recognized".to_string(),
        });
    }

    diagnostics
}

/// Semantic validation of a parsed config.
///
/// A missing credential for either external collaborator is a startup
/// failure: the process must not partially listen.
pub fn validate_startup(config: &Config) -> Result<()> {
    if config
        .router
        .api_key
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        return Err(TriggerError::Config(
            "router.api_key is not set (TRIGGERCLAW_ROUTER_API_KEY)".to_string(),
        ));
    }
    if config
        .planner
        .api_key
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        return Err(TriggerError::Config(
            "planner.api_key is not set (TRIGGERCLAW_PLANNER_API_KEY)".to_string(),
        ));
    }
    if config.agent.max_steps == 0 {
        return Err(TriggerError::Config(
            "agent.max_steps must be at least 1".to_string(),
        ));
    }
    if config.subscriber.dedup_capacity == 0 {
        return Err(TriggerError::Config(
            "subscriber.dedup_capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}
