//! Logging initialization for TriggerClaw.
//!
//! Three output formats:
//! - `pretty`: multi-line human-readable output for local debugging
//! - `compact`: single-line text, the default for listen mode
//! - `json`: structured JSON lines for log aggregators (e.g. Loki, CloudWatch)
//!
//! Subsystems are told apart by tracing targets (module paths) and by the
//! per-run span the agent loop opens, so filters like
//! `RUST_LOG=triggerclaw::subscriber=debug` work without any custom macro.
//! When `file` is set, every format writes there instead of stdout.

use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, TriggerError};

/// Install the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted.
/// Falls back to the `RUST_LOG` env var; if unset, uses `cfg.level`.
///
/// # Errors
/// Fails when the configured log file cannot be opened. That is a startup
/// error like any other bad configuration value.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let writer = match &cfg.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    TriggerError::Config(format!("cannot open log file {}: {}", path, e))
                })?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    match cfg.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.format, LogFormat::Compact);
        assert_eq!(cfg.level, "info");
        assert!(cfg.file.is_none());
    }

    #[test]
    fn test_log_format_deserialize_pretty() {
        let cfg: LoggingConfig = serde_json::from_str(r#"{"format":"pretty"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert_eq!(cfg.level, "info"); // default
    }

    #[test]
    fn test_logging_config_roundtrip() {
        let cfg = LoggingConfig {
            format: LogFormat::Json,
            file: Some("/tmp/triggerclaw.log".to_string()),
            level: "debug".to_string(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: LoggingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.format, LogFormat::Json);
        assert_eq!(restored.file.as_deref(), Some("/tmp/triggerclaw.log"));
        assert_eq!(restored.level, "debug");
    }

    #[test]
    fn test_init_logging_unopenable_file_is_config_error() {
        // Fails before any global subscriber is installed, so this test
        // cannot collide with other tests' tracing state
        let cfg = LoggingConfig {
            format: LogFormat::Json,
            file: Some("/nonexistent-dir/triggerclaw.log".to_string()),
            level: "info".to_string(),
        };
        let err = init_logging(&cfg).unwrap_err();
        assert!(matches!(err, TriggerError::Config(_)));
    }
}
