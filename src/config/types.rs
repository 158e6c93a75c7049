//! Configuration type definitions for TriggerClaw
//!
//! This module defines all configuration structs used throughout the runtime.
//! All types implement serde traits for JSON serialization and have sensible
//! defaults.

use serde::{Deserialize, Serialize};

/// Main configuration struct for TriggerClaw
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Agent loop configuration (step bound, execute retry policy)
    pub agent: AgentConfig,
    /// Trigger subscriber configuration (reconnect backoff, dedup cache)
    pub subscriber: SubscriberConfig,
    /// Session lifecycle configuration
    pub session: SessionConfig,
    /// Tool router (catalog) API configuration
    pub router: RouterConfig,
    /// Reasoning engine (planner) API configuration
    pub planner: PlannerConfig,
    /// Conversation history configuration
    pub history: HistoryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard maximum number of turns per run. Runs that have not stopped by
    /// then fail with a step-limit condition.
    pub max_steps: u32,
    /// Maximum retries for a retryable tool execution failure.
    pub execute_max_retries: u32,
    /// Base delay in milliseconds for execute retry backoff.
    pub retry_base_delay_ms: u64,
    /// Maximum delay cap in milliseconds for execute retry backoff.
    pub retry_max_delay_ms: u64,
    /// Timeout in seconds for one reasoning step.
    pub planner_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            execute_max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            planner_timeout_secs: 60,
        }
    }
}

// ============================================================================
// Subscriber Configuration
// ============================================================================

/// Trigger subscriber configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Trigger identifier to subscribe to (dashboard-configured). Omit to
    /// receive every trigger the credential can see.
    pub trigger_id: Option<String>,
    /// Long-poll request timeout in seconds.
    pub poll_timeout_secs: u64,
    /// Base delay in milliseconds for reconnect backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay cap in milliseconds for reconnect backoff.
    pub reconnect_max_delay_ms: u64,
    /// Maximum retries for dispatching one accepted event downstream.
    pub dispatch_max_retries: u32,
    /// Maximum number of recently seen event ids kept for deduplication.
    pub dedup_capacity: usize,
    /// How long a seen event id suppresses duplicates, in seconds.
    pub dedup_ttl_secs: u64,
    /// The assistant's own address. Events whose sender matches are skipped
    /// so the assistant never processes its own replies.
    pub self_address: Option<String>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            trigger_id: None,
            poll_timeout_secs: 55,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
            dispatch_max_retries: 3,
            dedup_capacity: 1024,
            dedup_ttl_secs: 3600,
            self_address: None,
        }
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout in seconds for one session creation call.
    pub create_timeout_secs: u64,
    /// Maximum retries for a failed session creation before the run fails.
    pub create_max_retries: u32,
    /// Fallback lifetime in seconds when the router response carries no
    /// expiry.
    pub default_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            create_timeout_secs: 30,
            create_max_retries: 3,
            default_ttl_secs: 3600,
        }
    }
}

// ============================================================================
// Router Configuration
// ============================================================================

/// Tool router (catalog) API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// API key for the tool router. Required to start.
    pub api_key: Option<String>,
    /// Base URL for the tool router API.
    pub api_base: String,
    /// Timeout in seconds for one catalog round-trip.
    pub request_timeout_secs: u64,
    /// Tool id used by the response dispatcher to reply on a thread.
    pub reply_tool_id: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.toolrouter.dev/v1".to_string(),
            request_timeout_secs: 30,
            reply_tool_id: "email_reply_to_thread".to_string(),
        }
    }
}

// ============================================================================
// Planner Configuration
// ============================================================================

/// Reasoning engine (planner) API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// API key for the reasoning engine. Required to start.
    pub api_key: Option<String>,
    /// Base URL for the chat-completions API.
    pub api_base: String,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens for one planning response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

// ============================================================================
// History Configuration
// ============================================================================

/// Conversation history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Whether per-thread conversation history is loaded and saved.
    pub enabled: bool,
    /// Number of most recent history entries fed back into planning.
    pub recent_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recent_window: 10,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output for local debugging
    Pretty,
    /// Single-line text, the default for listen mode
    Compact,
    /// Structured JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default level filter when RUST_LOG is unset.
    pub level: String,
    /// Optional log file path (JSON format only).
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.max_steps, 12);
        assert_eq!(config.subscriber.dedup_capacity, 1024);
        assert_eq!(config.session.create_max_retries, 3);
        assert!(config.router.api_key.is_none());
        assert!(config.planner.api_key.is_none());
        assert!(config.history.enabled);
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.router.api_key = Some("rk-test".into());
        config.planner.model = "gpt-4o-mini".into();

        let json = serde_json::to_string(&config).unwrap();
        let restored: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.router.api_key.as_deref(), Some("rk-test"));
        assert_eq!(restored.planner.model, "gpt-4o-mini");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"agent":{"max_steps":5}}"#).unwrap();
        assert_eq!(config.agent.max_steps, 5);
        // Everything else defaulted
        assert_eq!(config.agent.execute_max_retries, 3);
        assert_eq!(config.subscriber.poll_timeout_secs, 55);
    }

    #[test]
    fn test_log_format_deserialize() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format":"json","level":"debug"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");
    }

    #[test]
    fn test_subscriber_defaults() {
        let cfg = SubscriberConfig::default();
        assert!(cfg.trigger_id.is_none());
        assert!(cfg.self_address.is_none());
        assert_eq!(cfg.reconnect_base_delay_ms, 1000);
        assert_eq!(cfg.reconnect_max_delay_ms, 60_000);
    }
}
