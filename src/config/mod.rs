//! Configuration management for TriggerClaw
//!
//! This module provides configuration loading and validation. Configuration
//! is loaded from `~/.triggerclaw/config.json` with environment variable
//! overrides following the pattern `TRIGGERCLAW_SECTION_KEY`.

mod types;
pub mod validate;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the TriggerClaw configuration directory path (~/.triggerclaw)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".triggerclaw")
    }

    /// Returns the path to the config file (~/.triggerclaw/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Save configuration to the default path, creating the directory if
    /// needed.
    pub fn save(&self) -> Result<()> {
        let dir = Self::dir();
        std::fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(), content)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: TRIGGERCLAW_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Router
        if let Ok(val) = std::env::var("TRIGGERCLAW_ROUTER_API_KEY") {
            self.router.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("TRIGGERCLAW_ROUTER_API_BASE") {
            self.router.api_base = val;
        }
        if let Ok(val) = std::env::var("TRIGGERCLAW_ROUTER_REPLY_TOOL_ID") {
            self.router.reply_tool_id = val;
        }

        // Planner
        if let Ok(val) = std::env::var("TRIGGERCLAW_PLANNER_API_KEY") {
            self.planner.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("TRIGGERCLAW_PLANNER_API_BASE") {
            self.planner.api_base = val;
        }
        if let Ok(val) = std::env::var("TRIGGERCLAW_PLANNER_MODEL") {
            self.planner.model = val;
        }

        // Subscriber
        if let Ok(val) = std::env::var("TRIGGERCLAW_SUBSCRIBER_TRIGGER_ID") {
            self.subscriber.trigger_id = Some(val);
        }
        if let Ok(val) = std::env::var("TRIGGERCLAW_SUBSCRIBER_SELF_ADDRESS") {
            self.subscriber.self_address = Some(val);
        }

        // Agent
        if let Ok(val) = std::env::var("TRIGGERCLAW_AGENT_MAX_STEPS") {
            if let Ok(v) = val.parse() {
                self.agent.max_steps = v;
            }
        }
        if let Ok(val) = std::env::var("TRIGGERCLAW_AGENT_EXECUTE_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.agent.execute_max_retries = v;
            }
        }

        // Logging
        if let Ok(val) = std::env::var("TRIGGERCLAW_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }
}
