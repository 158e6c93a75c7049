//! Error types for TriggerClaw
//!
//! This module defines all error types used throughout the TriggerClaw runtime.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Tool Call Error Classification
// ============================================================================

/// Structured tool-call error classification.
///
/// Categorizes failures reported by the tool router so the agent loop can
/// decide between bounded retry and immediate surfacing without string
/// matching.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ToolCallError {
    /// Connection or read timeout — retry with backoff
    Timeout(String),
    /// 5xx or connection reset — retry with backoff
    Transient(String),
    /// 429 — quota exhausted on the router side, retry with backoff
    RateLimited(String),
    /// 400 — malformed tool input, do not retry
    InvalidInput(String),
    /// 403 — the connection lacks the required scope, do not retry
    PermissionDenied(String),
    /// 404 — tool or connection does not exist, do not retry
    NotFound(String),
    /// Catch-all for unrecognized failures, do not retry
    Unknown(String),
}

impl fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ToolCallError::Transient(msg) => write!(f, "Transient failure: {}", msg),
            ToolCallError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            ToolCallError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            ToolCallError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            ToolCallError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ToolCallError::Unknown(msg) => write!(f, "Unknown tool error: {}", msg),
        }
    }
}

impl ToolCallError {
    /// Returns `true` if this failure is transient and the call should be
    /// retried with backoff.
    ///
    /// Retryable errors: Timeout, Transient, RateLimited.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolCallError::Timeout(_)
                | ToolCallError::Transient(_)
                | ToolCallError::RateLimited(_)
        )
    }

    /// Classify an HTTP status code into a tool-call error.
    pub fn from_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            400 => ToolCallError::InvalidInput(msg),
            401 | 403 => ToolCallError::PermissionDenied(msg),
            404 => ToolCallError::NotFound(msg),
            408 => ToolCallError::Timeout(msg),
            429 => ToolCallError::RateLimited(msg),
            500..=599 => ToolCallError::Transient(msg),
            _ => ToolCallError::Unknown(msg),
        }
    }
}

impl From<ToolCallError> for TriggerError {
    fn from(err: ToolCallError) -> Self {
        TriggerError::ToolCall(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for TriggerClaw operations.
#[derive(Error, Debug)]
pub enum TriggerError {
    /// Configuration-related errors (missing credentials, invalid values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound event failed validation — dropped at ingestion, never retried
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Trigger subscription connection failure — retried indefinitely with backoff
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Session creation against the tool router failed
    #[error("Session creation error: {0}")]
    SessionCreation(String),

    /// Authorization requires external user action; the run replies and stops
    #[error("Authorization pending for {app}")]
    AuthenticationPending {
        /// The app whose connection is awaiting authorization
        app: String,
        /// Link the user must visit to complete authorization, when the
        /// router provides one
        redirect_url: Option<String>,
    },

    /// Classified tool execution failure
    #[error("Tool call error: {0}")]
    ToolCall(ToolCallError),

    /// Reasoning step failed or returned something that is not an action
    #[error("Planner error: {0}")]
    Planner(String),

    /// The run hit the hard step bound without reaching a terminal action
    #[error("Step limit exceeded after {steps} turns")]
    StepLimitExceeded {
        /// Number of turns executed before the bound was hit
        steps: u32,
    },

    /// The run was interrupted by shutdown at a suspension boundary
    #[error("Run cancelled by shutdown")]
    Cancelled,

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found (sessions, tools, conversations)
    #[error("Not found: {0}")]
    NotFound(String),
}

/// A specialized `Result` type for TriggerClaw operations.
pub type Result<T> = std::result::Result<T, TriggerError>;
