//! Tool catalog types for TriggerClaw
//!
//! These types mirror the tool router's wire surface: descriptors returned by
//! search, connection authorization state, and per-invocation execution
//! results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolCallError;
use crate::session::ConnectionId;

/// A callable external capability, returned by catalog search.
/// Read-only to the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool identifier (e.g. "github_create_issue")
    pub tool_id: String,
    /// The app the tool belongs to (e.g. "github")
    pub app: String,
    /// The connection that must be AUTHORIZED before this tool may execute.
    /// `None` for tools that need no user authorization.
    #[serde(default)]
    pub required_connection: Option<ConnectionId>,
    /// JSON Schema describing the tool's input
    #[serde(default)]
    pub input_schema: Value,
}

/// Authorization state of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    /// No authorization attempt has been made
    None,
    /// Authorization was requested and awaits external user action
    Pending {
        /// Link the user must visit to complete authorization
        #[serde(default)]
        redirect_url: Option<String>,
    },
    /// The connection is live and tools behind it may execute
    Authorized,
}

/// The authorization relationship between a user's session and one app.
///
/// Mutated only through authentication requests issued via the catalog;
/// the agent loop never writes `auth_state` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Unique connection identifier
    pub connection_id: ConnectionId,
    /// The app this connection authorizes
    pub app: String,
    /// Current authorization state
    pub auth_state: AuthState,
}

impl Connection {
    pub fn is_authorized(&self) -> bool {
        self.auth_state == AuthState::Authorized
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.auth_state, AuthState::Pending { .. })
    }

    /// The pending redirect link, when the router provided one.
    pub fn redirect_url(&self) -> Option<&str> {
        match &self.auth_state {
            AuthState::Pending { redirect_url } => redirect_url.as_deref(),
            _ => None,
        }
    }
}

/// One tool call in an execute batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// The tool to invoke
    pub tool_id: String,
    /// Schema-typed input, opaque to the core
    pub input: Value,
}

impl ToolInvocation {
    pub fn new(tool_id: &str, input: Value) -> Self {
        Self {
            tool_id: tool_id.to_string(),
            input,
        }
    }
}

/// The outcome of one tool invocation. Consumed immediately by the agent
/// loop to decide the next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// The tool that was invoked
    pub tool_id: String,
    /// Whether the invocation succeeded
    pub success: bool,
    /// Tool output on success, opaque to the core
    #[serde(default)]
    pub data: Option<Value>,
    /// Classified failure on error
    #[serde(default)]
    pub error: Option<ToolCallError>,
}

impl ExecutionResult {
    /// A successful result carrying the tool's output.
    pub fn ok(tool_id: &str, data: Value) -> Self {
        Self {
            tool_id: tool_id.to_string(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result carrying the classified error.
    pub fn failed(tool_id: &str, error: ToolCallError) -> Self {
        Self {
            tool_id: tool_id.to_string(),
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// True when this result failed with a retryable error.
    pub fn is_retryable_failure(&self) -> bool {
        !self.success
            && self
                .error
                .as_ref()
                .map(ToolCallError::is_retryable)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_deserialize() {
        let descriptor: ToolDescriptor = serde_json::from_value(json!({
            "toolId": "github_create_issue",
            "app": "github",
            "requiredConnection": "conn-gh",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(descriptor.tool_id, "github_create_issue");
        assert_eq!(descriptor.required_connection.as_deref(), Some("conn-gh"));
    }

    #[test]
    fn test_descriptor_without_connection() {
        let descriptor: ToolDescriptor = serde_json::from_value(json!({
            "toolId": "web_search",
            "app": "web"
        }))
        .unwrap();
        assert!(descriptor.required_connection.is_none());
    }

    #[test]
    fn test_connection_states() {
        let authorized = Connection {
            connection_id: "conn-1".into(),
            app: "github".into(),
            auth_state: AuthState::Authorized,
        };
        assert!(authorized.is_authorized());
        assert!(!authorized.is_pending());
        assert!(authorized.redirect_url().is_none());

        let pending = Connection {
            connection_id: "conn-2".into(),
            app: "notion".into(),
            auth_state: AuthState::Pending {
                redirect_url: Some("https://auth.example/connect".into()),
            },
        };
        assert!(!pending.is_authorized());
        assert!(pending.is_pending());
        assert_eq!(
            pending.redirect_url(),
            Some("https://auth.example/connect")
        );
    }

    #[test]
    fn test_execution_result_helpers() {
        let ok = ExecutionResult::ok("tool-a", json!({"issue": 42}));
        assert!(ok.success);
        assert!(!ok.is_retryable_failure());

        let retryable = ExecutionResult::failed(
            "tool-a",
            crate::error::ToolCallError::Timeout("30s".into()),
        );
        assert!(retryable.is_retryable_failure());

        let fatal = ExecutionResult::failed(
            "tool-a",
            crate::error::ToolCallError::InvalidInput("bad field".into()),
        );
        assert!(!fatal.is_retryable_failure());
    }

    #[test]
    fn test_auth_state_serde() {
        let state: AuthState =
            serde_json::from_str(r#"{"state":"pending","redirect_url":"https://x"}"#).unwrap();
        assert!(matches!(state, AuthState::Pending { .. }));

        let state: AuthState = serde_json::from_str(r#"{"state":"authorized"}"#).unwrap();
        assert_eq!(state, AuthState::Authorized);
    }
}
