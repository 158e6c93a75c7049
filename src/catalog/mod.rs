//! Tool catalog client for TriggerClaw
//!
//! This module defines the [`ToolCatalog`] trait (the seam the agent loop
//! uses to discover, authenticate and execute external tools) and the
//! [`ToolRouterClient`], a thin typed facade over the tool router's REST
//! surface. Each operation is a single round-trip with its own timeout.

pub mod types;

pub use types::{AuthState, Connection, ExecutionResult, ToolDescriptor, ToolInvocation};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::RouterConfig;
use crate::error::{Result, ToolCallError, TriggerError};
use crate::session::{Session, SessionApi, SessionHandle};

/// The default tool router endpoint URL.
const ROUTER_API_URL: &str = "https://api.toolrouter.dev/v1";

/// Default per-call timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Catalog operations used by the agent loop.
///
/// Implementations are stateless per call; all scoping comes from the
/// session handle passed in.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Best-effort relevance search. Returns an empty list (not an error)
    /// when nothing matches the intent.
    async fn search_tools(&self, session: &Session, intent: &str) -> Result<Vec<ToolDescriptor>>;

    /// Request (or confirm) authorization for an app. Idempotent: calling
    /// twice for an already-authorized app returns the existing AUTHORIZED
    /// connection without re-prompting the user.
    async fn request_connection(&self, session: &Session, app: &str) -> Result<Connection>;

    /// Execute a batch of tool invocations. Partial-failure semantics: a
    /// failure in one element never suppresses the results of the others.
    async fn execute_tools(
        &self,
        session: &Session,
        invocations: Vec<ToolInvocation>,
    ) -> Result<Vec<ExecutionResult>>;
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest<'a> {
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    session: &'a str,
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionRequest<'a> {
    session: &'a str,
    app: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionResponse {
    connection_id: String,
    app: String,
    auth_state: String,
    #[serde(default)]
    redirect_url: Option<String>,
}

impl ConnectionResponse {
    fn into_connection(self) -> Connection {
        let auth_state = match self.auth_state.as_str() {
            "authorized" => AuthState::Authorized,
            "pending" => AuthState::Pending {
                redirect_url: self.redirect_url,
            },
            _ => AuthState::None,
        };
        Connection {
            connection_id: self.connection_id,
            app: self.app,
            auth_state,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    session: &'a str,
    invocations: &'a [ToolInvocation],
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    results: Vec<WireExecutionResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExecutionResult {
    tool_id: String,
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<WireExecutionError>,
}

#[derive(Debug, Deserialize)]
struct WireExecutionError {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl WireExecutionResult {
    fn into_result(self) -> ExecutionResult {
        if self.success {
            ExecutionResult::ok(&self.tool_id, self.data.unwrap_or(Value::Null))
        } else {
            let error = self
                .error
                .map(|e| classify_wire_error(&e.kind, e.message))
                .unwrap_or_else(|| ToolCallError::Unknown("unspecified failure".to_string()));
            ExecutionResult::failed(&self.tool_id, error)
        }
    }
}

/// Map the router's per-item error kind strings into the classified error.
fn classify_wire_error(kind: &str, message: String) -> ToolCallError {
    match kind {
        "timeout" => ToolCallError::Timeout(message),
        "transient" => ToolCallError::Transient(message),
        "rate_limited" => ToolCallError::RateLimited(message),
        "invalid_input" => ToolCallError::InvalidInput(message),
        "permission_denied" => ToolCallError::PermissionDenied(message),
        "not_found" => ToolCallError::NotFound(message),
        _ => ToolCallError::Unknown(message),
    }
}

/// Map a transport-level failure into the classified error.
fn classify_transport(err: &reqwest::Error) -> ToolCallError {
    if err.is_timeout() {
        ToolCallError::Timeout(err.to_string())
    } else if err.is_connect() {
        ToolCallError::Transient(err.to_string())
    } else {
        ToolCallError::Unknown(err.to_string())
    }
}

// ============================================================================
// Tool Router Client
// ============================================================================

/// Thin typed facade over the tool router REST API.
///
/// Implements [`ToolCatalog`] for the agent loop and
/// [`SessionApi`](crate::session::SessionApi) for the session manager.
pub struct ToolRouterClient {
    /// API key for authentication
    api_key: String,
    /// API base URL
    api_base: String,
    /// HTTP client with the per-call timeout applied
    client: Client,
}

impl ToolRouterClient {
    /// Create a new client against the default router endpoint.
    ///
    /// # Example
    /// ```
    /// use triggerclaw::catalog::ToolRouterClient;
    ///
    /// let client = ToolRouterClient::new("rk-xxx");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, ROUTER_API_URL, DEFAULT_TIMEOUT_SECS)
    }

    /// Create a new client with a custom base URL and timeout.
    ///
    /// # Arguments
    /// * `api_key` - Router API key
    /// * `api_base` - Base URL (trailing slash will be removed)
    /// * `timeout_secs` - Per-call timeout in seconds
    pub fn with_base_url(api_key: &str, api_base: &str, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Build a client from config. The API key must already be validated.
    pub fn from_config(cfg: &RouterConfig) -> Self {
        Self::with_base_url(
            cfg.api_key.as_deref().unwrap_or_default(),
            &cfg.api_base,
            cfg.request_timeout_secs,
        )
    }

    async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| TriggerError::ToolCall(classify_transport(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TriggerError::ToolCall(ToolCallError::from_status(
                status.as_u16(),
                format!("router error ({}): {}", status, text),
            )));
        }

        response.json::<R>().await.map_err(|e| {
            TriggerError::ToolCall(ToolCallError::Unknown(format!(
                "failed to parse router response: {}",
                e
            )))
        })
    }
}

#[async_trait]
impl ToolCatalog for ToolRouterClient {
    async fn search_tools(&self, session: &Session, intent: &str) -> Result<Vec<ToolDescriptor>> {
        debug!(user = %session.user_id, "Searching tools");
        let response: SearchResponse = self
            .post_json(
                "/tools/search",
                &SearchRequest {
                    session: &session.handle,
                    query: intent,
                },
            )
            .await?;
        Ok(response.tools)
    }

    async fn request_connection(&self, session: &Session, app: &str) -> Result<Connection> {
        debug!(user = %session.user_id, app = %app, "Requesting connection");
        let response: ConnectionResponse = self
            .post_json(
                "/connections/request",
                &ConnectionRequest {
                    session: &session.handle,
                    app,
                },
            )
            .await?;
        Ok(response.into_connection())
    }

    async fn execute_tools(
        &self,
        session: &Session,
        invocations: Vec<ToolInvocation>,
    ) -> Result<Vec<ExecutionResult>> {
        debug!(
            user = %session.user_id,
            count = invocations.len(),
            "Executing tool batch"
        );
        let response: ExecuteResponse = self
            .post_json(
                "/tools/execute",
                &ExecuteRequest {
                    session: &session.handle,
                    invocations: &invocations,
                },
            )
            .await?;
        Ok(response.results.into_iter().map(|r| r.into_result()).collect())
    }
}

#[async_trait]
impl SessionApi for ToolRouterClient {
    async fn create_session(&self, user_id: &str) -> Result<SessionHandle> {
        debug!(user = %user_id, "Creating session");
        self.post_json("/sessions", &CreateSessionRequest { user_id })
            .await
            .map_err(|e| TriggerError::SessionCreation(e.to_string()))
    }
}
