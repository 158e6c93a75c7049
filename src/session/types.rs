//! Session types for TriggerClaw
//!
//! A session is a scoped, time-bounded handle authorizing tool discovery and
//! execution for one user. Sessions are owned by the
//! [`SessionManager`](super::SessionManager); the agent loop borrows one for
//! the duration of a single run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier of an authorization relationship between a user and one app.
pub type ConnectionId = String;

/// What the session creation API returns: an opaque token plus its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    /// Opaque token scoping catalog calls to one user's connections
    pub handle: String,
    /// When the token stops being valid
    pub expires_at: DateTime<Utc>,
}

/// A per-user session. At most one live session per user at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The user this session is scoped to
    pub user_id: String,
    /// Opaque token from the session creation API
    pub handle: String,
    /// When this session was created
    pub created_at: DateTime<Utc>,
    /// When this session expires and must be recreated
    pub expires_at: DateTime<Utc>,
    /// Connections observed AUTHORIZED during this session's lifetime.
    /// A record for observability only, never trusted for execution
    /// gating: each run re-reads authorization through the catalog the
    /// first time it touches a connection, so out-of-band revocation
    /// between runs stays visible.
    pub authorized_connections: HashSet<ConnectionId>,
}

impl Session {
    /// Build a session for a user from a freshly created handle.
    pub fn new(user_id: &str, handle: SessionHandle) -> Self {
        Self {
            user_id: user_id.to_string(),
            handle: handle.handle,
            created_at: Utc::now(),
            expires_at: handle.expires_at,
            authorized_connections: HashSet::new(),
        }
    }

    /// True once the session's expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Record a connection observed AUTHORIZED.
    pub fn mark_authorized(&mut self, connection_id: &str) {
        self.authorized_connections.insert(connection_id.to_string());
    }

    /// Whether a connection was observed AUTHORIZED during this session.
    pub fn has_authorized(&self, connection_id: &str) -> bool {
        self.authorized_connections.contains(connection_id)
    }
}
