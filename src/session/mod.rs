//! Session module - per-user session lifecycle
//!
//! This module provides session management for TriggerClaw:
//! - A [`SessionApi`] seam over the external session creation endpoint
//! - A [`SessionManager`] that caches one live session per user, recreates
//!   expired ones lazily, and serializes creation per user (single-flight)
//! - Per-thread conversation history ([`history`])
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use triggerclaw::session::SessionManager;
//!
//! let manager = SessionManager::new(router_client, config);
//! let session = manager.get_or_create("alice@example.com").await?;
//! ```

pub mod history;
mod types;

pub use history::{ConversationStore, HistoryEntry, HistoryRole};
pub use types::{ConnectionId, Session, SessionHandle};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Result, TriggerError};
use crate::utils::backoff::Backoff;

/// Base delay for session creation retry backoff.
const CREATE_RETRY_BASE_DELAY_MS: u64 = 500;
/// Delay cap for session creation retry backoff.
const CREATE_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// The external session creation endpoint, consumed at its interface
/// boundary only: one call in, a handle with an expiry out.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a session scoping catalog calls to one user's connections.
    async fn create_session(&self, user_id: &str) -> Result<SessionHandle>;
}

/// Caches one live [`Session`] per user and serializes creation per user.
///
/// # Concurrency
///
/// Two concurrent `get_or_create` calls for the same user must not both
/// create a session: creation is guarded by a per-user async lock, and the
/// cache is re-checked under that lock, so exactly one underlying creation
/// call happens. Different users proceed independently.
pub struct SessionManager {
    /// Session creation collaborator
    api: Arc<dyn SessionApi>,
    /// Lifecycle configuration
    config: SessionConfig,
    /// One cached session per user id
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    /// Per-user creation locks (single-flight)
    creation_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionManager {
    /// Create a new session manager over a creation collaborator.
    pub fn new(api: Arc<dyn SessionApi>, config: SessionConfig) -> Self {
        Self {
            api,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            creation_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the cached non-expired session for a user, or create one.
    ///
    /// Expiry is checked lazily on access: a stale entry is invalidated and
    /// replaced. Creation is retried a bounded number of times with backoff
    /// before the error propagates to the caller's run.
    pub async fn get_or_create(&self, user_id: &str) -> Result<Session> {
        // Fast path: cached and not expired
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(user_id) {
                if !session.is_expired() {
                    return Ok(session.clone());
                }
            }
        }

        // Serialize creation per user. Waiters re-check the cache under the
        // lock so only the first caller reaches the creation call.
        let creation_lock = {
            let mut locks = self.creation_locks.lock().await;
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = creation_lock.lock().await;

        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(user_id) {
                if !session.is_expired() {
                    return Ok(session.clone());
                }
            }
        }

        let handle = self.create_with_retry(user_id).await?;
        let session = Session::new(user_id, handle);
        debug!(user = %user_id, expires_at = %session.expires_at, "Session created");

        let mut sessions = self.sessions.write().await;
        sessions.insert(user_id.to_string(), session.clone());
        Ok(session)
    }

    /// Drop the cached session for a user, forcing recreation on next access.
    pub async fn invalidate(&self, user_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(user_id);
    }

    /// Write back a session's observed state (authorized-connection hints).
    pub async fn save(&self, session: &Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.user_id.clone(), session.clone());
    }

    /// Number of cached sessions (for testing/metrics).
    pub async fn cached_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn create_with_retry(&self, user_id: &str) -> Result<SessionHandle> {
        let timeout = Duration::from_secs(self.config.create_timeout_secs);
        let backoff = Backoff::new(CREATE_RETRY_BASE_DELAY_MS, CREATE_RETRY_MAX_DELAY_MS);
        let mut last_err: Option<TriggerError> = None;

        for attempt in 0..=self.config.create_max_retries {
            if attempt > 0 {
                if let Some(ref err) = last_err {
                    warn!(
                        user = %user_id,
                        attempt = attempt,
                        max_retries = self.config.create_max_retries,
                        error = %err,
                        "Retrying session creation"
                    );
                }
                backoff.sleep(attempt - 1).await;
            }

            match tokio::time::timeout(timeout, self.api.create_session(user_id)).await {
                Ok(Ok(mut handle)) => {
                    // Routers occasionally hand back a token with no usable
                    // expiry; fall back to the configured lifetime.
                    if handle.expires_at <= Utc::now() {
                        handle.expires_at = Utc::now()
                            + ChronoDuration::seconds(self.config.default_ttl_secs as i64);
                    }
                    return Ok(handle);
                }
                Ok(Err(err)) => last_err = Some(err),
                Err(_) => {
                    last_err = Some(TriggerError::SessionCreation(format!(
                        "creation timed out after {}s",
                        self.config.create_timeout_secs
                    )))
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| TriggerError::SessionCreation("no attempt made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A mock session API counting underlying creation calls.
    struct CountingApi {
        calls: AtomicU32,
        ttl_secs: i64,
        delay_ms: u64,
    }

    impl CountingApi {
        fn new(ttl_secs: i64) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ttl_secs,
                delay_ms: 0,
            }
        }

        fn with_delay(ttl_secs: i64, delay_ms: u64) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ttl_secs,
                delay_ms,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionApi for CountingApi {
        async fn create_session(&self, user_id: &str) -> Result<SessionHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(SessionHandle {
                handle: format!("tok-{}", user_id),
                expires_at: Utc::now() + ChronoDuration::seconds(self.ttl_secs),
            })
        }
    }

    /// A mock session API that always fails.
    struct FailingApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SessionApi for FailingApi {
        async fn create_session(&self, _user_id: &str) -> Result<SessionHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TriggerError::SessionCreation("router unavailable".into()))
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            create_timeout_secs: 5,
            create_max_retries: 0,
            default_ttl_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_caches() {
        let api = Arc::new(CountingApi::new(3600));
        let manager = SessionManager::new(api.clone(), fast_config());

        let first = manager.get_or_create("alice").await.unwrap();
        let second = manager.get_or_create("alice").await.unwrap();

        assert_eq!(first.handle, second.handle);
        assert_eq!(api.call_count(), 1);
        assert_eq!(manager.cached_count().await, 1);
    }

    #[tokio::test]
    async fn test_different_users_get_different_sessions() {
        let api = Arc::new(CountingApi::new(3600));
        let manager = SessionManager::new(api.clone(), fast_config());

        let alice = manager.get_or_create("alice").await.unwrap();
        let bob = manager.get_or_create("bob").await.unwrap();

        assert_ne!(alice.handle, bob.handle);
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_session_recreated() {
        let api = Arc::new(CountingApi::new(-1)); // already expired on arrival
        let manager = SessionManager::new(api.clone(), fast_config());

        // First create. The manager applies the fallback TTL because the
        // returned expiry is in the past, so the cached session is live.
        let first = manager.get_or_create("alice").await.unwrap();
        assert!(!first.is_expired());
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recreation() {
        let api = Arc::new(CountingApi::new(3600));
        let manager = SessionManager::new(api.clone(), fast_config());

        manager.get_or_create("alice").await.unwrap();
        manager.invalidate("alice").await;
        manager.get_or_create("alice").await.unwrap();

        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_single_flight_one_creation_call() {
        let api = Arc::new(CountingApi::with_delay(3600, 50));
        let manager = Arc::new(SessionManager::new(api.clone(), fast_config()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_or_create("alice").await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let handles: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap().handle)
            .collect();

        // All callers observed the same session from exactly one creation call
        assert!(handles.iter().all(|h| h == &handles[0]));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_creation_error_propagates() {
        let api = Arc::new(FailingApi {
            calls: AtomicU32::new(0),
        });
        let manager = SessionManager::new(api.clone(), fast_config());

        let err = manager.get_or_create("alice").await.unwrap_err();
        assert!(matches!(err, TriggerError::SessionCreation(_)));
        assert_eq!(manager.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_creation_retried_bounded() {
        let api = Arc::new(FailingApi {
            calls: AtomicU32::new(0),
        });
        let config = SessionConfig {
            create_timeout_secs: 5,
            create_max_retries: 2,
            default_ttl_secs: 3600,
        };
        let manager = SessionManager::new(api.clone(), config);

        let err = manager.get_or_create("alice").await.unwrap_err();
        assert!(matches!(err, TriggerError::SessionCreation(_)));
        // 1 initial attempt + 2 retries
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_save_updates_cache() {
        let api = Arc::new(CountingApi::new(3600));
        let manager = SessionManager::new(api, fast_config());

        let mut session = manager.get_or_create("alice").await.unwrap();
        session.mark_authorized("conn-gh");
        manager.save(&session).await;

        let reloaded = manager.get_or_create("alice").await.unwrap();
        assert!(reloaded.has_authorized("conn-gh"));
    }
}
