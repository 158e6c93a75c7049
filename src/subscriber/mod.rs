//! Trigger subscriber for TriggerClaw
//!
//! The subscriber owns the persistent connection to the event source and is
//! the only place events enter the system. For every raw event it:
//!
//! 1. Validates required fields; malformed events are dropped, never retried
//! 2. Skips events sent by the assistant's own address (loop avoidance)
//! 3. Deduplicates by event id against a bounded recent-id cache
//! 4. Spawns one independent run task, so users are processed in parallel
//!
//! Connection loss is retried forever with exponential backoff and jitter;
//! transient network failure never terminates the process. Graceful shutdown
//! propagates a watch signal: in-flight runs reach their next suspension
//! boundary and end with a `Cancelled` outcome, then the subscriber drains.

pub mod source;

pub use source::{EventSource, EventStream, HttpEventSource};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentLoop, ReplyAddress, RunState};
use crate::config::SubscriberConfig;
use crate::error::{Result, TriggerError};
use crate::event::{DedupCache, TriggerEvent};
use crate::session::history::render_context;
use crate::session::{ConversationStore, HistoryEntry, SessionManager};
use crate::utils::backoff::Backoff;

/// Long-lived consumer of the trigger event stream.
///
/// Shared caches (dedup, sessions) are constructed at startup and passed in
/// explicitly; the subscriber owns no ambient state.
pub struct TriggerSubscriber {
    /// The event source to subscribe against
    source: Arc<dyn EventSource>,
    /// Per-user session cache
    sessions: Arc<SessionManager>,
    /// The run state machine, shared across runs
    agent: Arc<AgentLoop>,
    /// Per-thread conversation history; `None` disables history
    history: Option<Arc<ConversationStore>>,
    /// Recent-id cache suppressing at-least-once redelivery
    dedup: Arc<DedupCache>,
    /// Reconnect/dispatch policy
    config: SubscriberConfig,
    /// Backoff pacing for reconnects and dispatch retries
    backoff: Backoff,
    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,
    /// Whether the subscriber loop is currently running
    running: AtomicBool,
}

impl TriggerSubscriber {
    pub fn new(
        source: Arc<dyn EventSource>,
        sessions: Arc<SessionManager>,
        agent: Arc<AgentLoop>,
        history: Option<Arc<ConversationStore>>,
        dedup: Arc<DedupCache>,
        config: SubscriberConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let backoff = Backoff::new(
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
        );
        Self {
            source,
            sessions,
            agent,
            history,
            dedup,
            config,
            backoff,
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// A receiver on this subscriber's shutdown signal, for wiring into the
    /// agent loop so in-flight runs observe the same stop.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Whether the subscriber loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the subscriber (and all in-flight runs) to stop.
    pub fn stop(&self) {
        info!("Stopping trigger subscriber");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run until stopped.
    ///
    /// Maintains one subscription; on connection loss reconnects with
    /// exponential backoff and unlimited retries. Returns after a stop
    /// signal once all in-flight runs have drained.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TriggerError::Subscription(
                "subscriber already running".to_string(),
            ));
        }
        info!("Starting trigger subscriber");

        // Subscribe fresh and consume any stale stop signal from a previous run.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = *shutdown_rx.borrow_and_update();

        let mut attempt: u32 = 0;
        let mut runs: JoinSet<()> = JoinSet::new();

        'outer: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let mut stream = match self.source.connect().await {
                Ok(stream) => {
                    info!("Subscription established");
                    attempt = 0;
                    stream
                }
                Err(err) => {
                    // Retryable condition: log and back off, never exit
                    warn!(error = %err, attempt = attempt, "Subscription connect failed, backing off");
                    if self.backoff_or_shutdown(&mut shutdown_rx, attempt).await {
                        break 'outer;
                    }
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Shutdown signal received");
                            break 'outer;
                        }
                    }
                    event = stream.next_event() => {
                        match event {
                            Ok(Some(raw)) => {
                                // Reap finished runs so the set stays small
                                while runs.try_join_next().is_some() {}
                                self.accept_event(raw, &mut runs);
                            }
                            Ok(None) => {
                                warn!("Subscription stream closed, reconnecting");
                                break;
                            }
                            Err(err) => {
                                warn!(error = %err, "Subscription stream error, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }

            if self.backoff_or_shutdown(&mut shutdown_rx, attempt).await {
                break 'outer;
            }
            attempt = attempt.saturating_add(1);
        }

        info!(in_flight = runs.len(), "Draining in-flight runs");
        while runs.join_next().await.is_some() {}

        self.running.store(false, Ordering::SeqCst);
        info!("Trigger subscriber stopped");
        Ok(())
    }

    /// Sleep for the reconnect backoff, returning early with `true` when
    /// shutdown arrives during the wait.
    async fn backoff_or_shutdown(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        attempt: u32,
    ) -> bool {
        tokio::select! {
            _ = self.backoff.sleep(attempt) => false,
            _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
        }
    }

    /// Validate, filter and dispatch one raw event.
    fn accept_event(&self, raw: serde_json::Value, runs: &mut JoinSet<()>) {
        let event = match TriggerEvent::parse(&raw) {
            Ok(event) => event,
            Err(err) => {
                // Rejected-event condition: dropped, never retried
                warn!(error = %err, "Rejected malformed event");
                return;
            }
        };

        if let Some(self_address) = &self.config.self_address {
            if event.is_from(self_address) {
                debug!(event_id = %event.id, "Skipping event from the assistant's own address");
                return;
            }
        }

        if !self.dedup.check_and_record(&event.id) {
            debug!(event_id = %event.id, "Duplicate event suppressed");
            return;
        }

        info!(event_id = %event.id, user = %event.user_id, "Event accepted");

        let sessions = Arc::clone(&self.sessions);
        let agent = Arc::clone(&self.agent);
        let history = self.history.clone();
        let max_retries = self.config.dispatch_max_retries;
        let backoff = self.backoff;

        runs.spawn(async move {
            process_event(event, sessions, agent, history, max_retries, backoff).await;
        });
    }
}

/// Dispatch one accepted event with bounded retry. Exhausted retries surface
/// as a processing-failed condition tied to the event id; the event is not
/// re-subscribed and nothing crashes.
async fn process_event(
    event: TriggerEvent,
    sessions: Arc<SessionManager>,
    agent: Arc<AgentLoop>,
    history: Option<Arc<ConversationStore>>,
    max_retries: u32,
    backoff: Backoff,
) {
    let mut last_err: Option<TriggerError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            if let Some(ref err) = last_err {
                warn!(
                    event_id = %event.id,
                    attempt = attempt,
                    max_retries = max_retries,
                    error = %err,
                    "Retrying event dispatch"
                );
            }
            backoff.sleep(attempt - 1).await;
        }

        match dispatch_once(&event, &sessions, &agent, history.as_ref()).await {
            Ok(()) => return,
            Err(err) => last_err = Some(err),
        }
    }

    // Processing-failed condition associated with this event id
    error!(
        event_id = %event.id,
        error = %last_err.map(|e| e.to_string()).unwrap_or_default(),
        "Event processing failed after retries"
    );
}

async fn dispatch_once(
    event: &TriggerEvent,
    sessions: &SessionManager,
    agent: &AgentLoop,
    history: Option<&Arc<ConversationStore>>,
) -> Result<()> {
    let mut session = sessions.get_or_create(&event.user_id).await?;
    let thread_id = event.payload.thread_id.as_deref();

    let mut instruction = event.instruction();
    if let Some(store) = history {
        match store.recent_context(&event.user_id, thread_id).await {
            Ok(entries) if !entries.is_empty() => {
                instruction = format!("{}\n{}", render_context(&entries), instruction);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Failed to load conversation history"),
        }
    }

    let reply_to = ReplyAddress {
        thread_id: event.payload.thread_id.clone(),
        recipient: event.payload.sender.clone(),
    };
    let outcome = agent.run(&mut session, &instruction, Some(&reply_to)).await;
    sessions.save(&session).await;

    if let Some(store) = history {
        let mut entries = vec![HistoryEntry::incoming(&event.instruction())];
        if let Some(message) = &outcome.final_message {
            entries.push(HistoryEntry::reply(message));
        }
        if let Err(err) = store.append(&event.user_id, thread_id, entries).await {
            warn!(error = %err, "Failed to save conversation history");
        }
        if outcome.is_done() {
            let marker = outcome
                .pending_auth
                .as_ref()
                .map(|app| format!("awaiting_connection:{}", app));
            if let Err(err) = store.set_pending_action(&event.user_id, thread_id, marker).await {
                warn!(error = %err, "Failed to update pending action");
            }
        }
    }

    match &outcome.state {
        RunState::Done => info!(
            event_id = %event.id,
            run_id = %outcome.run_id,
            turns = outcome.turns.len(),
            response_failed = outcome.response_failed,
            "Run completed"
        ),
        RunState::Failed { reason } => warn!(
            event_id = %event.id,
            run_id = %outcome.run_id,
            reason = %reason,
            "Run failed"
        ),
        RunState::Cancelled => info!(
            event_id = %event.id,
            run_id = %outcome.run_id,
            "Run cancelled"
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{PlannedAction, Planner};
    use crate::catalog::{Connection, ExecutionResult, ToolCatalog, ToolDescriptor, ToolInvocation};
    use crate::config::{AgentConfig, SessionConfig};
    use crate::error::Result;
    use crate::respond::ResponseDispatcher;
    use crate::session::{Session, SessionApi, SessionHandle};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    // ====================================================================
    // Mock collaborators
    // ====================================================================

    /// Yields scripted batches: each connect() pops one batch, the stream
    /// yields its events then closes. With no batches left, the stream
    /// parks until shutdown.
    struct ScriptedSource {
        batches: Mutex<VecDeque<Vec<Value>>>,
        connects: AtomicU32,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<Value>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                connects: AtomicU32::new(0),
            }
        }
    }

    struct ScriptedStream {
        events: VecDeque<Value>,
        park_when_empty: bool,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<Option<Value>> {
            match self.events.pop_front() {
                Some(event) => Ok(Some(event)),
                None => {
                    if self.park_when_empty {
                        // Pretend to be a long poll with no traffic
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    Ok(None)
                }
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self) -> Result<Box<dyn EventStream>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let batch = self.batches.lock().unwrap().pop_front();
            match batch {
                Some(events) => Ok(Box::new(ScriptedStream {
                    events: events.into(),
                    park_when_empty: false,
                })),
                None => Ok(Box::new(ScriptedStream {
                    events: VecDeque::new(),
                    park_when_empty: true,
                })),
            }
        }
    }

    /// A source whose first N connects fail outright.
    struct FlakySource {
        failures_left: AtomicU32,
        inner: ScriptedSource,
    }

    #[async_trait]
    impl EventSource for FlakySource {
        async fn connect(&self) -> Result<Box<dyn EventStream>> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(TriggerError::Subscription("connection refused".into()));
            }
            self.inner.connect().await
        }
    }

    struct StopPlanner {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Planner for StopPlanner {
        async fn next_action(
            &self,
            _instruction: &str,
            _history: &[crate::agent::AgentTurn],
        ) -> Result<PlannedAction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PlannedAction::Stop)
        }
    }

    struct NullCatalog;

    #[async_trait]
    impl ToolCatalog for NullCatalog {
        async fn search_tools(
            &self,
            _session: &Session,
            _intent: &str,
        ) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![])
        }

        async fn request_connection(&self, _session: &Session, app: &str) -> Result<Connection> {
            Ok(Connection {
                connection_id: format!("conn-{}", app),
                app: app.to_string(),
                auth_state: crate::catalog::AuthState::Authorized,
            })
        }

        async fn execute_tools(
            &self,
            _session: &Session,
            invocations: Vec<ToolInvocation>,
        ) -> Result<Vec<ExecutionResult>> {
            Ok(invocations
                .iter()
                .map(|inv| ExecutionResult::ok(&inv.tool_id, json!({})))
                .collect())
        }
    }

    struct StaticSessionApi;

    #[async_trait]
    impl SessionApi for StaticSessionApi {
        async fn create_session(&self, user_id: &str) -> Result<SessionHandle> {
            Ok(SessionHandle {
                handle: format!("tok-{}", user_id),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    fn event_json(id: &str) -> Value {
        json!({
            "id": id,
            "userId": "alice@example.com",
            "payload": {
                "sender": "alice@example.com",
                "subject": "hello",
                "body": "Do the thing",
                "threadId": "t-1"
            }
        })
    }

    fn build_subscriber(
        source: Arc<dyn EventSource>,
        planner: Arc<StopPlanner>,
    ) -> Arc<TriggerSubscriber> {
        let catalog = Arc::new(NullCatalog);
        let dispatcher = ResponseDispatcher::new(catalog.clone(), "send_reply");
        let agent_config = AgentConfig {
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..Default::default()
        };
        let sessions = Arc::new(SessionManager::new(
            Arc::new(StaticSessionApi),
            SessionConfig::default(),
        ));
        let config = SubscriberConfig {
            reconnect_base_delay_ms: 1,
            reconnect_max_delay_ms: 5,
            self_address: Some("assistant@example.com".into()),
            ..Default::default()
        };
        let dedup = Arc::new(DedupCache::new(
            Duration::from_secs(config.dedup_ttl_secs),
            config.dedup_capacity,
        ));
        let history = Some(Arc::new(ConversationStore::new_memory(10)));
        let subscriber = Arc::new(TriggerSubscriber::new(
            source,
            sessions,
            Arc::new(AgentLoop::new(planner, catalog, dispatcher, agent_config)),
            history,
            dedup,
            config,
        ));
        subscriber
    }

    async fn run_until_idle(subscriber: Arc<TriggerSubscriber>) {
        let handle = {
            let subscriber = Arc::clone(&subscriber);
            tokio::spawn(async move { subscriber.run().await })
        };
        // Let the subscriber consume every scripted batch and park
        tokio::time::sleep(Duration::from_millis(200)).await;
        subscriber.stop();
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "subscriber should stop gracefully");
    }

    #[tokio::test]
    async fn test_events_dispatch_runs() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            event_json("e1"),
            event_json("e2"),
        ]]));
        let planner = Arc::new(StopPlanner {
            calls: AtomicU32::new(0),
        });
        let subscriber = build_subscriber(source, planner.clone());

        run_until_idle(subscriber).await;

        // One planner call per run, one run per unique event
        assert_eq!(planner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_processed_once() {
        let source = Arc::new(ScriptedSource::new(vec![
            vec![event_json("e1"), event_json("e2")],
            // Redelivery after reconnect: e1 again plus a new event
            vec![event_json("e1"), event_json("e3")],
        ]));
        let planner = Arc::new(StopPlanner {
            calls: AtomicU32::new(0),
        });
        let subscriber = build_subscriber(source.clone(), planner.clone());

        run_until_idle(subscriber).await;

        // e1 deduplicated across the reconnect; resumed delivery of e3
        assert_eq!(planner.calls.load(Ordering::SeqCst), 3);
        assert!(source.connects.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_malformed_events_dropped() {
        let missing_body = json!({
            "id": "bad-1",
            "userId": "alice@example.com",
            "payload": {"sender": "alice@example.com", "subject": "x", "body": ""}
        });
        let source = Arc::new(ScriptedSource::new(vec![vec![missing_body]]));
        let planner = Arc::new(StopPlanner {
            calls: AtomicU32::new(0),
        });
        let subscriber = build_subscriber(source, planner.clone());

        run_until_idle(subscriber).await;

        // Zero runs created
        assert_eq!(planner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_self_sent_events_skipped() {
        let mut own = event_json("self-1");
        own["payload"]["sender"] = json!("assistant@example.com");
        let source = Arc::new(ScriptedSource::new(vec![vec![own]]));
        let planner = Arc::new(StopPlanner {
            calls: AtomicU32::new(0),
        });
        let subscriber = build_subscriber(source, planner.clone());

        run_until_idle(subscriber).await;

        assert_eq!(planner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reconnects_after_connect_failures() {
        let source = Arc::new(FlakySource {
            failures_left: AtomicU32::new(3),
            inner: ScriptedSource::new(vec![vec![event_json("e1")]]),
        });
        let planner = Arc::new(StopPlanner {
            calls: AtomicU32::new(0),
        });
        let subscriber = build_subscriber(source, planner.clone());

        run_until_idle(subscriber).await;

        // Despite three refused connects, the event eventually dispatched
        assert_eq!(planner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let planner = Arc::new(StopPlanner {
            calls: AtomicU32::new(0),
        });
        let subscriber = build_subscriber(source, planner);

        let handle = {
            let subscriber = Arc::clone(&subscriber);
            tokio::spawn(async move { subscriber.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(subscriber.is_running());

        let second = subscriber.run().await;
        assert!(second.is_err());

        subscriber.stop();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(!subscriber.is_running());
    }
}
