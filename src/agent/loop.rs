//! Agent loop implementation
//!
//! This module provides the plan-act-observe state machine at the heart of
//! TriggerClaw: given an instruction and a session, it repeatedly asks the
//! planner for one action, executes it against the catalog, appends the
//! result to the turn history, and feeds that history back into the next
//! planning step, until the planner stops, the run responds, or a bound is
//! hit.
//!
//! All per-run errors are contained here: `run()` always returns a
//! [`RunOutcome`], never an `Err`, so one run can never take down the
//! subscriber or a sibling run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{ExecutionResult, ToolCatalog, ToolDescriptor, ToolInvocation};
use crate::config::AgentConfig;
use crate::error::{Result, ToolCallError, TriggerError};
use crate::respond::ResponseDispatcher;
use crate::session::Session;
use crate::utils::backoff::Backoff;

use super::planner::Planner;
use super::types::{ActionKind, AgentTurn, PlannedAction, RunOutcome, RunState, ToolCallRequest};

/// Where a run's reply goes: the originating thread and sender.
#[derive(Debug, Clone)]
pub struct ReplyAddress {
    pub thread_id: Option<String>,
    pub recipient: String,
}

/// Result of requesting authorization for one app.
enum AuthOutcome {
    Authorized,
    Pending { redirect_url: Option<String> },
    Failed,
}

/// Result of the connection gate run before an execute.
enum Gate {
    /// Every required connection is authorized
    Clear,
    /// A connection awaits external user action; the run must reply and stop
    Pending {
        app: String,
        redirect_url: Option<String>,
    },
    /// A connection request failed outright; the planner sees the error turn
    Blocked,
}

/// The plan-act-observe state machine.
///
/// One `AgentLoop` is shared across runs; all per-run state lives in local
/// variables of [`run`](AgentLoop::run), so concurrent runs for different
/// users never interfere.
pub struct AgentLoop {
    /// Reasoning collaborator choosing the next action each step
    planner: Arc<dyn Planner>,
    /// Tool catalog used for search, auth and execution
    catalog: Arc<dyn ToolCatalog>,
    /// Terminal reply path (shares the catalog execution path)
    dispatcher: ResponseDispatcher,
    /// Loop bounds and retry policy
    config: AgentConfig,
    /// Shutdown signal checked at suspension boundaries
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AgentLoop {
    /// Create a new agent loop.
    ///
    /// # Arguments
    /// * `planner` - The reasoning collaborator
    /// * `catalog` - The tool catalog client
    /// * `dispatcher` - The response dispatcher
    /// * `config` - Loop bounds and retry policy
    pub fn new(
        planner: Arc<dyn Planner>,
        catalog: Arc<dyn ToolCatalog>,
        dispatcher: ResponseDispatcher,
        config: AgentConfig,
    ) -> Self {
        Self {
            planner,
            catalog,
            dispatcher,
            config,
            shutdown_rx: None,
        }
    }

    /// Attach a shutdown signal. In-flight runs observe it at their next
    /// suspension boundary and end with a `Cancelled` outcome.
    pub fn with_shutdown(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown_rx
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Run the loop for one instruction.
    ///
    /// The session is borrowed for the duration of the run; connections
    /// observed AUTHORIZED are recorded on it as hints. `reply_to` carries
    /// the thread and sender a RESPOND action should target; without it
    /// (interactive mode) the final message is only returned in the outcome.
    pub async fn run(
        &self,
        session: &mut Session,
        instruction: &str,
        reply_to: Option<&ReplyAddress>,
    ) -> RunOutcome {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id, user = %session.user_id);
        self.run_inner(run_id, session, instruction, reply_to)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: String,
        session: &mut Session,
        instruction: &str,
        reply_to: Option<&ReplyAddress>,
    ) -> RunOutcome {
        let mut turns: Vec<AgentTurn> = Vec::new();
        let mut descriptors: HashMap<String, ToolDescriptor> = HashMap::new();
        // Connections verified AUTHORIZED by this run. Hints carried on the
        // cached session are never trusted for gating: authorization can be
        // revoked between runs, so each run re-reads it from the catalog.
        let mut verified_connections: HashSet<String> = HashSet::new();
        let mut response_failed = false;

        info!("Run started");

        while (turns.len() as u32) < self.config.max_steps {
            if self.is_cancelled() {
                info!("Run cancelled at suspension boundary");
                return finish(run_id, RunState::Cancelled, None, response_failed, None, turns);
            }

            let action = match self.plan(instruction, &turns).await {
                Ok(action) => action,
                Err(err) => {
                    error!(error = %err, "Planning failed after retry");
                    let reason = format!("planning failed: {}", err);
                    let (message, reply_failed) =
                        self.failure_reply(session, reply_to, &reason).await;
                    return finish(
                        run_id,
                        RunState::Failed { reason },
                        message,
                        reply_failed,
                        None,
                        turns,
                    );
                }
            };

            let step_index = turns.len() as u32;
            match action {
                PlannedAction::Search { intent } => {
                    let turn =
                        AgentTurn::new(step_index, ActionKind::Search, json!({ "intent": intent }));
                    match self.catalog.search_tools(session, &intent).await {
                        Ok(tools) => {
                            debug!(count = tools.len(), "Search returned tools");
                            for tool in &tools {
                                descriptors.insert(tool.tool_id.clone(), tool.clone());
                            }
                            turns.push(turn.with_output(json!({ "tools": tools })));
                        }
                        Err(err) => {
                            warn!(error = %err, "Tool search failed");
                            turns.push(turn.with_error(err.to_string()));
                        }
                    }
                }

                PlannedAction::Auth { app } => {
                    match self
                        .authenticate(session, &app, &mut verified_connections, &mut turns)
                        .await
                    {
                        AuthOutcome::Authorized | AuthOutcome::Failed => {}
                        AuthOutcome::Pending { redirect_url } => {
                            return self
                                .finish_pending(run_id, session, reply_to, &app, redirect_url, turns)
                                .await;
                        }
                    }
                }

                PlannedAction::Execute { calls } => {
                    if calls.is_empty() {
                        turns.push(
                            AgentTurn::new(step_index, ActionKind::Execute, Value::Null)
                                .with_error("execute chosen with no calls"),
                        );
                        continue;
                    }

                    // Never execute against an unauthorized connection.
                    match self
                        .gate_connections(
                            session,
                            &calls,
                            &descriptors,
                            &mut verified_connections,
                            &mut turns,
                        )
                        .await
                    {
                        Gate::Clear => {}
                        Gate::Blocked => continue,
                        Gate::Pending { app, redirect_url } => {
                            return self
                                .finish_pending(run_id, session, reply_to, &app, redirect_url, turns)
                                .await;
                        }
                    }

                    let step_index = turns.len() as u32;
                    let invocations: Vec<ToolInvocation> = calls
                        .iter()
                        .map(|call| ToolInvocation::new(&call.tool_id, call.input.clone()))
                        .collect();
                    let results = self.execute_with_retry(session, invocations).await;

                    let all_ok = results.iter().all(|r| r.success);
                    let mut turn =
                        AgentTurn::new(step_index, ActionKind::Execute, json!({ "calls": &calls }))
                            .with_output(json!({ "results": results }));
                    if !all_ok {
                        turn = turn.with_error("one or more tool calls failed");
                    }
                    turns.push(turn);
                }

                PlannedAction::Respond { message } => {
                    let mut turn = AgentTurn::new(
                        step_index,
                        ActionKind::Respond,
                        json!({ "message": message }),
                    );
                    if let Some(addr) = reply_to {
                        let result = self
                            .dispatcher
                            .reply(session, addr.thread_id.as_deref(), &addr.recipient, &message)
                            .await;
                        if result.success {
                            turn = turn.with_output(json!({ "sent": true }));
                        } else {
                            // The primary task may have already succeeded, so
                            // the run still counts as done.
                            response_failed = true;
                            let detail = result
                                .error
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "unknown".to_string());
                            warn!(error = %detail, "Reply dispatch failed");
                            turn = turn.with_error(detail);
                        }
                    }
                    turns.push(turn);
                    return finish(
                        run_id,
                        RunState::Done,
                        Some(message),
                        response_failed,
                        None,
                        turns,
                    );
                }

                PlannedAction::Stop => {
                    turns.push(AgentTurn::new(step_index, ActionKind::Stop, Value::Null));
                    info!("Run stopped by planner");
                    return finish(run_id, RunState::Done, None, response_failed, None, turns);
                }
            }
        }

        let reason = TriggerError::StepLimitExceeded {
            steps: self.config.max_steps,
        }
        .to_string();
        warn!(steps = self.config.max_steps, "Run exceeded step limit");
        let (message, reply_failed) = self.failure_reply(session, reply_to, &reason).await;
        finish(
            run_id,
            RunState::Failed { reason },
            message,
            reply_failed,
            None,
            turns,
        )
    }

    /// Ask the planner for the next action, with a timeout and one retry of
    /// the planning step itself.
    async fn plan(&self, instruction: &str, turns: &[AgentTurn]) -> Result<PlannedAction> {
        let timeout = Duration::from_secs(self.config.planner_timeout_secs);
        let mut last_err: Option<TriggerError> = None;

        for attempt in 0..2 {
            if attempt > 0 {
                if let Some(ref err) = last_err {
                    warn!(error = %err, "Retrying planning step");
                }
            }
            match tokio::time::timeout(timeout, self.planner.next_action(instruction, turns)).await
            {
                Ok(Ok(action)) => return Ok(action),
                Ok(Err(err)) => last_err = Some(err),
                Err(_) => {
                    last_err = Some(TriggerError::Planner(format!(
                        "planning step timed out after {}s",
                        self.config.planner_timeout_secs
                    )))
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| TriggerError::Planner("planning produced no action".to_string())))
    }

    /// Request authorization for one app and record the turn. A connection
    /// seen AUTHORIZED is added to this run's verified set (and to the
    /// session's observability record).
    async fn authenticate(
        &self,
        session: &mut Session,
        app: &str,
        verified: &mut HashSet<String>,
        turns: &mut Vec<AgentTurn>,
    ) -> AuthOutcome {
        let step_index = turns.len() as u32;
        let turn = AgentTurn::new(step_index, ActionKind::Auth, json!({ "app": app }));

        match self.catalog.request_connection(session, app).await {
            Ok(connection) if connection.is_authorized() => {
                debug!(app = %app, connection = %connection.connection_id, "Connection authorized");
                verified.insert(connection.connection_id.clone());
                session.mark_authorized(&connection.connection_id);
                turns.push(turn.with_output(json!({ "connection": connection })));
                AuthOutcome::Authorized
            }
            Ok(connection) if connection.is_pending() => {
                info!(app = %app, "Authorization pending, awaiting user action");
                let redirect_url = connection.redirect_url().map(String::from);
                turns.push(
                    turn.with_output(json!({ "connection": connection }))
                        .with_error("authorization pending"),
                );
                AuthOutcome::Pending { redirect_url }
            }
            Ok(connection) => {
                warn!(app = %app, "Connection request not granted");
                turns.push(
                    turn.with_output(json!({ "connection": connection }))
                        .with_error("connection not granted"),
                );
                AuthOutcome::Failed
            }
            Err(err) => {
                warn!(app = %app, error = %err, "Connection request failed");
                turns.push(turn.with_error(err.to_string()));
                AuthOutcome::Failed
            }
        }
    }

    /// Verify every required connection is AUTHORIZED before executing,
    /// transitioning through authentication for any not yet verified by
    /// this run. Authorization state is read through the catalog the first
    /// time a connection is touched in a run: hints carried over on the
    /// cached session may be stale (revoked out-of-band between runs).
    async fn gate_connections(
        &self,
        session: &mut Session,
        calls: &[ToolCallRequest],
        descriptors: &HashMap<String, ToolDescriptor>,
        verified: &mut HashSet<String>,
        turns: &mut Vec<AgentTurn>,
    ) -> Gate {
        let mut apps: Vec<String> = Vec::new();
        for call in calls {
            let Some(descriptor) = descriptors.get(&call.tool_id) else {
                // Tool never surfaced by a search this run; the router will
                // reject it per-item without blocking the batch.
                continue;
            };
            let Some(connection_id) = &descriptor.required_connection else {
                continue;
            };
            if verified.contains(connection_id) {
                continue;
            }
            if !apps.contains(&descriptor.app) {
                apps.push(descriptor.app.clone());
            }
        }

        for app in apps {
            match self.authenticate(session, &app, verified, turns).await {
                AuthOutcome::Authorized => {}
                AuthOutcome::Pending { redirect_url } => {
                    return Gate::Pending { app, redirect_url };
                }
                AuthOutcome::Failed => return Gate::Blocked,
            }
        }
        Gate::Clear
    }

    /// Execute a batch, retrying only the invocations that failed with a
    /// retryable error, up to the configured bound. Non-retryable failures
    /// surface immediately in their slot.
    async fn execute_with_retry(
        &self,
        session: &Session,
        invocations: Vec<ToolInvocation>,
    ) -> Vec<ExecutionResult> {
        let backoff = Backoff::new(
            self.config.retry_base_delay_ms,
            self.config.retry_max_delay_ms,
        );
        let mut results = self.execute_once(session, &invocations).await;

        for attempt in 0..self.config.execute_max_retries {
            let retry_slots: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_retryable_failure())
                .map(|(i, _)| i)
                .collect();
            if retry_slots.is_empty() {
                break;
            }

            warn!(
                attempt = attempt + 1,
                max_retries = self.config.execute_max_retries,
                count = retry_slots.len(),
                "Retrying failed tool calls"
            );
            backoff.sleep(attempt).await;

            let retry_invocations: Vec<ToolInvocation> = retry_slots
                .iter()
                .map(|&i| invocations[i].clone())
                .collect();
            let retried = self.execute_once(session, &retry_invocations).await;
            for (slot, result) in retry_slots.into_iter().zip(retried) {
                results[slot] = result;
            }
        }

        results
    }

    /// One execute round-trip. A transport-level failure becomes a failed
    /// result per invocation so partial-failure semantics hold all the way
    /// up.
    async fn execute_once(
        &self,
        session: &Session,
        invocations: &[ToolInvocation],
    ) -> Vec<ExecutionResult> {
        match self
            .catalog
            .execute_tools(session, invocations.to_vec())
            .await
        {
            Ok(mut results) => {
                // The router answers per invocation; pad if it under-reports
                while results.len() < invocations.len() {
                    let missing = &invocations[results.len()];
                    results.push(ExecutionResult::failed(
                        &missing.tool_id,
                        ToolCallError::Unknown("router returned no result".to_string()),
                    ));
                }
                results
            }
            Err(err) => {
                let error = match err {
                    TriggerError::ToolCall(tool_err) => tool_err,
                    other => ToolCallError::Unknown(other.to_string()),
                };
                invocations
                    .iter()
                    .map(|inv| ExecutionResult::failed(&inv.tool_id, error.clone()))
                    .collect()
            }
        }
    }

    /// Terminal path for authorization-pending: reply with the connect link
    /// and stop without executing. The run counts as done.
    async fn finish_pending(
        &self,
        run_id: String,
        session: &Session,
        reply_to: Option<&ReplyAddress>,
        app: &str,
        redirect_url: Option<String>,
        mut turns: Vec<AgentTurn>,
    ) -> RunOutcome {
        let message = pending_message(app, redirect_url.as_deref());
        let mut response_failed = false;

        if let Some(addr) = reply_to {
            let step_index = turns.len() as u32;
            let mut turn =
                AgentTurn::new(step_index, ActionKind::Respond, json!({ "message": message }));
            let result = self
                .dispatcher
                .reply(session, addr.thread_id.as_deref(), &addr.recipient, &message)
                .await;
            if result.success {
                turn = turn.with_output(json!({ "sent": true }));
            } else {
                response_failed = true;
                turn = turn.with_error(
                    result
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                );
            }
            turns.push(turn);
        }

        info!(app = %app, "Run stopped awaiting authorization");
        finish(
            run_id,
            RunState::Done,
            Some(message),
            response_failed,
            Some(app.to_string()),
            turns,
        )
    }

    /// Best-effort failure reply describing what went wrong in plain
    /// language. Failures here only flag the outcome.
    async fn failure_reply(
        &self,
        session: &Session,
        reply_to: Option<&ReplyAddress>,
        reason: &str,
    ) -> (Option<String>, bool) {
        let message = format!("<p>I couldn't complete your request: {}.</p>", reason);
        match reply_to {
            Some(addr) => {
                let result = self
                    .dispatcher
                    .reply(session, addr.thread_id.as_deref(), &addr.recipient, &message)
                    .await;
                (Some(message), !result.success)
            }
            None => (Some(message), false),
        }
    }
}

/// Build the user-facing authorization-pending reply.
fn pending_message(app: &str, redirect_url: Option<&str>) -> String {
    match redirect_url {
        Some(url) => format!(
            "<p>Authorization for <strong>{}</strong> is needed. \
             <a href=\"{}\">Click here to connect</a>, then resend your request.</p>",
            app, url
        ),
        None => format!(
            "<p>Authorization for <strong>{}</strong> is pending. \
             Complete the connection, then resend your request.</p>",
            app
        ),
    }
}

fn finish(
    run_id: String,
    state: RunState,
    final_message: Option<String>,
    response_failed: bool,
    pending_auth: Option<String>,
    turns: Vec<AgentTurn>,
) -> RunOutcome {
    info!(turns = turns.len(), state = ?state, "Run finished");
    RunOutcome {
        run_id,
        state,
        final_message,
        response_failed,
        pending_auth,
        turns,
    }
}
