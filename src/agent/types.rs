//! Agent loop types: planner actions, turn records and run outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool call requested by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ToolCallRequest {
    /// A tool id previously returned by search
    pub tool_id: String,
    /// Schema-typed input for the tool
    #[serde(default)]
    pub input: Value,
}

/// The planner's decision for one step.
///
/// A closed tagged variant so the loop's transition logic is exhaustive and
/// statically checkable; the planner cannot invent actions outside this
/// set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Search the catalog for tools matching an intent
    Search { intent: String },
    /// Request authorization for an app
    Auth { app: String },
    /// Invoke one or more discovered tools
    Execute { calls: Vec<ToolCallRequest> },
    /// Send the final reply to the user (at most once per run)
    Respond { message: String },
    /// Finish without replying
    Stop,
}

/// Which action a recorded turn performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Search,
    Auth,
    Execute,
    Respond,
    Stop,
}

/// One iteration's record. The sequence is append-only, owned by a single
/// run, and discarded after it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTurn {
    pub step_index: u32,
    pub action: ActionKind,
    pub input: Value,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentTurn {
    pub fn new(step_index: u32, action: ActionKind, input: Value) -> Self {
        Self {
            step_index,
            action,
            input,
            output: Value::Null,
            error: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// The task (and optional reply) completed, or the planner stopped
    Done,
    /// Step limit, unrecoverable tool error, or unplannable instruction
    Failed { reason: String },
    /// Shutdown interrupted the run at a suspension boundary
    Cancelled,
}

/// Everything a run produced. Errors are contained here: a run never
/// propagates an `Err` to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: RunState,
    /// The RESPOND message, when one was chosen
    pub final_message: Option<String>,
    /// True when the reply dispatch itself failed; the run still counts as
    /// Done because the primary task may have succeeded
    pub response_failed: bool,
    /// App awaiting external authorization, when the run stopped on it
    pub pending_auth: Option<String>,
    /// Full turn history for observability
    pub turns: Vec<AgentTurn>,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    /// The failure reason, when the run failed.
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            RunState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}
