//! Agent module - the plan-act-observe loop
//!
//! This module provides the core control loop for TriggerClaw. A run takes
//! one instruction, borrows the user's session, and iterates: the planner
//! chooses exactly one action, the loop executes it, and the recorded turn
//! feeds the next planning step.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │ Subscriber / │────>│  AgentLoop  │────>│   Planner    │
//! │ Interactive  │     │             │     │ (chat API)   │
//! └──────────────┘     └──────┬──────┘     └──────────────┘
//!                             │
//!                ┌────────────┼────────────┐
//!                ▼            ▼            ▼
//!         ┌───────────┐ ┌──────────┐ ┌────────────┐
//!         │  search   │ │   auth   │ │  execute   │
//!         │           │ │          │ │ / respond  │
//!         └───────────┘ └──────────┘ └────────────┘
//!                    (tool router catalog)
//! ```

mod r#loop;
pub mod planner;
mod types;

pub use planner::{ChatPlanner, Planner};
pub use r#loop::{AgentLoop, ReplyAddress};
pub use types::{
    ActionKind, AgentTurn, PlannedAction, RunOutcome, RunState, ToolCallRequest,
};
