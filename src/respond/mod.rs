//! Response dispatcher for TriggerClaw
//!
//! Sending the reply is just another tool invocation: the dispatcher wraps
//! the configured reply-capable tool and shares the catalog execution path.
//! It has no independent entry point; the agent loop invokes it as the
//! RESPONDING action, at most once per run.

use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::{ExecutionResult, ToolCatalog, ToolInvocation};
use crate::error::{ToolCallError, TriggerError};
use crate::session::Session;

/// Sends the run's reply on the originating thread via the reply tool.
pub struct ResponseDispatcher {
    catalog: Arc<dyn ToolCatalog>,
    reply_tool_id: String,
}

impl ResponseDispatcher {
    pub fn new(catalog: Arc<dyn ToolCatalog>, reply_tool_id: &str) -> Self {
        Self {
            catalog,
            reply_tool_id: reply_tool_id.to_string(),
        }
    }

    /// Send `message` to `recipient` on `thread_id`.
    ///
    /// Never returns an error: a failed dispatch comes back as a failed
    /// [`ExecutionResult`] so the caller can flag the run instead of
    /// aborting it.
    pub async fn reply(
        &self,
        session: &Session,
        thread_id: Option<&str>,
        recipient: &str,
        message: &str,
    ) -> ExecutionResult {
        debug!(user = %session.user_id, tool = %self.reply_tool_id, "Dispatching reply");

        let input = json!({
            "threadId": thread_id,
            "recipientEmail": recipient,
            "messageBody": message,
            "isHtml": true,
        });
        let invocation = ToolInvocation::new(&self.reply_tool_id, input);

        match self
            .catalog
            .execute_tools(session, vec![invocation])
            .await
        {
            Ok(results) => results.into_iter().next().unwrap_or_else(|| {
                ExecutionResult::failed(
                    &self.reply_tool_id,
                    ToolCallError::Unknown("router returned no result for reply".to_string()),
                )
            }),
            Err(TriggerError::ToolCall(err)) => {
                ExecutionResult::failed(&self.reply_tool_id, err)
            }
            Err(other) => ExecutionResult::failed(
                &self.reply_tool_id,
                ToolCallError::Unknown(other.to_string()),
            ),
        }
    }
}
