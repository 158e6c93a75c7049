//! Planner seam and chat-completions implementation.
//!
//! The reasoning collaborator is a black box: it receives the instruction
//! plus the turn history and answers with exactly one action. [`ChatPlanner`]
//! implements the seam over an OpenAI-compatible chat-completions API; the
//! system prompt pins the model to the closed action set and the response is
//! parsed into a [`PlannedAction`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PlannerConfig;
use crate::error::{Result, TriggerError};

use super::types::{AgentTurn, PlannedAction};

/// The default chat-completions endpoint URL.
const PLANNER_API_URL: &str = "https://api.openai.com/v1";

/// The action protocol the model must follow.
const SYSTEM_PROMPT: &str = r#"You are the planning step of a trigger-driven assistant. You receive an instruction extracted from an inbound message, plus the history of actions already taken this run.

At each step choose exactly ONE next action and answer with a single JSON object, nothing else:
  {"action":"search","intent":"<what capability is needed>"} - find tools matching an intent
  {"action":"auth","app":"<app name>"} - request authorization for an app
  {"action":"execute","calls":[{"tool_id":"<id from search>","input":{...}}]} - invoke discovered tools
  {"action":"respond","message":"<HTML reply to the user>"} - send the final reply (at most once)
  {"action":"stop"} - finish without replying

Rules:
- Search before executing a tool you have not seen in this run's history.
- Only execute tool ids that appeared in a search result this run.
- If an execution result reports a failure, either try an alternative plan or respond explaining the failure.
- Format respond messages as HTML (<p>, <ul>, <a>, <strong>); include any links as clickable anchors.
- After the task is complete, respond once summarizing what was done, then you are finished."#;

/// The reasoning collaborator: given the instruction and the turns so far,
/// choose exactly one next action.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_action(&self, instruction: &str, history: &[AgentTurn])
        -> Result<PlannedAction>;
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

// ============================================================================
// Chat Planner
// ============================================================================

/// Chat-completions backed planner.
pub struct ChatPlanner {
    /// API key for authentication
    api_key: String,
    /// API base URL
    api_base: String,
    /// Model identifier
    model: String,
    /// Maximum tokens for one planning response
    max_tokens: u32,
    /// Sampling temperature
    temperature: f32,
    /// HTTP client for making requests
    client: Client,
}

impl ChatPlanner {
    /// Create a new planner against the default endpoint.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: PLANNER_API_URL.to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            client: Client::new(),
        }
    }

    /// Build a planner from config. The API key must already be validated.
    pub fn from_config(cfg: &PlannerConfig) -> Self {
        Self {
            api_key: cfg.api_key.clone().unwrap_or_default(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            client: Client::new(),
        }
    }

    fn build_messages(instruction: &str, history: &[AgentTurn]) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user",
                content: format!("Process this message and execute the instructions:\n\n{}", instruction),
            },
        ];
        if !history.is_empty() {
            let rendered = serde_json::to_string_pretty(history).unwrap_or_default();
            messages.push(ChatMessage {
                role: "user",
                content: format!("Actions taken so far this run:\n{}\n\nChoose the next action.", rendered),
            });
        }
        messages
    }
}

#[async_trait]
impl Planner for ChatPlanner {
    async fn next_action(
        &self,
        instruction: &str,
        history: &[AgentTurn],
    ) -> Result<PlannedAction> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::build_messages(instruction, history),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(model = %self.model, turns = history.len(), "Planning next action");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| TriggerError::Planner(format!("planner request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TriggerError::Planner(format!(
                "planner API error ({}): {}",
                status, text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| TriggerError::Planner(format!("failed to parse planner response: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        parse_action(&content)
    }
}

/// Parse the model's reply into an action.
///
/// Tolerates surrounding prose and markdown fences: the first balanced-ish
/// JSON object in the reply is what gets parsed.
pub fn parse_action(content: &str) -> Result<PlannedAction> {
    let trimmed = content.trim();

    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(TriggerError::Planner(format!(
                "planner reply contains no action object: {:?}",
                truncate(trimmed, 120)
            )))
        }
    };

    serde_json::from_str::<PlannedAction>(candidate).map_err(|e| {
        TriggerError::Planner(format!(
            "planner reply is not a recognized action ({}): {:?}",
            e,
            truncate(candidate, 120)
        ))
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
