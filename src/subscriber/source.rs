//! Event source seam and the HTTP long-poll implementation.
//!
//! The trigger source itself is dashboard-configured and external; the
//! subscriber only needs a way to open a stream and pull raw events from
//! it. [`HttpEventSource`] implements the seam by registering a
//! subscription and long-polling it with a cursor.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use crate::config::{RouterConfig, SubscriberConfig};
use crate::error::{Result, TriggerError};

/// An open stream of raw trigger events.
#[async_trait]
pub trait EventStream: Send {
    /// The next raw event. `Ok(None)` means the stream closed cleanly and
    /// the subscriber should reconnect.
    async fn next_event(&mut self) -> Result<Option<Value>>;
}

/// Something the subscriber can open an [`EventStream`] against.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventStream>>;
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeResponse {
    subscription_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollResponse {
    #[serde(default)]
    events: Vec<Value>,
    #[serde(default)]
    cursor: Option<String>,
}

// ============================================================================
// HTTP Event Source
// ============================================================================

/// Long-polling event source against the trigger subscription API.
pub struct HttpEventSource {
    api_key: String,
    api_base: String,
    trigger_id: Option<String>,
    poll_timeout_secs: u64,
    client: Client,
}

impl HttpEventSource {
    /// Create a new source.
    ///
    /// # Arguments
    /// * `api_key` - Credential for the subscription API
    /// * `api_base` - Base URL (trailing slash will be removed)
    /// * `trigger_id` - Optional dashboard-configured trigger to scope to
    /// * `poll_timeout_secs` - Long-poll hold time per request
    pub fn new(
        api_key: &str,
        api_base: &str,
        trigger_id: Option<String>,
        poll_timeout_secs: u64,
    ) -> Self {
        // Request timeout must outlast the server-side long-poll hold
        let client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            trigger_id,
            poll_timeout_secs,
            client,
        }
    }

    /// Build a source from config. The subscription API shares the router's
    /// credential and endpoint.
    pub fn from_config(subscriber: &SubscriberConfig, router: &RouterConfig) -> Self {
        Self::new(
            router.api_key.as_deref().unwrap_or_default(),
            &router.api_base,
            subscriber.trigger_id.clone(),
            subscriber.poll_timeout_secs,
        )
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self) -> Result<Box<dyn EventStream>> {
        let response = self
            .client
            .post(format!("{}/triggers/subscribe", self.api_base))
            .header("x-api-key", &self.api_key)
            .json(&SubscribeRequest {
                trigger_id: self.trigger_id.as_deref(),
            })
            .send()
            .await
            .map_err(|e| TriggerError::Subscription(format!("subscribe failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TriggerError::Subscription(format!(
                "subscribe rejected ({}): {}",
                status, text
            )));
        }

        let subscription: SubscribeResponse = response.json().await.map_err(|e| {
            TriggerError::Subscription(format!("invalid subscribe response: {}", e))
        })?;

        debug!(subscription_id = %subscription.subscription_id, "Subscription registered");

        Ok(Box::new(HttpEventStream {
            api_key: self.api_key.clone(),
            api_base: self.api_base.clone(),
            subscription_id: subscription.subscription_id,
            poll_timeout_secs: self.poll_timeout_secs,
            cursor: None,
            buffer: VecDeque::new(),
            client: self.client.clone(),
        }))
    }
}

struct HttpEventStream {
    api_key: String,
    api_base: String,
    subscription_id: String,
    poll_timeout_secs: u64,
    cursor: Option<String>,
    buffer: VecDeque<Value>,
    client: Client,
}

#[async_trait]
impl EventStream for HttpEventStream {
    async fn next_event(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }

            let mut request = self
                .client
                .get(format!(
                    "{}/triggers/{}/events",
                    self.api_base, self.subscription_id
                ))
                .header("x-api-key", &self.api_key)
                .query(&[("wait", self.poll_timeout_secs.to_string())]);
            if let Some(cursor) = &self.cursor {
                request = request.query(&[("cursor", cursor.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| TriggerError::Subscription(format!("poll failed: {}", e)))?;

            let status = response.status();
            if status.as_u16() == 404 {
                // Subscription expired server-side; close cleanly so the
                // subscriber re-subscribes
                return Ok(None);
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(TriggerError::Subscription(format!(
                    "poll rejected ({}): {}",
                    status, text
                )));
            }

            let poll: PollResponse = response
                .json()
                .await
                .map_err(|e| TriggerError::Subscription(format!("invalid poll response: {}", e)))?;

            if poll.cursor.is_some() {
                self.cursor = poll.cursor;
            }
            // An empty batch is just the long poll timing out; poll again
            self.buffer.extend(poll.events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_creation_trims_slash() {
        let source = HttpEventSource::new("rk-1", "https://router.local/v1/", None, 55);
        assert_eq!(source.api_base, "https://router.local/v1");
        assert!(source.trigger_id.is_none());
    }

    #[test]
    fn test_source_from_config() {
        let subscriber = SubscriberConfig {
            trigger_id: Some("trig-email".into()),
            ..Default::default()
        };
        let router = RouterConfig {
            api_key: Some("rk-1".into()),
            ..Default::default()
        };
        let source = HttpEventSource::from_config(&subscriber, &router);
        assert_eq!(source.trigger_id.as_deref(), Some("trig-email"));
        assert_eq!(source.api_key, "rk-1");
    }

    #[test]
    fn test_poll_response_defaults() {
        let poll: PollResponse = serde_json::from_str("{}").unwrap();
        assert!(poll.events.is_empty());
        assert!(poll.cursor.is_none());
    }

    #[test]
    fn test_poll_response_with_events() {
        let poll: PollResponse = serde_json::from_str(
            r#"{"events":[{"id":"e1"}],"cursor":"c-2"}"#,
        )
        .unwrap();
        assert_eq!(poll.events.len(), 1);
        assert_eq!(poll.cursor.as_deref(), Some("c-2"));
    }

    #[test]
    fn test_subscribe_request_omits_missing_trigger() {
        let body = serde_json::to_string(&SubscribeRequest { trigger_id: None }).unwrap();
        assert_eq!(body, "{}");

        let body =
            serde_json::to_string(&SubscribeRequest { trigger_id: Some("t-1") }).unwrap();
        assert!(body.contains("triggerId"));
    }
}
