//! Per-thread conversation history.
//!
//! Each `(user, thread)` pair gets its own conversation record so follow-up
//! messages on a thread carry prior context into planning. Records are
//! persisted as JSON files under `~/.triggerclaw/conversations/` and loaded
//! with a sliding window: only the most recent entries are fed back to the
//! planner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::Result;

/// Thread key used when the source carries no thread id.
const DIRECT_THREAD: &str = "direct";

/// Who produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    /// An inbound message from the user
    Incoming,
    /// The assistant's reply
    Reply,
}

/// One entry in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    /// An inbound message entry.
    pub fn incoming(content: &str) -> Self {
        Self {
            role: HistoryRole::Incoming,
            content: content.to_string(),
            at: Utc::now(),
        }
    }

    /// An assistant reply entry.
    pub fn reply(content: &str) -> Self {
        Self {
            role: HistoryRole::Reply,
            content: content.to_string(),
            at: Utc::now(),
        }
    }
}

/// A conversation: the message history for one `(user, thread)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub user_id: String,
    pub thread_id: String,
    pub entries: Vec<HistoryEntry>,
    /// Cross-run state marker, e.g. awaiting an app connection. Recorded
    /// when a run ends authorization-pending, cleared on the next
    /// successful run.
    pub pending_action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    fn new(user_id: &str, thread_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            thread_id: thread_id.to_string(),
            entries: Vec::new(),
            pending_action: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stores conversations with in-memory caching and optional file
/// persistence.
///
/// # Example
///
/// ```
/// use triggerclaw::session::{ConversationStore, HistoryEntry};
///
/// # tokio_test::block_on(async {
/// let store = ConversationStore::new_memory(10);
/// store
///     .append("alice", Some("thread-1"), vec![HistoryEntry::incoming("hi")])
///     .await
///     .unwrap();
/// let entries = store.recent_context("alice", Some("thread-1")).await.unwrap();
/// assert_eq!(entries.len(), 1);
/// # });
/// ```
pub struct ConversationStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
    storage_path: Option<PathBuf>,
    recent_window: usize,
}

impl ConversationStore {
    /// Create a store persisting under `~/.triggerclaw/conversations/`.
    pub fn new(recent_window: usize) -> Result<Self> {
        let storage_path = Config::dir().join("conversations");
        std::fs::create_dir_all(&storage_path)?;
        Ok(Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(storage_path),
            recent_window,
        })
    }

    /// Create an in-memory store without persistence (tests, interactive
    /// one-shots).
    pub fn new_memory(recent_window: usize) -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
            recent_window,
        }
    }

    /// Create a store with a custom storage directory.
    pub fn with_path(path: PathBuf, recent_window: usize) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(path),
            recent_window,
        })
    }

    fn conversation_key(user_id: &str, thread_id: Option<&str>) -> String {
        format!("{}:{}", user_id, thread_id.unwrap_or(DIRECT_THREAD))
    }

    /// Replace characters that are unsafe in filenames.
    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }

    /// The most recent entries for a conversation, bounded by the window.
    pub async fn recent_context(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        let conversation = self.load(user_id, thread_id).await?;
        let entries = conversation.entries;
        let start = entries.len().saturating_sub(self.recent_window);
        Ok(entries[start..].to_vec())
    }

    /// Append entries to a conversation and persist it.
    pub async fn append(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
        entries: Vec<HistoryEntry>,
    ) -> Result<()> {
        let key = Self::conversation_key(user_id, thread_id);
        let mut conversation = self.load(user_id, thread_id).await?;
        conversation.entries.extend(entries);
        conversation.updated_at = Utc::now();

        self.persist(&conversation).await?;
        let mut conversations = self.conversations.write().await;
        conversations.insert(key, conversation);
        Ok(())
    }

    /// Record or clear the pending-action marker for a conversation.
    pub async fn set_pending_action(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
        action: Option<String>,
    ) -> Result<()> {
        let key = Self::conversation_key(user_id, thread_id);
        let mut conversation = self.load(user_id, thread_id).await?;
        conversation.pending_action = action;
        conversation.updated_at = Utc::now();

        self.persist(&conversation).await?;
        let mut conversations = self.conversations.write().await;
        conversations.insert(key, conversation);
        Ok(())
    }

    /// The pending-action marker for a conversation, if any.
    pub async fn pending_action(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Option<String>> {
        Ok(self.load(user_id, thread_id).await?.pending_action)
    }

    async fn load(&self, user_id: &str, thread_id: Option<&str>) -> Result<Conversation> {
        let key = Self::conversation_key(user_id, thread_id);

        {
            let conversations = self.conversations.read().await;
            if let Some(conversation) = conversations.get(&key) {
                return Ok(conversation.clone());
            }
        }

        if let Some(ref storage_path) = self.storage_path {
            let file_path = storage_path.join(format!("{}.json", Self::sanitize_key(&key)));
            if file_path.exists() {
                let content = tokio::fs::read_to_string(&file_path).await?;
                let conversation: Conversation = serde_json::from_str(&content)?;

                let mut conversations = self.conversations.write().await;
                conversations.insert(key, conversation.clone());
                return Ok(conversation);
            }
        }

        Ok(Conversation::new(
            user_id,
            thread_id.unwrap_or(DIRECT_THREAD),
        ))
    }

    async fn persist(&self, conversation: &Conversation) -> Result<()> {
        if let Some(ref storage_path) = self.storage_path {
            let key = Self::conversation_key(&conversation.user_id, Some(&conversation.thread_id));
            let file_path = storage_path.join(format!("{}.json", Self::sanitize_key(&key)));
            let content = serde_json::to_string_pretty(conversation)?;
            tokio::fs::write(&file_path, content).await?;
        }
        Ok(())
    }
}

/// Render a context window as plain text for the planner.
pub fn render_context(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut out = String::from("Previous conversation on this thread:\n");
    for entry in entries {
        let who = match entry.role {
            HistoryRole::Incoming => "user",
            HistoryRole::Reply => "assistant",
        };
        out.push_str(&format!("[{}] {}\n", who, entry.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_append_and_window() {
        let store = ConversationStore::new_memory(3);

        let entries: Vec<HistoryEntry> = (0..5)
            .map(|i| HistoryEntry::incoming(&format!("message {}", i)))
            .collect();
        store
            .append("alice", Some("thread-1"), entries)
            .await
            .unwrap();

        let window = store
            .recent_context("alice", Some("thread-1"))
            .await
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].content, "message 2");
        assert_eq!(window[2].content, "message 4");
    }

    #[tokio::test]
    async fn test_threads_are_independent() {
        let store = ConversationStore::new_memory(10);

        store
            .append("alice", Some("thread-1"), vec![HistoryEntry::incoming("a")])
            .await
            .unwrap();
        store
            .append("alice", Some("thread-2"), vec![HistoryEntry::incoming("b")])
            .await
            .unwrap();

        let first = store
            .recent_context("alice", Some("thread-1"))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].content, "a");
    }

    #[tokio::test]
    async fn test_missing_thread_uses_direct_key() {
        let store = ConversationStore::new_memory(10);
        store
            .append("alice", None, vec![HistoryEntry::incoming("hi")])
            .await
            .unwrap();
        let entries = store.recent_context("alice", None).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_action_roundtrip() {
        let store = ConversationStore::new_memory(10);

        assert!(store
            .pending_action("alice", Some("t"))
            .await
            .unwrap()
            .is_none());

        store
            .set_pending_action("alice", Some("t"), Some("awaiting_connection:github".into()))
            .await
            .unwrap();
        assert_eq!(
            store.pending_action("alice", Some("t")).await.unwrap(),
            Some("awaiting_connection:github".to_string())
        );

        store
            .set_pending_action("alice", Some("t"), None)
            .await
            .unwrap();
        assert!(store
            .pending_action("alice", Some("t"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_file_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store =
                ConversationStore::with_path(dir.path().to_path_buf(), 10).unwrap();
            store
                .append(
                    "alice@example.com",
                    Some("thread/1"),
                    vec![HistoryEntry::incoming("persist me")],
                )
                .await
                .unwrap();
        }

        // Fresh store, same directory: entry loads from disk
        let store = ConversationStore::with_path(dir.path().to_path_buf(), 10).unwrap();
        let entries = store
            .recent_context("alice@example.com", Some("thread/1"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "persist me");
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(
            ConversationStore::sanitize_key("alice@example.com:thread/1"),
            "alice_example_com_thread_1"
        );
    }

    #[test]
    fn test_render_context() {
        let entries = vec![
            HistoryEntry::incoming("Create an issue"),
            HistoryEntry::reply("Done: issue #42"),
        ];
        let text = render_context(&entries);
        assert!(text.contains("[user] Create an issue"));
        assert!(text.contains("[assistant] Done: issue #42"));
    }

    #[test]
    fn test_render_context_empty() {
        assert!(render_context(&[]).is_empty());
    }
}
