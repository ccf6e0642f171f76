//! Chat log shown to the user, with a loading flag for in-flight questions.
//!
//! Nothing here is persisted; the model-facing history lives in
//! [`crate::context`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::model::{Citation, Role};

/// A message as displayed in the chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
}

/// Everything but the id and timestamp, which the store assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatMessage {
    pub role: Role,
    pub content: String,
    pub citations: Option<Vec<Citation>>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub jurisdiction: Option<String>,
}

impl NewChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            citations: None,
            provider: None,
            model: None,
            jurisdiction: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub messages: Arc<Vec<ChatMessage>>,
    pub loading: bool,
}

/// In-memory chat log. Nothing here is persisted.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<RwLock<ChatSnapshot>>,
    notify: Arc<watch::Sender<ChatSnapshot>>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(ChatSnapshot::default());
        Self {
            inner: Arc::new(RwLock::new(ChatSnapshot::default())),
            notify: Arc::new(notify),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.notify.subscribe()
    }

    pub async fn add_message(&self, message: NewChatMessage) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            role: message.role,
            content: message.content,
            timestamp: Utc::now(),
            citations: message.citations,
            provider: message.provider,
            model: message.model,
            jurisdiction: message.jurisdiction,
        };

        let mut guard = self.inner.write().await;
        Arc::make_mut(&mut guard.messages).push(message.clone());
        self.notify.send_replace(guard.clone());

        message
    }

    pub async fn messages(&self) -> Arc<Vec<ChatMessage>> {
        self.inner.read().await.messages.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.read().await.loading
    }

    pub async fn set_loading(&self, loading: bool) {
        let mut guard = self.inner.write().await;
        guard.loading = loading;
        self.notify.send_replace(guard.clone());
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.messages = Arc::new(Vec::new());
        self.notify.send_replace(guard.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_get_unique_ids_and_keep_order() {
        let chat = ChatStore::new();
        let first = chat.add_message(NewChatMessage::user("What is FOIA?")).await;
        let second = chat.add_message(NewChatMessage::assistant("The Freedom of...")).await;

        let messages = chat.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], first);
        assert_eq!(messages[1], second);
        assert_ne!(first.id, second.id);
        assert!(first.timestamp <= second.timestamp);
    }

    #[tokio::test]
    async fn earlier_snapshots_are_not_mutated() {
        let chat = ChatStore::new();
        chat.add_message(NewChatMessage::user("one")).await;
        let before = chat.messages().await;

        chat.add_message(NewChatMessage::user("two")).await;

        assert_eq!(before.len(), 1);
        assert_eq!(chat.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn clear_and_loading_flag() {
        let chat = ChatStore::new();
        let mut rx = chat.subscribe();

        chat.set_loading(true).await;
        assert!(chat.is_loading().await);
        assert!(rx.borrow_and_update().loading);

        chat.add_message(NewChatMessage::user("hello")).await;
        chat.clear().await;

        assert!(chat.messages().await.is_empty());
        assert!(rx.borrow_and_update().messages.is_empty());
    }
}
