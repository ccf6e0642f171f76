// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Rolling conversation context sent along with each query.
//!
//! The full history is kept and persisted; callers only ever see the most
//! recent window of it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::Role;
use crate::store::Storage;

pub const CONTEXT_KEY: &str = "foia_coach_context";
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub messages: Vec<ContextMessage>,
    #[serde(default)]
    pub current_jurisdiction: Option<String>,
}

/// The payload shape the coaching service expects under `context`.
#[derive(Debug, Clone, Serialize)]
struct ContextPayload<'a> {
    previous_messages: &'a [ContextMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    current_jurisdiction: Option<&'a str>,
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// JSON for the `context` field of a query request.
    pub fn to_payload(&self) -> serde_json::Value {
        let payload = ContextPayload {
            previous_messages: &self.messages,
            current_jurisdiction: self.current_jurisdiction.as_deref(),
        };
        serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Clone)]
pub struct ContextStore {
    inner: Arc<RwLock<ConversationContext>>,
    storage: Storage,
    window: usize,
}

impl ContextStore {
    pub async fn load(storage: Storage, window: usize) -> Self {
        let context = storage
            .load::<ConversationContext>(CONTEXT_KEY)
            .await
            .unwrap_or_default();

        Self {
            inner: Arc::new(RwLock::new(context)),
            storage,
            window,
        }
    }

    pub async fn add_user_message(&self, content: impl Into<String>, jurisdiction: Option<&str>) {
        self.push(Role::User, content.into(), jurisdiction).await;
    }

    pub async fn add_assistant_message(
        &self,
        content: impl Into<String>,
        jurisdiction: Option<&str>,
    ) {
        self.push(Role::Assistant, content.into(), jurisdiction).await;
    }

    // Held across the save: saves must land in the order turns were added.
    async fn push(&self, role: Role, content: String, jurisdiction: Option<&str>) {
        let mut guard = self.inner.write().await;
        guard.messages.push(ContextMessage { role, content });
        if let Some(jurisdiction) = jurisdiction {
            guard.current_jurisdiction = Some(jurisdiction.to_string());
        }
        self.storage.save(CONTEXT_KEY, &*guard).await;
    }

    /// The most recent window of messages, oldest first, plus the marker.
    pub async fn get_context(&self) -> ConversationContext {
        let guard = self.inner.read().await;
        let start = guard.messages.len().saturating_sub(self.window);

        ConversationContext {
            messages: guard.messages[start..].to_vec(),
            current_jurisdiction: guard.current_jurisdiction.clone(),
        }
    }

    pub async fn history_len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        *guard = ConversationContext::default();
        self.storage.remove(CONTEXT_KEY).await;
    }
}
