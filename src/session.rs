// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! One coaching conversation: ties settings, context, chat log and the
//! service client together for each question asked.

use std::sync::Arc;

use crate::chat::{ChatStore, NewChatMessage};
use crate::client::CoachApi;
use crate::context::ContextStore;
use crate::error::ClientError;
use crate::model::{QueryRequest, QueryResponse};
use crate::settings::SettingsStore;

#[derive(Clone)]
pub struct CoachSession {
    api: Arc<dyn CoachApi>,
    settings: SettingsStore,
    context: ContextStore,
    chat: ChatStore,
}

impl CoachSession {
    pub fn new(
        api: Arc<dyn CoachApi>,
        settings: SettingsStore,
        context: ContextStore,
        chat: ChatStore,
    ) -> Self {
        Self {
            api,
            settings,
            context,
            chat,
        }
    }

    pub fn chat(&self) -> &ChatStore {
        &self.chat
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    /// Ask a question. Prior turns travel as context; the new question goes
    /// in `question` only.
    pub async fn ask(
        &self,
        question: &str,
        jurisdiction: Option<&str>,
    ) -> Result<QueryResponse, ClientError> {
        let prior = self.context.get_context().await;
        let settings = self.settings.current().await;

        let mut context = prior.to_payload();
        if let Some(obj) = context.as_object_mut() {
            obj.insert(
                "system_prompt".to_string(),
                serde_json::Value::String(settings.system_prompt.clone()),
            );
        }

        let request = QueryRequest {
            question: question.to_string(),
            jurisdiction: jurisdiction.map(str::to_string),
            provider: Some(settings.provider.to_string()),
            model: Some(settings.model.clone()),
            context: Some(context),
        };

        self.chat
            .add_message(NewChatMessage {
                jurisdiction: request.jurisdiction.clone(),
                ..NewChatMessage::user(question)
            })
            .await;
        self.context.add_user_message(question, jurisdiction).await;
        self.chat.set_loading(true).await;

        let outcome = self.api.query(request).await;
        self.chat.set_loading(false).await;

        match outcome {
            Ok(response) => {
                let tag = response.jurisdiction.as_deref().or(jurisdiction);
                self.chat
                    .add_message(NewChatMessage {
                        citations: Some(response.citations.clone()),
                        provider: response.provider.clone(),
                        model: response.model.clone(),
                        jurisdiction: tag.map(str::to_string),
                        ..NewChatMessage::assistant(response.answer.clone())
                    })
                    .await;
                self.context
                    .add_assistant_message(response.answer.clone(), tag)
                    .await;
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query failed");
                self.chat
                    .add_message(NewChatMessage::assistant(format!("Error: {e}")))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn reset_conversation(&self) {
        self.chat.clear().await;
        self.context.clear().await;
    }
}
