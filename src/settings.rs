// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! User-configurable connection and model settings.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::store::Storage;

pub const SETTINGS_KEY: &str = "foia_coach_settings";

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a FOIA coach. Help the user understand \
public records laws for their jurisdiction, explain deadlines, fees and exemptions, and \
draft clear, specific records requests. Cite the statutes you rely on.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Mock,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Mock => "mock",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            "mock" => Ok(Provider::Mock),
            other => Err(format!("unknown provider {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub api_url: String,
    pub api_token: Option<String>,
    pub provider: Provider,
    pub model: String,
    pub system_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            provider: Provider::Gemini,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Settings {
    /// Token to send, if one is configured and non-blank.
    pub fn token(&self) -> Option<&str> {
        self.api_token.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(api_url) = update.api_url {
            self.api_url = api_url;
        }
        if let Some(api_token) = update.api_token {
            self.api_token = api_token;
        }
        if let Some(provider) = update.provider {
            self.provider = provider;
        }
        if let Some(model) = update.model {
            self.model = model;
        }
        if let Some(system_prompt) = update.system_prompt {
            self.system_prompt = system_prompt;
        }
    }
}

/// Partial settings. `None` leaves the current value alone; for the token,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub api_url: Option<String>,
    pub api_token: Option<Option<String>>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

impl SettingsUpdate {
    /// Read a persisted blob field by field. A field that fails to decode is
    /// skipped on its own so the rest of the blob still applies.
    pub fn from_persisted(blob: &serde_json::Value) -> Self {
        Self {
            api_url: persisted_field(blob, "api_url"),
            api_token: persisted_field(blob, "api_token"),
            provider: persisted_field(blob, "provider"),
            model: persisted_field(blob, "model"),
            system_prompt: persisted_field(blob, "system_prompt"),
        }
    }
}

fn persisted_field<T: DeserializeOwned>(blob: &serde_json::Value, name: &str) -> Option<T> {
    let value = blob.get(name)?;
    match serde_json::from_value(value.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(field = name, error = %e, "ignoring invalid persisted setting");
            None
        }
    }
}

/// Holds the live settings and persists every mutation.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<Settings>>,
    storage: Storage,
    notify: Arc<watch::Sender<Settings>>,
}

impl SettingsStore {
    /// Persisted fields layered over the defaults.
    pub async fn load(storage: Storage) -> Self {
        let mut settings = Settings::default();
        if let Some(persisted) = storage.load::<serde_json::Value>(SETTINGS_KEY).await {
            settings.apply(SettingsUpdate::from_persisted(&persisted));
        }

        Self::with_settings(settings, storage)
    }

    pub fn with_settings(settings: Settings, storage: Storage) -> Self {
        let (notify, _) = watch::channel(settings.clone());
        Self {
            inner: Arc::new(RwLock::new(settings)),
            storage,
            notify: Arc::new(notify),
        }
    }

    pub async fn current(&self) -> Settings {
        self.inner.read().await.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.notify.subscribe()
    }

    // The write guard stays held across the save so overlapping mutations
    // reach storage in the order they were applied.
    pub async fn update(&self, update: SettingsUpdate) -> Settings {
        let mut guard = self.inner.write().await;
        guard.apply(update);
        self.storage.save(SETTINGS_KEY, &*guard).await;

        let snapshot = guard.clone();
        drop(guard);
        self.notify.send_replace(snapshot.clone());
        tracing::debug!(provider = %snapshot.provider, model = %snapshot.model, "settings updated");

        snapshot
    }

    pub async fn reset(&self) -> Settings {
        let defaults = Settings::default();
        let mut guard = self.inner.write().await;
        *guard = defaults.clone();
        self.storage.remove(SETTINGS_KEY).await;
        drop(guard);

        self.notify.send_replace(defaults.clone());
        tracing::debug!("settings reset to defaults");

        defaults
    }

    /// Apply an override to the live settings without persisting it.
    pub async fn override_for_session(&self, update: SettingsUpdate) {
        let snapshot = {
            let mut guard = self.inner.write().await;
            guard.apply(update);
            guard.clone()
        };
        self.notify.send_replace(snapshot);
    }
}
