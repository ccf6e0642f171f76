// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! FOIA Coach client.
//!
//! Data-access layer for the public-records coaching assistant: the service
//! client, a TTL-cached jurisdiction list, persisted settings and
//! conversation context, and the in-memory chat log.

pub mod chat;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod jurisdictions;
pub mod model;
pub mod session;
pub mod settings;
pub mod store;

pub use chat::{ChatMessage, ChatStore, NewChatMessage};
pub use client::{ApiClient, CoachApi};
pub use context::{ContextStore, ConversationContext};
pub use error::ClientError;
pub use jurisdictions::JurisdictionsCache;
pub use session::CoachSession;
pub use settings::{Provider, Settings, SettingsStore, SettingsUpdate};
pub use store::{KeyValueStore, Storage};
