// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Wire types for the coaching service.
//!
//! Mirrors the JSON bodies of the query, jurisdictions and status endpoints.
//! Unknown fields are ignored so the service can grow without breaking us.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Governmental tier of a jurisdiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JurisdictionLevel {
    Federal,
    State,
    Local,
    #[serde(other)]
    Other,
}

impl JurisdictionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            JurisdictionLevel::Federal => "federal",
            JurisdictionLevel::State => "state",
            JurisdictionLevel::Local => "local",
            JurisdictionLevel::Other => "other",
        }
    }
}

impl fmt::Display for JurisdictionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A governmental entity whose public-records rules the assistant knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub id: i64,
    pub name: String,
    pub abbreviation: String,
    pub level: JurisdictionLevel,
}

/// The jurisdictions endpoint answers with either a bare array or a
/// paginated `{results: [...]}` wrapper.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum JurisdictionsPayload {
    Wrapped { results: Vec<Jurisdiction> },
    List(Vec<Jurisdiction>),
}

impl JurisdictionsPayload {
    pub fn into_vec(self) -> Vec<Jurisdiction> {
        match self {
            JurisdictionsPayload::Wrapped { results } => results,
            JurisdictionsPayload::List(items) => items,
        }
    }
}

/// Source document backing part of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub display_name: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction_abbr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Free-form context forwarded to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

/// Per-provider reachability as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub openai: bool,
    #[serde(default)]
    pub gemini: bool,
    #[serde(default)]
    pub mock: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub current_provider: String,
    #[serde(default)]
    pub available_providers: Vec<String>,
    #[serde(default)]
    pub api_status: ApiStatus,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Structured error body some non-success responses carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub retry_after: Option<serde_json::Value>,
}

impl ApiErrorBody {
    pub const API_DISABLED: &'static str = "api_disabled";

    pub fn is_api_disabled(&self) -> bool {
        self.error_type.as_deref() == Some(Self::API_DISABLED)
    }

    /// `retry_after` as whole seconds; servers send it as a number or a
    /// numeric string.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self.retry_after.as_ref()? {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64)),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jurisdictions_payload_accepts_both_shapes() {
        let bare = r#"[{"id":1,"name":"Federal","abbreviation":"US","level":"federal"}]"#;
        let wrapped = r#"{"count":1,"results":[{"id":2,"name":"Texas","abbreviation":"TX","level":"state"}]}"#;

        let bare: JurisdictionsPayload = serde_json::from_str(bare).unwrap();
        let wrapped: JurisdictionsPayload = serde_json::from_str(wrapped).unwrap();

        assert_eq!(bare.into_vec()[0].abbreviation, "US");
        assert_eq!(wrapped.into_vec()[0].abbreviation, "TX");
    }

    #[test]
    fn unknown_level_maps_to_other() {
        let item: Jurisdiction = serde_json::from_str(
            r#"{"id":9,"name":"Tribal Nation","abbreviation":"TN1","level":"tribal"}"#,
        )
        .unwrap();
        assert_eq!(item.level, JurisdictionLevel::Other);
    }

    #[test]
    fn retry_after_accepts_numbers_and_strings() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"error":"slow down","retry_after":30}"#).unwrap();
        assert_eq!(body.retry_after_seconds(), Some(30));

        let body: ApiErrorBody =
            serde_json::from_str(r#"{"error":"slow down","retry_after":"45"}"#).unwrap();
        assert_eq!(body.retry_after_seconds(), Some(45));

        let body: ApiErrorBody = serde_json::from_str(r#"{"error":"slow down"}"#).unwrap();
        assert_eq!(body.retry_after_seconds(), None);
    }

    #[test]
    fn query_request_omits_unset_fields() {
        let json = serde_json::to_value(QueryRequest::new("How long do agencies have?")).unwrap();
        assert_eq!(json, serde_json::json!({"question": "How long do agencies have?"}));
    }
}
