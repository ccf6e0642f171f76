// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the FOIA coaching service.
//!
//! Reads the endpoint and token from the live [`SettingsStore`] on every
//! request, so settings changes take effect without rebuilding the client.
//! Non-success responses are decomposed into [`ClientError`] variants from
//! the structured error body when one is present.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

use crate::error::ClientError;
use crate::model::{
    ApiErrorBody, Jurisdiction, JurisdictionsPayload, ProviderStatus, QueryRequest, QueryResponse,
};
use crate::settings::SettingsStore;

pub const QUERY_PATH: &str = "/api/v1/query/query/";
pub const JURISDICTIONS_PATH: &str = "/api/v1/jurisdictions/";
pub const STATUS_PATH: &str = "/api/v1/query/status/";

/// Operations the rest of the crate needs from the coaching service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoachApi: Send + Sync {
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ClientError>;

    async fn get_jurisdictions(&self) -> Result<Vec<Jurisdiction>, ClientError>;

    async fn get_provider_status(&self) -> Result<ProviderStatus, ClientError>;

    /// `true` when the jurisdictions listing answers. Never fails.
    async fn test_connection(&self) -> bool {
        match self.get_jurisdictions().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "connection test failed");
                false
            }
        }
    }
}

/// reqwest-backed implementation of [`CoachApi`].
#[derive(Clone)]
pub struct ApiClient {
    settings: SettingsStore,
    client: Client,
}

impl ApiClient {
    /// Build a client. `timeout` bounds each request at the transport level.
    pub fn try_new(settings: SettingsStore, timeout: Option<Duration>) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::transport(format!("failed to build http client: {e}")))?;

        Ok(Self { settings, client })
    }

    async fn request(&self, method: Method, path: &str) -> (String, RequestBuilder) {
        let settings = self.settings.current().await;
        let url = format!("{}{}", settings.api_url.trim_end_matches('/'), path);

        let mut request = self
            .client
            .request(method, &url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = settings.token() {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }

        (url, request)
    }

    async fn send(url: &str, request: RequestBuilder) -> Result<Response, ClientError> {
        request.send().await.map_err(|e| {
            tracing::debug!(%url, error = %e, "request failed before a response arrived");
            ClientError::transport(format!("request to {url} failed: {e}"))
        })
    }
}

#[async_trait]
impl CoachApi for ApiClient {
    async fn query(&self, mut request: QueryRequest) -> Result<QueryResponse, ClientError> {
        let settings = self.settings.current().await;
        if request.provider.is_none() {
            request.provider = Some(settings.provider.to_string());
        }
        if request.model.is_none() {
            request.model = Some(settings.model.clone());
        }

        let (url, builder) = self.request(Method::POST, QUERY_PATH).await;
        let response = Self::send(&url, builder.json(&request)).await?;
        let status = response.status();

        if !status.is_success() {
            let body = read_error_body(response).await;
            let error = classify_query_error(status, body.as_ref());
            tracing::debug!(status = status.as_u16(), error = %error, "query rejected");
            return Err(error);
        }

        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| ClientError::decode(e.to_string()))
    }

    async fn get_jurisdictions(&self) -> Result<Vec<Jurisdiction>, ClientError> {
        let (url, builder) = self.request(Method::GET, JURISDICTIONS_PATH).await;
        let response = Self::send(&url, builder).await?;
        let status = response.status();

        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(classify_error(status, body.as_ref()));
        }

        let payload = response
            .json::<JurisdictionsPayload>()
            .await
            .map_err(|e| ClientError::decode(e.to_string()))?;

        Ok(dedupe_by_id(payload.into_vec()))
    }

    async fn get_provider_status(&self) -> Result<ProviderStatus, ClientError> {
        let (url, builder) = self.request(Method::GET, STATUS_PATH).await;
        let response = Self::send(&url, builder).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(http_error(status));
        }

        response
            .json::<ProviderStatus>()
            .await
            .map_err(|e| ClientError::decode(e.to_string()))
    }
}

async fn read_error_body(response: Response) -> Option<ApiErrorBody> {
    let text = response.text().await.ok()?;
    serde_json::from_str(&text).ok()
}

fn http_error(status: StatusCode) -> ClientError {
    ClientError::Http {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
    }
}

fn join_details(error: &str, details: Option<&str>) -> String {
    match details.filter(|d| !d.trim().is_empty()) {
        Some(details) => format!("{error}: {details}"),
        None => error.to_string(),
    }
}

/// Error policy for the query endpoint: disabled providers and rate limits
/// get dedicated variants before the generic decomposition.
pub fn classify_query_error(status: StatusCode, body: Option<&ApiErrorBody>) -> ClientError {
    let Some(body) = body else {
        return http_error(status);
    };

    if body.is_api_disabled() {
        let error = body.error.as_deref().unwrap_or("API disabled");
        return ClientError::ApiDisabled {
            message: join_details(error, body.details.as_deref()),
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(retry_after) = body.retry_after_seconds() {
            let error = body.error.as_deref().unwrap_or("Rate limit exceeded");
            return ClientError::RateLimited {
                message: format!(
                    "{error}. Please wait {retry_after} seconds before trying again."
                ),
                retry_after,
            };
        }
    }

    classify_error(status, Some(body))
}

/// Generic error policy: the body's message (plus details), else the status.
pub fn classify_error(status: StatusCode, body: Option<&ApiErrorBody>) -> ClientError {
    match body.and_then(|b| b.error.as_deref().map(|e| (e, b.details.as_deref()))) {
        Some((error, details)) => ClientError::Api {
            status: status.as_u16(),
            message: join_details(error, details),
        },
        None => http_error(status),
    }
}

/// Keep the first occurrence of each id.
pub fn dedupe_by_id(items: Vec<Jurisdiction>) -> Vec<Jurisdiction> {
    let mut seen = HashSet::with_capacity(items.len());
    let before = items.len();
    let kept: Vec<Jurisdiction> = items.into_iter().filter(|j| seen.insert(j.id)).collect();

    if kept.len() != before {
        tracing::warn!(dropped = before - kept.len(), "dropped duplicate jurisdiction ids");
    }
    kept
}
