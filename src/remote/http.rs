// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP implementation of [`DocumentApi`] over the provider's REST API.
//!
//! Responsibilities end at classification: 429 becomes `RateLimited`
//! (with the provider's `Retry-After` hint), 5xx and transport errors
//! become `Transient`, 404 becomes `NotFound`, anything else 4xx is
//! `Permanent`. No retries happen here.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::{DocumentApi, RemoteError};
use super::types::{Block, Document, DocumentQuery, DocumentRef, RemoteValue};

/// reqwest-backed client for the remote document workspace.
pub struct HttpDocumentClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultPage<T> {
    results: Vec<T>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    parent_id: &'a str,
    properties: &'a BTreeMap<String, RemoteValue>,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    properties: &'a BTreeMap<String, RemoteValue>,
}

/// Parse a `Retry-After` header value. Only the delta-seconds form is
/// honored; HTTP-date values yield `None` and the caller falls back to
/// its own backoff.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

impl HttpDocumentClient {
    /// Build a client. `timeout` bounds every request end to end.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn classify(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return RemoteError::RateLimited { retry_after };
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return RemoteError::NotFound;
        }
        let message = match response.text().await {
            Ok(body) => serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(body),
            Err(e) => format!("unreadable error body: {e}"),
        };
        if status.is_server_error() {
            RemoteError::Transient(format!("remote returned {status}: {message}"))
        } else {
            RemoteError::Permanent { status: status.as_u16(), message }
        }
    }

    fn transport_error(e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Transient("remote call timed out".into())
        } else {
            RemoteError::Transient(format!("transport error: {e}"))
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let started = Instant::now();
        let result = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::transport_error);
        crate::metrics::record_remote_latency(operation, started.elapsed());
        let response = result?;
        if response.status().is_success() {
            crate::metrics::record_remote_call(operation, "ok");
            Ok(response)
        } else {
            let error = Self::classify(response).await;
            crate::metrics::record_remote_call(
                operation,
                match &error {
                    RemoteError::RateLimited { .. } => "rate_limited",
                    RemoteError::Transient(_) => "transient",
                    RemoteError::NotFound => "not_found",
                    RemoteError::Permanent { .. } => "permanent",
                },
            );
            Err(error)
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Transient(format!("malformed response body: {e}")))
    }
}

#[async_trait]
impl DocumentApi for HttpDocumentClient {
    async fn find_document(
        &self,
        query: &DocumentQuery,
    ) -> Result<Option<DocumentRef>, RemoteError> {
        let response = self
            .send("find_document", self.http.post(self.url("/v1/search")).json(query))
            .await?;
        let page: ResultPage<DocumentRef> = Self::decode(response).await?;
        Ok(page.results.into_iter().next())
    }

    async fn get_document(&self, id: &str) -> Result<Document, RemoteError> {
        let response = self
            .send("get_document", self.http.get(self.url(&format!("/v1/documents/{id}"))))
            .await?;
        Self::decode(response).await
    }

    async fn create_document(
        &self,
        parent_id: &str,
        properties: &BTreeMap<String, RemoteValue>,
    ) -> Result<DocumentRef, RemoteError> {
        let body = CreateRequest { parent_id, properties };
        let response = self
            .send("create_document", self.http.post(self.url("/v1/documents")).json(&body))
            .await?;
        let doc_ref: DocumentRef = Self::decode(response).await?;
        debug!(document_id = %doc_ref.id, "created remote document");
        Ok(doc_ref)
    }

    async fn update_properties(
        &self,
        id: &str,
        properties: &BTreeMap<String, RemoteValue>,
    ) -> Result<(), RemoteError> {
        let body = UpdateRequest { properties };
        self.send(
            "update_properties",
            self.http.patch(self.url(&format!("/v1/documents/{id}"))).json(&body),
        )
        .await?;
        Ok(())
    }

    async fn list_child_blocks(&self, id: &str) -> Result<Vec<Block>, RemoteError> {
        let response = self
            .send(
                "list_child_blocks",
                self.http.get(self.url(&format!("/v1/documents/{id}/children"))),
            )
            .await?;
        let page: ResultPage<Block> = Self::decode(response).await?;
        Ok(page.results)
    }
}
