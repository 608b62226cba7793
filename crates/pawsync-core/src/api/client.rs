//! HTTP implementation of the remote resource service.
//!
//! Every endpoint answers with the `{success, data, error, meta}` envelope.
//! Reads back off and retry on 429; writes are sent exactly once because
//! they are not assumed to be idempotent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::envelope::{ApiResponse, Page};
use super::error::ApiError;
use super::service::{ListQuery, ResourceService};
use crate::cache::ResourceType;
use crate::error::SyncError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Timeouts surface as network errors and roll back optimistic writes.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) reads.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// HTTP client for the pet-care API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new service with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn collection_url(&self, resource: ResourceType) -> String {
        format!("{}/{}", self.base_url, resource.path_segment())
    }

    fn item_url(&self, resource: ResourceType, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, resource.path_segment(), id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Decode the envelope of a response, mapping HTTP failures first.
    /// Returns Ok(None) for a rate-limited response that should be retried.
    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        allow_retry: bool,
    ) -> Result<Option<ApiResponse<T>>, SyncError> {
        let status = response.status();
        if status.as_u16() == 429 && allow_retry {
            return Ok(None);
        }
        let body = response.text().await.map_err(ApiError::from)?;
        // Failed requests may still carry an envelope with a useful message
        if let Ok(envelope) = serde_json::from_str::<ApiResponse<T>>(&body) {
            if status.is_success() || !envelope.success {
                return Ok(Some(envelope));
            }
        }
        if status.is_success() {
            return Err(ApiError::InvalidResponse("Body was not a response envelope".into()).into());
        }
        Err(ApiError::from_status(status, &body).into())
    }

    /// Send a read request, backing off on 429.
    async fn read<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse<T>, SyncError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .request(Method::GET, url)
                .query(query)
                .send()
                .await
                .map_err(ApiError::from)?;

            match Self::read_envelope(response, true).await? {
                Some(envelope) => return Ok(envelope),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    /// Send a write request once.
    async fn write<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse<T>, SyncError> {
        let mut request = self.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(ApiError::from)?;
        debug!(%method, url = url, status = %response.status(), "Write request answered");
        Self::read_envelope(response, false)
            .await?
            .ok_or_else(|| ApiError::RateLimited.into())
    }
}

#[async_trait]
impl ResourceService for HttpService {
    async fn list(&self, resource: ResourceType, query: &ListQuery) -> Result<Page, SyncError> {
        let url = self.collection_url(resource);
        let envelope: ApiResponse<Vec<Value>> = self.read(&url, &query.to_pairs()).await?;
        envelope.into_page()
    }

    async fn get(&self, resource: ResourceType, id: &str) -> Result<Value, SyncError> {
        let url = self.item_url(resource, id);
        self.read::<Value>(&url, &[]).await?.into_result()
    }

    async fn create(&self, resource: ResourceType, body: &Value) -> Result<Value, SyncError> {
        let url = self.collection_url(resource);
        self.write::<Value>(Method::POST, &url, Some(body))
            .await?
            .into_result()
    }

    async fn update(
        &self,
        resource: ResourceType,
        id: &str,
        patch: &Value,
    ) -> Result<Value, SyncError> {
        let url = self.item_url(resource, id);
        self.write::<Value>(Method::PATCH, &url, Some(patch))
            .await?
            .into_result()
    }

    async fn delete(&self, resource: ResourceType, id: &str) -> Result<(), SyncError> {
        let url = self.item_url(resource, id);
        self.write::<Value>(Method::DELETE, &url, None)
            .await?
            .into_unit()
    }

    async fn derived(
        &self,
        resource: ResourceType,
        name: &str,
        params: &Value,
    ) -> Result<Value, SyncError> {
        let url = format!("{}/{}", self.collection_url(resource), name);
        let query: Vec<(String, String)> = match params {
            Value::Object(fields) => fields
                .iter()
                .filter(|(k, v)| k.as_str() != "kind" && !v.is_null())
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect(),
            _ => Vec::new(),
        };
        self.read::<Value>(&url, &query).await?.into_result()
    }
}
