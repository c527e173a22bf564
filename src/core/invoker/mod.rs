//! Authenticated calls to the external transformation service.

pub mod auth;

use crate::core::config::{AuthConfig, ServiceConfig};
use crate::core::error::PipelineError;
use crate::core::registry::StageMapping;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use auth::{token_provider, CommandTokenProvider, StaticTokenProvider, TokenProvider};

pub const HEARTBEAT_ENDPOINT: &str = "heartbeat";
pub const HEALTHY_STATUS: &str = "healthy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// A single call against a named endpoint.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub endpoint: String,
    pub method: HttpMethod,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: HttpMethod::Post,
            ..Self::default()
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: HttpMethod::Get,
            ..Self::default()
        }
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, PipelineError> {
        let value = serde_json::to_value(body).map_err(|e| {
            PipelineError::config(format!(
                "request body for {} is not serializable: {}",
                self.endpoint, e
            ))
        })?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Normalised response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
    Empty,
}

impl ApiResponse {
    fn from_body(body: String) -> Self {
        if body.is_empty() {
            return ApiResponse::Empty;
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => ApiResponse::Json(value),
            Err(_) => ApiResponse::Text(body),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            _ => None,
        }
    }

    /// One-line summary suitable for logs.
    pub fn summary(&self) -> String {
        const LIMIT: usize = 200;
        let full = match self {
            ApiResponse::Json(value) => value.to_string(),
            ApiResponse::Text(text) => text.clone(),
            ApiResponse::Empty => return "<empty>".to_string(),
        };
        if full.chars().count() > LIMIT {
            let truncated: String = full.chars().take(LIMIT).collect();
            format!("{}...", truncated)
        } else {
            full
        }
    }
}

/// Body of the heartbeat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY_STATUS
    }
}

/// The transformation service as seen by the executor and sequencer.
#[async_trait]
pub trait TransformService: Send + Sync {
    /// Fetch the heartbeat status.
    async fn heartbeat(&self) -> Result<HealthStatus, PipelineError>;

    /// Run one mapping through the given endpoint.
    async fn transform(
        &self,
        endpoint: &str,
        mapping: &StageMapping,
    ) -> Result<ApiResponse, PipelineError>;
}

/// Fail with `UnhealthyService` unless the heartbeat reports healthy.
pub async fn ensure_healthy(service: &dyn TransformService) -> Result<HealthStatus, PipelineError> {
    match service.heartbeat().await {
        Ok(health) if health.is_healthy() => Ok(health),
        Ok(health) => Err(PipelineError::unhealthy(format!(
            "heartbeat reported status '{}'",
            health.status
        ))),
        Err(err @ PipelineError::UnhealthyService { .. }) => Err(err),
        Err(err) => Err(PipelineError::UnhealthyService {
            reason: "heartbeat call failed".to_string(),
            source: Some(Box::new(err)),
        }),
    }
}

/// HTTP client for the transformation service.
#[derive(Clone)]
pub struct TransformClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    quiet_endpoints: HashSet<String>,
    request_timeout: Option<Duration>,
}

impl TransformClient {
    pub fn new(base_url: Url, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            tokens,
            quiet_endpoints: HashSet::new(),
            request_timeout: None,
        }
    }

    pub fn from_config(service: &ServiceConfig, auth: &AuthConfig) -> Result<Self, PipelineError> {
        let mut client = Self::new(service.url.clone(), token_provider(auth)?)
            .with_quiet_endpoints(service.quiet_endpoints.iter().cloned());
        client.request_timeout = service.request_timeout;
        Ok(client)
    }

    pub fn with_quiet_endpoints<I: IntoIterator<Item = String>>(mut self, endpoints: I) -> Self {
        self.quiet_endpoints.extend(endpoints);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Perform one authenticated request with a freshly fetched credential.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, PipelineError> {
        let endpoint = request.endpoint.trim();
        if endpoint.is_empty() {
            return Err(PipelineError::config("endpoint name cannot be empty"));
        }
        let url = self.endpoint_url(endpoint);

        if self.quiet_endpoints.contains(endpoint) {
            tracing::debug!(method = %request.method, %url, "making request");
        } else {
            tracing::info!(method = %request.method, %url, "making request");
        }

        let token = self.tokens.token().await.map_err(|err| {
            tracing::error!(endpoint, error = %err, "error getting authentication token");
            err
        })?;

        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&url).query(&request.params),
            HttpMethod::Post => {
                let builder = self.http.post(&url);
                match &request.body {
                    Some(body) => builder.json(body),
                    None => builder,
                }
            }
        };
        builder = builder.bearer_auth(token);
        let timeout = request.timeout.or(self.request_timeout);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            let err = transport_error(endpoint, timeout, e);
            tracing::error!(endpoint, error = %err, "request failed");
            err
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            let err = transport_error(endpoint, timeout, e);
            tracing::error!(endpoint, error = %err, "failed to read response body");
            err
        })?;

        if !status.is_success() {
            let err = PipelineError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            };
            tracing::error!(endpoint, status = status.as_u16(), error = %err, "API error");
            return Err(err);
        }

        let parsed = ApiResponse::from_body(body);
        if let ApiResponse::Text(_) = parsed {
            tracing::debug!(endpoint, "response was not JSON, returning text");
        }
        Ok(parsed)
    }
}

fn transport_error(endpoint: &str, timeout: Option<Duration>, error: reqwest::Error) -> PipelineError {
    match timeout {
        Some(after) if error.is_timeout() => PipelineError::Timeout {
            endpoint: endpoint.to_string(),
            after,
        },
        _ => PipelineError::Network {
            endpoint: endpoint.to_string(),
            message: error.to_string(),
        },
    }
}

#[async_trait]
impl TransformService for TransformClient {
    async fn heartbeat(&self) -> Result<HealthStatus, PipelineError> {
        tracing::info!("trying to get API health status");
        let response = self.call(ApiRequest::get(HEARTBEAT_ENDPOINT)).await?;
        let value = response.as_json().ok_or_else(|| {
            PipelineError::unhealthy(format!(
                "heartbeat did not return JSON: {}",
                response.summary()
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            PipelineError::unhealthy(format!("heartbeat response has no status: {}", e))
        })
    }

    async fn transform(
        &self,
        endpoint: &str,
        mapping: &StageMapping,
    ) -> Result<ApiResponse, PipelineError> {
        self.call(ApiRequest::post(endpoint).json(mapping)?).await
    }
}
