//! Region-scoped client factories and handles for the backend services.
//!
//! A [`ClientFactory`] binds a credential provider to one service family and
//! hands out immutable [`ClientHandle`]s for a (region, endpoint) pair. Handles
//! are cached per (credential fingerprint, region, endpoint); a cached handle
//! is never mutated, so concurrent invocations cannot observe each other.
//! Network I/O only happens inside [`ClientHandle::call`].

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::credentials::{Credential, CredentialProvider};
use crate::observability::record_upstream_call;
use crate::retry::{retry_transient, RetryPolicy};

/// Timeout for plain data calls
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for AI translation and analysis calls
pub const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(60);

static REGION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Backend service families, one client factory each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceFamily {
    LogSearch,
    Metrics,
    Trace,
    Workspace,
}

impl ServiceFamily {
    /// Endpoint template; `{region}` is substituted per handle
    pub fn default_endpoint_template(self) -> &'static str {
        match self {
            // Metric stores live on the log service endpoint
            ServiceFamily::LogSearch | ServiceFamily::Metrics => "{region}.log.aliyuncs.com",
            ServiceFamily::Trace => "arms.{region}.aliyuncs.com",
            ServiceFamily::Workspace => "cms.{region}.aliyuncs.com",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceFamily::LogSearch => "log-search",
            ServiceFamily::Metrics => "metrics",
            ServiceFamily::Trace => "trace",
            ServiceFamily::Workspace => "workspace",
        }
    }
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while constructing a client handle (no network involved)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("invalid region id '{0}', expected a form like 'cn-hangzhou'")]
    InvalidRegion(String),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("failed to build HTTP client: {0}")]
    Http(String),
}

/// Failures of an outbound backend call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("backend throttled the request ({status}): {message}")]
    Throttled { status: u16, message: String },

    #[error("backend returned {status}{}: {message}", code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    /// Only timeouts and throttling; everything else may have side effects
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout { .. } | UpstreamError::Throttled { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout { .. })
    }
}

/// Per-call deadline and retry behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl CallOptions {
    /// Plain data call: single attempt
    pub fn data(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RetryPolicy::none(),
        }
    }

    /// Call explicitly marked safe to retry on transient failures
    pub fn idempotent(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::data(DEFAULT_DATA_TIMEOUT)
    }
}

/// One signed outbound request as handed to a [`BackendConnector`]
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub family: ServiceFamily,
    pub endpoint: String,
    pub region: String,
    pub action: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl BackendRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Wire-level sender for backend requests
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn send(&self, request: BackendRequest) -> Result<Value, UpstreamError>;
}

/// JSON-over-HTTPS connector built on a shared reqwest connection pool
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    scheme: &'static str,
}

impl HttpConnector {
    pub fn new() -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("observability-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;
        Ok(Self {
            client,
            scheme: "https",
        })
    }

    /// Plain HTTP, for local test backends
    pub fn insecure() -> Result<Self, ClientError> {
        let mut connector = Self::new()?;
        connector.scheme = "http";
        Ok(connector)
    }

    fn url_for(&self, endpoint: &str, action: &str) -> Result<url::Url, UpstreamError> {
        let base = if endpoint.contains("://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("{}://{}", self.scheme, endpoint.trim_end_matches('/'))
        };
        url::Url::parse(&format!("{base}/{action}"))
            .map_err(|e| UpstreamError::Transport(format!("invalid endpoint {endpoint}: {e}")))
    }
}

#[async_trait]
impl BackendConnector for HttpConnector {
    async fn send(&self, request: BackendRequest) -> Result<Value, UpstreamError> {
        let url = self.url_for(&request.endpoint, &request.action)?;

        let mut builder = self
            .client
            .post(url)
            .timeout(request.timeout)
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout {
                    endpoint: request.endpoint.clone(),
                    timeout: request.timeout,
                }
            } else {
                UpstreamError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout {
                    endpoint: request.endpoint.clone(),
                    timeout: request.timeout,
                }
            } else {
                UpstreamError::InvalidResponse(e.to_string())
            }
        })?;

        if status.is_success() {
            // AI tools answer with plain text rather than JSON
            return Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)));
        }

        let (code, message) = parse_error_body(&text);
        if status.as_u16() == 429 {
            return Err(UpstreamError::Throttled {
                status: 429,
                message,
            });
        }
        Err(UpstreamError::Status {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

fn parse_error_body(text: &str) -> (Option<String>, String) {
    match serde_json::from_str::<Value>(text) {
        Ok(body) => {
            let code = body
                .get("errorCode")
                .or_else(|| body.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let message = body
                .get("errorMessage")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| text.to_string());
            (code, message)
        }
        Err(_) => (None, text.to_string()),
    }
}

/// Authenticated connection configuration for one (region, endpoint)
pub struct ClientHandle {
    family: ServiceFamily,
    region: String,
    endpoint: String,
    credential: Credential,
    connector: Arc<dyn BackendConnector>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("family", &self.family)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential)
            .finish()
    }
}

impl ClientHandle {
    pub fn family(&self) -> ServiceFamily {
        self.family
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one signed request, retrying transient failures per `options`
    pub async fn call(
        &self,
        action: &str,
        body: Value,
        options: &CallOptions,
    ) -> Result<Value, UpstreamError> {
        let connector = Arc::clone(&self.connector);
        retry_transient(&options.retry, action, |attempt| {
            record_upstream_call(&self.endpoint, action, attempt);
            let request = self.signed_request(action, body.clone(), options.timeout);
            let connector = Arc::clone(&connector);
            async move { connector.send(request).await }
        })
        .await
    }

    fn signed_request(&self, action: &str, body: Value, timeout: Duration) -> BackendRequest {
        let date = Utc::now().to_rfc2822();
        let payload = serde_json::to_vec(&body).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(&payload));
        let string_to_sign = format!("POST\n/{action}\n{date}\n{digest}");
        let signature = sign(self.credential.access_key_secret(), &string_to_sign);

        let mut headers = vec![
            ("x-obs-date".to_string(), date),
            ("x-obs-content-sha256".to_string(), digest),
            ("x-obs-region".to_string(), self.region.clone()),
            (
                "authorization".to_string(),
                format!(
                    "OBS-HMAC-SHA256 {}:{}",
                    self.credential.access_key_id(),
                    signature
                ),
            ),
        ];
        if let Some(token) = self.credential.security_token() {
            headers.push(("x-obs-security-token".to_string(), token.to_string()));
        }

        BackendRequest {
            family: self.family,
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            action: action.to_string(),
            body,
            headers,
            timeout,
        }
    }
}

fn sign(secret: &str, string_to_sign: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail
    match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(string_to_sign.as_bytes());
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Reject anything that is not a lowercase dash-separated region id
pub fn validate_region(region: &str) -> Result<(), ClientError> {
    if REGION_PATTERN.is_match(region) {
        Ok(())
    } else {
        Err(ClientError::InvalidRegion(region.to_string()))
    }
}

/// Upper bound on cached handles per factory
pub const MAX_CACHED_HANDLES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandleKey {
    credential: String,
    region: String,
    endpoint: String,
}

/// Produces region-bound client handles for one service family
pub struct ClientFactory {
    family: ServiceFamily,
    endpoint_template: String,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn BackendConnector>,
    handles: DashMap<HandleKey, Arc<ClientHandle>>,
}

impl ClientFactory {
    pub fn new(
        family: ServiceFamily,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn BackendConnector>,
    ) -> Self {
        Self {
            family,
            endpoint_template: family.default_endpoint_template().to_string(),
            credentials,
            connector,
            handles: DashMap::new(),
        }
    }

    pub fn with_endpoint_template(mut self, template: impl Into<String>) -> Self {
        self.endpoint_template = template.into();
        self
    }

    pub fn family(&self) -> ServiceFamily {
        self.family
    }

    /// Handle bound to `region`, or to `endpoint_override` when given.
    ///
    /// Safe to call concurrently; region and endpoint are arguments only.
    pub fn with_region(
        &self,
        region: &str,
        endpoint_override: Option<&str>,
    ) -> Result<Arc<ClientHandle>, ClientError> {
        validate_region(region)?;

        let endpoint = match endpoint_override {
            Some(endpoint) if endpoint.trim().is_empty() => {
                return Err(ClientError::InvalidEndpoint(endpoint.to_string()))
            }
            Some(endpoint) => endpoint.trim().to_string(),
            None => self.endpoint_template.replace("{region}", region),
        };

        let credential = self.credentials.credential();
        let key = HandleKey {
            credential: credential.fingerprint(),
            region: region.to_string(),
            endpoint: endpoint.clone(),
        };

        if let Some(cached) = self.handles.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let handle = Arc::new(ClientHandle {
            family: self.family,
            region: region.to_string(),
            endpoint,
            credential,
            connector: Arc::clone(&self.connector),
        });

        // Handles signed with a rotated-out credential are never handed out again
        self.handles
            .retain(|cached, _| cached.credential == key.credential);

        if self.handles.len() >= MAX_CACHED_HANDLES {
            debug!(
                family = %self.family,
                region,
                "handle cache full, serving an uncached handle"
            );
            return Ok(handle);
        }

        Ok(Arc::clone(
            self.handles.entry(key).or_insert(handle).value(),
        ))
    }

    /// Number of distinct cached handles
    pub fn cached_handles(&self) -> usize {
        self.handles.len()
    }
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("family", &self.family)
            .field("endpoint_template", &self.endpoint_template)
            .field("cached_handles", &self.handles.len())
            .finish()
    }
}
