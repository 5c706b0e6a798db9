//! Shared, read-only collaborators threaded into every tool invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{
    BackendConnector, CallOptions, ClientFactory, ClientHandle, ServiceFamily, DEFAULT_AI_TIMEOUT,
    DEFAULT_DATA_TIMEOUT,
};
use crate::credentials::CredentialProvider;
use crate::mcp::error::HandlerError;
use crate::retry::RetryPolicy;

/// Logical client names tools look factories up by
pub const LOG_CLIENT: &str = "log-client";
pub const METRICS_CLIENT: &str = "metrics-client";
pub const TRACE_CLIENT: &str = "trace-client";
pub const WORKSPACE_CLIENT: &str = "workspace-client";

/// Region the AI translation service is reached through by default
pub const DEFAULT_AI_REGION: &str = "cn-shanghai";

/// Upstream call settings shared by all tools
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamSettings {
    pub data_timeout: Duration,
    pub ai_timeout: Duration,
    pub retry: RetryPolicy,
    pub default_region: Option<String>,
    pub ai_region: String,
    pub ai_endpoint: Option<String>,
    pub endpoint_templates: HashMap<ServiceFamily, String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            data_timeout: DEFAULT_DATA_TIMEOUT,
            ai_timeout: DEFAULT_AI_TIMEOUT,
            retry: RetryPolicy::fixed(2, Duration::from_secs(1)),
            default_region: None,
            ai_region: DEFAULT_AI_REGION.to_string(),
            ai_endpoint: None,
            endpoint_templates: HashMap::new(),
        }
    }
}

impl UpstreamSettings {
    /// Single attempt with the data timeout
    pub fn data_call(&self) -> CallOptions {
        CallOptions::data(self.data_timeout)
    }

    /// Data timeout, retried on transient failures
    pub fn idempotent_call(&self) -> CallOptions {
        CallOptions::idempotent(self.data_timeout, self.retry)
    }

    /// AI timeout, retried on transient failures
    pub fn ai_call(&self) -> CallOptions {
        CallOptions::idempotent(self.ai_timeout, self.retry)
    }
}

/// Read-only bag of client factories, built once per server
#[derive(Debug)]
pub struct RequestContext {
    clients: HashMap<String, Arc<ClientFactory>>,
    settings: UpstreamSettings,
}

impl RequestContext {
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    /// One factory per service family, all sharing `credentials` and `connector`
    pub fn standard(
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn BackendConnector>,
        settings: UpstreamSettings,
    ) -> Self {
        let families = [
            (LOG_CLIENT, ServiceFamily::LogSearch),
            (METRICS_CLIENT, ServiceFamily::Metrics),
            (TRACE_CLIENT, ServiceFamily::Trace),
            (WORKSPACE_CLIENT, ServiceFamily::Workspace),
        ];

        let mut builder = Self::builder();
        for (name, family) in families {
            let mut factory =
                ClientFactory::new(family, Arc::clone(&credentials), Arc::clone(&connector));
            if let Some(template) = settings.endpoint_templates.get(&family) {
                factory = factory.with_endpoint_template(template.clone());
            }
            builder = builder.with_client(name, factory);
        }
        builder.with_settings(settings).build()
    }

    pub fn client(&self, name: &str) -> Result<&ClientFactory, HandlerError> {
        self.clients
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| HandlerError::failed(format!("no client registered as '{name}'")))
    }

    /// Shorthand for `client(name)?.with_region(region, endpoint)`
    pub fn handle(
        &self,
        name: &str,
        region: &str,
        endpoint_override: Option<&str>,
    ) -> Result<Arc<ClientHandle>, HandlerError> {
        Ok(self.client(name)?.with_region(region, endpoint_override)?)
    }

    /// Handle for the AI translation service
    pub fn ai_handle(&self, name: &str) -> Result<Arc<ClientHandle>, HandlerError> {
        self.handle(
            name,
            &self.settings.ai_region,
            self.settings.ai_endpoint.as_deref(),
        )
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    pub fn client_names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}

#[derive(Default)]
pub struct RequestContextBuilder {
    clients: HashMap<String, Arc<ClientFactory>>,
    settings: UpstreamSettings,
}

impl RequestContextBuilder {
    pub fn with_client(mut self, name: impl Into<String>, factory: ClientFactory) -> Self {
        self.clients.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn with_settings(mut self, settings: UpstreamSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> RequestContext {
        RequestContext {
            clients: self.clients,
            settings: self.settings,
        }
    }
}
