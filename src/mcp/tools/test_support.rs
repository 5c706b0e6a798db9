//! In-memory backend for tool unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{BackendConnector, BackendRequest, UpstreamError};
use crate::credentials::{Credential, StaticCredentialProvider};
use crate::mcp::context::{RequestContext, UpstreamSettings};
use crate::mcp::error::HandlerError;
use crate::mcp::registry::ToolHandler;
use crate::mcp::schema::ParameterSchema;
use crate::mcp::types::ToolOutput;
use crate::retry::RetryPolicy;

/// Answers each action from a queue of scripted responses and records requests
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, UpstreamError>>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, action: &str, response: Value) {
        self.push(action, Ok(response));
    }

    pub(crate) fn fail(&self, action: &str, error: UpstreamError) {
        self.push(action, Err(error));
    }

    fn push(&self, action: &str, response: Result<Value, UpstreamError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(action.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_for(&self, action: &str) -> Vec<BackendRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.action == action)
            .collect()
    }
}

#[async_trait]
impl BackendConnector for ScriptedConnector {
    async fn send(&self, request: BackendRequest) -> Result<Value, UpstreamError> {
        let action = request.action.clone();
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .get_mut(&action)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(UpstreamError::Transport(format!("unscripted {action}"))))
    }
}

pub(crate) fn context(connector: Arc<ScriptedConnector>) -> RequestContext {
    let settings = UpstreamSettings {
        retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
        ..Default::default()
    };
    RequestContext::standard(
        StaticCredentialProvider::shared(Credential::new("test-id", "test-secret")),
        connector,
        settings,
    )
}

/// Validate `args` against the tool's schema, then run it
pub(crate) async fn invoke(
    tool: &dyn ToolHandler,
    ctx: &RequestContext,
    args: Value,
) -> Result<ToolOutput, HandlerError> {
    let spec = tool.spec();
    let schema = ParameterSchema::check(&spec.name, spec.parameters).unwrap();
    let args = schema.validate(&args)?;
    tool.call(ctx, args).await
}
