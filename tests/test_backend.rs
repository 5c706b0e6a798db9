// Shared fixtures for integration tests: a scripted backend and a ready config
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use observability_mcp::client::{BackendConnector, BackendRequest, UpstreamError};
use observability_mcp::mcp::config::{MCPConfig, TransportKind};
use observability_mcp::mcp::MCPServer;

/// Backend connector answering from per-action queues and recording every request
#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, UpstreamError>>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, action: &str, body: Value) {
        self.push(action, Ok(body));
    }

    pub fn fail(&self, action: &str, error: UpstreamError) {
        self.push(action, Err(error));
    }

    fn push(&self, action: &str, result: Result<Value, UpstreamError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(action.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, action: &str) -> Vec<BackendRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.action == action)
            .collect()
    }
}

#[async_trait]
impl BackendConnector for MockBackend {
    async fn send(&self, request: BackendRequest) -> Result<Value, UpstreamError> {
        let action = request.action.clone();
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .get_mut(&action)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(UpstreamError::Transport(format!("no script for {action}"))))
    }
}

/// Config with test credentials and a near-zero retry backoff
pub fn test_config(transport: TransportKind) -> MCPConfig {
    let mut config = MCPConfig::default();
    config.transport = transport;
    config.credentials.access_key_id = Some("test-key-id".to_string());
    config.credentials.access_key_secret = Some("test-key-secret".to_string());
    config.upstream.retry_backoff = Duration::from_millis(1);
    config
}

pub fn test_server(transport: TransportKind, backend: Arc<MockBackend>) -> MCPServer {
    MCPServer::with_connector(test_config(transport), backend).unwrap()
}
