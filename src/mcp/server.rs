use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use axum::Router;
use jsonrpc_core::types::request::{Call, MethodCall};
use jsonrpc_core::types::response::{Failure, Output, Success};
use jsonrpc_core::{Error as RpcError, Id, Params, Value, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{BackendConnector, HttpConnector};
use crate::credentials::StaticCredentialProvider;
use crate::mcp::config::{MCPConfig, TransportKind};
use crate::mcp::context::RequestContext;
use crate::mcp::dispatcher::Dispatcher;
use crate::mcp::registry::ToolRegistry;
use crate::mcp::session::SessionManager;
use crate::mcp::sse::create_sse_router;
use crate::mcp::streamable_http::create_streamable_http_router;
use crate::mcp::tools::builtin_tools;
use crate::mcp::types::{InvocationRequest, InvocationResult};
use crate::observability::get_metrics;

/// MCP server: JSON-RPC method handling over a tool dispatcher
pub struct MCPServer {
    config: Arc<MCPConfig>,
    dispatcher: Dispatcher,
    sessions: Arc<SessionManager>,
    start_time: Instant,
}

/// Handle to control a running HTTP transport
pub struct MCPServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MCPServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server task to finish running
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            tracing::error!("MCP server task failed: {}", err);
        }
    }

    /// Close the server gracefully and wait for shutdown
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.wait().await;
    }
}

impl MCPServer {
    /// Build the server with the built-in tool set and an HTTPS backend connector
    pub fn from_config(config: MCPConfig) -> Result<Self> {
        let connector = HttpConnector::new()?;
        Self::with_connector(config, Arc::new(connector))
    }

    /// Build the server with the built-in tool set over `connector`
    pub fn with_connector(config: MCPConfig, connector: Arc<dyn BackendConnector>) -> Result<Self> {
        let credential = config.credential()?;
        let settings = config.upstream_settings()?;

        let mut registry = ToolRegistry::new();
        registry
            .register_all(builtin_tools(&settings))
            .context("failed to register built-in tools")?;
        tracing::info!("Registered {} tools", registry.len());

        let context = RequestContext::standard(
            StaticCredentialProvider::shared(credential),
            connector,
            settings,
        );
        let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(context));
        Ok(Self::new(config, dispatcher))
    }

    pub fn new(config: MCPConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
            sessions: Arc::new(SessionManager::new()),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &MCPConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Get the uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn initialize_result(&self) -> Value {
        serde_json::json!({
            "protocolVersion": self.config.mcp.protocol_version,
            "serverInfo": {
                "name": self.config.mcp.server_name,
                "version": self.config.mcp.server_version
            },
            "capabilities": {
                "tools": {
                    "listChanged": false
                },
                "logging": {}
            }
        })
    }

    /// Answer one JSON-RPC method
    pub async fn handle_method(&self, method: &str, params: Params) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                tracing::info!("MCP session initialized");
                Ok(self.initialize_result())
            }
            "tools/list" => {
                let tools = self.dispatcher.tool_definitions();
                tracing::debug!("Listed {} tools", tools.len());
                Ok(serde_json::json!({ "tools": tools }))
            }
            "tools/call" => self.call_tool(params).await,
            "ping" => Ok(serde_json::json!({
                "status": "ok",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "uptime_seconds": self.uptime_seconds(),
                "version": self.config.mcp.server_version,
                "metrics": get_metrics(),
            })),
            _ => Err(RpcError::method_not_found()),
        }
    }

    /// `tools/call`: tool failures travel as `isError` results, not JSON-RPC errors
    pub async fn call_tool(&self, params: Params) -> Result<Value, RpcError> {
        let request: Value = params
            .parse()
            .map_err(|e| RpcError::invalid_params(format!("Invalid params: {}", e.message)))?;

        let name = request
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("Missing 'name' parameter"))?;

        let arguments = request
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));

        tracing::debug!("Calling tool: {}", name);
        let result = self
            .dispatcher
            .dispatch(InvocationRequest::new(name, arguments))
            .await;

        Ok(tool_call_response(&result))
    }

    /// Handle a parsed JSON-RPC call; notifications yield no output
    pub async fn handle_call(&self, call: Call) -> Option<Output> {
        match call {
            Call::MethodCall(method_call) => Some(self.handle_method_call(method_call).await),
            Call::Notification(notification) => {
                tracing::debug!("Received notification {}", notification.method);
                None
            }
            Call::Invalid { id } => Some(failure(id, RpcError::invalid_request())),
        }
    }

    pub async fn handle_method_call(&self, call: MethodCall) -> Output {
        match self.handle_method(&call.method, call.params).await {
            Ok(result) => Output::Success(Success {
                jsonrpc: Some(Version::V2),
                result,
                id: call.id,
            }),
            Err(error) => failure(call.id, error),
        }
    }

    /// Handle one raw JSON-RPC message, returning the serialized reply if any
    pub async fn handle_message(&self, raw: &str) -> Option<String> {
        let request: jsonrpc_core::Request = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("Failed to parse JSON-RPC message: {}", err);
                return serialize(&failure(Id::Null, RpcError::parse_error()));
            }
        };

        match request {
            jsonrpc_core::Request::Single(call) => {
                let output = self.handle_call(call).await?;
                serialize(&output)
            }
            jsonrpc_core::Request::Batch(calls) => {
                let mut outputs = Vec::with_capacity(calls.len());
                for call in calls {
                    if let Some(output) = self.handle_call(call).await {
                        outputs.push(output);
                    }
                }
                if outputs.is_empty() {
                    None
                } else {
                    serialize(&jsonrpc_core::Response::Batch(outputs))
                }
            }
        }
    }

    /// Newline-delimited JSON-RPC over a reader/writer pair, one message at a time
    pub async fn run_stdio<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            tracing::debug!("Received: {}", line);

            if let Some(response) = self.handle_message(&line).await {
                writer.write_all(response.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        tracing::info!("stdin closed, shutting down");
        Ok(())
    }

    /// Build an Axum router for the configured network transport
    pub fn http_router(self: &Arc<Self>) -> Router {
        let router = match self.config.transport {
            TransportKind::Sse => create_sse_router(Arc::clone(self)),
            _ => create_streamable_http_router(Arc::clone(self)),
        };
        router
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the network transport and serve it on a background task
    pub async fn start_http(self: Arc<Self>) -> Result<MCPServerHandle> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind MCP HTTP endpoint {addr}"))?;
        self.serve_listener(listener)
    }

    /// Serve on an already bound listener
    pub fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<MCPServerHandle> {
        let local_addr = listener
            .local_addr()
            .map_err(|err| anyhow!("Failed to determine MCP HTTP endpoint address: {}", err))?;
        tracing::info!(
            "MCP {:?} endpoint listening on {}",
            self.config.transport,
            local_addr
        );

        let router = self.http_router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                tracing::error!("MCP HTTP server error: {}", err);
            }
        });

        Ok(MCPServerHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Run the configured transport until it ends
    pub async fn serve(self) -> Result<()> {
        match self.config.transport {
            TransportKind::Stdio => {
                let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                self.run_stdio(stdin, tokio::io::stdout()).await
            }
            TransportKind::StreamableHttp | TransportKind::Sse => {
                let handle = Arc::new(self).start_http().await?;
                handle.wait().await;
                Ok(())
            }
        }
    }
}

/// Wrap an invocation result as an MCP `tools/call` result
pub fn tool_call_response(result: &InvocationResult) -> Value {
    let text_source = match result {
        InvocationResult::Success { payload } => payload.clone(),
        failure => serde_json::to_value(failure).unwrap_or(Value::Null),
    };
    let text = match &text_source {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };

    serde_json::json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ],
        "structuredContent": result,
        "isError": !result.is_success(),
    })
}

fn failure(id: Id, error: RpcError) -> Output {
    Output::Failure(Failure {
        jsonrpc: Some(Version::V2),
        error,
        id,
    })
}

fn serialize<T: serde::Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::error!("Failed to serialize JSON-RPC response: {}", err);
            None
        }
    }
}
