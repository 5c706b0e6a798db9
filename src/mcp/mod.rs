/// Model Context Protocol (MCP) server for cloud observability tools
///
/// Exposes log search, metric, trace and workspace operations as MCP tools
/// over stdio, Streamable HTTP or legacy SSE transports.
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod schema;
pub mod server;
pub mod session;
pub mod sse;
pub mod streamable_http;
pub mod tools;
pub mod types;

pub use config::{ConfigOverrides, MCPConfig, TransportKind};
pub use context::RequestContext;
pub use dispatcher::Dispatcher;
pub use error::{ErrorKind, HandlerError, RegistryError, ToolError};
pub use registry::{ToolDescriptor, ToolHandler, ToolRegistry, ToolSpec};
pub use schema::{ParameterSchema, ParameterSpec, SemanticType, ToolArguments};
pub use server::MCPServer;
pub use types::*;

use anyhow::Result;

/// Build the MCP server with the built-in tool set
pub fn init_mcp_server(config: MCPConfig) -> Result<MCPServer> {
    tracing::info!(
        "Initializing MCP server {} v{} ({:?} transport)",
        config.mcp.server_name,
        config.mcp.server_version,
        config.transport
    );

    MCPServer::from_config(config)
}
