// observability-mcp - cloud observability operations as Model Context Protocol tools
// Root library module

pub mod client;
pub mod credentials;
pub mod mcp;
pub mod observability;
pub mod retry;

// Re-export key types
pub use observability::{
    get_metrics, init_logging, init_logging_with_level, log_invocation, OperationContext,
};

pub use credentials::{Credential, CredentialProvider, StaticCredentialProvider};

pub use client::{
    BackendConnector, BackendRequest, CallOptions, ClientError, ClientFactory, ClientHandle,
    HttpConnector, ServiceFamily, UpstreamError,
};

pub use retry::RetryPolicy;

pub use mcp::{
    Dispatcher, ErrorKind, InvocationRequest, InvocationResult, MCPConfig, MCPServer,
    RequestContext, ToolError, ToolHandler, ToolOutput, ToolRegistry,
};
