//! Error taxonomy for tool registration and invocation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::client::{ClientError, UpstreamError};

/// Failure kinds reported through the invocation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownTool,
    MissingArgument,
    InvalidArgument,
    ToolExecutionFailed,
    UpstreamTimeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownTool => "UnknownTool",
            ErrorKind::MissingArgument => "MissingArgument",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::ToolExecutionFailed => "ToolExecutionFailed",
            ErrorKind::UpstreamTimeout => "UpstreamTimeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured invocation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("tool execution failed: {message}")]
    ToolExecutionFailed { message: String, retryable: bool },

    #[error("upstream call timed out: {0}")]
    UpstreamTimeout(String),
}

impl ToolError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            ToolError::MissingArgument(_) => ErrorKind::MissingArgument,
            ToolError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            ToolError::ToolExecutionFailed { .. } => ErrorKind::ToolExecutionFailed,
            ToolError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ToolError::ToolExecutionFailed { retryable, .. } => *retryable,
            ToolError::UpstreamTimeout(_) => true,
            _ => false,
        }
    }
}

/// What tool bodies return on failure; converted to [`ToolError`] by the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Argument(ToolError),

    #[error("{0}")]
    Failed(String),

    #[error("failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HandlerError::Argument(ToolError::invalid(field, reason))
    }
}

impl From<ClientError> for HandlerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::InvalidRegion(_) => {
                HandlerError::Argument(ToolError::invalid("region_id", err.to_string()))
            }
            ClientError::InvalidEndpoint(_) => {
                HandlerError::Argument(ToolError::invalid("endpoint", err.to_string()))
            }
            ClientError::Http(message) => HandlerError::Failed(message),
        }
    }
}

impl From<ToolError> for HandlerError {
    fn from(err: ToolError) -> Self {
        HandlerError::Argument(err)
    }
}

impl From<HandlerError> for ToolError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Upstream(upstream) if upstream.is_timeout() => {
                ToolError::UpstreamTimeout(upstream.to_string())
            }
            HandlerError::Upstream(upstream) => ToolError::ToolExecutionFailed {
                retryable: upstream.is_transient(),
                message: upstream.to_string(),
            },
            HandlerError::Argument(tool_error) => tool_error,
            other => ToolError::ToolExecutionFailed {
                message: other.to_string(),
                retryable: false,
            },
        }
    }
}

/// Startup failures while building the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("tool name must not be empty")]
    EmptyName,

    #[error("tool '{tool}' parameter '{parameter}' has unsupported type '{type_name}'")]
    UnsupportedType {
        tool: String,
        parameter: String,
        type_name: String,
    },

    #[error("tool '{tool}' has an invalid schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}
