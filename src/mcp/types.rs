//! Protocol-facing types shared by the server and the dispatcher.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::mcp::error::{ErrorKind, ToolError};

/// Tool Definition for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Declared shape of a tool's success payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    Mapping,
    List,
    Scalar,
}

/// Protocol-facing invocation envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl InvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Outcome of one invocation, success payload or structured failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationResult {
    Success {
        payload: Value,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
        retryable: bool,
    },
}

impl InvocationResult {
    pub fn success(output: ToolOutput) -> Self {
        InvocationResult::Success {
            payload: output.into_value(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            InvocationResult::Success { .. } => None,
            InvocationResult::Failure { error_kind, .. } => Some(*error_kind),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            InvocationResult::Success { payload } => Some(payload),
            InvocationResult::Failure { .. } => None,
        }
    }
}

impl From<ToolError> for InvocationResult {
    fn from(err: ToolError) -> Self {
        InvocationResult::Failure {
            error_kind: err.kind(),
            retryable: err.retryable(),
            message: err.to_string(),
        }
    }
}

/// What a tool returns: data, or a legitimate absence of data
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Data(Value),
    NotFound { message: String, solution: String },
}

impl ToolOutput {
    pub fn data(value: impl Into<Value>) -> Self {
        ToolOutput::Data(value.into())
    }

    pub fn not_found(message: impl Into<String>, solution: impl Into<String>) -> Self {
        ToolOutput::NotFound {
            message: message.into(),
            solution: solution.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ToolOutput::NotFound { .. })
    }

    pub fn into_value(self) -> Value {
        match self {
            ToolOutput::Data(value) => value,
            ToolOutput::NotFound { message, solution } => serde_json::json!({
                "status": "not_found",
                "message": message,
                "solution": solution,
            }),
        }
    }
}

impl Serialize for ToolOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolOutput::Data(value) => value.serialize(serializer),
            ToolOutput::NotFound { message, solution } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("status", "not_found")?;
                map.serialize_entry("message", message)?;
                map.serialize_entry("solution", solution)?;
                map.end()
            }
        }
    }
}
