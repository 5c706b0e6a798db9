//! Routes invocations to registered tools.
//!
//! Each invocation runs lookup, validate, bind, execute and wrap in that
//! order. The dispatcher holds no lock across execution and shares only
//! the registry and the read-only [`RequestContext`] between invocations.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::mcp::context::RequestContext;
use crate::mcp::error::ToolError;
use crate::mcp::registry::ToolRegistry;
use crate::mcp::types::{InvocationRequest, InvocationResult, ToolDefinition, ToolOutput};
use crate::observability::{log_invocation, OperationContext};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    context: Arc<RequestContext>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, context: Arc<RequestContext>) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.get_all_tool_definitions()
    }

    /// Run one invocation; never fails, errors come back as structured results
    pub async fn dispatch(&self, request: InvocationRequest) -> InvocationResult {
        let op = OperationContext::new(request.tool_name.clone());

        match self.execute(request).await {
            Ok(output) => {
                log_invocation(&op, None, "");
                InvocationResult::success(output)
            }
            Err(err) => {
                log_invocation(&op, Some(err.kind()), &err.to_string());
                err.into()
            }
        }
    }

    async fn execute(&self, request: InvocationRequest) -> Result<ToolOutput, ToolError> {
        let descriptor = self
            .registry
            .get(&request.tool_name)
            .ok_or_else(|| ToolError::UnknownTool(request.tool_name.clone()))?;

        let args = descriptor.schema().validate(&request.arguments)?;

        let handler = Arc::clone(descriptor.handler());
        let ctx: &RequestContext = &self.context;

        match AssertUnwindSafe(handler.call(ctx, args)).catch_unwind().await {
            Ok(result) => result.map_err(ToolError::from),
            Err(panic) => Err(ToolError::ToolExecutionFailed {
                message: format!("tool panicked: {}", panic_message(panic.as_ref())),
                retryable: false,
            }),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
