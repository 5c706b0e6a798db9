// Centralized Observability Infrastructure for the observability MCP server
// This module provides structured logging, invocation tracing and counters

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::mcp::error::ErrorKind;

// Global atomic counters for metrics
static INVOCATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static FAILURE_COUNTER: AtomicU64 = AtomicU64::new(0);
static UPSTREAM_CALL_COUNTER: AtomicU64 = AtomicU64::new(0);
static RETRY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging and tracing infrastructure at the default level
pub fn init_logging() -> Result<()> {
    init_logging_with_level("info", false)
}

/// Initialize logging with a configurable level.
///
/// Output always goes to stderr: stdout is reserved for the stdio transport.
pub fn init_logging_with_level(level: &str, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_new(format!("observability_mcp={level},warn"))
            .unwrap_or_else(|_| EnvFilter::new("observability_mcp=info,warn"))
    };

    // Quiet flag takes precedence over RUST_LOG
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(!quiet)
        .with_line_number(!quiet)
        .with_ansi(false);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("observability-mcp logging initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments
        Err(_) => Ok(()),
    }
}

/// Trace context carried through one tool invocation
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub operation: String,
    pub start_time: Instant,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            operation: operation.into(),
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Log the outcome of a tool invocation and bump the counters.
///
/// `outcome` is `None` for a success and the error kind otherwise.
pub fn log_invocation(ctx: &OperationContext, outcome: Option<ErrorKind>, message: &str) {
    let elapsed = ctx.elapsed();
    INVOCATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    match outcome {
        None => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                tool = %ctx.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "Tool invocation completed"
            );
        }
        Some(kind) => {
            FAILURE_COUNTER.fetch_add(1, Ordering::Relaxed);
            error!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                tool = %ctx.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                error_kind = %kind,
                error = %message,
                "Tool invocation failed"
            );
        }
    }
}

/// Record one outbound backend call
pub fn record_upstream_call(endpoint: &str, action: &str, attempt: u32) {
    UPSTREAM_CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
    debug!(endpoint = %endpoint, action = %action, attempt, "Upstream call");
}

/// Record one retry of a transient upstream failure
pub fn record_retry(action: &str, attempt: u32, max_attempts: u32, error: &dyn std::fmt::Display) {
    RETRY_COUNTER.fetch_add(1, Ordering::Relaxed);
    warn!(
        "Upstream call {} failed (attempt {}/{}): {}",
        action, attempt, max_attempts, error
    );
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "invocations": {
            "total": INVOCATION_COUNTER.load(Ordering::Relaxed),
            "failed": FAILURE_COUNTER.load(Ordering::Relaxed),
        },
        "upstream": {
            "calls": UPSTREAM_CALL_COUNTER.load(Ordering::Relaxed),
            "retries": RETRY_COUNTER.load(Ordering::Relaxed),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        assert!(init_logging().is_ok());
        assert!(init_logging_with_level("debug", false).is_ok());
    }

    #[test]
    fn test_failed_invocation_increments_counters() {
        let before = FAILURE_COUNTER.load(Ordering::Relaxed);
        let ctx = OperationContext::new("test_tool");
        log_invocation(&ctx, Some(ErrorKind::UnknownTool), "no such tool");
        assert!(FAILURE_COUNTER.load(Ordering::Relaxed) > before);

        let metrics = get_metrics();
        assert!(metrics["invocations"]["total"].as_u64().unwrap_or(0) >= 1);
    }
}
