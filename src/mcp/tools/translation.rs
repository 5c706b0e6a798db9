//! Calls into the remote AI tool service and unwraps its framed answer.

use serde_json::{json, Value};

use crate::client::validate_region;
use crate::mcp::context::RequestContext;
use crate::mcp::error::HandlerError;

/// Marks section boundaries in AI service responses
pub const ANSWER_MARKER: &str = "------answer------\n";

const CALL_AI_TOOLS: &str = "CallAiTools";

/// The section after the first marker, up to the next one.
/// Without a marker the response is returned unchanged.
pub fn extract_answer(response: &str) -> &str {
    match response.split_once(ANSWER_MARKER) {
        Some((_, rest)) => match rest.split_once(ANSWER_MARKER) {
            Some((answer, _)) => answer,
            None => rest,
        },
        None => response,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiAnswer {
    pub answer: String,
    pub request_id: String,
}

/// Invoke `tool_name` on the AI service through the `client` factory.
///
/// The call goes to the configured AI region; `region_id` is forwarded as
/// the region the question is about.
pub async fn call_ai_tool(
    ctx: &RequestContext,
    client: &str,
    tool_name: &str,
    region_id: &str,
    params: Value,
) -> Result<AiAnswer, HandlerError> {
    validate_region(region_id)?;
    let handle = ctx.ai_handle(client)?;

    let body = json!({
        "toolName": tool_name,
        "regionId": region_id,
        "params": params,
    });
    let response = handle
        .call(CALL_AI_TOOLS, body, &ctx.settings().ai_call())
        .await?;

    let (raw, request_id) = match &response {
        Value::String(text) => (text.clone(), String::new()),
        Value::Object(map) => (
            map.get("data")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| response.to_string()),
            map.get("requestId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        other => (other.to_string(), String::new()),
    };

    tracing::debug!(tool = tool_name, request_id = %request_id, "AI tool answered");
    Ok(AiAnswer {
        answer: extract_answer(&raw).to_string(),
        request_id,
    })
}
