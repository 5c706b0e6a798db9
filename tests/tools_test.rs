// Built-in tools driven through JSON-RPC `tools/call` against a scripted backend
mod test_backend;

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;

use observability_mcp::client::UpstreamError;
use observability_mcp::mcp::config::TransportKind;
use observability_mcp::mcp::MCPServer;
use test_backend::{test_config, test_server, MockBackend};

async fn call(server: &MCPServer, tool: &str, arguments: Value) -> Result<Value> {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {"name": tool, "arguments": arguments}
    });
    let reply = server
        .handle_message(&request.to_string())
        .await
        .ok_or_else(|| anyhow::anyhow!("no reply for {tool}"))?;
    let reply: Value = serde_json::from_str(&reply)?;
    assert_eq!(reply["id"], 7);
    Ok(reply["result"].clone())
}

#[tokio::test]
async fn tools_list_exposes_every_builtin_tool() -> Result<()> {
    let server = test_server(TransportKind::Stdio, MockBackend::new());
    let reply = server
        .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
        .await
        .unwrap_or_default();
    let reply: Value = serde_json::from_str(&reply)?;
    let tools = reply["result"]["tools"].as_array().cloned().unwrap_or_default();
    assert_eq!(tools.len(), 16);

    let execute = tools
        .iter()
        .find(|t| t["name"] == "sls_execute_query")
        .cloned()
        .unwrap_or_default();
    assert_eq!(execute["inputSchema"]["type"], "object");
    let required: Vec<&str> = execute["inputSchema"]["required"]
        .as_array()
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    assert!(required.contains(&"region_id"));
    assert!(!required.contains(&"limit"));
    assert_eq!(
        execute["inputSchema"]["properties"]["limit"]["maximum"],
        json!(100)
    );
    Ok(())
}

#[tokio::test]
async fn list_projects_reaches_the_requested_region() -> Result<()> {
    let backend = MockBackend::new();
    backend.respond(
        "ListProject",
        json!({
            "projects": [
                {"projectName": "web-logs", "description": "nginx", "region": "cn-beijing"}
            ],
            "total": 1
        }),
    );
    let server = test_server(TransportKind::Stdio, backend.clone());

    let result = call(
        &server,
        "sls_list_projects",
        json!({"region_id": "cn-beijing", "project_name_query": "web"}),
    )
    .await?;
    assert_eq!(result["isError"], false);
    assert_eq!(
        result["structuredContent"]["payload"],
        json!({
            "projects": [
                {"project_name": "web-logs", "description": "nginx", "region": "cn-beijing"}
            ],
            "total": 1
        })
    );

    let sent = backend.requests_for("ListProject");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].endpoint, "cn-beijing.log.aliyuncs.com");
    assert_eq!(sent[0].body["projectName"], "web");
    assert_eq!(sent[0].body["size"], 10);
    Ok(())
}

#[tokio::test]
async fn empty_query_result_is_not_found_not_an_error() -> Result<()> {
    let backend = MockBackend::new();
    backend.respond("GetLogs", json!([]));
    let server = test_server(TransportKind::Stdio, backend);

    let result = call(
        &server,
        "sls_execute_query",
        json!({
            "project": "web-logs",
            "log_store": "access",
            "region_id": "cn-hangzhou",
            "query": "status:500",
            "from_timestamp": 1_700_000_000,
            "to_timestamp": 1_700_000_600
        }),
    )
    .await?;
    assert_eq!(result["isError"], false);
    assert_eq!(
        result["structuredContent"]["payload"]["status"],
        "not_found"
    );
    Ok(())
}

#[tokio::test]
async fn translation_returns_the_extracted_answer() -> Result<()> {
    let backend = MockBackend::new();
    backend.respond(
        "CallAiTools",
        json!({
            "data": "reasoning\n------answer------\n* | select count(*) as pv",
            "requestId": "req-1"
        }),
    );
    let server = test_server(TransportKind::Stdio, backend.clone());

    let result = call(
        &server,
        "sls_translate_text_to_query",
        json!({
            "text": "how many requests today",
            "project": "web-logs",
            "log_store": "access",
            "region_id": "cn-hangzhou"
        }),
    )
    .await?;
    assert_eq!(result["isError"], false);
    assert_eq!(result["content"][0]["text"], "* | select count(*) as pv");

    let sent = backend.requests_for("CallAiTools");
    assert_eq!(sent[0].region, "cn-shanghai");
    assert_eq!(sent[0].body["regionId"], "cn-hangzhou");
    Ok(())
}

#[tokio::test]
async fn transient_ai_failure_is_retried_once() -> Result<()> {
    let backend = MockBackend::new();
    backend.fail(
        "CallAiTools",
        UpstreamError::Throttled {
            status: 429,
            message: "slow down".into(),
        },
    );
    backend.respond("CallAiTools", json!({"data": "up{job=\"api\"}"}));
    let server = test_server(TransportKind::Stdio, backend.clone());

    let result = call(
        &server,
        "cms_translate_text_to_promql",
        json!({
            "text": "is the api up",
            "project": "metrics",
            "metric_store": "prometheus",
            "region_id": "cn-hangzhou"
        }),
    )
    .await?;
    assert_eq!(result["isError"], false);
    assert_eq!(backend.requests_for("CallAiTools").len(), 2);
    Ok(())
}

#[tokio::test]
async fn upstream_timeout_is_reported_as_retryable() -> Result<()> {
    let backend = MockBackend::new();
    backend.fail(
        "ListWorkspaces",
        UpstreamError::Timeout {
            endpoint: "cms.cn-hangzhou.aliyuncs.com".into(),
            timeout: Duration::from_secs(30),
        },
    );
    let server = test_server(TransportKind::Stdio, backend.clone());

    let result = call(
        &server,
        "cms_list_workspaces",
        json!({"region_id": "cn-hangzhou"}),
    )
    .await?;
    assert_eq!(result["isError"], true);
    assert_eq!(
        result["structuredContent"]["error_kind"],
        "UpstreamTimeout"
    );
    assert_eq!(result["structuredContent"]["retryable"], true);
    // Plain data calls are attempted once
    assert_eq!(backend.requests_for("ListWorkspaces").len(), 1);
    Ok(())
}

#[tokio::test]
async fn server_errors_on_idempotent_calls_are_final() -> Result<()> {
    let arguments = json!({
        "project": "metrics",
        "metric_store": "prometheus",
        "query": "up",
        "from_timestamp": 1_700_000_000,
        "to_timestamp": 1_700_000_600,
        "region_id": "cn-hangzhou"
    });

    for failure in [
        UpstreamError::Transport("connection reset".into()),
        UpstreamError::Status {
            status: 500,
            code: None,
            message: "internal error".into(),
        },
    ] {
        let backend = MockBackend::new();
        backend.fail("GetLogs", failure);
        backend.respond("GetLogs", json!([{"value": 1}]));
        let server = test_server(TransportKind::Stdio, backend.clone());

        let result = call(&server, "cms_execute_promql_query", arguments.clone()).await?;
        assert_eq!(result["isError"], true);
        assert_eq!(
            result["structuredContent"]["error_kind"],
            "ToolExecutionFailed"
        );
        assert_eq!(result["structuredContent"]["retryable"], false);
        assert_eq!(backend.requests_for("GetLogs").len(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn malformed_region_never_reaches_the_backend() -> Result<()> {
    let backend = MockBackend::new();
    let server = test_server(TransportKind::Stdio, backend.clone());

    let result = call(
        &server,
        "sls_list_projects",
        json!({"region_id": "cn-hangzhou.attacker.example"}),
    )
    .await?;
    assert_eq!(result["isError"], true);
    assert_eq!(
        result["structuredContent"]["error_kind"],
        "InvalidArgument"
    );
    assert!(backend.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn configured_region_fills_in_region_id() -> Result<()> {
    let backend = MockBackend::new();
    backend.respond("ListWorkspaces", json!({"workspaces": [], "total": 0}));

    let mut config = test_config(TransportKind::Stdio);
    config.upstream.default_region = Some("cn-shenzhen".to_string());
    let server = MCPServer::with_connector(config, backend.clone())?;

    call(&server, "cms_list_workspaces", json!({})).await?;
    let sent = backend.requests_for("ListWorkspaces");
    assert_eq!(sent[0].region, "cn-shenzhen");
    Ok(())
}

#[tokio::test]
async fn regions_tool_needs_no_backend() -> Result<()> {
    let backend = MockBackend::new();
    let server = test_server(TransportKind::Stdio, backend.clone());

    let result = call(&server, "list_all_regions", json!({})).await?;
    assert_eq!(result["isError"], false);
    let regions = &result["structuredContent"]["payload"];
    assert!(regions["cn-hangzhou"].is_string());
    assert_eq!(regions.as_object().map(|r| r.len()), Some(7));
    assert!(backend.requests().is_empty());
    Ok(())
}
