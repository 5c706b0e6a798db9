// Newline-delimited JSON-RPC over the stdio transport
mod test_backend;

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use observability_mcp::mcp::config::TransportKind;
use test_backend::{test_server, MockBackend};

async fn run_session(lines: &[Value], raw_extra: &[&str]) -> Result<Vec<Value>> {
    let server = test_server(TransportKind::Stdio, MockBackend::new());

    let mut input = String::new();
    for line in lines {
        input.push_str(&line.to_string());
        input.push('\n');
    }
    for raw in raw_extra {
        input.push_str(raw);
        input.push('\n');
    }

    let mut output = Vec::new();
    server
        .run_stdio(tokio::io::BufReader::new(input.as_bytes()), &mut output)
        .await?;

    String::from_utf8(output)?
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).map_err(anyhow::Error::from))
        .collect()
}

#[tokio::test]
async fn stdio_session_lifecycle() -> Result<()> {
    let replies = run_session(
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": "2025-06-18",
                "clientInfo": {"name": "test", "version": "0"}
            }}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {
                "name": "sls_list_projects", "arguments": {}
            }}),
            json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"}),
        ],
        &[],
    )
    .await?;

    // The notification gets no reply
    assert_eq!(replies.len(), 4);

    assert_eq!(replies[0]["id"], 1);
    assert_eq!(replies[0]["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(replies[0]["result"]["serverInfo"]["name"], "observability-mcp");

    assert_eq!(replies[1]["id"], 2);
    assert_eq!(
        replies[1]["result"]["tools"].as_array().map(Vec::len),
        Some(16)
    );

    // Tool failures are results flagged isError, not protocol errors
    assert_eq!(replies[2]["id"], 3);
    assert_eq!(replies[2]["result"]["isError"], true);
    assert_eq!(
        replies[2]["result"]["structuredContent"]["error_kind"],
        "MissingArgument"
    );

    assert_eq!(replies[3]["id"], 4);
    assert_eq!(replies[3]["error"]["code"], -32601);
    Ok(())
}

#[tokio::test]
async fn unparsable_line_gets_parse_error_and_session_continues() -> Result<()> {
    let replies = run_session(
        &[],
        &[
            "{not json",
            "",
            r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#,
        ],
    )
    .await?;

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["error"]["code"], -32700);
    assert_eq!(replies[0]["id"], Value::Null);
    assert_eq!(replies[1]["id"], 9);
    assert_eq!(replies[1]["result"]["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn tools_call_without_name_is_invalid_params() -> Result<()> {
    let replies = run_session(
        &[json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {"arguments": {}}})],
        &[],
    )
    .await?;
    assert_eq!(replies[0]["error"]["code"], -32602);
    Ok(())
}
