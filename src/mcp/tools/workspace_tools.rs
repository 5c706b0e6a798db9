//! Workspace and entity store tools backed by the `workspace-client` factory.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{check_time_window, decode, region_param, timestamp_param};
use crate::mcp::context::{RequestContext, WORKSPACE_CLIENT};
use crate::mcp::error::HandlerError;
use crate::mcp::registry::{ToolHandler, ToolSpec};
use crate::mcp::schema::{ParameterSpec, ToolArguments};
use crate::mcp::types::{ReturnType, ToolOutput};

const LIST_WORKSPACES: &str = "ListWorkspaces";
const GET_ENTITY_STORE_DATA: &str = "GetEntityStoreData";

/// Terminal columns taken by `text`; anything outside ASCII counts as two
fn display_width(text: &str) -> usize {
    text.chars().map(|c| if c.is_ascii() { 1 } else { 2 }).sum()
}

fn pad(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(display_width(text));
    format!("{text}{}", " ".repeat(fill))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render rows under a header as a column-aligned text table.
///
/// Cells beyond the header's column count are dropped.
pub fn format_entity_table(header: &[String], rows: &[Vec<Value>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().take(header.len()).map(cell_text).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| display_width(h)).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }

    let render = |row: &[String]| -> String {
        row.iter()
            .zip(&widths)
            .map(|(cell, width)| pad(cell, *width))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let header_line = render(header);
    let separator = "-".repeat(display_width(&header_line));
    let mut lines = vec![header_line, separator];
    lines.extend(cells.iter().map(|row| render(row)));
    lines.join("\n")
}

pub struct ListWorkspaces {
    default_region: Option<String>,
}

impl ListWorkspaces {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct RegionArgs {
    region_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceEntry {
    workspace_name: String,
}

#[derive(Debug, Deserialize)]
struct WorkspacesBody {
    #[serde(default)]
    workspaces: Vec<WorkspaceEntry>,
}

#[async_trait]
impl ToolHandler for ListWorkspaces {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "cms_list_workspaces",
            "List observability workspaces of a region.",
        )
        .param(region_param(self.default_region.as_deref()))
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: RegionArgs = args.bind()?;
        let handle = ctx.handle(WORKSPACE_CLIENT, &args.region_id, None)?;

        let response = handle
            .call(
                LIST_WORKSPACES,
                json!({ "region": args.region_id }),
                &ctx.settings().data_call(),
            )
            .await?;
        let names: Vec<String> = decode::<WorkspacesBody>(response)?
            .workspaces
            .into_iter()
            .map(|w| w.workspace_name)
            .collect();

        Ok(ToolOutput::data(json!({
            "total": names.len(),
            "workspaces": names,
        })))
    }
}

pub struct ExecuteEntityQuery {
    default_region: Option<String>,
}

impl ExecuteEntityQuery {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct EntityQueryArgs {
    workspace_name: String,
    query: String,
    from_timestamp: i64,
    to_timestamp: i64,
    region_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct EntityStoreBody {
    #[serde(default)]
    header: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[async_trait]
impl ToolHandler for ExecuteEntityQuery {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "cms_execute_entity_query",
            "Query the entity store of a workspace and return the result as an \
             aligned text table.",
        )
        .param(ParameterSpec::string("workspace_name").describe("workspace to query"))
        .param(ParameterSpec::string("query").describe("entity query"))
        .param(timestamp_param("from_timestamp", "window start, unix seconds"))
        .param(timestamp_param("to_timestamp", "window end, unix seconds"))
        .param(region_param(self.default_region.as_deref()))
        .returns(ReturnType::Scalar)
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: EntityQueryArgs = args.bind()?;
        check_time_window(args.from_timestamp, args.to_timestamp)?;
        let handle = ctx.handle(WORKSPACE_CLIENT, &args.region_id, None)?;

        let body = json!({
            "workspace": args.workspace_name,
            "query": args.query,
            "from": args.from_timestamp,
            "to": args.to_timestamp,
        });
        let response = handle
            .call(GET_ENTITY_STORE_DATA, body, &ctx.settings().data_call())
            .await?;
        let table: EntityStoreBody = decode(response)?;

        if table.header.is_empty() || table.data.is_empty() {
            return Ok(ToolOutput::not_found(
                "entity query returned no data",
                "check the workspace name, the query or the time range",
            ));
        }
        Ok(ToolOutput::data(Value::String(format_entity_table(
            &table.header,
            &table.data,
        ))))
    }
}
