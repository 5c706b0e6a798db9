//! Log search tools backed by the `log-client` factory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::translation::call_ai_tool;
use super::{check_time_window, decode, limit_param, region_param, rows, timestamp_param};
use crate::mcp::context::{RequestContext, LOG_CLIENT};
use crate::mcp::error::HandlerError;
use crate::mcp::registry::{ToolHandler, ToolSpec};
use crate::mcp::schema::{ParameterSpec, ToolArguments};
use crate::mcp::types::{ReturnType, ToolOutput};

pub(crate) const LIST_PROJECTS: &str = "ListProject";
pub(crate) const LIST_LOGSTORES: &str = "ListLogStores";
const GET_INDEX: &str = "GetIndex";
pub(crate) const GET_LOGS: &str = "GetLogs";

fn project_param() -> ParameterSpec {
    ParameterSpec::string("project").describe("sls project name")
}

fn log_store_param() -> ParameterSpec {
    ParameterSpec::string("log_store").describe("sls log store name")
}

pub struct ListProjects {
    default_region: Option<String>,
}

impl ListProjects {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct ListProjectsArgs {
    project_name_query: Option<String>,
    region_id: String,
    limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectsBody {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct ProjectEntry {
    #[serde(rename(deserialize = "projectName"))]
    project_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    region: String,
}

#[async_trait]
impl ToolHandler for ListProjects {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "sls_list_projects",
            "List log projects in a region. Supports fuzzy search by project name; \
             without a name every project in the region is listed.",
        )
        .param(
            ParameterSpec::string("project_name_query")
                .optional()
                .describe("project name fragment to search for"),
        )
        .param(region_param(self.default_region.as_deref()))
        .param(limit_param("limit", 10))
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: ListProjectsArgs = args.bind()?;
        let handle = ctx.handle(LOG_CLIENT, &args.region_id, None)?;

        let body = json!({
            "projectName": args.project_name_query.unwrap_or_default(),
            "offset": 0,
            "size": args.limit,
            "regionId": args.region_id,
        });
        let response = handle
            .call(LIST_PROJECTS, body, &ctx.settings().data_call())
            .await?;
        let listed: ProjectsBody = decode(response)?;

        Ok(ToolOutput::data(json!({
            "projects": listed.projects,
            "total": listed.total,
        })))
    }
}

pub struct ListLogstores {
    default_region: Option<String>,
}

impl ListLogstores {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct ListLogstoresArgs {
    project: String,
    region_id: String,
    log_store: Option<String>,
    limit: u32,
    is_metric_store: bool,
}

#[derive(Debug, Deserialize)]
struct LogstoresBody {
    #[serde(default)]
    logstores: Vec<String>,
    #[serde(default)]
    total: u64,
}

#[async_trait]
impl ToolHandler for ListLogstores {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "sls_list_logstores",
            "List log stores of a project. Supports fuzzy search by store name; \
             set is_metric_store to list metric stores only.",
        )
        .param(project_param())
        .param(region_param(self.default_region.as_deref()))
        .param(
            ParameterSpec::string("log_store")
                .optional()
                .describe("log store name fragment to search for"),
        )
        .param(limit_param("limit", 10))
        .param(
            ParameterSpec::boolean("is_metric_store")
                .default_value(false)
                .describe("list metric stores instead of log stores"),
        )
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: ListLogstoresArgs = args.bind()?;
        let handle = ctx.handle(LOG_CLIENT, &args.region_id, None)?;

        let telemetry_type = if args.is_metric_store { "Metrics" } else { "" };
        let body = json!({
            "project": args.project,
            "logstoreName": args.log_store.unwrap_or_default(),
            "size": args.limit,
            "telemetryType": telemetry_type,
        });
        let response = handle
            .call(LIST_LOGSTORES, body, &ctx.settings().data_call())
            .await?;
        let listed: LogstoresBody = decode(response)?;

        Ok(ToolOutput::data(json!({
            "logstores": listed.logstores,
            "total": listed.total,
        })))
    }
}

pub struct DescribeLogstore {
    default_region: Option<String>,
}

impl DescribeLogstore {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeLogstoreArgs {
    project: String,
    log_store: String,
    region_id: String,
}

#[derive(Debug, Deserialize)]
struct IndexBody {
    #[serde(default)]
    keys: BTreeMap<String, IndexKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexKey {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(rename = "type", default)]
    key_type: String,
    #[serde(default)]
    json_keys: BTreeMap<String, IndexKey>,
}

#[derive(Debug, Serialize)]
struct IndexField {
    alias: String,
    sensitive: bool,
    #[serde(rename = "type")]
    key_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_keys: Option<BTreeMap<String, IndexField>>,
}

impl IndexField {
    fn from_key(key: IndexKey, nested: bool) -> Self {
        let json_keys = (!nested).then(|| {
            key.json_keys
                .into_iter()
                .map(|(name, k)| (name, IndexField::from_key(k, true)))
                .collect()
        });
        Self {
            alias: key.alias,
            sensitive: key.case_sensitive,
            key_type: key.key_type,
            json_keys,
        }
    }
}

#[async_trait]
impl ToolHandler for DescribeLogstore {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "sls_describe_logstore",
            "Describe the index of a log store: each indexed field with its alias, \
             case sensitivity, type and nested json keys.",
        )
        .param(project_param())
        .param(log_store_param())
        .param(region_param(self.default_region.as_deref()))
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: DescribeLogstoreArgs = args.bind()?;
        let handle = ctx.handle(LOG_CLIENT, &args.region_id, None)?;

        let body = json!({ "project": args.project, "logstore": args.log_store });
        let response = handle
            .call(GET_INDEX, body, &ctx.settings().data_call())
            .await?;
        let index: IndexBody = decode(response)?;

        if index.keys.is_empty() {
            return Ok(ToolOutput::not_found(
                format!("log store '{}' has no index configured", args.log_store),
                "create an index on the log store before querying it",
            ));
        }

        let fields: BTreeMap<String, IndexField> = index
            .keys
            .into_iter()
            .map(|(name, key)| (name, IndexField::from_key(key, false)))
            .collect();
        Ok(ToolOutput::data(serde_json::to_value(fields)?))
    }
}

pub struct ExecuteQuery {
    default_region: Option<String>,
}

impl ExecuteQuery {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteQueryArgs {
    project: String,
    log_store: String,
    region_id: String,
    query: String,
    from_timestamp: i64,
    to_timestamp: i64,
    limit: u32,
}

#[async_trait]
impl ToolHandler for ExecuteQuery {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "sls_execute_query",
            "Run a query against a log store over an inclusive time window \
             (unix seconds) and return at most `limit` rows.",
        )
        .param(project_param())
        .param(log_store_param())
        .param(region_param(self.default_region.as_deref()))
        .param(ParameterSpec::string("query").describe("query to run"))
        .param(timestamp_param("from_timestamp", "window start, unix seconds"))
        .param(timestamp_param("to_timestamp", "window end, unix seconds"))
        .param(limit_param("limit", 10))
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: ExecuteQueryArgs = args.bind()?;
        check_time_window(args.from_timestamp, args.to_timestamp)?;
        let handle = ctx.handle(LOG_CLIENT, &args.region_id, None)?;

        let body = json!({
            "project": args.project,
            "logstore": args.log_store,
            "query": args.query,
            "from": args.from_timestamp,
            "to": args.to_timestamp,
            "line": args.limit,
        });
        let response = handle
            .call(GET_LOGS, body, &ctx.settings().data_call())
            .await?;

        let data = rows(response);
        if data.is_empty() {
            return Ok(ToolOutput::not_found(
                "no data matched the query",
                "try a different query or a wider time range",
            ));
        }
        Ok(ToolOutput::data(json!({ "data": data, "message": "success" })))
    }
}

pub struct TranslateTextToQuery {
    default_region: Option<String>,
}

impl TranslateTextToQuery {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct TranslateArgs {
    text: String,
    project: String,
    log_store: String,
    region_id: String,
}

#[async_trait]
impl ToolHandler for TranslateTextToQuery {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "sls_translate_text_to_query",
            "Translate a natural language question into a log query for the given \
             log store. Only generates the query, it does not run it.",
        )
        .param(ParameterSpec::string("text").describe("question to translate"))
        .param(project_param())
        .param(log_store_param())
        .param(region_param(self.default_region.as_deref()))
        .returns(ReturnType::Scalar)
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: TranslateArgs = args.bind()?;
        let params = json!({
            "project": args.project,
            "logstore": args.log_store,
            "sys.query": args.text,
        });
        let answer = call_ai_tool(ctx, LOG_CLIENT, "text_to_sql", &args.region_id, params).await?;
        Ok(ToolOutput::data(Value::String(answer.answer)))
    }
}
