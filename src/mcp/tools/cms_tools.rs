//! Metric and alert tools backed by the `metrics-client` factory.
//!
//! Alert events live in a per-region log store of the alert center project;
//! regions without one answer with a `NotFound` result instead of an error.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::sls_tools::{GET_LOGS, LIST_LOGSTORES, LIST_PROJECTS};
use super::translation::call_ai_tool;
use super::{check_time_window, region_param, rows, timestamp_param};
use crate::client::ClientHandle;
use crate::mcp::context::{RequestContext, METRICS_CLIENT};
use crate::mcp::error::HandlerError;
use crate::mcp::registry::{ToolHandler, ToolSpec};
use crate::mcp::schema::{ParameterSpec, ToolArguments};
use crate::mcp::types::{ReturnType, ToolOutput};

const ALERT_PROJECT_PREFIX: &str = "cms-alert-center";
const ALERT_LOGSTORE_PREFIX: &str = "alert-rule-event-default";
const ALERT_LOOKUP_SIZE: u32 = 100;

const RAW_PROMQL_TEMPLATE: &str = include_str!("spl/raw_promql.spl");
const THRESHOLD_RULE_ANALYSIS: &str = include_str!("spl/threshold_rule_analysis.spl");

const ALERT_TOTALS_QUERY: &str = "* | SELECT COUNT(CASE WHEN type = 'ALERT' THEN 1 END) AS alert_events, \
     COUNT(DISTINCT CASE WHEN type = 'ALERT' AND status != 'RECOVERED' THEN source END) AS alert_rules FROM log";
const ALERT_SEVERITY_QUERY: &str =
    "* | SELECT severity, COUNT(*) AS alert_count FROM log GROUP BY severity ORDER BY alert_count DESC";
const ALERT_RULE_QUERY: &str = "type:alert | set session mode=scan; SELECT source AS rule_id, subject AS rule_name, \
     json_extract_scalar(data, '$.rule.query') AS rule_query, COUNT(*) AS count, \
     COUNT(*) * 100.0 / (SELECT COUNT(*) FROM log) AS percentage FROM log \
     GROUP BY (rule_id, rule_name, rule_query) ORDER BY percentage DESC LIMIT 10";
const ALERT_RESOURCE_QUERY: &str = "type:alert | set session mode=scan; SELECT json_extract(resource, '$.entity') AS entity, \
     COUNT(*) AS count, COUNT(*) * 100.0 / (SELECT COUNT(*) FROM log) AS percentage FROM log \
     GROUP BY (entity) ORDER BY count DESC LIMIT 10";

/// Alert event store of one region
#[derive(Debug, Clone, PartialEq, Eq)]
struct AlertStore {
    project: String,
    log_store: String,
}

fn alert_store_not_found(region: &str) -> ToolOutput {
    ToolOutput::not_found(
        format!("no alert log store found in region {region}"),
        "enable CMS 2.0 alerting for this region",
    )
}

fn names_ending_with<'a>(items: &'a Value, field: Option<&str>, suffix: &str) -> Option<&'a str> {
    items.as_array()?.iter().find_map(|item| {
        let name = match field {
            Some(field) => item.get(field)?.as_str()?,
            None => item.as_str()?,
        };
        name.ends_with(suffix).then_some(name)
    })
}

async fn find_alert_store(
    ctx: &RequestContext,
    handle: &ClientHandle,
) -> Result<Option<AlertStore>, HandlerError> {
    let region = handle.region();
    let projects = handle
        .call(
            LIST_PROJECTS,
            json!({
                "projectName": ALERT_PROJECT_PREFIX,
                "offset": 0,
                "size": ALERT_LOOKUP_SIZE,
                "regionId": region,
            }),
            &ctx.settings().data_call(),
        )
        .await?;
    let Some(project) = names_ending_with(&projects["projects"], Some("projectName"), region)
    else {
        return Ok(None);
    };

    let stores = handle
        .call(
            LIST_LOGSTORES,
            json!({
                "project": project,
                "logstoreName": ALERT_LOGSTORE_PREFIX,
                "size": ALERT_LOOKUP_SIZE,
                "telemetryType": "",
            }),
            &ctx.settings().data_call(),
        )
        .await?;
    let Some(log_store) = names_ending_with(&stores["logstores"], None, region) else {
        return Ok(None);
    };

    tracing::debug!("Alert events for {} in {}/{}", region, project, log_store);
    Ok(Some(AlertStore {
        project: project.to_string(),
        log_store: log_store.to_string(),
    }))
}

async fn query_alerts(
    ctx: &RequestContext,
    handle: &ClientHandle,
    store: &AlertStore,
    query: &str,
    window: (i64, i64),
) -> Result<Vec<Value>, HandlerError> {
    let response = handle
        .call(
            GET_LOGS,
            json!({
                "project": store.project,
                "logstore": store.log_store,
                "query": query,
                "from": window.0,
                "to": window.1,
            }),
            &ctx.settings().data_call(),
        )
        .await?;
    Ok(rows(response))
}

#[derive(Debug, Deserialize)]
struct AlertWindowArgs {
    from_timestamp: i64,
    to_timestamp: i64,
    region_id: String,
}

fn alert_window_spec(name: &str, description: &str, default_region: Option<&str>) -> ToolSpec {
    ToolSpec::new(name, description)
        .param(timestamp_param("from_timestamp", "window start, unix seconds"))
        .param(timestamp_param("to_timestamp", "window end, unix seconds"))
        .param(region_param(default_region))
}

pub struct SummarizeAlertEvents {
    default_region: Option<String>,
}

impl SummarizeAlertEvents {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[async_trait]
impl ToolHandler for SummarizeAlertEvents {
    fn spec(&self) -> ToolSpec {
        alert_window_spec(
            "cms_summarize_alert_events",
            "Summarize alert events of a region: totals, severity distribution, \
             and the top alerting rules and resources.",
            self.default_region.as_deref(),
        )
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: AlertWindowArgs = args.bind()?;
        check_time_window(args.from_timestamp, args.to_timestamp)?;
        let handle = ctx.handle(METRICS_CLIENT, &args.region_id, None)?;

        let Some(store) = find_alert_store(ctx, &handle).await? else {
            return Ok(alert_store_not_found(&args.region_id));
        };

        let window = (args.from_timestamp, args.to_timestamp);
        let (totals, severity, rules, resources) = futures::try_join!(
            query_alerts(ctx, &handle, &store, ALERT_TOTALS_QUERY, window),
            query_alerts(ctx, &handle, &store, ALERT_SEVERITY_QUERY, window),
            query_alerts(ctx, &handle, &store, ALERT_RULE_QUERY, window),
            query_alerts(ctx, &handle, &store, ALERT_RESOURCE_QUERY, window),
        )?;

        Ok(ToolOutput::data(json!({
            "alert_event_total": totals,
            "alert_severity_info": severity,
            "alert_rule_percent": rules,
            "alert_resource_info": resources,
        })))
    }
}

pub struct GovernanceAlertStorm {
    default_region: Option<String>,
}

impl GovernanceAlertStorm {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

/// Attach each analysis `output` to the rule row with the same `rule_id`
fn merge_suggestions(rules: &mut [Value], analysis: &[Value]) {
    for item in analysis {
        let Some(rule_id) = item.get("rule_id") else {
            continue;
        };
        let suggestion = item.get("output").cloned().unwrap_or(Value::Null);
        for rule in rules.iter_mut() {
            if rule.get("rule_id") == Some(rule_id) {
                if let Some(row) = rule.as_object_mut() {
                    row.insert("suggest".to_string(), suggestion.clone());
                }
            }
        }
    }
}

#[async_trait]
impl ToolHandler for GovernanceAlertStorm {
    fn spec(&self) -> ToolSpec {
        alert_window_spec(
            "cms_governance_alert_storm",
            "Analyse frequently firing alert rules of a region and suggest \
             threshold or rule changes for each.",
            self.default_region.as_deref(),
        )
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: AlertWindowArgs = args.bind()?;
        check_time_window(args.from_timestamp, args.to_timestamp)?;
        let handle = ctx.handle(METRICS_CLIENT, &args.region_id, None)?;

        let Some(store) = find_alert_store(ctx, &handle).await? else {
            return Ok(alert_store_not_found(&args.region_id));
        };

        let window = (args.from_timestamp, args.to_timestamp);
        let (mut rules, analysis) = futures::try_join!(
            query_alerts(ctx, &handle, &store, ALERT_RULE_QUERY, window),
            query_alerts(ctx, &handle, &store, THRESHOLD_RULE_ANALYSIS, window),
        )?;
        merge_suggestions(&mut rules, &analysis);

        Ok(ToolOutput::data(json!({ "alert_rule_percent": rules })))
    }
}

fn metric_store_param() -> ParameterSpec {
    ParameterSpec::string("metric_store").describe("metric store name")
}

pub struct TranslateTextToPromql {
    default_region: Option<String>,
}

impl TranslateTextToPromql {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct TranslatePromqlArgs {
    text: String,
    project: String,
    metric_store: String,
    region_id: String,
}

#[async_trait]
impl ToolHandler for TranslateTextToPromql {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "cms_translate_text_to_promql",
            "Translate a natural language question into a PromQL query for the \
             given metric store. Only generates the query, it does not run it.",
        )
        .param(ParameterSpec::string("text").describe("question to translate"))
        .param(ParameterSpec::string("project").describe("project holding the metric store"))
        .param(metric_store_param())
        .param(region_param(self.default_region.as_deref()))
        .returns(ReturnType::Scalar)
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: TranslatePromqlArgs = args.bind()?;
        let params = json!({
            "project": args.project,
            "metricstore": args.metric_store,
            "sys.query": args.text,
        });
        let answer =
            call_ai_tool(ctx, METRICS_CLIENT, "text_to_promql", &args.region_id, params).await?;
        Ok(ToolOutput::data(Value::String(answer.answer)))
    }
}

pub struct ExecutePromqlQuery {
    default_region: Option<String>,
}

impl ExecutePromqlQuery {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct PromqlArgs {
    project: String,
    metric_store: String,
    query: String,
    from_timestamp: i64,
    to_timestamp: i64,
    region_id: String,
}

#[async_trait]
impl ToolHandler for ExecutePromqlQuery {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "cms_execute_promql_query",
            "Run a PromQL query against a metric store over an inclusive time \
             window (unix seconds).",
        )
        .param(ParameterSpec::string("project").describe("project holding the metric store"))
        .param(metric_store_param())
        .param(ParameterSpec::string("query").describe("PromQL expression"))
        .param(timestamp_param("from_timestamp", "window start, unix seconds"))
        .param(timestamp_param("to_timestamp", "window end, unix seconds"))
        .param(region_param(self.default_region.as_deref()))
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: PromqlArgs = args.bind()?;
        check_time_window(args.from_timestamp, args.to_timestamp)?;
        let handle = ctx.handle(METRICS_CLIENT, &args.region_id, None)?;

        let body = json!({
            "project": args.project,
            "logstore": args.metric_store,
            "query": RAW_PROMQL_TEMPLATE.replace("<PROMQL>", &args.query),
            "from": args.from_timestamp,
            "to": args.to_timestamp,
        });
        let response = handle
            .call(GET_LOGS, body, &ctx.settings().idempotent_call())
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
