//! Application monitoring tools: trace app search on the `trace-client`,
//! trace query generation and flame graph analysis through the AI service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::translation::call_ai_tool;
use super::{decode, limit_param, region_param};
use crate::mcp::context::{RequestContext, LOG_CLIENT, TRACE_CLIENT};
use crate::mcp::error::HandlerError;
use crate::mcp::registry::{ToolHandler, ToolSpec};
use crate::mcp::schema::{ParameterSpec, ToolArguments};
use crate::mcp::types::{ReturnType, ToolOutput};

const SEARCH_TRACE_APPS: &str = "SearchTraceAppByPage";
const TRACE_LOGSTORE: &str = "logstore-tracing";

/// Log project holding a user's trace spans for one region
pub fn trace_project(user_id: i64, region_id: &str) -> String {
    let digest = md5::compute(format!("{user_id}{region_id}"));
    format!("proj-xtrace-{digest:x}")
}

pub struct SearchApps {
    default_region: Option<String>,
}

impl SearchApps {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct SearchAppsArgs {
    app_name_query: String,
    region_id: String,
    page_size: u32,
    page_number: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchAppsBody {
    page_bean: Option<PageBean>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageBean {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    page_size: u32,
    #[serde(default)]
    page_number: u32,
    #[serde(default)]
    trace_apps: Vec<TraceApp>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TraceApp {
    #[serde(rename(deserialize = "appName"))]
    app_name: String,
    #[serde(default)]
    pid: String,
    #[serde(rename(deserialize = "userId"), default)]
    user_id: Value,
    #[serde(rename = "type", default)]
    app_type: String,
}

#[async_trait]
impl ToolHandler for SearchApps {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "arms_search_apps",
            "Search monitored applications by name fragment. Returns each app's \
             name, pid, owning user id and type, paginated.",
        )
        .param(
            ParameterSpec::string("app_name_query")
                .describe("part of the application name, not a natural language question"),
        )
        .param(region_param(self.default_region.as_deref()))
        .param(limit_param("page_size", 20))
        .param(
            ParameterSpec::integer("page_number")
                .min(1.0)
                .default_value(1)
                .describe("page number, starting at 1"),
        )
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: SearchAppsArgs = args.bind()?;
        let handle = ctx.handle(TRACE_CLIENT, &args.region_id, None)?;

        let body = json!({
            "traceAppName": args.app_name_query,
            "regionId": args.region_id,
            "pageSize": args.page_size,
            "pageNumber": args.page_number,
        });
        let response = handle
            .call(SEARCH_TRACE_APPS, body, &ctx.settings().data_call())
            .await?;
        let page = decode::<SearchAppsBody>(response)?
            .page_bean
            .unwrap_or_default();

        Ok(ToolOutput::data(json!({
            "total": page.total_count,
            "page_size": page.page_size,
            "page_number": page.page_number,
            "trace_apps": page.trace_apps,
        })))
    }
}

pub struct GenerateTraceQuery {
    default_region: Option<String>,
}

impl GenerateTraceQuery {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct TraceQueryArgs {
    user_id: i64,
    pid: String,
    region_id: String,
    question: String,
}

fn trace_prompt(question: &str, pid: &str) -> String {
    let instructions = [
        format!("1. the pid is {pid}"),
        "2. the response time field is duration, stored in nanoseconds; convert it to milliseconds".to_string(),
        "3. every span is stored as its own record, so a total duration must sum the matching spans".to_string(),
        "4. use the serviceName field for interfaces and services".to_string(),
        "5. if the question explicitly asks for traces, return trace_id".to_string(),
    ];
    format!(
        "question:\n{question}\nadditional context:\n{}\ngenerate a log query from the above",
        instructions.join("\n")
    )
}

#[async_trait]
impl ToolHandler for GenerateTraceQuery {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "arms_generate_trace_query",
            "Turn a natural language question about an application's traces into \
             a log query against its trace store. Returns the query together with \
             the project and log store to run it on.",
        )
        .param(ParameterSpec::integer("user_id").describe("account id owning the app"))
        .param(ParameterSpec::string("pid").describe("pid of the app, see arms_search_apps"))
        .param(region_param(self.default_region.as_deref()))
        .param(ParameterSpec::string("question").describe("question about the traces"))
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: TraceQueryArgs = args.bind()?;
        let project = trace_project(args.user_id, &args.region_id);

        let params = json!({
            "project": project,
            "logstore": TRACE_LOGSTORE,
            "sys.query": trace_prompt(&args.question, &args.pid),
        });
        let answer = call_ai_tool(ctx, LOG_CLIENT, "text_to_sql", &args.region_id, params).await?;

        Ok(ToolOutput::data(json!({
            "sls_query": answer.answer,
            "request_id": answer.request_id,
            "project": project,
            "log_store": TRACE_LOGSTORE,
        })))
    }
}

pub struct ProfileFlameAnalysis {
    default_region: Option<String>,
}

impl ProfileFlameAnalysis {
    pub fn new(default_region: Option<String>) -> Self {
        Self { default_region }
    }
}

#[derive(Debug, Deserialize)]
struct FlameArgs {
    service_name: String,
    start_ms: i64,
    end_ms: i64,
    profile_type: String,
    language: String,
    region_id: String,
    ip: String,
    thread: String,
    thread_group: String,
}

#[async_trait]
impl ToolHandler for ProfileFlameAnalysis {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "arms_profile_flame_analysis",
            "Analyse continuous profiling flame graphs of an application and report \
             hot spots with optimisation hints.",
        )
        .param(ParameterSpec::string("service_name").describe("monitored service name"))
        .param(
            ParameterSpec::integer("start_ms")
                .min(0.0)
                .describe("profile start, unix milliseconds"),
        )
        .param(
            ParameterSpec::integer("end_ms")
                .min(0.0)
                .describe("profile end, unix milliseconds"),
        )
        .param(
            ParameterSpec::string("profile_type")
                .describe("profile metric, like 'cpu' or 'alloc_in_new_tlab_bytes'"),
        )
        .param(
            ParameterSpec::string("language")
                .one_of(["java", "golang"])
                .describe("service language"),
        )
        .param(region_param(self.default_region.as_deref()))
        .param(
            ParameterSpec::string("ip")
                .default_value("")
                .describe("comma separated host ips, empty for all"),
        )
        .param(
            ParameterSpec::string("thread")
                .default_value("")
                .describe("comma separated thread names, empty for all"),
        )
        .param(
            ParameterSpec::string("thread_group")
                .default_value("")
                .describe("comma separated thread groups, empty for all"),
        )
        .returns(ReturnType::Scalar)
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: FlameArgs = args.bind()?;
        if args.start_ms > args.end_ms {
            return Err(HandlerError::invalid(
                "end_ms",
                format!("must not be earlier than start_ms ({} > {})", args.start_ms, args.end_ms),
            ));
        }

        let params = json!({
            "serviceName": args.service_name,
            "startMs": args.start_ms.to_string(),
            "endMs": args.end_ms.to_string(),
            "profileType": args.profile_type,
            "ip": args.ip,
            "language": args.language,
            "thread": args.thread,
            "threadGroup": args.thread_group,
            "sys.query": format!("analyse the flame graph hot spots of {}", args.service_name),
        });
        let answer = call_ai_tool(
            ctx,
            LOG_CLIENT,
            "profile_flame_analysis",
            &args.region_id,
            params,
        )
        .await?;
        Ok(ToolOutput::data(Value::String(answer.answer)))
    }
}
