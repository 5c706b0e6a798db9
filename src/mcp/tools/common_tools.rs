use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::mcp::context::RequestContext;
use crate::mcp::error::HandlerError;
use crate::mcp::registry::{ToolHandler, ToolSpec};
use crate::mcp::schema::{ParameterSpec, ToolArguments};
use crate::mcp::types::ToolOutput;

const KNOWN_REGIONS: &[(&str, &str)] = &[
    ("cn-hangzhou", "杭州"),
    ("cn-beijing", "北京"),
    ("cn-shanghai", "上海"),
    ("cn-shenzhen", "深圳"),
    ("cn-qingdao", "青岛"),
    ("cn-guangzhou", "广州"),
    ("cn-zhangjiakou", "张家口"),
];

/// China standard time, in minutes east of UTC
const DEFAULT_UTC_OFFSET_MINUTES: i64 = 480;

pub struct ListAllRegions;

#[async_trait]
impl ToolHandler for ListAllRegions {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "list_all_regions",
            "List commonly used region ids with their display names.",
        )
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        _args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let regions: Map<String, Value> = KNOWN_REGIONS
            .iter()
            .map(|(id, name)| (id.to_string(), Value::from(*name)))
            .collect();
        Ok(ToolOutput::data(regions))
    }
}

pub struct GetCurrentTime;

#[derive(Debug, Deserialize)]
struct CurrentTimeArgs {
    utc_offset_minutes: i64,
}

#[async_trait]
impl ToolHandler for GetCurrentTime {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_current_time",
            "Get the current time as a unix timestamp in seconds, plus the \
             wall-clock date at the given UTC offset.",
        )
        .param(
            ParameterSpec::integer("utc_offset_minutes")
                .range(-720.0, 840.0)
                .default_value(DEFAULT_UTC_OFFSET_MINUTES)
                .describe("offset from UTC in minutes, 480 is UTC+8"),
        )
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let args: CurrentTimeArgs = args.bind()?;
        let offset = i32::try_from(args.utc_offset_minutes * 60)
            .ok()
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| HandlerError::invalid("utc_offset_minutes", "offset out of range"))?;

        let now = Utc::now().with_timezone(&offset);
        Ok(ToolOutput::data(json!({
            "timestamp": now.timestamp(),
            "date": now.format("%Y-%m-%d %H:%M:%S").to_string(),
            "utc_offset": offset.to_string(),
        })))
    }
}
