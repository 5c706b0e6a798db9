/// Built-in observability tools
///
/// Each tool is a [`ToolHandler`] declaring its parameters as a descriptor
/// literal. [`builtin_tools`] is the static registration table; the registry
/// rejects any name collision at startup.
pub mod arms_tools;
pub mod cms_tools;
pub mod common_tools;
pub mod sls_tools;
pub mod translation;
pub mod workspace_tools;

#[cfg(test)]
mod test_support;

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::mcp::context::UpstreamSettings;
use crate::mcp::error::HandlerError;
use crate::mcp::registry::ToolHandler;
use crate::mcp::schema::ParameterSpec;

/// The static registration table
pub fn builtin_tools(settings: &UpstreamSettings) -> Vec<Arc<dyn ToolHandler>> {
    let region = settings.default_region.clone();
    vec![
        Arc::new(common_tools::ListAllRegions),
        Arc::new(common_tools::GetCurrentTime),
        Arc::new(sls_tools::ListProjects::new(region.clone())),
        Arc::new(sls_tools::ListLogstores::new(region.clone())),
        Arc::new(sls_tools::DescribeLogstore::new(region.clone())),
        Arc::new(sls_tools::ExecuteQuery::new(region.clone())),
        Arc::new(sls_tools::TranslateTextToQuery::new(region.clone())),
        Arc::new(cms_tools::TranslateTextToPromql::new(region.clone())),
        Arc::new(cms_tools::ExecutePromqlQuery::new(region.clone())),
        Arc::new(cms_tools::SummarizeAlertEvents::new(region.clone())),
        Arc::new(cms_tools::GovernanceAlertStorm::new(region.clone())),
        Arc::new(arms_tools::SearchApps::new(region.clone())),
        Arc::new(arms_tools::GenerateTraceQuery::new(region.clone())),
        Arc::new(arms_tools::ProfileFlameAnalysis::new(region.clone())),
        Arc::new(workspace_tools::ListWorkspaces::new(region.clone())),
        Arc::new(workspace_tools::ExecuteEntityQuery::new(region)),
    ]
}

/// `region_id`: defaults to the configured region, required otherwise
pub(crate) fn region_param(default_region: Option<&str>) -> ParameterSpec {
    let spec = ParameterSpec::string("region_id")
        .describe("aliyun region id, formatted like 'cn-hangzhou'");
    match default_region {
        Some(region) => spec.default_value(region),
        None => spec,
    }
}

/// Result-count limit, always within [1, 100]
pub(crate) fn limit_param(name: &str, default: i64) -> ParameterSpec {
    ParameterSpec::integer(name)
        .range(1.0, 100.0)
        .default_value(default)
        .describe(format!("{name}, at most 100"))
}

pub(crate) fn timestamp_param(name: &str, description: &str) -> ParameterSpec {
    ParameterSpec::integer(name).min(0.0).describe(description)
}

/// Inclusive `[from, to]` window in seconds
pub(crate) fn check_time_window(from: i64, to: i64) -> Result<(), HandlerError> {
    if from > to {
        return Err(HandlerError::invalid(
            "to_timestamp",
            format!("must not be earlier than from_timestamp ({from} > {to})"),
        ));
    }
    Ok(())
}

/// Log rows from a query response: a bare array or an object with `data`
pub(crate) fn rows(response: Value) -> Vec<Value> {
    match response {
        Value::Array(rows) => rows,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Decode a backend response body into a typed shape
pub(crate) fn decode<T: for<'de> Deserialize<'de>>(response: Value) -> Result<T, HandlerError> {
    Ok(serde_json::from_value(response)?)
}
