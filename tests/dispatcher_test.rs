// Dispatcher behaviour: lookup, validation before execution, failure isolation
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use observability_mcp::mcp::tools::translation::extract_answer;
use observability_mcp::mcp::{
    Dispatcher, ErrorKind, HandlerError, InvocationRequest, InvocationResult, ParameterSpec,
    RegistryError, RequestContext, ToolArguments, ToolHandler, ToolOutput, ToolRegistry, ToolSpec,
};

struct EchoSum;

#[derive(Deserialize)]
struct SumArgs {
    a: i64,
    b: i64,
}

#[async_trait]
impl ToolHandler for EchoSum {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("echo_sum", "Add two integers")
            .param(ParameterSpec::integer("a"))
            .param(ParameterSpec::integer("b"))
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        let SumArgs { a, b } = args.bind()?;
        Ok(ToolOutput::data(a + b))
    }
}

/// Counts executions so tests can prove a handler never ran
#[derive(Default)]
struct Counted {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolHandler for Counted {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("counted", "Requires a project")
            .param(ParameterSpec::string("project"))
            .param(
                ParameterSpec::integer("limit")
                    .range(1.0, 100.0)
                    .default_value(10),
            )
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::data(args.into_value()))
    }
}

struct Panics;

#[async_trait]
impl ToolHandler for Panics {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("panics", "Always panics")
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        _args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        panic!("backend handle vanished");
    }
}

struct Fails;

#[async_trait]
impl ToolHandler for Fails {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("fails", "Always fails")
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        _args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError> {
        Err(HandlerError::failed("project does not exist"))
    }
}

struct Fixture {
    dispatcher: Dispatcher,
    counted: Arc<Counted>,
}

fn fixture() -> Fixture {
    let counted = Arc::new(Counted::default());
    let mut registry = ToolRegistry::new();
    registry
        .register_all(vec![
            Arc::new(EchoSum) as Arc<dyn ToolHandler>,
            counted.clone(),
            Arc::new(Panics),
            Arc::new(Fails),
        ])
        .unwrap();
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(RequestContext::builder().build()),
    );
    Fixture {
        dispatcher,
        counted,
    }
}

async fn dispatch(dispatcher: &Dispatcher, tool: &str, arguments: Value) -> InvocationResult {
    dispatcher
        .dispatch(InvocationRequest::new(tool, arguments))
        .await
}

#[tokio::test]
async fn echo_sum_round_trip() {
    let Fixture { dispatcher, .. } = fixture();

    let result = dispatch(&dispatcher, "echo_sum", json!({"a": 2, "b": 3})).await;
    assert_eq!(result.payload(), Some(&json!(5)));

    let result = dispatch(&dispatcher, "echo_sum", json!({"a": 2})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::MissingArgument));
    match result {
        InvocationResult::Failure { message, .. } => assert!(message.contains("'b'")),
        other => panic!("expected failure, got {other:?}"),
    }

    let result = dispatch(&dispatcher, "does_not_exist", json!({})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::UnknownTool));
}

#[tokio::test]
async fn wrong_type_is_rejected_before_execution() {
    let Fixture { dispatcher, .. } = fixture();
    let result = dispatch(&dispatcher, "echo_sum", json!({"a": "2", "b": 3})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::InvalidArgument));
}

#[test]
fn duplicate_registration_fails() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoSum)).unwrap();
    let err = registry.register(Arc::new(EchoSum)).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateTool("echo_sum".to_string()));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn handler_does_not_run_when_validation_fails() {
    let Fixture {
        dispatcher,
        counted,
    } = fixture();

    let result = dispatch(&dispatcher, "counted", json!({})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::MissingArgument));

    let result = dispatch(&dispatcher, "counted", json!({"project": "p", "limit": 0})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::InvalidArgument));

    assert_eq!(counted.calls.load(Ordering::SeqCst), 0);

    let result = dispatch(&dispatcher, "counted", json!({"project": "p"})).await;
    assert!(result.is_success());
    assert_eq!(counted.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn limit_bounds_are_inclusive() {
    let Fixture { dispatcher, .. } = fixture();

    for limit in [0, 101, -1] {
        let result = dispatch(&dispatcher, "counted", json!({"project": "p", "limit": limit})).await;
        assert_eq!(
            result.error_kind(),
            Some(ErrorKind::InvalidArgument),
            "limit {limit}"
        );
    }
    for limit in [1, 100] {
        let result = dispatch(&dispatcher, "counted", json!({"project": "p", "limit": limit})).await;
        assert_eq!(result.payload().map(|p| &p["limit"]), Some(&json!(limit)));
    }

    let result = dispatch(&dispatcher, "counted", json!({"project": "p"})).await;
    assert_eq!(result.payload().map(|p| &p["limit"]), Some(&json!(10)));
}

#[tokio::test]
async fn undeclared_arguments_are_ignored() {
    let Fixture { dispatcher, .. } = fixture();
    let result = dispatch(
        &dispatcher,
        "counted",
        json!({"project": "p", "extra": true}),
    )
    .await;
    assert_eq!(
        result.payload(),
        Some(&json!({"project": "p", "limit": 10}))
    );
}

#[tokio::test]
async fn failures_stay_inside_one_invocation() {
    let Fixture { dispatcher, .. } = fixture();

    let result = dispatch(&dispatcher, "panics", json!({})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ToolExecutionFailed));

    let result = dispatch(&dispatcher, "fails", json!({})).await;
    match result {
        InvocationResult::Failure {
            error_kind,
            message,
            retryable,
        } => {
            assert_eq!(error_kind, ErrorKind::ToolExecutionFailed);
            assert!(message.contains("project does not exist"));
            assert!(!retryable);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // The dispatcher keeps serving after both
    let result = dispatch(&dispatcher, "echo_sum", json!({"a": 1, "b": 1})).await;
    assert_eq!(result.payload(), Some(&json!(2)));
}

#[tokio::test]
async fn concurrent_invocations_do_not_interfere() {
    let Fixture { dispatcher, .. } = fixture();

    let calls = (0..32i64).map(|i| {
        let dispatcher = dispatcher.clone();
        async move {
            let result = dispatch(&dispatcher, "echo_sum", json!({"a": i, "b": i})).await;
            (i, result)
        }
    });
    for (i, result) in futures::future::join_all(calls).await {
        assert_eq!(result.payload(), Some(&json!(2 * i)));
    }
}

#[test]
fn answer_extraction() {
    assert_eq!(
        extract_answer("thinking...\n------answer------\n* | select count(*)"),
        "* | select count(*)"
    );
    assert_eq!(extract_answer("no marker here"), "no marker here");
    assert_eq!(
        extract_answer("x\n------answer------\nfirst\n------answer------\nsecond"),
        "first\n"
    );
}

proptest! {
    #[test]
    fn limit_validation_matches_bounds(limit in -50i64..200) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let Fixture { dispatcher, counted } = fixture();
        let result = runtime.block_on(dispatch(
            &dispatcher,
            "counted",
            json!({"project": "p", "limit": limit}),
        ));

        let in_range = (1..=100).contains(&limit);
        prop_assert_eq!(result.is_success(), in_range);
        prop_assert_eq!(counted.calls.load(Ordering::SeqCst), usize::from(in_range));
    }
}
