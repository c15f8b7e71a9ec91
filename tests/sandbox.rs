//! Code node tests against the real sandbox process.

use flowlite::error::{EngineError, NodeError};
use flowlite::runtime::{ExecutionEngine, NodeRegistry, RunContext, ScriptRunner};
use flowlite::workflow::types::{Item, RunStatus, Workflow};
use flowlite::workflow::WorkflowStore;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn runner() -> ScriptRunner {
    ScriptRunner::new(env!("CARGO_BIN_EXE_flowlite-sandbox"))
        .with_timeout(Duration::from_millis(1500))
}

fn items(value: Value) -> Vec<Item> {
    serde_json::from_value(value).unwrap()
}

async fn engine(runner: ScriptRunner) -> (ExecutionEngine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let store = WorkflowStore::connect(&url).await.unwrap();
    (ExecutionEngine::new(store, NodeRegistry::builtin(runner)), dir)
}

fn code_workflow(id: &str, code: &str) -> Workflow {
    serde_json::from_value(json!({
        "id": id,
        "name": id,
        "nodes": [
            { "id": "start", "type": "manualTrigger" },
            { "id": "code", "type": "code", "data": { "params": { "code": code } } }
        ],
        "edges": [{ "id": "e1", "source": "start", "target": "code" }]
    }))
    .unwrap()
}

#[tokio::test]
async fn transforms_items_and_captures_prints() {
    let mut ctx = RunContext::new("exec", "code");
    let output = runner()
        .run(
            r#"function(items)
                local out = {}
                for i, item in ipairs(items) do
                    print("item", i, item.name)
                    out[#out + 1] = { name = item.name, shout = item.name .. "!" }
                end
                return out
            end"#,
            items(json!([{ "name": "ada" }, { "name": "bob" }])),
            &mut ctx,
        )
        .await
        .unwrap();

    assert_eq!(
        output,
        items(json!([
            { "name": "ada", "shout": "ada!" },
            { "name": "bob", "shout": "bob!" }
        ]))
    );
    assert_eq!(ctx.logs(), ["item 1 ada", "item 2 bob"]);
}

#[tokio::test]
async fn runaway_script_is_killed_on_timeout() {
    let runner = runner().with_timeout(Duration::from_millis(300));
    let mut ctx = RunContext::new("exec", "code");

    let started = Instant::now();
    let result = runner
        .run("function(items) while true do end end", vec![], &mut ctx)
        .await;

    assert!(matches!(result, Err(NodeError::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn timed_out_step_fails_and_engine_keeps_working() {
    let (engine, _dir) = engine(runner().with_timeout(Duration::from_millis(300))).await;

    let stuck = code_workflow("wf-stuck", "function(items) while true do end end");
    engine.store().save_workflow(&stuck).await.unwrap();
    let err = engine.execute(&stuck, vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::NodeFailed { source: NodeError::Timeout, .. }));

    let execution_id = err.execution_id().unwrap();
    let steps = engine.store().list_steps(execution_id).await.unwrap();
    assert_eq!(steps[1].status, RunStatus::Failed);
    assert_eq!(steps[1].error.as_deref(), Some("Code node timed out"));

    let fine = code_workflow("wf-fine", "function(items) return items end");
    engine.store().save_workflow(&fine).await.unwrap();
    let execution_id = engine.execute(&fine, items(json!([{ "a": 1 }]))).await.unwrap();
    let execution = engine.store().get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, RunStatus::Success);
}

#[tokio::test]
async fn non_list_return_fails_the_step() {
    let (engine, _dir) = engine(runner()).await;
    let workflow = code_workflow("wf-scalar", "function(items) return 42 end");
    engine.store().save_workflow(&workflow).await.unwrap();

    let err = engine.execute(&workflow, vec![]).await.unwrap_err();
    let execution_id = err.execution_id().unwrap();

    let execution = engine.store().get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, RunStatus::Failed);
    assert_eq!(
        execution.error.as_deref(),
        Some("Code node must return a list of items")
    );
}

#[tokio::test]
async fn script_errors_keep_earlier_logs() {
    let mut ctx = RunContext::new("exec", "code");
    let result = runner()
        .run(
            r#"function(items) print("checking") error("no items") end"#,
            vec![],
            &mut ctx,
        )
        .await;

    match result {
        Err(NodeError::Script(message)) => assert!(message.contains("no items"), "{message}"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(ctx.logs(), ["checking"]);
}

#[tokio::test]
async fn sandbox_cannot_reach_the_host() {
    let mut ctx = RunContext::new("exec", "code");
    let result = runner()
        .run(
            r#"function(items) return {{ exec = os.execute("true") }} end"#,
            vec![],
            &mut ctx,
        )
        .await;

    assert!(matches!(result, Err(NodeError::Script(_))));
}
