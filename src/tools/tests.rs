// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{
    register_diagram_tools, Capability, CapabilityRegistry, QueueError, SerialQueue, ToolCall,
    ToolPipeline, EDIT_BATCH_TOOL, READ_TOOL,
};
use crate::config::EngineConfig;
use crate::error::{ErrorKind, RollbackStatus, ToolErrorDetail, ToolResult, UnknownCause};
use crate::store::{ChangeFeed, MemoryHost, Verdict, WriteBackCoordinator};

#[derive(Clone)]
enum Behavior {
    Echo,
    Sleep(Duration),
    UntilCancelled,
    Raise(&'static str),
}

struct Stub {
    name: &'static str,
    schema: Option<Value>,
    timeout: Duration,
    behavior: Behavior,
}

impl Stub {
    fn new(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            schema: Some(json!({ "type": "object" })),
            timeout: Duration::from_secs(5),
            behavior,
        }
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn with_schema(mut self, schema: Option<Value>) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Capability for Stub {
    fn name(&self) -> &str {
        self.name
    }

    fn input_schema(&self) -> Option<Value> {
        self.schema.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, input: Value, cancel: CancellationToken) -> anyhow::Result<ToolResult> {
        match &self.behavior {
            Behavior::Echo => Ok(ToolResult::success(input)),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(ToolResult::success(json!({ "slept": true })))
            }
            Behavior::UntilCancelled => {
                cancel.cancelled().await;
                Ok(ToolResult::success(json!({})))
            }
            Behavior::Raise(message) => Err(anyhow::anyhow!(*message)),
        }
    }
}

fn pipeline(stubs: Vec<Stub>) -> ToolPipeline {
    let mut registry = CapabilityRegistry::new();
    for stub in stubs {
        registry.register(Arc::new(stub));
    }
    ToolPipeline::new(registry).with_augmented_messages(false)
}

async fn run(pipeline: &ToolPipeline, name: &str, input: Value) -> ToolResult {
    pipeline
        .run(&ToolCall::new(name, input), CancellationToken::new())
        .await
        .expect("report")
}

fn kind(result: &ToolResult) -> ErrorKind {
    result.detail().expect("failure detail").kind()
}

async fn wait_until_running(queue: &SerialQueue) {
    for _ in 0..200 {
        if queue.status().current.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no call started");
}

#[tokio::test]
async fn pipeline_succeeds_with_capability_payload() {
    let pipeline = pipeline(vec![Stub::new("echo", Behavior::Echo)]);
    let result = run(&pipeline, "echo", json!({ "a": 1 })).await;
    assert_eq!(result.payload(), Some(&json!({ "a": 1 })));
}

#[rstest]
#[case(None, UnknownCause::MissingSchema)]
#[case(Some(json!({ "type": 12 })), UnknownCause::InvalidSchema)]
#[tokio::test]
async fn schema_defects_are_reported(#[case] schema: Option<Value>, #[case] cause: UnknownCause) {
    let pipeline = pipeline(vec![Stub::new("broken", Behavior::Echo).with_schema(schema)]);
    let result = run(&pipeline, "broken", json!({})).await;
    match result.detail() {
        Some(ToolErrorDetail::Unknown { cause: actual, .. }) => assert_eq!(*actual, cause),
        other => panic!("expected unknown detail, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_capability_is_reported() {
    let pipeline = pipeline(Vec::new());
    let result = run(&pipeline, "nope", json!({})).await;
    assert!(matches!(
        result.detail(),
        Some(ToolErrorDetail::Unknown { cause: UnknownCause::UnknownCapability, .. })
    ));
    assert!(result.message().unwrap_or_default().contains("nope"));
}

#[tokio::test]
async fn validation_collects_every_violation() {
    let schema = json!({
        "type": "object",
        "required": ["name", "count"],
        "properties": { "name": { "type": "string" }, "tags": { "type": "array" } }
    });
    let pipeline = pipeline(vec![Stub::new("strict", Behavior::Echo).with_schema(Some(schema))]);
    let result = run(&pipeline, "strict", json!({ "name": 3, "tags": "x" })).await;

    let Some(ToolErrorDetail::Validation { issues }) = result.detail() else {
        panic!("expected validation detail, got {result:?}");
    };
    let mut paths: Vec<&str> = issues.iter().map(|issue| issue.path.as_str()).collect();
    paths.sort_unstable();
    assert_eq!(paths, ["count", "name", "tags"]);
    let missing = issues.iter().find(|issue| issue.path == "count").expect("count issue");
    assert_eq!(missing.received.as_deref(), Some("missing"));
    let wrong = issues.iter().find(|issue| issue.path == "name").expect("name issue");
    assert_eq!(wrong.received.as_deref(), Some("number"));
}

#[tokio::test]
async fn timeouts_are_classified_and_marked() {
    let pipeline = pipeline(vec![
        Stub::new("slow", Behavior::Sleep(Duration::from_secs(10))).with_timeout(Duration::from_millis(30)),
    ]);
    let result = run(&pipeline, "slow", json!({})).await;
    assert_eq!(kind(&result), ErrorKind::Timeout);
    assert!(result.message().unwrap_or_default().contains("[timeout]"));
}

#[tokio::test]
async fn raised_errors_become_unknown() {
    let pipeline = pipeline(vec![Stub::new("raise", Behavior::Raise("socket closed"))]);
    let result = run(&pipeline, "raise", json!({})).await;
    assert!(matches!(
        result.detail(),
        Some(ToolErrorDetail::Unknown { cause: UnknownCause::Error, message }) if message.contains("socket closed")
    ));
}

#[tokio::test]
async fn cancellation_has_a_fixed_message() {
    let pipeline = pipeline(vec![Stub::new("wait", Behavior::UntilCancelled)]).with_augmented_messages(true);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = pipeline.run(&ToolCall::new("wait", json!({})), cancel).await.expect("report");
    assert_eq!(kind(&result), ErrorKind::Cancelled);
    assert_eq!(result.message(), Some("operation cancelled"));
}

#[tokio::test]
async fn augmentation_keeps_the_structured_detail() {
    let pipeline = pipeline(vec![Stub::new("raise", Behavior::Raise("boom"))]).with_augmented_messages(true);
    let result = run(&pipeline, "raise", json!({})).await;
    let message = result.message().unwrap_or_default();
    assert!(message.contains("boom"));
    assert!(message.contains("[unknown]"));
    assert!(matches!(result.detail(), Some(ToolErrorDetail::Unknown { .. })));
}

#[tokio::test]
async fn reporter_receives_every_terminal_result() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let pipeline = pipeline(vec![Stub::new("echo", Behavior::Echo)]).with_reporter(Arc::new(
        move |call: &ToolCall, result: &ToolResult| -> anyhow::Result<()> {
            sink.lock().unwrap().push((call.name.clone(), result.is_success()));
            Ok(())
        },
    ));
    run(&pipeline, "echo", json!({})).await;
    run(&pipeline, "missing", json!({})).await;
    assert_eq!(
        *seen.lock().unwrap(),
        [("echo".to_owned(), true), ("missing".to_owned(), false)]
    );
}

#[tokio::test]
async fn queue_runs_calls_after_a_timeout() {
    let pipeline = pipeline(vec![
        Stub::new("slow", Behavior::Sleep(Duration::from_secs(10))).with_timeout(Duration::from_millis(30)),
        Stub::new("echo", Behavior::Echo),
    ]);
    let queue = SerialQueue::new(Arc::new(pipeline));
    let slow = queue.enqueue(ToolCall::new("slow", json!({}))).expect("enqueue");
    let next = queue.enqueue(ToolCall::new("echo", json!({ "n": 2 }))).expect("enqueue");

    assert_eq!(kind(&slow.outcome().await.expect("slow")), ErrorKind::Timeout);
    assert!(next.outcome().await.expect("echo").is_success());
    queue.drain(Duration::from_secs(1)).await.expect("drained");
}

#[tokio::test]
async fn abort_cancels_only_the_running_call() {
    let pipeline = pipeline(vec![
        Stub::new("wait", Behavior::UntilCancelled),
        Stub::new("echo", Behavior::Echo),
    ]);
    let queue = SerialQueue::new(Arc::new(pipeline));
    assert!(!queue.abort_current());

    let waiting = queue.enqueue(ToolCall::new("wait", json!({}))).expect("enqueue");
    let queued = queue.enqueue(ToolCall::new("echo", json!({}))).expect("enqueue");
    wait_until_running(&queue).await;
    assert_eq!(queue.status().current.as_ref(), Some(waiting.call_id()));
    assert_eq!(queue.status().pending, 1);

    assert!(queue.abort_current());
    assert_eq!(waiting.outcome().await.expect("cancelled").message(), Some("operation cancelled"));
    assert!(queued.outcome().await.expect("echo").is_success());
}

#[tokio::test]
async fn drain_times_out_and_clear_pending_releases_handles() {
    let pipeline = pipeline(vec![Stub::new("wait", Behavior::UntilCancelled), Stub::new("echo", Behavior::Echo)]);
    let queue = SerialQueue::new(Arc::new(pipeline));
    let waiting = queue.enqueue(ToolCall::new("wait", json!({}))).expect("enqueue");
    let queued = queue.enqueue(ToolCall::new("echo", json!({}))).expect("enqueue");
    wait_until_running(&queue).await;

    match queue.drain(Duration::from_millis(30)).await {
        Err(QueueError::DrainTimeout { outstanding, .. }) => assert_eq!(outstanding, 2),
        other => panic!("expected drain timeout, got {other:?}"),
    }

    assert_eq!(queue.clear_pending(), 1);
    assert_eq!(queued.outcome().await, Err(QueueError::ClearedBeforeStart));
    queue.abort_current();
    waiting.outcome().await.expect("cancelled");
    queue.drain(Duration::from_secs(1)).await.expect("drained");
}

#[tokio::test]
async fn reporter_failure_halts_the_queue() {
    let pipeline = pipeline(vec![Stub::new("echo", Behavior::Echo)]).with_reporter(Arc::new(
        |_: &ToolCall, _: &ToolResult| -> anyhow::Result<()> { Err(anyhow::anyhow!("sink closed")) },
    ));
    let queue = SerialQueue::new(Arc::new(pipeline));

    let first = queue.call(ToolCall::new("echo", json!({}))).await;
    let Err(QueueError::Fatal(fatal)) = first else {
        panic!("expected fatal error, got {first:?}");
    };
    assert!(fatal.message.contains("sink closed"));
    assert!(fatal.result.is_success());

    assert!(queue.status().halted);
    assert_eq!(queue.fatal_error(), Some(fatal.clone()));
    assert!(matches!(queue.enqueue(ToolCall::new("echo", json!({}))), Err(QueueError::Halted(_))));
}

const DIAGRAM: &str = r#"<mxfile><diagram id="A"><cell id="s1" vertex="1" value="Start"/><cell id="e1" edge="1" source="s1" target="s2"/></diagram><diagram id="B"><cell id="s2" vertex="1"/></diagram></mxfile>"#;

struct Harness {
    host: Arc<MemoryHost>,
    feed: Arc<ChangeFeed>,
    queue: SerialQueue,
}

fn harness(text: &str) -> Harness {
    let host = Arc::new(MemoryHost::new(text));
    let feed = Arc::new(ChangeFeed::new());
    let coordinator = Arc::new(
        WriteBackCoordinator::new(host.clone(), feed.clone())
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(200)),
    );
    let mut registry = CapabilityRegistry::new();
    register_diagram_tools(&mut registry, coordinator, &EngineConfig::default());
    let queue = SerialQueue::new(Arc::new(ToolPipeline::new(registry)));
    Harness { host, feed, queue }
}

impl Harness {
    async fn call(&self, name: &str, input: Value) -> ToolResult {
        self.queue.call(ToolCall::new(name, input)).await.expect("queued call")
    }
}

#[tokio::test]
async fn read_lists_only_allowed_pages() {
    let h = harness(DIAGRAM);
    let result = h.call(READ_TOOL, json!({ "list": true, "page_filter": { "allowed_pages": ["A"] } })).await;
    let payload = result.payload().expect("payload");
    assert_eq!(payload["mode"], "list");
    assert_eq!(payload["pages"].as_array().map(Vec::len), Some(1));
    let cells = payload["cells"].as_array().expect("cells");
    assert_eq!(cells.len(), 2);
    assert_eq!(cells[0]["kind"], "vertex");
    assert_eq!(cells[0]["label"], "Start");
    assert_eq!(cells[1]["source"], "s1");
}

#[rstest]
#[case(false)]
#[case(true)]
#[tokio::test]
async fn read_by_query_respects_page_scope(#[case] strict: bool) {
    let h = harness(DIAGRAM);
    let input = json!({
        "id": "s2",
        "page_filter": { "allowed_pages": ["A"], "reject_foreign_pages": strict }
    });
    let result = h.call(READ_TOOL, input).await;
    if strict {
        assert_eq!(kind(&result), ErrorKind::PageFilter);
    } else {
        let payload = result.payload().expect("payload");
        assert_eq!(payload["matches"], json!([]));
        assert_eq!(payload["dropped"], 1);
    }
}

#[tokio::test]
async fn unknown_pages_are_rejected_before_selection() {
    let h = harness(DIAGRAM);
    let result = h.call(READ_TOOL, json!({ "id": "s1", "page_filter": { "allowed_pages": ["Z"] } })).await;
    assert!(matches!(
        result.detail(),
        Some(ToolErrorDetail::PageFilter { unknown_pages, .. }) if unknown_pages == &["Z".to_owned()]
    ));
}

#[tokio::test]
async fn bad_queries_are_query_failures() {
    let h = harness(DIAGRAM);
    let result = h.call(READ_TOOL, json!({ "xpath": "//cell[" })).await;
    assert!(matches!(
        result.detail(),
        Some(ToolErrorDetail::Query { query, .. }) if query == "//cell["
    ));
}

#[tokio::test]
async fn edit_batch_failure_leaves_document_untouched() {
    let h = harness(DIAGRAM);
    let input = json!({
        "operations": [
            { "type": "set_attribute", "id": "s1", "key": "value", "value": "Begin" },
            { "type": "remove_element", "id": "missing" }
        ]
    });
    let result = h.call(EDIT_BATCH_TOOL, input).await;
    match result.detail() {
        Some(ToolErrorDetail::StructuralOperation { operation, .. }) => {
            assert_eq!(operation.operation_index, 1);
            assert_eq!(operation.operation_count, 2);
        }
        other => panic!("expected structural failure, got {other:?}"),
    }
    assert_eq!(h.host.text(), DIAGRAM);
}

#[tokio::test]
async fn edit_batch_reports_decode_issues_as_validation() {
    let h = harness(DIAGRAM);
    let result = h.call(EDIT_BATCH_TOOL, json!({ "operations": [{ "type": "set_attribute", "id": "s1" }] })).await;
    let Some(ToolErrorDetail::Validation { issues }) = result.detail() else {
        panic!("expected validation detail, got {result:?}");
    };
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].path, "operations[0].key");
}

#[tokio::test]
async fn edit_batch_schema_violations_are_collected() {
    let h = harness(DIAGRAM);
    let result = h.call(EDIT_BATCH_TOOL, json!({ "operations": [{ "type": "explode" }, { "id": 3 }] })).await;
    let Some(ToolErrorDetail::Validation { issues }) = result.detail() else {
        panic!("expected validation detail, got {result:?}");
    };
    assert!(issues.len() >= 3, "{issues:?}");
    assert!(issues.iter().any(|issue| issue.path == "operations[1].type"));
    assert!(issues.iter().any(|issue| issue.path == "operations[1].id"));
}

#[tokio::test]
async fn rejected_edit_rolls_back() {
    let h = harness(DIAGRAM);
    let mut changes = h.feed.subscribe();
    let feed = Arc::clone(&h.feed);
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            if !change.is_rollback {
                feed.resolve(&change.request_id, Verdict::Rejected { reason: "cannot render".to_owned() });
            }
        }
    });

    let input = json!({ "operations": [{ "type": "set_attribute", "id": "s1", "key": "value", "value": "X" }] });
    let result = h.call(EDIT_BATCH_TOOL, input).await;
    assert!(matches!(
        result.detail(),
        Some(ToolErrorDetail::WriteBack { rollback: RollbackStatus::Succeeded, .. })
    ));
    assert_eq!(h.host.text(), DIAGRAM);
}

#[tokio::test]
async fn abort_during_verdict_wait_still_rolls_back() {
    let h = harness(DIAGRAM);
    let mut changes = h.feed.subscribe();
    let feed = Arc::clone(&h.feed);
    let validator = tokio::spawn(async move {
        let change = changes.recv().await.expect("change");
        tokio::time::sleep(Duration::from_millis(100)).await;
        feed.resolve(&change.request_id, Verdict::Rejected { reason: "cannot render".to_owned() })
    });

    let input = json!({ "operations": [{ "type": "set_attribute", "id": "s1", "key": "value", "value": "X" }] });
    let handle = h.queue.enqueue(ToolCall::new(EDIT_BATCH_TOOL, input)).expect("enqueue");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.queue.abort_current());

    let result = handle.outcome().await.expect("edit");
    assert!(validator.await.expect("validator"), "verdict was not delivered");
    assert!(matches!(
        result.detail(),
        Some(ToolErrorDetail::WriteBack { rollback: RollbackStatus::Succeeded, .. })
    ));
    assert_eq!(h.host.text(), DIAGRAM);
    assert_eq!(h.feed.pending(), 0);
}

#[tokio::test]
async fn abort_before_commit_cancels_the_edit() {
    let h = harness(DIAGRAM);
    h.host.set_delay(Duration::from_millis(100));
    let input = json!({ "operations": [{ "type": "set_attribute", "id": "s1", "key": "value", "value": "X" }] });
    let handle = h.queue.enqueue(ToolCall::new(EDIT_BATCH_TOOL, input)).expect("enqueue");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.queue.abort_current());

    let result = handle.outcome().await.expect("edit");
    assert_eq!(kind(&result), ErrorKind::Cancelled);
    h.queue.drain(Duration::from_secs(1)).await.expect("drained");
    assert_eq!(h.host.text(), DIAGRAM);
}

#[tokio::test]
async fn queued_edits_apply_in_enqueue_order() {
    let h = harness(DIAGRAM);
    h.host.set_delay(Duration::from_millis(5));
    let handles: Vec<_> = (1..=3)
        .map(|n| {
            let input = json!({
                "operations": [{ "type": "insert_element", "id": "A", "new_xml": format!("<m id=\"m{n}\"/>") }]
            });
            h.queue.enqueue(ToolCall::new(EDIT_BATCH_TOOL, input)).expect("enqueue")
        })
        .collect();
    for handle in handles {
        assert!(handle.outcome().await.expect("edit").is_success());
    }
    h.queue.drain(Duration::from_secs(1)).await.expect("drained");

    let text = h.host.text();
    let positions: Vec<usize> = ["m1", "m2", "m3"]
        .iter()
        .map(|marker| text.find(&format!("id=\"{marker}\"")).expect("marker"))
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{text}");
}
