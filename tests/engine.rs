// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! End-to-end behaviour of the public engine API.

use std::sync::Arc;
use std::time::Duration;

use proteus::batch::{self, BatchError, BatchRequest};
use proteus::config::EngineConfig;
use proteus::error::{ErrorKind, ToolErrorDetail};
use proteus::model::Document;
use proteus::ops::{Edit, InsertPosition, Operation};
use proteus::query::{id_query, resolve, Locator};
use proteus::store::{ChangeFeed, MemoryHost, WriteBackCoordinator};
use proteus::tools::{
    register_diagram_tools, CapabilityRegistry, SerialQueue, ToolCall, ToolPipeline, EDIT_BATCH_TOOL,
};
use rstest::rstest;
use serde_json::json;

const SCENARIO: &str = r#"<doc><page id="p1"><shape id="s1" c="1"/></page></doc>"#;

fn coordinator(host: &Arc<MemoryHost>) -> Arc<WriteBackCoordinator> {
    Arc::new(
        WriteBackCoordinator::new(host.clone(), Arc::new(ChangeFeed::new()))
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(100)),
    )
}

fn set_c(id: &str, value: &str) -> Operation {
    Operation::new(Locator::Id(id.to_owned()), Edit::SetAttribute { key: "c".to_owned(), value: value.to_owned() })
}

#[tokio::test]
async fn scenario_edit_then_missing_target() {
    let host = Arc::new(MemoryHost::new(SCENARIO));
    let coordinator = coordinator(&host);

    let report = batch::run(&coordinator, &BatchRequest::new(vec![set_c("s1", "2")]), &host.text())
        .await
        .expect("first batch");
    assert_eq!(report.operations_applied, 1);
    assert!(host.text().contains(r#"<shape id="s1" c="2"/>"#));

    let after_first = host.text();
    let err = batch::run(&coordinator, &BatchRequest::new(vec![set_c("missing", "3")]), &after_first)
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::Operation(_)));
    assert_eq!(ToolErrorDetail::from(&err).kind(), ErrorKind::StructuralOperation);
    assert_eq!(host.text(), after_first);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[tokio::test]
async fn failing_operation_k_leaves_document_untouched(#[case] k: usize) {
    let host = Arc::new(MemoryHost::new(SCENARIO));
    let coordinator = coordinator(&host);

    let mut operations: Vec<Operation> = (0..3).map(|n| set_c("s1", &format!("v{n}"))).collect();
    operations[k - 1] = Operation::new(Locator::Id("ghost".to_owned()), Edit::RemoveElement);

    let err = batch::run(&coordinator, &BatchRequest::new(operations), SCENARIO).await.unwrap_err();
    let BatchError::Operation(op_err) = &err else {
        panic!("expected operation failure, got {err:?}");
    };
    assert_eq!(op_err.context.operation_index, k - 1);
    assert_eq!(host.text(), SCENARIO);
    assert!(host.writes().is_empty());
}

#[rstest]
#[case("s1")]
#[case("it's")]
#[case(r#"say "it's""#)]
fn identifier_and_canonical_query_select_the_same_nodes(#[case] id: &str) {
    let mut doc = Document::parse(SCENARIO).expect("parse");
    let tag = Operation::new(
        Locator::Id("s1".to_owned()),
        Edit::SetAttribute { key: "id".to_owned(), value: id.to_owned() },
    );
    proteus::ops::apply_operation(&mut doc, &tag, None).expect("retag");

    let by_id = resolve(&doc, &Locator::Id(id.to_owned()), None).expect("by id");
    let by_query = resolve(&doc, &Locator::Query(id_query(id)), None).expect("by query");
    assert_eq!(by_id.nodes.len(), 1);
    assert_eq!(by_id.nodes, by_query.nodes);
}

#[tokio::test]
async fn no_match_batches_are_byte_identical_no_ops() {
    let host = Arc::new(MemoryHost::new(SCENARIO));
    let coordinator = coordinator(&host);
    let mut registry = CapabilityRegistry::new();
    register_diagram_tools(&mut registry, coordinator, &EngineConfig::default());
    let queue = SerialQueue::new(Arc::new(ToolPipeline::new(registry)));

    let input = json!({
        "operations": [
            { "type": "remove_element", "id": "nothing", "allow_no_match": true },
            { "type": "insert_element", "xpath": "//absent", "new_xml": "<x/>", "allow_no_match": true }
        ]
    });
    for _ in 0..2 {
        let result = queue.call(ToolCall::new(EDIT_BATCH_TOOL, input.clone())).await.expect("call");
        let payload = result.payload().expect("success");
        assert_eq!(payload["operations_applied"], 2);
        assert_eq!(payload["changed"], false);
    }
    assert_eq!(host.text(), SCENARIO);
    assert!(host.writes().is_empty());
}

#[tokio::test]
async fn insert_positions_compose_in_one_batch() {
    let host = Arc::new(MemoryHost::new(SCENARIO));
    let coordinator = coordinator(&host);
    let insert = |position, xml: &str| {
        Operation::new(
            Locator::Id("s1".to_owned()),
            Edit::InsertElement { new_xml: xml.to_owned(), position },
        )
    };
    let request = BatchRequest::new(vec![
        insert(InsertPosition::Before, r#"<a id="a"/>"#),
        insert(InsertPosition::After, r#"<b id="b"/>"#),
        insert(InsertPosition::Append, r#"<label>hi</label>"#),
    ])
    .with_description("compose");

    batch::run(&coordinator, &request, SCENARIO).await.expect("batch");
    assert_eq!(
        host.text(),
        r#"<doc><page id="p1"><a id="a"/><shape id="s1" c="1"><label>hi</label></shape><b id="b"/></page></doc>"#
    );
}
