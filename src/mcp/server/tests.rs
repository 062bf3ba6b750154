// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeSet;
use std::sync::Arc;

use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::ErrorCode;
use serde_json::json;

use super::ProteusMcp;
use crate::config::EngineConfig;
use crate::ops::{OpKind, OperationParams};
use crate::store::{ChangeFeed, MemoryHost, WriteBackCoordinator};
use crate::tools::{
    register_diagram_tools, CapabilityRegistry, EditBatchParams, ReadParams, SerialQueue,
    ToolPipeline,
};

const DOC: &str = r#"<doc><page id="p1"><shape id="s1" c="1"/></page></doc>"#;

fn server(host: &Arc<MemoryHost>) -> ProteusMcp {
    let coordinator = Arc::new(WriteBackCoordinator::new(host.clone(), Arc::new(ChangeFeed::new())));
    let mut registry = CapabilityRegistry::new();
    register_diagram_tools(&mut registry, coordinator, &EngineConfig::default());
    ProteusMcp::new(Arc::new(SerialQueue::new(Arc::new(ToolPipeline::new(registry)))))
}

fn set_c(id: &str, value: &str) -> OperationParams {
    let mut op = OperationParams::new(OpKind::SetAttribute);
    op.id = Some(id.to_owned());
    op.key = Some("c".to_owned());
    op.value = Some(value.to_owned());
    op
}

#[test]
fn tools_advertise_descriptions_and_object_schemas() {
    let tools = ProteusMcp::tool_router().list_all();
    let names: BTreeSet<String> = tools.iter().map(|tool| tool.name.to_string()).collect();
    assert_eq!(names, BTreeSet::from(["diagram.edit_batch".to_owned(), "diagram.read".to_owned()]));

    for tool in tools {
        assert!(tool.description.as_deref().is_some_and(|desc| !desc.trim().is_empty()));
        assert_eq!(tool.input_schema.get("type").and_then(|v| v.as_str()), Some("object"));
    }
}

#[tokio::test]
async fn edit_batch_then_read_back() {
    let host = Arc::new(MemoryHost::new(DOC));
    let server = server(&host);

    let params = EditBatchParams { operations: vec![set_c("s1", "2")], ..EditBatchParams::default() };
    let result = server.diagram_edit_batch(Parameters(params)).await.expect("edit");
    let payload = result.structured_content.expect("structured");
    assert_eq!(payload["operations_applied"], 1);
    assert_eq!(payload["changed"], true);
    assert!(host.text().contains(r#"c="2""#));

    let read = ReadParams { id: Some("s1".to_owned()), ..ReadParams::default() };
    let result = server.diagram_read(Parameters(read)).await.expect("read");
    let payload = result.structured_content.expect("structured");
    assert_eq!(payload["mode"], "query");
    assert_eq!(payload["matches"][0]["page"], "p1");
}

#[tokio::test]
async fn failures_carry_the_structured_detail() {
    let host = Arc::new(MemoryHost::new(DOC));
    let server = server(&host);

    let params = EditBatchParams { operations: vec![set_c("missing", "3")], ..EditBatchParams::default() };
    let err = server.diagram_edit_batch(Parameters(params)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    let data = err.data.expect("error data");
    assert_eq!(data["kind"], "structural_operation");
    assert_eq!(data["detail"]["operation_index"], 0);
    assert_eq!(data["detail"]["locator"], json!("//*[@id='missing']"));
    assert_eq!(host.text(), DOC);
}
