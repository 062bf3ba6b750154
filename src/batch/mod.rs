// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Batch Transaction Runner.
//!
//! A batch is parsed once into a private tree, every operation is applied in order, and only a
//! fully successful batch is serialized and handed to the write-back coordinator. On the first
//! failing operation the tree is dropped, so the persisted document is untouched.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::model::{Document, DocumentError, RequestId};
use crate::ops::{apply_operation, OpError, Operation, OperationContext};
use crate::query::PageFilter;
use crate::store::{WriteBackCoordinator, WriteBackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Parsing,
    Applying(usize),
    Serializing,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchRequest {
    pub operations: Vec<Operation>,
    pub description: Option<String>,
    pub page_filter: Option<PageFilter>,
}

impl BatchRequest {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations, ..Self::default() }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_page_filter(mut self, filter: PageFilter) -> Self {
        self.page_filter = Some(filter);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("cannot parse the current document: {0}")]
    Parse(DocumentError),
    #[error(transparent)]
    Operation(OpError),
    #[error(transparent)]
    WriteBack(#[from] WriteBackError),
}

/// A batch that applied cleanly in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBatch {
    pub operations_applied: usize,
    /// Serialized tree, or `None` when no operation changed anything.
    pub new_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub operations_applied: usize,
    pub changed: bool,
    pub request_id: Option<RequestId>,
    pub new_text: Option<String>,
}

/// Tracks and logs the runner's phase transitions.
#[derive(Debug)]
struct PhaseTracker {
    phase: BatchPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self { phase: BatchPhase::Idle }
    }

    fn enter(&mut self, next: BatchPhase) {
        debug!(from = ?self.phase, to = ?next, "batch.phase");
        self.phase = next;
    }
}

/// Applies the batch to a private copy of `current_text` without touching any persisted state.
pub fn prepare(request: &BatchRequest, current_text: &str) -> Result<PreparedBatch, BatchError> {
    let mut phases = PhaseTracker::new();
    let prepared = prepare_tracked(&mut phases, request, current_text);
    if prepared.is_err() {
        phases.enter(BatchPhase::RolledBack);
    }
    prepared
}

fn prepare_tracked(
    phases: &mut PhaseTracker,
    request: &BatchRequest,
    current_text: &str,
) -> Result<PreparedBatch, BatchError> {
    if request.operations.is_empty() {
        return Ok(PreparedBatch { operations_applied: 0, new_text: None });
    }

    phases.enter(BatchPhase::Parsing);
    let mut doc = Document::parse(current_text).map_err(BatchError::Parse)?;

    let filter = request.page_filter.as_ref().map(PageFilter::for_mutation);
    let count = request.operations.len();
    let mut mutations = 0;
    for (index, op) in request.operations.iter().enumerate() {
        phases.enter(BatchPhase::Applying(index));
        mutations += apply_operation(&mut doc, op, filter.as_ref()).map_err(|error| {
            let err = OpError { context: OperationContext::new(index, count, op), error };
            warn!(operation_index = index, operation_count = count, error = %err, "batch operation failed");
            BatchError::Operation(err)
        })?;
    }

    if mutations == 0 {
        debug!(operations = count, "batch changed nothing");
        return Ok(PreparedBatch { operations_applied: count, new_text: None });
    }

    phases.enter(BatchPhase::Serializing);
    Ok(PreparedBatch { operations_applied: count, new_text: Some(doc.to_xml()) })
}

/// Runs the batch against `current_text` and commits the result through `coordinator`.
///
/// Once the commit starts it runs to completion on its own task, so a caller that stops waiting
/// cannot leave a persisted but unverified document behind.
pub async fn run(
    coordinator: &Arc<WriteBackCoordinator>,
    request: &BatchRequest,
    current_text: &str,
) -> Result<BatchReport, BatchError> {
    info!(
        operations = request.operations.len(),
        description = request.description.as_deref().unwrap_or(""),
        "batch.start"
    );
    let prepared = prepare(request, current_text)?;

    let Some(new_text) = prepared.new_text else {
        return Ok(BatchReport {
            operations_applied: prepared.operations_applied,
            changed: false,
            request_id: None,
            new_text: None,
        });
    };

    let receipt = coordinator
        .commit_detached(new_text, current_text.to_owned(), request.description.clone())
        .await?;
    debug!(to = ?BatchPhase::Committed, request_id = %receipt.request_id, "batch.phase");
    Ok(BatchReport {
        operations_applied: prepared.operations_applied,
        changed: true,
        request_id: Some(receipt.request_id),
        new_text: Some(receipt.text),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{prepare, BatchError, BatchRequest};
    use crate::ops::{Edit, Operation};
    use crate::query::Locator;

    const DOC: &str = r#"<doc><page id="p1"><shape id="s1" c="1"/></page></doc>"#;

    fn set(id: &str, value: &str) -> Operation {
        Operation::new(
            Locator::Id(id.to_owned()),
            Edit::SetAttribute { key: "c".to_owned(), value: value.to_owned() },
        )
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let prepared = prepare(&BatchRequest::default(), "not even xml").expect("empty");
        assert_eq!(prepared.operations_applied, 0);
        assert!(prepared.new_text.is_none());
    }

    #[test]
    fn applies_in_order() {
        let request = BatchRequest::new(vec![set("s1", "2"), set("s1", "3")]);
        let prepared = prepare(&request, DOC).expect("prepare");
        assert_eq!(prepared.operations_applied, 2);
        let text = prepared.new_text.expect("changed");
        assert!(text.contains(r#"c="3""#));
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    fn failure_reports_zero_based_index(#[case] failing: usize) {
        let mut operations = vec![set("s1", "2"), set("s1", "3"), set("s1", "4")];
        operations[failing] = set("missing", "9");
        let err = prepare(&BatchRequest::new(operations), DOC).unwrap_err();
        let BatchError::Operation(err) = err else {
            panic!("expected operation error");
        };
        assert_eq!(err.context.operation_index, failing);
        assert_eq!(err.context.operation_count, 3);
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = prepare(&BatchRequest::new(vec![set("s1", "2")]), "<doc>").unwrap_err();
        assert!(matches!(err, BatchError::Parse(_)));
    }

    #[test]
    fn unmatched_allowed_operations_change_nothing() {
        let request = BatchRequest::new(vec![set("missing", "2").allowing_no_match()]);
        let prepared = prepare(&request, DOC).expect("prepare");
        assert_eq!(prepared.operations_applied, 1);
        assert!(prepared.new_text.is_none());
    }
}
