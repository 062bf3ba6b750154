// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Built-in capabilities: `diagram.read` and `diagram.edit_batch`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Capability, CapabilityRegistry};
use crate::batch::{self, BatchRequest};
use crate::config::EngineConfig;
use crate::error::{ToolErrorDetail, ToolResult, ValidationIssue};
use crate::model::{Document, PageIndex, PageInfo};
use crate::ops::{decode_operations, OperationParams};
use crate::query::{describe_match, list_cells, resolve, CellInfo, Locator, MatchInfo, PageFilter};
use crate::store::{with_host_timeout, DocumentHost, WriteBackCoordinator};

pub const READ_TOOL: &str = "diagram.read";
pub const EDIT_BATCH_TOOL: &str = "diagram.edit_batch";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReadParams {
    /// Stable element identifier. Takes precedence over `xpath`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Query expression to evaluate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    /// List every identified cell instead of running a query.
    #[serde(default)]
    pub list: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_filter: Option<PageFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReadOutput {
    Query {
        query: String,
        matches: Vec<MatchInfo>,
        /// Matches hidden by the page filter.
        dropped: usize,
    },
    List {
        pages: Vec<PageInfo>,
        cells: Vec<CellInfo>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EditBatchParams {
    /// Applied in order, all or nothing.
    pub operations: Vec<OperationParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_filter: Option<PageFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EditBatchOutput {
    pub operations_applied: usize,
    /// False when every operation was a no-op and nothing was written.
    pub changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

fn schema_value<T: JsonSchema>() -> Option<Value> {
    serde_json::to_value(schemars::schema_for!(T)).ok()
}

fn decode_input<T: for<'de> Deserialize<'de>>(input: Value) -> Result<T, ToolResult> {
    serde_json::from_value(input).map_err(|err| {
        ToolResult::failure(ToolErrorDetail::Validation {
            issues: vec![ValidationIssue::new("", err.to_string())],
        })
    })
}

/// Checks a declared page filter against the pages that actually exist.
fn check_pages(
    host: &dyn DocumentHost,
    text: &str,
    filter: Option<&PageFilter>,
) -> Result<(), ToolErrorDetail> {
    let Some(filter) = filter.filter(|f| f.allowed_pages.is_some() && !f.bypass) else {
        return Ok(());
    };
    let pages = host.list_pages(text).map_err(|err| ToolErrorDetail::from(&err))?;
    filter.validate_against(&pages).map_err(|err| ToolErrorDetail::from(&err))
}

pub struct DiagramRead {
    host: Arc<dyn DocumentHost>,
    timeout: Duration,
    host_io_timeout: Duration,
}

impl DiagramRead {
    pub fn new(host: Arc<dyn DocumentHost>, timeout: Duration, host_io_timeout: Duration) -> Self {
        Self { host, timeout, host_io_timeout }
    }

    async fn read(&self, params: ReadParams) -> Result<ReadOutput, ToolErrorDetail> {
        let text = with_host_timeout("read", self.host_io_timeout, self.host.current_document_text())
            .await
            .map_err(|err| ToolErrorDetail::from(&err))?;
        let doc = Document::parse(&text).map_err(|err| ToolErrorDetail::from(&err))?;
        let filter = params.page_filter.as_ref();
        check_pages(self.host.as_ref(), &text, filter)?;

        if params.list {
            let pages = PageIndex::build(&doc)
                .into_pages()
                .into_iter()
                .filter(|page| {
                    filter
                        .filter(|f| f.is_active())
                        .and_then(|f| f.allowed_pages.as_ref())
                        .map_or(true, |allowed| allowed.contains(&page.id))
                })
                .collect();
            return Ok(ReadOutput::List { pages, cells: list_cells(&doc, filter) });
        }

        let locator = Locator::from_parts(params.id.as_deref(), params.xpath.as_deref()).map_err(|err| {
            ToolErrorDetail::Validation { issues: vec![ValidationIssue::new("id", err.to_string())] }
        })?;
        let selection = resolve(&doc, &locator, filter).map_err(|err| ToolErrorDetail::from(&err))?;
        let index = PageIndex::build(&doc);
        let matches = selection.nodes.iter().map(|found| describe_match(&doc, &index, found)).collect();
        Ok(ReadOutput::Query { query: selection.query, matches, dropped: selection.dropped })
    }
}

#[async_trait]
impl Capability for DiagramRead {
    fn name(&self) -> &str {
        READ_TOOL
    }

    fn description(&self) -> &str {
        "Query the diagram by id or xpath, or list its pages and cells."
    }

    fn input_schema(&self) -> Option<Value> {
        schema_value::<ReadParams>()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, input: Value, _cancel: CancellationToken) -> anyhow::Result<ToolResult> {
        let params = match decode_input::<ReadParams>(input) {
            Ok(params) => params,
            Err(failure) => return Ok(failure),
        };
        Ok(match self.read(params).await {
            Ok(output) => ToolResult::success(output),
            Err(detail) => ToolResult::failure(detail),
        })
    }
}

pub struct DiagramEditBatch {
    coordinator: Arc<WriteBackCoordinator>,
    timeout: Duration,
}

impl DiagramEditBatch {
    pub fn new(coordinator: Arc<WriteBackCoordinator>, timeout: Duration) -> Self {
        Self { coordinator, timeout }
    }

    async fn edit(
        &self,
        params: EditBatchParams,
        cancel: &CancellationToken,
    ) -> Result<EditBatchOutput, ToolErrorDetail> {
        let operations =
            decode_operations(&params.operations).map_err(|issues| ToolErrorDetail::Validation { issues })?;
        let request = BatchRequest {
            operations,
            description: params.description,
            page_filter: params.page_filter,
        };

        let host = self.coordinator.host();
        let fetch = with_host_timeout("read", self.coordinator.host_io_timeout(), host.current_document_text());
        let text = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(ToolErrorDetail::Cancelled { capability: EDIT_BATCH_TOOL.to_owned() });
            }
            fetched = fetch => fetched.map_err(|err| ToolErrorDetail::from(&err))?,
        };
        if !request.operations.is_empty() {
            check_pages(host.as_ref(), &text, request.page_filter.as_ref())?;
        }

        // Cancellation stops here. A started commit settles, including any rollback.
        if cancel.is_cancelled() {
            return Err(ToolErrorDetail::Cancelled { capability: EDIT_BATCH_TOOL.to_owned() });
        }

        let report = batch::run(&self.coordinator, &request, &text)
            .await
            .map_err(|err| ToolErrorDetail::from(&err))?;
        debug!(applied = report.operations_applied, changed = report.changed, "edit batch finished");
        Ok(EditBatchOutput {
            operations_applied: report.operations_applied,
            changed: report.changed,
            request_id: report.request_id.map(|id| id.into_string()),
        })
    }
}

#[async_trait]
impl Capability for DiagramEditBatch {
    fn name(&self) -> &str {
        EDIT_BATCH_TOOL
    }

    fn description(&self) -> &str {
        "Apply an ordered list of structural edits to the diagram atomically."
    }

    fn input_schema(&self) -> Option<Value> {
        schema_value::<EditBatchParams>()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn observes_cancellation(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, cancel: CancellationToken) -> anyhow::Result<ToolResult> {
        let params = match decode_input::<EditBatchParams>(input) {
            Ok(params) => params,
            Err(failure) => return Ok(failure),
        };
        Ok(match self.edit(params, &cancel).await {
            Ok(output) => ToolResult::success(output),
            Err(detail) => ToolResult::failure(detail),
        })
    }
}

/// Registers both diagram capabilities with the timeouts from `config`.
pub fn register_diagram_tools(
    registry: &mut CapabilityRegistry,
    coordinator: Arc<WriteBackCoordinator>,
    config: &EngineConfig,
) {
    let host = Arc::clone(coordinator.host());
    registry.register(Arc::new(DiagramRead::new(host, config.read_timeout(), config.host_io_timeout())));
    registry.register(Arc::new(DiagramEditBatch::new(coordinator, config.edit_timeout())));
}
