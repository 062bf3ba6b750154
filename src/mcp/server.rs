// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler, ServiceExt};
use serde::Serialize;
use tracing::debug;

use crate::error::ToolResult;
use crate::tools::{
    EditBatchParams, QueueError, ReadParams, SerialQueue, ToolCall, EDIT_BATCH_TOOL, READ_TOOL,
};

use super::types::McpFailure;

#[derive(Clone)]
pub struct ProteusMcp {
    queue: Arc<SerialQueue>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ProteusMcp {
    pub fn new(queue: Arc<SerialQueue>) -> Self {
        Self { queue, tool_router: Self::tool_router() }
    }

    pub fn queue(&self) -> &Arc<SerialQueue> {
        &self.queue
    }

    pub async fn serve_stdio(self) -> Result<(), rmcp::RmcpError> {
        let service = self.serve((tokio::io::stdin(), tokio::io::stdout())).await?;
        service.waiting().await?;
        Ok(())
    }

    #[tool(
        name = "diagram.read",
        description = "Query the diagram by element id or xpath, or list its pages and cells (list: true). An optional page_filter scopes the result."
    )]
    async fn diagram_read(&self, params: Parameters<ReadParams>) -> Result<CallToolResult, ErrorData> {
        self.dispatch(READ_TOOL, &params.0).await
    }

    #[tool(
        name = "diagram.edit_batch",
        description = "Apply an ordered list of edits atomically: set_attribute, remove_attribute, insert_element, remove_element, replace_element, set_text_content. Either every operation is applied or none is."
    )]
    async fn diagram_edit_batch(
        &self,
        params: Parameters<EditBatchParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.dispatch(EDIT_BATCH_TOOL, &params.0).await
    }
}

impl ProteusMcp {
    async fn dispatch<P: Serialize>(&self, name: &str, params: &P) -> Result<CallToolResult, ErrorData> {
        let input = serde_json::to_value(params).map_err(|err| {
            ErrorData::invalid_params(format!("failed to encode {name} params: {err}"), None)
        })?;
        let call = ToolCall::new(name, input);
        debug!(call_id = %call.id, capability = name, "mcp call");

        match self.queue.call(call).await {
            Ok(ToolResult::Success { payload }) => Ok(CallToolResult::structured(payload)),
            Ok(ToolResult::Failure { message, detail }) => Err(failure_error(McpFailure::new(message, detail))),
            Err(err) => Err(queue_error(&err)),
        }
    }
}

fn failure_error(failure: McpFailure) -> ErrorData {
    let data = serde_json::to_value(&failure).ok();
    ErrorData::new(failure.code(), failure.message, data)
}

fn queue_error(err: &QueueError) -> ErrorData {
    let data = match err {
        QueueError::Fatal(fatal) | QueueError::Halted(fatal) => {
            Some(serde_json::json!({ "fatal": true, "call_id": fatal.call_id.as_str() }))
        }
        _ => None,
    };
    ErrorData::internal_error(err.to_string(), data)
}

#[tool_handler]
impl ServerHandler for ProteusMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Proteus diagram edit server (tools: diagram.read, diagram.edit_batch). Read before editing; batches are atomic."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests;
