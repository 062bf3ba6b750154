// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Tool Execution Pipeline, capability registry and the serial execution queue.
//!
//! Every capability, built-in or not, is invoked through [`ToolPipeline::run`], which validates
//! the call, runs it under a timeout and cancellation token, and normalizes the outcome into a
//! [`ToolResult`]. [`SerialQueue`] keeps at most one pipeline run in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ToolResult;
use crate::model::CallId;

pub mod diagram;
mod pipeline;
mod queue;

pub use diagram::{
    register_diagram_tools, DiagramEditBatch, DiagramRead, EditBatchOutput, EditBatchParams,
    ReadOutput, ReadParams, EDIT_BATCH_TOOL, READ_TOOL,
};
pub use pipeline::{FatalReportError, PipelineStage, ResultReporter, ToolPipeline};
pub use queue::{QueueError, QueueStatus, SerialQueue, TaskHandle};

/// A named operation callable through the pipeline.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema for the raw input. A capability without one cannot be executed.
    fn input_schema(&self) -> Option<Value>;

    fn timeout(&self) -> Duration;

    fn is_executable(&self) -> bool {
        true
    }

    /// Whether the capability watches its cancellation token itself. The pipeline then lets it
    /// settle instead of dropping it when the token fires.
    fn observes_cancellation(&self) -> bool {
        false
    }

    /// Runs the capability. Structured failures are returned as [`ToolResult::Failure`]; an `Err`
    /// is reserved for failures the capability could not classify.
    async fn execute(&self, input: Value, cancel: CancellationToken) -> anyhow::Result<ToolResult>;
}

pub(crate) enum SchemaState {
    Missing,
    Invalid(String),
    Ready(jsonschema::Validator),
}

pub(crate) struct Registered {
    pub(crate) capability: Arc<dyn Capability>,
    pub(crate) schema: SchemaState,
}

/// Capabilities by name, in registration order. Schemas are compiled once at registration.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: IndexMap<String, Registered>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `capability`, replacing any previous one with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let schema = match capability.input_schema() {
            None => SchemaState::Missing,
            Some(schema) => match jsonschema::validator_for(&schema) {
                Ok(validator) => SchemaState::Ready(validator),
                Err(err) => SchemaState::Invalid(err.to_string()),
            },
        };
        self.entries.insert(capability.name().to_owned(), Registered { capability, schema });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Registered> {
        self.entries.get(name)
    }
}

/// One invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: CallId,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self { id: CallId::generate(), name: name.into(), input }
    }
}

#[cfg(test)]
mod tests;
