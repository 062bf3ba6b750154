// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CapabilityRegistry, Registered, SchemaState, ToolCall};
use crate::error::{ToolErrorDetail, ToolResult, UnknownCause, ValidationIssue};
use crate::model::CallId;
use crate::store::millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Requested,
    ValidatingExistence,
    ValidatingSchema,
    ValidatingInput,
    Executing,
    Succeeded,
    FailedReported,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::ValidatingExistence => "validating_existence",
            Self::ValidatingSchema => "validating_schema",
            Self::ValidatingInput => "validating_input",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::FailedReported => "failed_reported",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedReported)
    }
}

/// Receives the terminal result of every pipeline run.
pub trait ResultReporter: Send + Sync {
    fn report(&self, call: &ToolCall, result: &ToolResult) -> anyhow::Result<()>;
}

impl<F> ResultReporter for F
where
    F: Fn(&ToolCall, &ToolResult) -> anyhow::Result<()> + Send + Sync,
{
    fn report(&self, call: &ToolCall, result: &ToolResult) -> anyhow::Result<()> {
        self(call, result)
    }
}

/// The result of a call could not be delivered. Callers have lost track of the outcome, so this
/// is never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to report the result of {capability} ({call_id}): {message}")]
pub struct FatalReportError {
    pub call_id: CallId,
    pub capability: String,
    pub message: String,
    /// The result that could not be delivered.
    pub result: ToolResult,
}

struct StageLog<'a> {
    call: &'a ToolCall,
    stage: PipelineStage,
}

impl<'a> StageLog<'a> {
    fn new(call: &'a ToolCall) -> Self {
        debug!(call_id = %call.id, capability = %call.name, stage = PipelineStage::Requested.as_str(), "tool.stage");
        Self { call, stage: PipelineStage::Requested }
    }

    fn enter(&mut self, next: PipelineStage) {
        debug!(
            call_id = %self.call.id,
            capability = %self.call.name,
            from = self.stage.as_str(),
            stage = next.as_str(),
            "tool.stage"
        );
        self.stage = next;
    }
}

pub struct ToolPipeline {
    registry: CapabilityRegistry,
    reporter: Option<Arc<dyn ResultReporter>>,
    augment_messages: bool,
}

impl ToolPipeline {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry, reporter: None, augment_messages: true }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ResultReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_augmented_messages(mut self, augment: bool) -> Self {
        self.augment_messages = augment;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Runs one call to a terminal state and reports it.
    ///
    /// Every tool-level failure comes back as `Ok(ToolResult::Failure)`; `Err` only means the
    /// reporter itself failed.
    pub async fn run(
        &self,
        call: &ToolCall,
        cancel: CancellationToken,
    ) -> Result<ToolResult, FatalReportError> {
        let mut stages = StageLog::new(call);
        let mut result = self.evaluate(call, cancel, &mut stages).await;

        if self.augment_messages && !matches!(result.detail(), Some(ToolErrorDetail::Cancelled { .. })) {
            result = result.augmented();
        }
        stages.enter(if result.is_success() {
            PipelineStage::Succeeded
        } else {
            PipelineStage::FailedReported
        });

        if let Some(reporter) = &self.reporter {
            if let Err(err) = reporter.report(call, &result) {
                warn!(call_id = %call.id, capability = %call.name, error = %err, "tool result could not be reported");
                return Err(FatalReportError {
                    call_id: call.id.clone(),
                    capability: call.name.clone(),
                    message: format!("{err:#}"),
                    result,
                });
            }
        }
        Ok(result)
    }

    async fn evaluate(
        &self,
        call: &ToolCall,
        cancel: CancellationToken,
        stages: &mut StageLog<'_>,
    ) -> ToolResult {
        stages.enter(PipelineStage::ValidatingExistence);
        let Some(entry) = self.registry.get(&call.name) else {
            return ToolResult::failure(ToolErrorDetail::unknown(
                format!("unknown capability `{}`", call.name),
                UnknownCause::UnknownCapability,
            ));
        };
        if !entry.capability.is_executable() {
            return ToolResult::failure(ToolErrorDetail::unknown(
                format!("capability `{}` is not executable", call.name),
                UnknownCause::NotExecutable,
            ));
        }

        stages.enter(PipelineStage::ValidatingSchema);
        let validator = match &entry.schema {
            SchemaState::Ready(validator) => validator,
            SchemaState::Missing => {
                return ToolResult::failure(ToolErrorDetail::unknown(
                    format!("capability `{}` has no input schema", call.name),
                    UnknownCause::MissingSchema,
                ));
            }
            SchemaState::Invalid(message) => {
                return ToolResult::failure(ToolErrorDetail::unknown(
                    format!("capability `{}` has an invalid input schema: {message}", call.name),
                    UnknownCause::InvalidSchema,
                ));
            }
        };

        stages.enter(PipelineStage::ValidatingInput);
        let issues = validation_issues(validator, &call.input);
        if !issues.is_empty() {
            return ToolResult::failure(ToolErrorDetail::Validation { issues });
        }

        stages.enter(PipelineStage::Executing);
        execute(entry, call.input.clone(), cancel).await
    }
}

async fn execute(entry: &Registered, input: Value, cancel: CancellationToken) -> ToolResult {
    let capability = &entry.capability;
    let name = capability.name().to_owned();
    let timeout = capability.timeout();
    let work = tokio::time::timeout(timeout, capability.execute(input, cancel.clone()));
    let cooperative = capability.observes_cancellation();
    let interrupted = async {
        if cooperative {
            std::future::pending::<()>().await;
        }
        cancel.cancelled().await;
    };

    tokio::select! {
        biased;
        () = interrupted => {
            debug!(capability = %name, "tool cancelled");
            ToolResult::failure(ToolErrorDetail::Cancelled { capability: name })
        }
        outcome = work => match outcome {
            Err(_) => {
                warn!(capability = %name, timeout_ms = millis(timeout), "tool timed out");
                ToolResult::failure(ToolErrorDetail::Timeout { capability: name, timeout_ms: millis(timeout) })
            }
            Ok(Ok(result)) => result,
            Ok(Err(_)) if cancel.is_cancelled() => {
                ToolResult::failure(ToolErrorDetail::Cancelled { capability: name })
            }
            Ok(Err(err)) => {
                warn!(capability = %name, error = %format!("{err:#}"), "tool raised an unclassified error");
                ToolResult::failure(ToolErrorDetail::unknown(
                    format!("{name} failed: {err:#}"),
                    UnknownCause::Error,
                ))
            }
        },
    }
}

/// Every schema violation in `input`, with JSON-pointer paths rewritten as `a.b[0].c`.
fn validation_issues(validator: &jsonschema::Validator, input: &Value) -> Vec<ValidationIssue> {
    validator
        .iter_errors(input)
        .map(|error| {
            let mut path = display_path(&error.instance_path.to_string());
            let mut issue_expected = None;
            if let jsonschema::error::ValidationErrorKind::Required { property } = &error.kind {
                if let Some(property) = property.as_str() {
                    path = if path.is_empty() { property.to_owned() } else { format!("{path}.{property}") };
                }
                issue_expected = Some("present".to_owned());
            }
            let received = match &error.kind {
                jsonschema::error::ValidationErrorKind::Required { .. } => "missing",
                _ => json_type(&error.instance),
            };
            let mut issue = ValidationIssue::new(path, error.to_string()).received(received);
            if let Some(expected) = issue_expected {
                issue = issue.expected(expected);
            }
            issue
        })
        .collect()
}

fn display_path(pointer: &str) -> String {
    let mut out = String::new();
    for segment in pointer.split('/').filter(|segment| !segment.is_empty()) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            out.push('[');
            out.push_str(&segment);
            out.push(']');
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(&segment);
        }
    }
    out
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod path_tests {
    use super::display_path;

    #[test]
    fn pointer_paths_read_like_field_paths() {
        assert_eq!(display_path(""), "");
        assert_eq!(display_path("/operations/0/type"), "operations[0].type");
        assert_eq!(display_path("/a~1b"), "a/b");
    }
}
