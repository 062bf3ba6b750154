// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Tool error taxonomy and the uniform tool result.
//!
//! Every failure leaving the engine is classified into one [`ToolErrorDetail`] kind at the site
//! where it is first understood. Lower layers keep their own typed errors; the conversions below
//! preserve the most specific kind and never downgrade to `unknown` when a better one is known.

use std::fmt::{self, Write as _};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::BatchError;
use crate::model::DocumentError;
use crate::ops::{ApplyError, OpError, OperationContext};
use crate::query::SelectError;
use crate::store::{HostError, RollbackOutcome, WriteBackError};

/// One violated input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into(), expected: None, received: None }
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<input>" } else { &self.path };
        write!(f, "{path}: {}", self.message)?;
        match (&self.expected, &self.received) {
            (Some(expected), Some(received)) => write!(f, " (expected {expected}, received {received})"),
            (Some(expected), None) => write!(f, " (expected {expected})"),
            (None, Some(received)) => write!(f, " (received {received})"),
            (None, None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Parse,
    Query,
    StructuralOperation,
    PageFilter,
    WriteBack,
    Timeout,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Parse => "parse",
            Self::Query => "query",
            Self::StructuralOperation => "structural_operation",
            Self::PageFilter => "page_filter",
            Self::WriteBack => "write_back",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

/// Why a failure could not be classified more precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCause {
    UnknownCapability,
    NotExecutable,
    MissingSchema,
    InvalidSchema,
    Error,
}

/// State of the document after a rejected write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    NotAttempted,
    Succeeded,
    Failed,
    Impossible,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolErrorDetail {
    Validation {
        issues: Vec<ValidationIssue>,
    },
    Parse {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<OperationContext>,
    },
    Query {
        query: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<OperationContext>,
    },
    StructuralOperation {
        #[serde(flatten)]
        operation: OperationContext,
        message: String,
    },
    PageFilter {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        unknown_pages: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<OperationContext>,
    },
    WriteBack {
        message: String,
        rollback: RollbackStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Timeout {
        capability: String,
        timeout_ms: u64,
    },
    Cancelled {
        capability: String,
    },
    Unknown {
        message: String,
        cause: UnknownCause,
    },
}

impl ToolErrorDetail {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Query { .. } => ErrorKind::Query,
            Self::StructuralOperation { .. } => ErrorKind::StructuralOperation,
            Self::PageFilter { .. } => ErrorKind::PageFilter,
            Self::WriteBack { .. } => ErrorKind::WriteBack,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn unknown(message: impl Into<String>, cause: UnknownCause) -> Self {
        Self::Unknown { message: message.into(), cause }
    }

    /// Short, display-safe message for the failure.
    pub fn summary(&self) -> String {
        match self {
            Self::Validation { issues } => match issues.as_slice() {
                [only] => format!("invalid input: {only}"),
                _ => format!("invalid input: {} problems", issues.len()),
            },
            Self::Parse { message, .. }
            | Self::Query { message, .. }
            | Self::StructuralOperation { message, .. }
            | Self::PageFilter { message, .. }
            | Self::WriteBack { message, .. }
            | Self::Unknown { message, .. } => message.clone(),
            Self::Timeout { capability, timeout_ms } => {
                format!("[timeout] {capability} did not finish within {timeout_ms} ms")
            }
            Self::Cancelled { .. } => "operation cancelled".to_owned(),
        }
    }

    fn with_operation(mut self, context: OperationContext) -> Self {
        match &mut self {
            Self::Parse { operation, .. }
            | Self::Query { operation, .. }
            | Self::PageFilter { operation, .. } => *operation = Some(context),
            _ => {}
        }
        self
    }
}

impl fmt::Display for ToolErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_detail(self))
    }
}

/// Multi-line rendering of a detail, appended to failure messages for callers that only read text.
pub fn format_detail(detail: &ToolErrorDetail) -> String {
    let mut out = String::new();
    let _ = write!(out, "[{}]", detail.kind().as_str());
    match detail {
        ToolErrorDetail::Validation { issues } => {
            for issue in issues {
                let _ = write!(out, "\n  - {issue}");
            }
        }
        ToolErrorDetail::Parse { message, position, operation } => {
            let _ = write!(out, " {message}");
            if let Some(position) = position {
                let _ = write!(out, "\n  at byte {position}");
            }
            write_operation(&mut out, operation.as_ref());
        }
        ToolErrorDetail::Query { query, message, operation } => {
            let _ = write!(out, " {message}\n  query: {query}");
            write_operation(&mut out, operation.as_ref());
        }
        ToolErrorDetail::StructuralOperation { operation, message } => {
            let _ = write!(out, " {message}");
            write_operation(&mut out, Some(operation));
        }
        ToolErrorDetail::PageFilter { message, query, unknown_pages, operation } => {
            let _ = write!(out, " {message}");
            if let Some(query) = query {
                let _ = write!(out, "\n  query: {query}");
            }
            if !unknown_pages.is_empty() {
                let _ = write!(out, "\n  unknown pages: {}", unknown_pages.join(", "));
            }
            write_operation(&mut out, operation.as_ref());
        }
        ToolErrorDetail::WriteBack { message, rollback, request_id } => {
            let _ = write!(out, " {message}\n  rollback: {rollback:?}");
            if let Some(request_id) = request_id {
                let _ = write!(out, "\n  request: {request_id}");
            }
        }
        ToolErrorDetail::Timeout { capability, timeout_ms } => {
            let _ = write!(out, " {capability} exceeded {timeout_ms} ms");
        }
        ToolErrorDetail::Cancelled { capability } => {
            let _ = write!(out, " {capability} was cancelled");
        }
        ToolErrorDetail::Unknown { message, cause } => {
            let _ = write!(out, " {message} ({cause:?})");
        }
    }
    out
}

fn write_operation(out: &mut String, operation: Option<&OperationContext>) {
    if let Some(op) = operation {
        let _ = write!(
            out,
            "\n  operation: index {} of {} ({}), locator {}, allow_no_match={}",
            op.operation_index,
            op.operation_count,
            op.operation_kind,
            op.locator,
            op.allow_no_match
        );
    }
}

impl From<&DocumentError> for ToolErrorDetail {
    fn from(err: &DocumentError) -> Self {
        Self::Parse { message: err.to_string(), position: err.position(), operation: None }
    }
}

impl From<&SelectError> for ToolErrorDetail {
    fn from(err: &SelectError) -> Self {
        match err {
            SelectError::Locator(inner) => Self::Validation {
                issues: vec![ValidationIssue::new("", inner.to_string())],
            },
            SelectError::Query(inner) => Self::Query {
                query: inner.expression().to_owned(),
                message: inner.to_string(),
                operation: None,
            },
            SelectError::GlobalNode { query } | SelectError::ForeignPage { query, .. } => {
                Self::PageFilter {
                    message: err.to_string(),
                    query: Some(query.clone()),
                    unknown_pages: Vec::new(),
                    operation: None,
                }
            }
            SelectError::UnknownPages { pages } => Self::PageFilter {
                message: err.to_string(),
                query: None,
                unknown_pages: pages.clone(),
                operation: None,
            },
        }
    }
}

impl From<&OpError> for ToolErrorDetail {
    fn from(err: &OpError) -> Self {
        let context = err.context.clone();
        match &err.error {
            ApplyError::Select(SelectError::Locator(_)) => Self::StructuralOperation {
                operation: context,
                message: err.to_string(),
            },
            ApplyError::Select(inner) => Self::from(inner).with_operation(context),
            ApplyError::Fragment(inner) => Self::from(inner).with_operation(context),
            _ => Self::StructuralOperation { operation: context, message: err.to_string() },
        }
    }
}

impl From<&HostError> for ToolErrorDetail {
    fn from(err: &HostError) -> Self {
        match err {
            HostError::Timeout { step, timeout_ms } => {
                Self::Timeout { capability: format!("host {step}"), timeout_ms: *timeout_ms }
            }
            _ => Self::unknown(err.to_string(), UnknownCause::Error),
        }
    }
}

impl From<&WriteBackError> for ToolErrorDetail {
    fn from(err: &WriteBackError) -> Self {
        let (rollback, request_id) = match err {
            WriteBackError::Persist { .. } | WriteBackError::Interrupted { .. } => {
                (RollbackStatus::NotAttempted, None)
            }
            WriteBackError::Rejected { request_id, rollback, .. } => {
                let status = match rollback {
                    RollbackOutcome::Restored => RollbackStatus::Succeeded,
                    RollbackOutcome::Failed { .. } => RollbackStatus::Failed,
                    RollbackOutcome::NoSnapshot => RollbackStatus::Impossible,
                };
                (status, Some(request_id.to_string()))
            }
        };
        Self::WriteBack { message: err.to_string(), rollback, request_id }
    }
}

impl From<&BatchError> for ToolErrorDetail {
    fn from(err: &BatchError) -> Self {
        match err {
            BatchError::Parse(inner) => Self::from(inner),
            BatchError::Operation(inner) => Self::from(inner),
            BatchError::WriteBack(inner) => Self::from(inner),
        }
    }
}

/// The single outward result shape of every capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { payload: Value },
    Failure { message: String, detail: ToolErrorDetail },
}

impl ToolResult {
    pub fn success(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self::Success { payload },
            Err(err) => Self::failure(ToolErrorDetail::unknown(
                format!("failed to encode result: {err}"),
                UnknownCause::Error,
            )),
        }
    }

    pub fn failure(detail: ToolErrorDetail) -> Self {
        Self::Failure { message: detail.summary(), detail }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn detail(&self) -> Option<&ToolErrorDetail> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { detail, .. } => Some(detail),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload } => Some(payload),
            Self::Failure { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { message, .. } => Some(message),
        }
    }

    /// Appends the formatted detail to the message, keeping the structured detail as-is.
    pub fn augmented(self) -> Self {
        match self {
            Self::Failure { message, detail } => {
                let rendered = format_detail(&detail);
                Self::Failure { message: format!("{message}\n\n{rendered}"), detail }
            }
            success => success,
        }
    }
}
