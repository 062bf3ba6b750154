// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Structural edit operations over a [`Document`].
//!
//! Operations are decoded from loosely-typed wire parameters into a closed sum type up front, so
//! the applier never sees a structurally incomplete operation.

use std::collections::BTreeSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ValidationIssue;
use crate::model::{Document, DocumentError, NodeId, NodeKind, TreeError};
use crate::query::{resolve, Locator, NodeRef, PageFilter, SelectError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    SetAttribute,
    RemoveAttribute,
    InsertElement,
    RemoveElement,
    ReplaceElement,
    SetTextContent,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetAttribute => "set_attribute",
            Self::RemoveAttribute => "remove_attribute",
            Self::InsertElement => "insert_element",
            Self::RemoveElement => "remove_element",
            Self::ReplaceElement => "replace_element",
            Self::SetTextContent => "set_text_content",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    /// Last child of the target.
    #[default]
    Append,
    /// First child of the target.
    Prepend,
    /// Previous sibling of the target.
    Before,
    /// Next sibling of the target.
    After,
}

impl InsertPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    SetAttribute { key: String, value: String },
    RemoveAttribute { key: String },
    InsertElement { new_xml: String, position: InsertPosition },
    RemoveElement,
    ReplaceElement { new_xml: String },
    SetTextContent { value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub locator: Locator,
    pub allow_no_match: bool,
    pub edit: Edit,
}

impl Operation {
    pub fn new(locator: Locator, edit: Edit) -> Self {
        Self { locator, allow_no_match: false, edit }
    }

    pub fn allowing_no_match(mut self) -> Self {
        self.allow_no_match = true;
        self
    }

    pub fn kind(&self) -> OpKind {
        match self.edit {
            Edit::SetAttribute { .. } => OpKind::SetAttribute,
            Edit::RemoveAttribute { .. } => OpKind::RemoveAttribute,
            Edit::InsertElement { .. } => OpKind::InsertElement,
            Edit::RemoveElement => OpKind::RemoveElement,
            Edit::ReplaceElement { .. } => OpKind::ReplaceElement,
            Edit::SetTextContent { .. } => OpKind::SetTextContent,
        }
    }
}

/// Wire form of one operation, as sent by tool callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperationParams {
    /// Operation kind.
    #[serde(rename = "type")]
    pub kind: OpKind,
    /// Stable element identifier. Takes precedence over `xpath`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Query expression selecting the target node(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    /// Attribute name (`set_attribute`, `remove_attribute`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Attribute value or text content (`set_attribute`, `set_text_content`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Element source with exactly one root (`insert_element`, `replace_element`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_xml: Option<String>,
    /// Insertion point relative to the target (`insert_element`, default `append`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<InsertPosition>,
    /// Succeed without changes when the locator matches nothing.
    #[serde(default)]
    pub allow_no_match: bool,
}

impl OperationParams {
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            id: None,
            xpath: None,
            key: None,
            value: None,
            new_xml: None,
            position: None,
            allow_no_match: false,
        }
    }
}

impl Operation {
    /// Decodes wire parameters, reporting every missing or malformed field at once.
    pub fn decode(index: usize, params: &OperationParams) -> Result<Self, Vec<ValidationIssue>> {
        let path = format!("operations[{index}]");
        let mut issues = Vec::new();

        let locator = Locator::from_parts(params.id.as_deref(), params.xpath.as_deref())
            .map_err(|err| issues.push(ValidationIssue::new(path.clone(), err.to_string())))
            .ok();

        let mut required = |field: &str, value: &Option<String>, allow_empty: bool| -> String {
            match value {
                Some(v) if allow_empty || !v.is_empty() => v.clone(),
                Some(_) => {
                    issues.push(ValidationIssue::new(
                        format!("{path}.{field}"),
                        format!("`{field}` must not be empty for {}", params.kind),
                    ));
                    String::new()
                }
                None => {
                    issues.push(
                        ValidationIssue::new(
                            format!("{path}.{field}"),
                            format!("`{field}` is required for {}", params.kind),
                        )
                        .expected("string")
                        .received("missing"),
                    );
                    String::new()
                }
            }
        };

        let edit = match params.kind {
            OpKind::SetAttribute => Edit::SetAttribute {
                key: required("key", &params.key, false),
                value: required("value", &params.value, true),
            },
            OpKind::RemoveAttribute => Edit::RemoveAttribute { key: required("key", &params.key, false) },
            OpKind::InsertElement => Edit::InsertElement {
                new_xml: required("new_xml", &params.new_xml, false),
                position: params.position.unwrap_or_default(),
            },
            OpKind::RemoveElement => Edit::RemoveElement,
            OpKind::ReplaceElement => {
                Edit::ReplaceElement { new_xml: required("new_xml", &params.new_xml, false) }
            }
            OpKind::SetTextContent => {
                Edit::SetTextContent { value: required("value", &params.value, true) }
            }
        };

        if let Edit::SetAttribute { key, .. } | Edit::RemoveAttribute { key } = &edit {
            if !key.is_empty() && !is_attribute_name(key) {
                issues.push(
                    ValidationIssue::new(
                        format!("{path}.key"),
                        format!("`{key}` is not a valid attribute name"),
                    )
                    .received(key.clone()),
                );
            }
        }

        match locator {
            Some(locator) if issues.is_empty() => {
                Ok(Self { locator, allow_no_match: params.allow_no_match, edit })
            }
            _ => Err(issues),
        }
    }
}

/// Decodes a whole batch, collecting issues across all operations.
pub fn decode_operations(params: &[OperationParams]) -> Result<Vec<Operation>, Vec<ValidationIssue>> {
    let mut operations = Vec::with_capacity(params.len());
    let mut issues = Vec::new();
    for (index, op) in params.iter().enumerate() {
        match Operation::decode(index, op) {
            Ok(operation) => operations.push(operation),
            Err(found) => issues.extend(found),
        }
    }
    if issues.is_empty() {
        Ok(operations)
    } else {
        Err(issues)
    }
}

fn is_attribute_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
}

/// Where a failing operation sits in its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct OperationContext {
    pub operation_index: usize,
    pub operation_count: usize,
    pub operation_kind: OpKind,
    /// Canonical query the locator resolved to.
    pub locator: String,
    pub allow_no_match: bool,
}

impl OperationContext {
    pub fn new(operation_index: usize, operation_count: usize, op: &Operation) -> Self {
        Self {
            operation_index,
            operation_count,
            operation_kind: op.kind(),
            locator: op.locator.canonical_query(),
            allow_no_match: op.allow_no_match,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    Select(SelectError),
    Fragment(DocumentError),
    NoMatch { query: String },
    WrongNodeKind { query: String, expected: &'static str, found: &'static str },
    RootImmutable { kind: OpKind },
    SiblingOfRoot { position: InsertPosition },
    DuplicateId { id: String },
    Tree(TreeError),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select(err) => write!(f, "{err}"),
            Self::Fragment(err) => write!(f, "new_xml is not a single well-formed element: {err}"),
            Self::NoMatch { query } => write!(
                f,
                "no node matches `{query}`; re-read the document to find the current target before retrying"
            ),
            Self::WrongNodeKind { query, expected, found } => {
                write!(f, "`{query}` matched a {found} node, but this operation needs an {expected}")
            }
            Self::RootImmutable { kind } => {
                write!(f, "{kind} cannot target the document root")
            }
            Self::SiblingOfRoot { position } => write!(
                f,
                "cannot insert {} the document root: it has no parent",
                position.as_str()
            ),
            Self::DuplicateId { id } => write!(f, "element id `{id}` is already used on the target page"),
            Self::Tree(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Select(err) => Some(err),
            Self::Fragment(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SelectError> for ApplyError {
    fn from(err: SelectError) -> Self {
        Self::Select(err)
    }
}

/// An [`ApplyError`] enriched with its batch position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpError {
    pub context: OperationContext,
    pub error: ApplyError,
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation {} of {} ({}) failed: {}",
            self.context.operation_index + 1,
            self.context.operation_count,
            self.context.operation_kind,
            self.error
        )
    }
}

impl std::error::Error for OpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Applies `ops` in order to `doc`, stopping at the first failure.
///
/// Returns the number of node mutations performed. On error `doc` may be partially mutated;
/// callers work on a private copy and drop it.
pub fn apply_all(
    doc: &mut Document,
    ops: &[Operation],
    filter: Option<&PageFilter>,
) -> Result<usize, OpError> {
    let mut mutations = 0;
    for (index, op) in ops.iter().enumerate() {
        mutations += apply_operation(doc, op, filter)
            .map_err(|error| OpError { context: OperationContext::new(index, ops.len(), op), error })?;
    }
    Ok(mutations)
}

// Per-operation application.
include!("apply_impl.rs");
