// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use rmcp::model::ErrorCode;
use serde::Serialize;

use crate::error::{ErrorKind, ToolErrorDetail};

/// Error data attached to failed MCP tool calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: ToolErrorDetail,
}

impl McpFailure {
    pub fn new(message: impl Into<String>, detail: ToolErrorDetail) -> Self {
        Self { kind: detail.kind(), message: message.into(), detail }
    }

    /// Caller-fixable failures map to `invalid_params`; the rest are internal errors.
    pub fn code(&self) -> ErrorCode {
        match self.kind {
            ErrorKind::Validation
            | ErrorKind::Parse
            | ErrorKind::Query
            | ErrorKind::StructuralOperation
            | ErrorKind::PageFilter => ErrorCode::INVALID_PARAMS,
            ErrorKind::WriteBack | ErrorKind::Timeout | ErrorKind::Cancelled | ErrorKind::Unknown => {
                ErrorCode::INTERNAL_ERROR
            }
        }
    }
}
