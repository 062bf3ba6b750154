// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! The document collaborator and the write-back protocol around it.
//!
//! The engine never owns the persisted document. A [`DocumentHost`] hands out the current text and
//! accepts candidate replacements; the [`ChangeFeed`] carries change notifications out to an
//! external validator and its accept/reject verdicts back in.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::model::{list_pages, Document, DocumentError, PageInfo};

pub mod feed;
pub mod file_host;
pub mod memory;
pub mod writeback;

pub use feed::{ChangeFeed, DocumentChange, Verdict};
pub use file_host::{FileDocumentHost, WriteDurability};
pub use memory::{MemoryHost, PersistBehavior};
pub use writeback::{CommitReceipt, RollbackOutcome, WriteBackCoordinator, WriteBackError};

/// Local result of a persistence call. Distinct from the external validator's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistOutcome {
    pub fn accepted() -> Self {
        Self { accepted: true, error: None }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self { accepted: false, error: Some(error.into()) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("document is unavailable: {0}")]
    Unavailable(String),
    #[error("i/o error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("document {step} timed out after {timeout_ms} ms")]
    Timeout { step: &'static str, timeout_ms: u64 },
}

#[async_trait]
pub trait DocumentHost: Send + Sync {
    /// Full current serialization of the document.
    async fn current_document_text(&self) -> Result<String, HostError>;

    /// Writes a candidate document and reports whether local validation accepted it.
    async fn persist_document_text(
        &self,
        text: &str,
        description: Option<&str>,
    ) -> Result<PersistOutcome, HostError>;

    fn list_pages(&self, text: &str) -> Result<Vec<PageInfo>, DocumentError> {
        Document::parse(text).map(|doc| list_pages(&doc))
    }
}

/// Runs a host call under `timeout`, mapping expiry to [`HostError::Timeout`].
pub async fn with_host_timeout<T, F>(step: &'static str, timeout: Duration, call: F) -> Result<T, HostError>
where
    F: Future<Output = Result<T, HostError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(HostError::Timeout { step, timeout_ms: millis(timeout) }),
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
