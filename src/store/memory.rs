// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{DocumentHost, HostError, PersistOutcome};
use crate::model::Document;

/// How the next persist call behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistBehavior {
    Accept,
    /// Local validation refuses the write.
    Reject(String),
    /// The write itself errors.
    Fail(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    text: String,
    writes: Vec<String>,
    fail_reads: bool,
    script: VecDeque<PersistBehavior>,
    delay: Duration,
}

/// In-process document host. Writes are validated as XML unless scripted otherwise.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
}

impl MemoryHost {
    pub fn new(text: impl Into<String>) -> Self {
        Self { state: Mutex::new(MemoryState { text: text.into(), ..MemoryState::default() }) }
    }

    pub fn text(&self) -> String {
        self.lock().text.clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.lock().text = text.into();
    }

    /// Every text persisted so far, rollbacks included.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Queues behaviours for the next persist calls; once drained, writes are accepted.
    pub fn script_persist(&self, behaviors: impl IntoIterator<Item = PersistBehavior>) {
        self.lock().script.extend(behaviors);
    }

    /// Delays every host call, to exercise timeouts.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        let delay = self.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentHost for MemoryHost {
    async fn current_document_text(&self) -> Result<String, HostError> {
        self.pause().await;
        let state = self.lock();
        if state.fail_reads {
            return Err(HostError::Unavailable("reads are disabled".to_owned()));
        }
        Ok(state.text.clone())
    }

    async fn persist_document_text(
        &self,
        text: &str,
        _description: Option<&str>,
    ) -> Result<PersistOutcome, HostError> {
        self.pause().await;
        let mut state = self.lock();
        match state.script.pop_front().unwrap_or(PersistBehavior::Accept) {
            PersistBehavior::Reject(message) => return Ok(PersistOutcome::rejected(message)),
            PersistBehavior::Fail(message) => return Err(HostError::Unavailable(message)),
            PersistBehavior::Accept => {}
        }
        if let Err(err) = Document::parse(text) {
            return Ok(PersistOutcome::rejected(err.to_string()));
        }
        state.text = text.to_owned();
        state.writes.push(text.to_owned());
        Ok(PersistOutcome::accepted())
    }
}
