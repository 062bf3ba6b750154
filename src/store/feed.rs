// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::model::RequestId;

const FEED_CAPACITY: usize = 16;

/// Broadcast after every successful local write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub new_text: String,
    pub request_id: RequestId,
    pub is_rollback: bool,
}

/// The external validator's answer for one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected { reason: String },
}

/// Change notifications out, acceptance/rejection verdicts back in, correlated by request id.
#[derive(Debug)]
pub struct ChangeFeed {
    sender: broadcast::Sender<DocumentChange>,
    waiting: Mutex<HashMap<RequestId, oneshot::Sender<Verdict>>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender, waiting: Mutex::new(HashMap::new()) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Delivers a verdict for `request_id`. Returns `false` when nobody is waiting any more.
    pub fn resolve(&self, request_id: &RequestId, verdict: Verdict) -> bool {
        let waiter = self.lock().remove(request_id);
        match waiter {
            Some(sender) => sender.send(verdict).is_ok(),
            None => {
                debug!(%request_id, "verdict arrived for an unknown or expired request");
                false
            }
        }
    }

    /// Broadcasts `change` and returns a receiver for its verdict, or `None` if there are no
    /// listeners to render a verdict.
    pub(crate) fn publish(&self, change: DocumentChange) -> Option<oneshot::Receiver<Verdict>> {
        if self.listener_count() == 0 {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        let request_id = change.request_id.clone();
        self.lock().insert(request_id.clone(), tx);
        if self.sender.send(change).is_err() {
            self.forget(&request_id);
            return None;
        }
        Some(rx)
    }

    /// Broadcasts without expecting a verdict.
    pub(crate) fn notify(&self, change: DocumentChange) {
        let _ = self.sender.send(change);
    }

    pub(crate) fn forget(&self, request_id: &RequestId) {
        self.lock().remove(request_id);
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Verdict>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
