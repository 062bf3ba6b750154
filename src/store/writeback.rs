// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Write-Back & Rollback Coordinator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::feed::{ChangeFeed, DocumentChange, Verdict};
use super::{millis, with_host_timeout, DocumentHost, PersistOutcome};
use crate::model::RequestId;

const DEFAULT_HOST_IO_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_ACCEPTANCE_WAIT: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    Restored,
    Failed { error: String },
    NoSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteBackError {
    #[error("the document host refused the new document: {message}")]
    Persist { message: String },
    #[error("{}", rejection_message(reason, rollback))]
    Rejected { request_id: RequestId, reason: String, rollback: RollbackOutcome },
    #[error("the write-back task stopped before it settled: {message}")]
    Interrupted { message: String },
}

fn rejection_message(reason: &str, rollback: &RollbackOutcome) -> String {
    match rollback {
        RollbackOutcome::Restored => {
            format!("the renderer rejected the edit ({reason}); the previous document was restored")
        }
        RollbackOutcome::Failed { error } => format!(
            "the renderer rejected the edit ({reason}) and restoring the previous document failed: {error}"
        ),
        RollbackOutcome::NoSnapshot => format!(
            "the renderer rejected the edit ({reason}) and no snapshot was available to roll back; \
             the document may be inconsistent"
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub request_id: RequestId,
    /// The accepted document text.
    pub text: String,
}

/// Persists a mutated document, waits for the external verdict, and restores a snapshot on
/// rejection. Commits are serialized: a second commit waits until the first, including its
/// rollback, has settled.
pub struct WriteBackCoordinator {
    host: Arc<dyn DocumentHost>,
    feed: Arc<ChangeFeed>,
    host_io_timeout: Duration,
    acceptance_wait: Duration,
    commit_lock: Mutex<()>,
}

impl WriteBackCoordinator {
    pub fn new(host: Arc<dyn DocumentHost>, feed: Arc<ChangeFeed>) -> Self {
        Self {
            host,
            feed,
            host_io_timeout: DEFAULT_HOST_IO_TIMEOUT,
            acceptance_wait: DEFAULT_ACCEPTANCE_WAIT,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn with_timeouts(mut self, host_io_timeout: Duration, acceptance_wait: Duration) -> Self {
        self.host_io_timeout = host_io_timeout;
        self.acceptance_wait = acceptance_wait;
        self
    }

    pub fn host(&self) -> &Arc<dyn DocumentHost> {
        &self.host
    }

    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    pub fn host_io_timeout(&self) -> Duration {
        self.host_io_timeout
    }

    /// Runs [`commit`](Self::commit) on its own task. Dropping the returned future leaves the
    /// write-back running until its verdict and any rollback have settled.
    pub async fn commit_detached(
        self: &Arc<Self>,
        new_text: String,
        original_text: String,
        description: Option<String>,
    ) -> Result<CommitReceipt, WriteBackError> {
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            coordinator.commit(new_text, &original_text, description.as_deref()).await
        });
        task.await.map_err(|err| WriteBackError::Interrupted { message: err.to_string() })?
    }

    pub async fn commit(
        &self,
        new_text: String,
        original_text: &str,
        description: Option<&str>,
    ) -> Result<CommitReceipt, WriteBackError> {
        let _commit = self.commit_lock.lock().await;

        let snapshot = match with_host_timeout(
            "snapshot",
            self.host_io_timeout,
            self.host.current_document_text(),
        )
        .await
        {
            Ok(current) => {
                if current != original_text {
                    warn!("document changed after the batch read it; a rollback restores the newer text");
                }
                Some(current)
            }
            Err(err) => {
                warn!(error = %err, "no pre-write snapshot; rollback will not be possible");
                None
            }
        };

        let persisted = with_host_timeout(
            "persist",
            self.host_io_timeout,
            self.host.persist_document_text(&new_text, description),
        )
        .await
        .map_err(|err| WriteBackError::Persist { message: err.to_string() })?;
        if !persisted.accepted {
            let message = persisted.error.unwrap_or_else(|| "local validation failed".to_owned());
            warn!(%message, "document host rejected the write");
            return Err(WriteBackError::Persist { message });
        }

        let request_id = RequestId::generate();
        match self.await_verdict(&new_text, &request_id).await {
            Verdict::Accepted => {
                info!(%request_id, "write-back accepted");
                Ok(CommitReceipt { request_id, text: new_text })
            }
            Verdict::Rejected { reason } => {
                warn!(%request_id, %reason, "write-back rejected; rolling back");
                let rollback = self.roll_back(snapshot, &request_id, description).await;
                match &rollback {
                    RollbackOutcome::Restored => info!(%request_id, "rollback restored the snapshot"),
                    RollbackOutcome::Failed { error } => warn!(%request_id, %error, "rollback failed"),
                    RollbackOutcome::NoSnapshot => warn!(%request_id, "rollback impossible"),
                }
                Err(WriteBackError::Rejected { request_id, reason, rollback })
            }
        }
    }

    /// No listeners, a closed channel, or silence past the wait all count as acceptance.
    async fn await_verdict(&self, text: &str, request_id: &RequestId) -> Verdict {
        let change = DocumentChange {
            new_text: text.to_owned(),
            request_id: request_id.clone(),
            is_rollback: false,
        };
        let Some(verdict) = self.feed.publish(change) else {
            debug!(%request_id, "no change listeners; accepting");
            return Verdict::Accepted;
        };
        let _waiting = ForgetOnDrop { feed: &self.feed, request_id };

        match tokio::time::timeout(self.acceptance_wait, verdict).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) => Verdict::Accepted,
            Err(_) => {
                debug!(%request_id, wait_ms = millis(self.acceptance_wait), "no verdict in time; accepting");
                Verdict::Accepted
            }
        }
    }

    async fn roll_back(
        &self,
        snapshot: Option<String>,
        request_id: &RequestId,
        description: Option<&str>,
    ) -> RollbackOutcome {
        let Some(snapshot) = snapshot else {
            return RollbackOutcome::NoSnapshot;
        };
        let description = format!("rollback: {}", description.unwrap_or("rejected edit"));
        let restored = with_host_timeout(
            "rollback",
            self.host_io_timeout,
            self.host.persist_document_text(&snapshot, Some(&description)),
        )
        .await;

        match restored {
            Ok(PersistOutcome { accepted: true, .. }) => {
                self.feed.notify(DocumentChange {
                    new_text: snapshot,
                    request_id: request_id.clone(),
                    is_rollback: true,
                });
                RollbackOutcome::Restored
            }
            Ok(PersistOutcome { error, .. }) => RollbackOutcome::Failed {
                error: error.unwrap_or_else(|| "the host refused the snapshot".to_owned()),
            },
            Err(err) => RollbackOutcome::Failed { error: err.to_string() },
        }
    }
}

/// Drops the feed's pending entry however the verdict wait ends.
struct ForgetOnDrop<'a> {
    feed: &'a ChangeFeed,
    request_id: &'a RequestId,
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        self.feed.forget(self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{RollbackOutcome, WriteBackCoordinator, WriteBackError};
    use crate::store::{ChangeFeed, MemoryHost, PersistBehavior, Verdict};

    const OLD: &str = "<doc><page id=\"p\"/></doc>";
    const NEW: &str = "<doc><page id=\"p\" x=\"1\"/></doc>";

    fn coordinator(host: &Arc<MemoryHost>) -> (WriteBackCoordinator, Arc<ChangeFeed>) {
        let feed = Arc::new(ChangeFeed::new());
        let coordinator = WriteBackCoordinator::new(host.clone(), feed.clone())
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(200));
        (coordinator, feed)
    }

    /// Spawns a validator that answers every non-rollback change with `verdict`.
    fn validator(feed: &Arc<ChangeFeed>, verdict: Verdict) -> tokio::task::JoinHandle<usize> {
        let mut changes = feed.subscribe();
        let feed = feed.clone();
        tokio::spawn(async move {
            let mut rollbacks = 0;
            while let Ok(change) = changes.recv().await {
                if change.is_rollback {
                    rollbacks += 1;
                    break;
                }
                feed.resolve(&change.request_id, verdict.clone());
            }
            rollbacks
        })
    }

    #[tokio::test]
    async fn accepts_without_listeners() {
        let host = Arc::new(MemoryHost::new(OLD));
        let (coordinator, _feed) = coordinator(&host);
        let receipt = coordinator.commit(NEW.to_owned(), OLD, Some("edit")).await.expect("commit");
        assert_eq!(receipt.text, NEW);
        assert_eq!(host.text(), NEW);
    }

    #[tokio::test]
    async fn silence_counts_as_acceptance() {
        let host = Arc::new(MemoryHost::new(OLD));
        let (coordinator, feed) = coordinator(&host);
        let _silent = feed.subscribe();
        coordinator.commit(NEW.to_owned(), OLD, None).await.expect("commit");
        assert_eq!(host.text(), NEW);
        assert_eq!(feed.pending(), 0);
    }

    #[tokio::test]
    async fn rejection_restores_snapshot_and_notifies_rollback() {
        let host = Arc::new(MemoryHost::new(OLD));
        let (coordinator, feed) = coordinator(&host);
        let validator = validator(&feed, Verdict::Rejected { reason: "render failed".to_owned() });

        let err = coordinator.commit(NEW.to_owned(), OLD, None).await.unwrap_err();
        assert!(matches!(
            err,
            WriteBackError::Rejected { rollback: RollbackOutcome::Restored, ref reason, .. } if reason == "render failed"
        ));
        assert_eq!(host.text(), OLD);
        assert_eq!(validator.await.expect("validator"), 1);
    }

    #[tokio::test]
    async fn rejection_without_snapshot_is_reported() {
        let host = Arc::new(MemoryHost::new(OLD));
        host.fail_reads(true);
        let (coordinator, feed) = coordinator(&host);
        let _validator = validator(&feed, Verdict::Rejected { reason: "nope".to_owned() });

        let err = coordinator.commit(NEW.to_owned(), OLD, None).await.unwrap_err();
        assert!(matches!(err, WriteBackError::Rejected { rollback: RollbackOutcome::NoSnapshot, .. }));
        assert!(err.to_string().contains("may be inconsistent"));
        assert_eq!(host.text(), NEW);
    }

    #[tokio::test]
    async fn failed_rollback_names_the_storage_error() {
        let host = Arc::new(MemoryHost::new(OLD));
        host.script_persist([PersistBehavior::Accept, PersistBehavior::Fail("disk full".to_owned())]);
        let (coordinator, feed) = coordinator(&host);
        let _validator = validator(&feed, Verdict::Rejected { reason: "nope".to_owned() });

        let err = coordinator.commit(NEW.to_owned(), OLD, None).await.unwrap_err();
        let WriteBackError::Rejected { rollback: RollbackOutcome::Failed { error }, .. } = err else {
            panic!("expected failed rollback, got {err:?}");
        };
        assert!(error.contains("disk full"));
    }

    #[tokio::test]
    async fn abandoned_verdict_wait_leaves_nothing_pending() {
        let host = Arc::new(MemoryHost::new(OLD));
        let (coordinator, feed) = coordinator(&host);
        let _silent = feed.subscribe();

        let dropped = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.commit(NEW.to_owned(), OLD, None),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(host.text(), NEW);
        assert_eq!(feed.pending(), 0);
    }

    #[tokio::test]
    async fn detached_commit_rolls_back_after_its_caller_is_gone() {
        let host = Arc::new(MemoryHost::new(OLD));
        let (coordinator, feed) = coordinator(&host);
        let coordinator = Arc::new(coordinator);
        let mut changes = feed.subscribe();
        let late_validator = {
            let feed = feed.clone();
            tokio::spawn(async move {
                let change = changes.recv().await.expect("change");
                tokio::time::sleep(Duration::from_millis(80)).await;
                let delivered = feed.resolve(&change.request_id, Verdict::Rejected { reason: "late".to_owned() });
                let rollback = changes.recv().await.expect("rollback");
                (delivered, rollback.is_rollback)
            })
        };

        let dropped = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.commit_detached(NEW.to_owned(), OLD.to_owned(), None),
        )
        .await;
        assert!(dropped.is_err());

        assert_eq!(late_validator.await.expect("validator"), (true, true));
        assert_eq!(host.text(), OLD);
        assert_eq!(feed.pending(), 0);
    }

    #[tokio::test]
    async fn local_rejection_is_a_persist_error() {
        let host = Arc::new(MemoryHost::new(OLD));
        host.script_persist([PersistBehavior::Reject("invalid cell".to_owned())]);
        let (coordinator, _feed) = coordinator(&host);

        let err = coordinator.commit(NEW.to_owned(), OLD, None).await.unwrap_err();
        assert_eq!(err, WriteBackError::Persist { message: "invalid cell".to_owned() });
        assert_eq!(host.text(), OLD);
    }
}
