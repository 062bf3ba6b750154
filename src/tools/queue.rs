// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Single-flight execution of pipeline runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FatalReportError, ToolCall, ToolPipeline};
use crate::error::ToolResult;
use crate::model::CallId;
use crate::store::millis;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    /// The reporter failed for this call; the queue is now halted.
    #[error(transparent)]
    Fatal(FatalReportError),
    #[error("queue halted after a fatal reporting failure: {0}")]
    Halted(FatalReportError),
    #[error("call was removed from the queue before it started")]
    ClearedBeforeStart,
    #[error("queue did not drain within {timeout_ms} ms ({outstanding} call(s) outstanding)")]
    DrainTimeout { timeout_ms: u64, outstanding: usize },
    #[error("queue worker has shut down")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub current: Option<CallId>,
    pub pending: usize,
    pub halted: bool,
}

/// Resolves once the queued call reaches a terminal state.
#[derive(Debug)]
pub struct TaskHandle {
    call_id: CallId,
    outcome: oneshot::Receiver<Result<ToolResult, QueueError>>,
}

impl TaskHandle {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub async fn outcome(self) -> Result<ToolResult, QueueError> {
        self.outcome.await.unwrap_or(Err(QueueError::Closed))
    }
}

struct Job {
    call: ToolCall,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<ToolResult, QueueError>>,
}

struct Running {
    call_id: CallId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    current: Option<Running>,
    halted: Option<FatalReportError>,
    closed: bool,
}

impl QueueState {
    fn outstanding(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }
}

struct QueueInner {
    pipeline: Arc<ToolPipeline>,
    state: Mutex<QueueState>,
    wake: Notify,
    outstanding: watch::Sender<usize>,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &QueueState) {
        self.outstanding.send_replace(state.outstanding());
    }
}

/// Runs pipeline calls strictly one at a time, in enqueue order.
///
/// Must be created inside a tokio runtime: it spawns its worker task.
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

impl SerialQueue {
    pub fn new(pipeline: Arc<ToolPipeline>) -> Self {
        let (outstanding, _) = watch::channel(0);
        let inner = Arc::new(QueueInner {
            pipeline,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            outstanding,
        });
        tokio::spawn(work(Arc::clone(&inner)));
        Self { inner }
    }

    pub fn pipeline(&self) -> &Arc<ToolPipeline> {
        &self.inner.pipeline
    }

    pub fn enqueue(&self, call: ToolCall) -> Result<TaskHandle, QueueError> {
        let (reply, outcome) = oneshot::channel();
        let call_id = call.id.clone();
        {
            let mut state = self.inner.lock();
            if let Some(fatal) = &state.halted {
                return Err(QueueError::Halted(fatal.clone()));
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            debug!(call_id = %call.id, capability = %call.name, position = state.pending.len(), "queue.enqueue");
            state.pending.push_back(Job { call, cancel: CancellationToken::new(), reply });
            self.inner.publish(&state);
        }
        self.inner.wake.notify_one();
        Ok(TaskHandle { call_id, outcome })
    }

    /// Enqueues `call` and waits for its result.
    pub async fn call(&self, call: ToolCall) -> Result<ToolResult, QueueError> {
        self.enqueue(call)?.outcome().await
    }

    /// Waits until nothing is running or pending.
    pub async fn drain(&self, timeout: Duration) -> Result<(), QueueError> {
        let mut outstanding = self.inner.outstanding.subscribe();
        let settled = tokio::time::timeout(timeout, async {
            outstanding.wait_for(|count| *count == 0).await.map(|_| ())
        })
        .await;
        match settled {
            Ok(_) => Ok(()),
            Err(_) => {
                let outstanding = self.inner.lock().outstanding();
                warn!(timeout_ms = millis(timeout), outstanding, "queue.drain timed out");
                Err(QueueError::DrainTimeout { timeout_ms: millis(timeout), outstanding })
            }
        }
    }

    /// Cancels the running call, if any. Pending calls are left in place.
    pub fn abort_current(&self) -> bool {
        let state = self.inner.lock();
        match &state.current {
            Some(running) => {
                info!(call_id = %running.call_id, "queue.abort");
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops every call that has not started yet; their handles resolve with
    /// [`QueueError::ClearedBeforeStart`].
    pub fn clear_pending(&self) -> usize {
        let cleared: Vec<Job> = {
            let mut state = self.inner.lock();
            let cleared = state.pending.drain(..).collect();
            self.inner.publish(&state);
            cleared
        };
        for job in &cleared {
            debug!(call_id = %job.call.id, "queue.cleared");
        }
        let count = cleared.len();
        for job in cleared {
            let _ = job.reply.send(Err(QueueError::ClearedBeforeStart));
        }
        count
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.lock();
        QueueStatus {
            current: state.current.as_ref().map(|running| running.call_id.clone()),
            pending: state.pending.len(),
            halted: state.halted.is_some(),
        }
    }

    pub fn fatal_error(&self) -> Option<FatalReportError> {
        self.inner.lock().halted.clone()
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        let pending: Vec<Job> = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.pending.drain(..).collect()
        };
        for job in pending {
            let _ = job.reply.send(Err(QueueError::Closed));
        }
        self.inner.wake.notify_one();
    }
}

async fn work(inner: Arc<QueueInner>) {
    loop {
        let next = {
            let mut state = inner.lock();
            if state.closed {
                return;
            }
            let job = state.pending.pop_front();
            if let Some(job) = &job {
                state.current = Some(Running { call_id: job.call.id.clone(), cancel: job.cancel.clone() });
            }
            job
        };
        let Some(job) = next else {
            inner.wake.notified().await;
            continue;
        };

        debug!(call_id = %job.call.id, capability = %job.call.name, "queue.start");
        let outcome = inner.pipeline.run(&job.call, job.cancel.clone()).await;

        let reply = match outcome {
            Ok(result) => Ok(result),
            Err(fatal) => {
                error!(call_id = %fatal.call_id, error = %fatal, "queue halted");
                let rejected: Vec<Job> = {
                    let mut state = inner.lock();
                    state.halted = Some(fatal.clone());
                    state.pending.drain(..).collect()
                };
                for queued in rejected {
                    let _ = queued.reply.send(Err(QueueError::Halted(fatal.clone())));
                }
                Err(QueueError::Fatal(fatal))
            }
        };

        {
            let mut state = inner.lock();
            state.current = None;
            inner.publish(&state);
        }
        debug!(call_id = %job.call.id, ok = reply.is_ok(), "queue.finish");
        let _ = job.reply.send(reply);
    }
}
