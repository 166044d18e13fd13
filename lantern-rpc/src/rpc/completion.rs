//! Deferred completion of caller futures.
//!
//! Transport tasks remove a call from the registry and hand it here together
//! with its result. A small pool of Tokio tasks, fed round-robin, fires the
//! caller's sink. Whatever the caller chains onto its future therefore never
//! runs on (or blocks) a read loop.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::registry::{CallResult, OutstandingCall};
use crate::error::RpcError;

struct Completion {
    call: OutstandingCall,
    result: CallResult,
}

/// Round-robin pool of completion workers owned by one dispatcher.
pub(crate) struct CompletionQueue {
    workers: Vec<mpsc::UnboundedSender<Completion>>,
    next: AtomicUsize,
}

impl CompletionQueue {
    /// Spawn `count` workers (at least one) on the current Tokio runtime.
    ///
    /// Workers exit once the queue is dropped and their channel drains.
    pub(crate) fn start(count: usize) -> Result<Self, RpcError> {
        let handle = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;
        let workers = (0..count.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::unbounded_channel();
                handle.spawn(completion_worker(index, rx));
                tx
            })
            .collect();

        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Queue a call for resolution.
    pub(crate) fn submit(&self, call: OutstandingCall, result: CallResult) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        if let Err(mpsc::error::SendError(job)) = self.workers[index].send(Completion { call, result })
        {
            // Runtime is shutting down; the caller still gets its result.
            tracing::warn!(
                correlation_id = job.call.id(),
                worker = index,
                "completion worker gone, resolving inline"
            );
            resolve(job);
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

async fn completion_worker(index: usize, mut rx: mpsc::UnboundedReceiver<Completion>) {
    tracing::trace!(worker = index, "completion worker started");
    while let Some(job) = rx.recv().await {
        resolve(job);
    }
    tracing::trace!(worker = index, "completion worker stopped");
}

fn resolve(job: Completion) {
    let id = job.call.id();
    let method = job.call.method().to_string();
    let ok = job.result.is_ok();
    if job.call.resolve(job.result) {
        tracing::trace!(correlation_id = id, %method, ok, "call resolved");
    } else {
        tracing::debug!(correlation_id = id, %method, "caller dropped its future before resolution");
    }
}
