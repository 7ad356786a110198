//! # Per-submission task descriptor.
//!
//! One [`TaskDescriptor`] exists per accepted submission, from admission to
//! completion. It is either in the scheduler's queue or in exactly one worker
//! handle's task map — never both, never neither.
//!
//! The completion channel fires exactly once per descriptor, whether on
//! success, task error, worker teardown, crash, or abort; later completion
//! attempts are no-ops.

use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::transfer::{Buffer, Payload};

/// Per-submission record owned by the scheduler (queued) or by one worker
/// handle (dispatched).
pub(crate) struct TaskDescriptor {
    id: u64,
    payload: Payload,
    transfer: Vec<Buffer>,
    module: String,
    abort: Option<CancellationToken>,
    /// Cancelled on completion so the abort watcher task ends with us.
    watcher_guard: Option<CancellationToken>,
    created_at: Instant,
    started_at: Option<Instant>,
    owning_worker: Option<u64>,
    reply: Option<oneshot::Sender<Result<Payload, PoolError>>>,
}

impl TaskDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        payload: Payload,
        transfer: Vec<Buffer>,
        module: String,
        abort: Option<CancellationToken>,
        created_at: Instant,
        reply: oneshot::Sender<Result<Payload, PoolError>>,
    ) -> Self {
        let watcher_guard = abort.as_ref().map(|_| CancellationToken::new());
        Self {
            id,
            payload,
            transfer,
            module,
            abort,
            watcher_guard,
            created_at,
            started_at: None,
            owning_worker: None,
            reply: Some(reply),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn module(&self) -> &str {
        &self.module
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// The payload and its transfer list, for envelope encoding.
    #[inline]
    pub fn wire_parts(&self) -> (&Payload, &[Buffer]) {
        (&self.payload, &self.transfer)
    }

    /// Abortable tasks monopolize their worker.
    #[inline]
    pub fn is_abortable(&self) -> bool {
        self.abort.is_some()
    }

    #[inline]
    pub fn abort_token(&self) -> Option<&CancellationToken> {
        self.abort.as_ref()
    }

    /// Guard handed to the single-shot abort watcher.
    #[inline]
    pub fn watcher_guard(&self) -> Option<&CancellationToken> {
        self.watcher_guard.as_ref()
    }

    #[inline]
    pub fn owning_worker(&self) -> Option<u64> {
        self.owning_worker
    }

    /// Stamps dispatch: `started_at` and the owning worker.
    pub fn mark_dispatched(&mut self, worker: u64) {
        self.started_at = Some(Instant::now());
        self.owning_worker = Some(worker);
    }

    /// Completes the submission. Idempotent; only the first call delivers.
    pub fn complete(&mut self, result: Result<Payload, PoolError>) {
        if let Some(guard) = self.watcher_guard.take() {
            guard.cancel();
        }
        if let Some(reply) = self.reply.take() {
            // The submitter may have dropped its future; nothing to deliver to.
            let _ = reply.send(result);
        }
    }
}

impl Drop for TaskDescriptor {
    fn drop(&mut self) {
        // A descriptor dropped without an explicit completion still resolves
        // its submitter, keeping the exactly-once contract.
        self.complete(Err(PoolError::WorkerTerminated));
    }
}
