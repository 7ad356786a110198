//! # WorkerHandle: controller-side record of one worker thread.
//!
//! Owns the thread handle, the controller endpoint of the wake channel, the
//! in-flight task map, the idle-retirement timer, and the ready-state gate.
//!
//! ## Rules
//! - `|task_map| ≤ concurrent_tasks_per_worker` always; an abortable task
//!   occupies the worker exclusively (its usage reads as infinite).
//! - The ready gate is one-shot: pending → ready, never back.
//! - Destroying the handle completes every in-flight descriptor with a
//!   worker-terminated error and interrupts module code via the
//!   worker-scoped cancellation token.

use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::channel::{ChannelController, Request, WorkerMessage};
use crate::core::scheduler::Command;
use crate::error::PoolError;
use crate::tasks::TaskDescriptor;
use crate::transfer::encode;

/// Controller-side record owning one parallel execution thread.
pub(crate) struct WorkerHandle {
    id: u64,
    channel: ChannelController,
    task_map: HashMap<u64, TaskDescriptor>,
    thread: Option<JoinHandle<()>>,
    /// Worker-scoped token; cancelling it interrupts in-flight module code.
    token: CancellationToken,
    /// Eligible for selection.
    ready: bool,
    /// The ready sentinel actually arrived (distinct from the initial-fill
    /// shortcut, which marks `ready` without it).
    bootstrapped: bool,
    /// Guard for the armed idle timer, if any.
    idle_guard: Option<CancellationToken>,
    /// Increments per arming; stale timer fires are ignored.
    idle_epoch: u64,
}

impl WorkerHandle {
    pub fn new(
        id: u64,
        channel: ChannelController,
        thread: JoinHandle<()>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            channel,
            task_map: HashMap::new(),
            thread: Some(thread),
            token,
            ready: false,
            bootstrapped: false,
            idle_guard: None,
            idle_epoch: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[inline]
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Marks the handle ready. Returns false if it already was (the gate is
    /// one-shot).
    pub fn mark_ready(&mut self, via_sentinel: bool) -> bool {
        if via_sentinel {
            self.bootstrapped = true;
        }
        if self.ready {
            return false;
        }
        self.ready = true;
        true
    }

    /// Per-worker usage for selection: infinite while an abortable task holds
    /// the worker, else the in-flight count.
    pub fn current_usage(&self) -> usize {
        if self.task_map.len() == 1
            && self
                .task_map
                .values()
                .next()
                .is_some_and(TaskDescriptor::is_abortable)
        {
            return usize::MAX;
        }
        self.task_map.len()
    }

    /// Posts a task to the worker.
    ///
    /// Encodes the envelope against the transfer list, sends it, then
    /// increments the shared request lane (the send is the wake). On any
    /// failure the descriptor is completed with the applicable error and
    /// `false` is returned.
    pub fn post(&mut self, mut desc: TaskDescriptor) -> bool {
        debug_assert!(
            !self.task_map.contains_key(&desc.id()),
            "task {} already posted to worker {}",
            desc.id(),
            self.id
        );

        let (payload, transfer) = desc.wire_parts();
        let wire = match encode(payload, transfer) {
            Ok(w) => w,
            Err(e) => {
                desc.complete(Err(e));
                return false;
            }
        };

        let sent = self.channel.post(Request::Task {
            task_id: desc.id(),
            module: desc.module().to_string(),
            payload: wire,
        });
        if sent.is_err() {
            desc.complete(Err(PoolError::WorkerTerminated));
            return false;
        }

        desc.mark_dispatched(self.id);
        self.disarm_idle_timer();
        self.task_map.insert(desc.id(), desc);
        true
    }

    /// Removes one in-flight descriptor (its response arrived, or it is
    /// being aborted).
    pub fn take_task(&mut self, task_id: u64) -> Option<TaskDescriptor> {
        self.task_map.remove(&task_id)
    }

    /// True while this worker owns the descriptor.
    pub fn contains_task(&self, task_id: u64) -> bool {
        self.task_map.contains_key(&task_id)
    }

    /// Snapshots and clears the in-flight map (worker failure path).
    pub fn drain_tasks(&mut self) -> Vec<TaskDescriptor> {
        self.task_map.drain().map(|(_, d)| d).collect()
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.task_map.len()
    }

    /// Tears the worker down: interrupts module code, closes the request
    /// port, and completes every in-flight descriptor with a termination
    /// error. Returns the thread handle for joining (if still attached).
    pub fn destroy(&mut self) -> Option<JoinHandle<()>> {
        self.disarm_idle_timer();
        self.token.cancel();
        self.channel.close();
        for (_, mut desc) in self.task_map.drain() {
            desc.complete(Err(PoolError::WorkerTerminated));
        }
        self.thread.take()
    }

    /// Arms the idle-retirement timer; returns the epoch the fire must match.
    pub fn arm_idle_timer(
        &mut self,
        timeout: Duration,
        commands: UnboundedSender<Command>,
    ) -> u64 {
        self.disarm_idle_timer();
        self.idle_epoch += 1;
        let epoch = self.idle_epoch;
        let guard = CancellationToken::new();
        self.idle_guard = Some(guard.clone());

        let worker = self.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = commands.send(Command::IdleExpired { worker, epoch });
                }
                _ = guard.cancelled() => {}
            }
        });
        epoch
    }

    /// Cancels the armed idle timer, if any.
    pub fn disarm_idle_timer(&mut self) {
        if let Some(guard) = self.idle_guard.take() {
            guard.cancel();
        }
    }

    /// True when a stale idle fire should be ignored.
    pub fn idle_epoch_matches(&self, epoch: u64) -> bool {
        self.idle_epoch == epoch && self.idle_guard.is_some()
    }

    // --- channel passthroughs used by the scheduler's drain loops ---

    pub fn try_recv(&mut self) -> Option<WorkerMessage> {
        self.channel.try_recv()
    }

    pub fn has_unseen_responses(&self) -> bool {
        self.channel.has_unseen_responses()
    }

    pub fn note_response_seen(&mut self) {
        self.channel.note_response_seen();
    }
}
