//! # Wake channel: shared counters plus a message port pair.
//!
//! Each worker is coupled to the controller by one [`WakeChannel`]:
//!
//! - a **shared counter region** of two 32-bit atomic lanes — requests at
//!   index 0, responses at index 1 — written with release ordering and read
//!   with acquire ordering;
//! - a **request port** the worker blocks on (the channel send doubles as the
//!   wake notification);
//! - a **response port** back into the async controller, paired with a
//!   lightweight signal on the scheduler's command channel.
//!
//! ## Rules
//! - The controller increments the request lane after every envelope send.
//! - The worker increments the response lane **before** enqueueing the
//!   response message, so a controller that observes the counter can never
//!   under-drain the port; the controller advances its `last_seen` cursor
//!   once per response actually drained.
//! - Signals never block and coalesce naturally: many may collapse into one
//!   scheduler turn.
//! - Counter wraparound at 2³² is fine; only equality is ever compared.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};

use tokio::sync::mpsc as tokio_mpsc;

use crate::core::scheduler::Command;
use crate::error::TaskError;
use crate::transfer::Payload;

/// Index of the request lane in the shared counter region.
pub(crate) const REQUEST_INDEX: usize = 0;
/// Index of the response lane in the shared counter region.
pub(crate) const RESPONSE_INDEX: usize = 1;

/// Fixed-size shared integer region: two 32-bit lanes.
#[derive(Debug, Default)]
pub(crate) struct SharedCounters {
    lanes: [AtomicU32; 2],
}

impl SharedCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Release-increment of one lane; returns the previous value.
    pub fn increment(&self, index: usize) -> u32 {
        self.lanes[index].fetch_add(1, Ordering::Release)
    }

    /// Acquire-load of one lane.
    pub fn load(&self, index: usize) -> u32 {
        self.lanes[index].load(Ordering::Acquire)
    }
}

/// Controller → worker task envelope.
#[derive(Debug)]
pub(crate) enum Request {
    /// One task to run: id, target module, pre-encoded payload.
    Task {
        task_id: u64,
        module: String,
        payload: Payload,
    },
    /// Orderly shutdown of the worker loop.
    Terminate,
}

/// Worker → controller messages.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Module bootstrap succeeded; the worker can take tasks.
    Ready,
    /// One task finished.
    Response {
        task_id: u64,
        result: Result<Payload, TaskError>,
    },
    /// The worker loop died (bootstrap failure or panic mid-task).
    Fatal { error: String },
    /// Clean loop exit after `Terminate` or port closure.
    Exited,
}

/// Both endpoints of one worker's wake channel.
pub(crate) struct WakeChannel;

impl WakeChannel {
    /// Builds the channel pair for worker `worker_id`.
    pub fn create(
        worker_id: u64,
        signal: tokio_mpsc::UnboundedSender<Command>,
    ) -> (ChannelController, ChannelWorker) {
        let (req_tx, req_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = tokio_mpsc::unbounded_channel();
        let counters = SharedCounters::new();

        let controller = ChannelController {
            requests: req_tx,
            responses: resp_rx,
            counters: Arc::clone(&counters),
            last_seen_responses: 0,
        };
        let worker = ChannelWorker {
            worker_id,
            requests: req_rx,
            responses: resp_tx,
            signal,
            counters,
        };
        (controller, worker)
    }
}

/// Controller-side endpoint, owned by the worker handle.
pub(crate) struct ChannelController {
    requests: mpsc::Sender<Request>,
    responses: tokio_mpsc::UnboundedReceiver<WorkerMessage>,
    counters: Arc<SharedCounters>,
    last_seen_responses: u32,
}

impl ChannelController {
    /// Sends an envelope and increments the request lane.
    ///
    /// The send is the wake: the worker is blocked on (or polling) this port.
    pub fn post(&mut self, request: Request) -> Result<(), ()> {
        self.requests.send(request).map_err(|_| ())?;
        self.counters.increment(REQUEST_INDEX);
        Ok(())
    }

    /// Closes the request port; the worker loop exits on its next receive.
    pub fn close(&mut self) {
        let _ = self.requests.send(Request::Terminate);
    }

    /// Non-blocking receive of the next worker message.
    pub fn try_recv(&mut self) -> Option<WorkerMessage> {
        self.responses.try_recv().ok()
    }

    /// True while the response lane is ahead of what we have drained.
    pub fn has_unseen_responses(&self) -> bool {
        self.counters.load(RESPONSE_INDEX) != self.last_seen_responses
    }

    /// Advances the drain cursor by one response.
    pub fn note_response_seen(&mut self) {
        self.last_seen_responses = self.last_seen_responses.wrapping_add(1);
    }

    /// In-flight count per the counter lanes (meaningful at quiescence).
    #[allow(dead_code)]
    pub fn counter_in_flight(&self) -> u32 {
        self.counters
            .load(REQUEST_INDEX)
            .wrapping_sub(self.counters.load(RESPONSE_INDEX))
    }
}

/// Worker-side endpoint, moved into the worker thread.
pub(crate) struct ChannelWorker {
    worker_id: u64,
    requests: mpsc::Receiver<Request>,
    responses: tokio_mpsc::UnboundedSender<WorkerMessage>,
    signal: tokio_mpsc::UnboundedSender<Command>,
    counters: Arc<SharedCounters>,
}

impl ChannelWorker {
    /// Blocking receive of the next envelope. `Err` means the controller is
    /// gone.
    pub fn recv(&self) -> Result<Request, ()> {
        self.requests.recv().map_err(|_| ())
    }

    /// Posts the ready sentinel.
    pub fn send_ready(&self) {
        self.push(WorkerMessage::Ready);
    }

    /// Posts one task response, making it visible on the response lane first.
    pub fn send_response(&self, task_id: u64, result: Result<Payload, TaskError>) {
        self.counters.increment(RESPONSE_INDEX);
        self.push(WorkerMessage::Response { task_id, result });
    }

    /// Reports a fatal worker failure.
    pub fn send_fatal(&self, error: impl Into<String>) {
        self.push(WorkerMessage::Fatal {
            error: error.into(),
        });
    }

    /// Reports a clean loop exit.
    pub fn send_exited(&self) {
        self.push(WorkerMessage::Exited);
    }

    fn push(&self, msg: WorkerMessage) {
        // Both sends are best-effort: a torn-down controller has nothing
        // left to deliver to.
        let _ = self.responses.send(msg);
        let _ = self.signal.send(Command::WorkerSignal(self.worker_id));
    }
}
