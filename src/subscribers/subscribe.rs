//! # Event subscribers.
//!
//! `Subscribe` is the extension point for observing the pool: latency
//! recorders, loggers, drain watchers. Subscribers are driven off the event
//! bus by the pool's fan-out (one feed task per subscriber), so a slow
//! subscriber delays neither the scheduler nor its peers.
//!
//! ## Contract
//! - `on_event` runs on a dedicated feed task, in per-subscriber FIFO order.
//! - `wants` pre-filters by [`EventKind`]; events a subscriber does not want
//!   never enter its queue. A drain watcher subscribes to `Drain` alone and
//!   is untouched by task-lifecycle chatter.
//! - Feed queues share the pool's `bus_capacity`; a subscriber that falls
//!   further behind than that loses events, and the loss is counted (see
//!   [`SubscriberSet::dropped`](crate::subscribers::SubscriberSet::dropped)).
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use poolvisor::{Event, EventKind, Subscribe};
//!
//! struct DrainWatch;
//!
//! #[async_trait]
//! impl Subscribe for DrainWatch {
//!     async fn on_event(&self, event: &Event) {
//!         println!("queue drained at seq {}", event.seq);
//!     }
//!
//!     fn wants(&self, kind: EventKind) -> bool {
//!         kind == EventKind::Drain
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "drain-watch"
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Contract for pool-event subscribers.
///
/// Called from a subscriber-dedicated feed task. Implementations should
/// avoid blocking the async runtime (prefer async I/O and cooperative
/// waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one pool event.
    async fn on_event(&self, event: &Event);

    /// Event kinds this subscriber wants; everything else is filtered out
    /// before queueing. Defaults to all kinds.
    fn wants(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    /// Name used in drop accounting and panic reports.
    fn name(&self) -> &'static str;
}
