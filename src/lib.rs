//! # poolvisor
//!
//! **Poolvisor** is a worker-thread pool. Callers submit payloads against
//! named task modules; the pool steers each task to the least-loaded ready
//! worker thread, autoscales inside a configured band, bounds the overflow
//! queue, supports cancellation, and records wait/run latency histograms.
//!
//! ## Features
//!
//! | Area               | Description                                                          | Key types / traits                       |
//! |--------------------|----------------------------------------------------------------------|------------------------------------------|
//! | **Submission**     | Submit payloads, transfer buffers, pick modules, attach abort tokens. | [`Pool`], [`Submission`], [`Movable`]    |
//! | **Task modules**   | Named, cancelable units of work resolved on the worker.              | [`TaskModule`], [`ModuleFn`], [`ModuleRegistry`] |
//! | **Scheduling**     | Least-loaded steering, autoscale band, bounded FIFO queue.           | [`Config`], [`QueueCap`]                 |
//! | **Events**         | Drain/worker/task lifecycle stream with non-blocking fan-out.        | [`Event`], [`EventKind`], [`Subscribe`]  |
//! | **Observability**  | Percentile-enriched wait/run histograms, utilization.                | [`LatencySummary`]                       |
//! | **Errors**         | Typed errors for admission, teardown, and task execution.            | [`PoolError`], [`TaskError`]             |
//!
//! ```no_run
//! use std::sync::Arc;
//! use poolvisor::{Config, ModuleFn, ModuleRegistry, Payload, Pool, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(ModuleRegistry::new());
//!     registry.register(
//!         "double",
//!         ModuleFn::arc(|payload: Payload, _ctx| {
//!             let n = payload.as_int().ok_or_else(|| TaskError::failed("expected int"))?;
//!             Ok(Payload::Int(n * 2))
//!         }),
//!     );
//!
//!     let mut cfg = Config::default();
//!     cfg.module_name = Some("double".to_string());
//!
//!     let pool = Pool::new(cfg, registry)?;
//!     let result = pool.run(Payload::Int(21)).await?;
//!     assert_eq!(result.as_int(), Some(42));
//!
//!     pool.destroy().await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod core;
mod error;
mod metrics;
mod transfer;

pub mod events;
pub mod subscribers;
pub mod tasks;

// ---- Public re-exports ----

pub use config::{Config, QueueCap, WorkerOptions};
pub use crate::core::Pool;
pub use error::{PoolError, TaskError};
pub use events::{Event, EventKind};
pub use metrics::{LatencyHistogram, LatencySummary};
pub use subscribers::Subscribe;
pub use tasks::{ModuleFn, ModuleRef, ModuleRegistry, Submission, TaskModule};
pub use transfer::{Buffer, Movable, Payload};
