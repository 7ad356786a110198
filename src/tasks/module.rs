//! # Task modules: the code workers load and run.
//!
//! Defines the core [`TaskModule`] trait for named, cancelable units of work.
//!
//! - **[`TaskModule`]** — trait implemented by task code; resolved by name on
//!   the worker
//! - **[`ModuleRef`]** — shared handle (`Arc<dyn TaskModule>`) for passing
//!   modules across the runtime
//! - **[`ModuleFn`]** — function-backed implementation that wraps closures
//! - **[`ModuleRegistry`]** — name → module resolution table shared with
//!   every worker thread
//!
//! ## Rules
//! - `run` executes on a worker thread and **must** check
//!   `ctx.is_cancelled()` periodically in long loops; worker teardown is
//!   cooperative.
//! - `run(&self)` is `Fn`-style: safe to call from multiple workers
//!   concurrently, no shared mutable state unless the module opts in via
//!   `Arc`.

use std::borrow::Cow;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::transfer::Payload;

/// Shared handle to a task module.
pub type ModuleRef = Arc<dyn TaskModule>;

/// Named, cancelable unit of work hosted by worker threads.
pub trait TaskModule: Send + Sync + 'static {
    /// One-time initialization on worker bootstrap.
    ///
    /// Receives the pool's configured `worker_data`. A failure here marks the
    /// worker's bootstrap as failed (the worker never becomes ready).
    fn init(&self, worker_data: &Payload) -> Result<(), TaskError> {
        let _ = worker_data;
        Ok(())
    }

    /// Runs one task to completion.
    ///
    /// ### Cancellation requirements
    /// - Long-running implementations **must** check `ctx.is_cancelled()`
    ///   periodically and return [`TaskError::Canceled`] promptly.
    /// - Failure to do so delays worker teardown after an abort.
    fn run(&self, payload: Payload, ctx: CancellationToken) -> Result<Payload, TaskError>;
}

/// Function-backed module implementation.
///
/// Wraps a closure that runs one task per call.
///
/// ## Example
/// ```rust
/// use tokio_util::sync::CancellationToken;
/// use poolvisor::{ModuleFn, ModuleRef, Payload, TaskError};
///
/// let double: ModuleRef = ModuleFn::arc(|payload: Payload, _ctx: CancellationToken| {
///     let n = payload.as_int().ok_or_else(|| TaskError::failed("expected int"))?;
///     Ok(Payload::Int(n * 2))
/// });
/// ```
pub struct ModuleFn<F> {
    f: F,
}

impl<F> ModuleFn<F>
where
    F: Fn(Payload, CancellationToken) -> Result<Payload, TaskError> + Send + Sync + 'static,
{
    /// Creates a new function-backed module.
    ///
    /// Prefer [`ModuleFn::arc`] when you immediately need a [`ModuleRef`].
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the module and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F> TaskModule for ModuleFn<F>
where
    F: Fn(Payload, CancellationToken) -> Result<Payload, TaskError> + Send + Sync + 'static,
{
    fn run(&self, payload: Payload, ctx: CancellationToken) -> Result<Payload, TaskError> {
        (self.f)(payload, ctx)
    }
}

/// Concurrent name → module resolution table.
///
/// Shared (behind `Arc`) between the controller and every worker thread;
/// workers resolve the module named in each task envelope here.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, ModuleRef>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<Cow<'static, str>>, module: ModuleRef) {
        self.modules.insert(name.into().into_owned(), module);
    }

    /// Resolves a module by name.
    pub fn resolve(&self, name: &str) -> Option<ModuleRef> {
        self.modules.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the registered module names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// True if no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
