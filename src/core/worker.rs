//! # Worker thread body.
//!
//! Each worker is one OS thread hosting an isolated execution context:
//!
//! - **bootstrap**: resolve and `init` the default module if the pool
//!   configured one, then post the ready sentinel (a pre-ready failure is
//!   fatal and the worker never becomes eligible for selection);
//! - **loop**: block on the request port, resolve the envelope's module,
//!   run it under `catch_unwind`;
//! - **crash semantics**: a panic inside module code kills the worker — the
//!   controller replaces the whole thread rather than trusting its state.
//!
//! ## Rules
//! - Module errors are *task* failures and flow back as responses.
//! - Panics and bootstrap failures are *worker* failures (`Fatal`).
//! - Every in-flight task gets a child of the worker-scoped cancellation
//!   token, so tearing the worker down interrupts module code cooperatively.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerOptions;
use crate::core::channel::{ChannelWorker, Request};
use crate::error::TaskError;
use crate::tasks::ModuleRegistry;
use crate::transfer::Payload;

/// Everything one worker thread needs, moved into it at spawn.
pub(crate) struct WorkerContext {
    pub id: u64,
    pub channel: ChannelWorker,
    pub registry: Arc<ModuleRegistry>,
    pub default_module: Option<String>,
    pub worker_data: Payload,
    pub token: CancellationToken,
}

/// Spawns the worker thread.
pub(crate) fn spawn(ctx: WorkerContext, opts: &WorkerOptions) -> io::Result<thread::JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(format!("{}-{}", opts.name_prefix, ctx.id));
    if let Some(stack) = opts.stack_size {
        builder = builder.stack_size(stack);
    }
    builder.spawn(move || run(ctx))
}

fn run(ctx: WorkerContext) {
    if let Err(reason) = bootstrap(&ctx) {
        ctx.channel.send_fatal(reason);
        return;
    }
    ctx.channel.send_ready();

    loop {
        let request = match ctx.channel.recv() {
            Ok(r) => r,
            // Controller gone; nothing left to report to.
            Err(()) => return,
        };

        match request {
            Request::Terminate => break,
            Request::Task {
                task_id,
                module,
                payload,
            } => match execute(&ctx, &module, payload) {
                Ok(result) => ctx.channel.send_response(task_id, result),
                Err(reason) => {
                    ctx.channel.send_fatal(reason);
                    return;
                }
            },
        }

        if ctx.token.is_cancelled() {
            break;
        }
    }

    ctx.channel.send_exited();
}

/// Resolves and initializes the default module, if any.
fn bootstrap(ctx: &WorkerContext) -> Result<(), String> {
    let Some(name) = &ctx.default_module else {
        return Ok(());
    };
    let Some(module) = ctx.registry.resolve(name) else {
        return Err(format!("bootstrap: module '{name}' not found"));
    };
    module
        .init(&ctx.worker_data)
        .map_err(|e| format!("bootstrap: module '{name}' init failed: {e}"))
}

/// Runs one task. `Err` carries a worker-fatal crash reason.
fn execute(
    ctx: &WorkerContext,
    module_name: &str,
    payload: Payload,
) -> Result<Result<Payload, TaskError>, String> {
    let Some(module) = ctx.registry.resolve(module_name) else {
        return Ok(Err(TaskError::ModuleNotFound {
            name: module_name.to_string(),
        }));
    };

    let task_token = ctx.token.child_token();
    match catch_unwind(AssertUnwindSafe(|| module.run(payload, task_token))) {
        Ok(result) => Ok(result),
        Err(panic) => Err(panic_reason(panic.as_ref())),
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
