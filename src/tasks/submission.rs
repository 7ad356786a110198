//! # Submission builder.
//!
//! [`Submission`] bundles everything one task run needs: the payload, an
//! optional transfer list, an optional module name (falling back to the
//! pool's default), and an optional abort token.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use poolvisor::{Buffer, Payload, Submission};
//!
//! let abort = CancellationToken::new();
//! let scratch = Buffer::new(1024);
//! let sub = Submission::new(Payload::Int(7))
//!     .transfer(scratch)
//!     .module("double")
//!     .abort(abort.clone());
//! assert!(sub.is_abortable());
//! ```

use tokio_util::sync::CancellationToken;

use crate::transfer::{Buffer, Movable, Payload};

/// Specification of one task run, passed to
/// [`Pool::submit`](crate::Pool::submit).
#[derive(Clone, Debug)]
pub struct Submission {
    pub(crate) payload: Payload,
    pub(crate) transfer: Vec<Buffer>,
    pub(crate) module: Option<String>,
    pub(crate) abort: Option<CancellationToken>,
}

impl Submission {
    /// Creates a submission carrying `payload`.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            transfer: Vec::new(),
            module: None,
            abort: None,
        }
    }

    /// Creates a submission whose payload buffer is moved, not copied.
    ///
    /// The wrapped buffer joins the transfer list; the caller-side handle
    /// detaches when the task is posted.
    pub fn moved(movable: Movable) -> Self {
        let buffer = movable.transferable().clone();
        Self {
            payload: movable.into_inner(),
            transfer: vec![buffer],
            module: None,
            abort: None,
        }
    }

    /// Adds a buffer to the transfer list (ownership moves to the worker).
    pub fn transfer(mut self, buffer: Buffer) -> Self {
        self.transfer.push(buffer);
        self
    }

    /// Targets a specific module instead of the pool default.
    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.module = Some(name.into());
        self
    }

    /// Attaches an abort token.
    ///
    /// An abortable task requires an otherwise-idle worker and cancels by
    /// tearing that worker down.
    pub fn abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    /// True when an abort token is attached.
    pub fn is_abortable(&self) -> bool {
        self.abort.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moved_buffer_joins_the_transfer_list() {
        let buf = Buffer::from_vec(vec![1, 2, 3]);
        let movable = Movable::new(Payload::Buffer(buf.clone())).unwrap();
        let sub = Submission::moved(movable);
        assert_eq!(sub.transfer.len(), 1);
        assert!(sub.transfer[0].same_handle(&buf));
    }

    #[test]
    fn builder_accumulates_options() {
        let sub = Submission::new(Payload::Null)
            .module("work")
            .transfer(Buffer::new(1))
            .transfer(Buffer::new(2));
        assert_eq!(sub.module.as_deref(), Some("work"));
        assert_eq!(sub.transfer.len(), 2);
        assert!(!sub.is_abortable());
    }
}
