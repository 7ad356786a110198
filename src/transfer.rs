//! # Payloads, buffers, and zero-copy transfer.
//!
//! Values cross the worker boundary as a [`Payload`] tree. Plain values are
//! deep-copied; [`Buffer`]s named in a submission's *transfer list* are
//! **moved**: their bytes are taken into the envelope and every
//! controller-side clone of the handle detaches to length 0.
//!
//! [`Movable`] is the marker wrapper that routes a buffer payload through the
//! transfer list without the caller assembling one by hand.
//!
//! ## Rules
//! - A transfer-list entry that is already detached fails the post
//!   synchronously with an invalid-transfer error.
//! - Duplicate transfer-list entries are rejected (a buffer can be moved
//!   once).
//! - Buffers *not* in the transfer list are copied; the caller's handle
//!   stays attached.

use std::sync::{Arc, Mutex};

use crate::error::PoolError;

/// Owned value tree shipped between the controller and a worker.
#[derive(Clone, Debug)]
pub enum Payload {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// A (possibly detached) byte buffer handle.
    Buffer(Buffer),
    /// Ordered sequence of payloads.
    List(Vec<Payload>),
}

impl Payload {
    /// Returns the integer value, if this payload is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text value, if this payload is `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the buffer handle, if this payload is a `Buffer`.
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Payload::Buffer(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Int(n)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Buffer> for Payload {
    fn from(b: Buffer) -> Self {
        Payload::Buffer(b)
    }
}

/// Shared handle to a detachable byte buffer.
///
/// Clones share the same backing storage; detaching through any clone
/// detaches all of them. A detached buffer reports length 0.
#[derive(Clone, Debug)]
pub struct Buffer {
    inner: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Buffer {
    /// Creates a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Wraps an existing byte vector.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(bytes))),
        }
    }

    /// Current length in bytes; 0 once detached.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .as_ref()
            .map_or(0, Vec::len)
    }

    /// True when the buffer holds no bytes (empty or detached).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the backing bytes have been moved out.
    pub fn is_detached(&self) -> bool {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .is_none()
    }

    /// Moves the bytes out, detaching every clone of this handle.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.inner.lock().expect("buffer lock poisoned").take()
    }

    /// Runs `f` over the bytes without detaching. `None` if detached.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .as_deref()
            .map(f)
    }

    /// Copies the bytes out without detaching. `None` if detached.
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        self.with(<[u8]>::to_vec)
    }

    /// True if `other` is a clone of this handle (same backing storage).
    pub fn same_handle(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Marker wrapper directing a buffer payload through the transfer list.
///
/// Construction succeeds synchronously only for transferable payloads
/// (currently [`Payload::Buffer`]); anything else is rejected with
/// [`PoolError::InvalidTransfer`].
#[derive(Clone, Debug)]
pub struct Movable {
    payload: Payload,
}

impl Movable {
    /// Tags `payload` for transfer.
    pub fn new(payload: Payload) -> Result<Self, PoolError> {
        match payload {
            Payload::Buffer(_) => Ok(Self { payload }),
            other => Err(PoolError::InvalidTransfer {
                reason: format!("payload of kind {} is not transferable", kind_name(&other)),
            }),
        }
    }

    /// The wrapped payload, unchanged (same buffer handle that went in).
    pub fn into_inner(self) -> Payload {
        self.payload
    }

    /// The buffer routed through the transfer list.
    pub fn transferable(&self) -> &Buffer {
        match &self.payload {
            Payload::Buffer(b) => b,
            _ => unreachable!("Movable only wraps buffers"),
        }
    }
}

fn kind_name(p: &Payload) -> &'static str {
    match p {
        Payload::Null => "null",
        Payload::Bool(_) => "bool",
        Payload::Int(_) => "int",
        Payload::Float(_) => "float",
        Payload::Text(_) => "text",
        Payload::Buffer(_) => "buffer",
        Payload::List(_) => "list",
    }
}

/// Serializes `payload` for the wire, honoring `transfer`.
///
/// Buffers listed in `transfer` have their bytes moved (the caller-side
/// handles detach); all other buffers are deep-copied. The result shares no
/// storage with the input.
///
/// Errors mirror the send primitive's failure modes: an already-detached or
/// duplicated transfer entry is an invalid transfer.
pub(crate) fn encode(payload: &Payload, transfer: &[Buffer]) -> Result<Payload, PoolError> {
    for (i, buf) in transfer.iter().enumerate() {
        if transfer[..i].iter().any(|prev| prev.same_handle(buf)) {
            return Err(PoolError::InvalidTransfer {
                reason: "duplicate buffer in transfer list".to_string(),
            });
        }
        if buf.is_detached() {
            return Err(PoolError::InvalidTransfer {
                reason: "buffer in transfer list is already detached".to_string(),
            });
        }
    }

    // Detach moved buffers exactly once, then rewrite the tree against the
    // taken bytes.
    let mut moved: Vec<(Buffer, Buffer)> = Vec::with_capacity(transfer.len());
    for buf in transfer {
        let bytes = buf.take().ok_or_else(|| PoolError::InvalidTransfer {
            reason: "buffer in transfer list is already detached".to_string(),
        })?;
        moved.push((buf.clone(), Buffer::from_vec(bytes)));
    }

    Ok(rewrite(payload, &moved))
}

fn rewrite(payload: &Payload, moved: &[(Buffer, Buffer)]) -> Payload {
    match payload {
        Payload::Null => Payload::Null,
        Payload::Bool(b) => Payload::Bool(*b),
        Payload::Int(n) => Payload::Int(*n),
        Payload::Float(f) => Payload::Float(*f),
        Payload::Text(s) => Payload::Text(s.clone()),
        Payload::Buffer(b) => {
            for (from, to) in moved {
                if from.same_handle(b) {
                    return Payload::Buffer(to.clone());
                }
            }
            // Not in the transfer list: structured-clone semantics.
            Payload::Buffer(Buffer::from_vec(b.to_vec().unwrap_or_default()))
        }
        Payload::List(items) => Payload::List(items.iter().map(|p| rewrite(p, moved)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_detach_semantics() {
        let buf = Buffer::new(10);
        let alias = buf.clone();
        assert_eq!(buf.len(), 10);
        assert!(!buf.is_detached());

        let bytes = buf.take().unwrap();
        assert_eq!(bytes.len(), 10);
        assert!(buf.is_detached());
        assert!(alias.is_detached());
        assert_eq!(alias.len(), 0);
    }

    #[test]
    fn movable_round_trips_the_same_handle() {
        let buf = Buffer::from_vec(vec![1, 2, 3]);
        let movable = Movable::new(Payload::Buffer(buf.clone())).unwrap();
        assert!(movable.transferable().same_handle(&buf));

        match movable.into_inner() {
            Payload::Buffer(inner) => assert!(inner.same_handle(&buf)),
            other => panic!("expected buffer payload, got {other:?}"),
        }
    }

    #[test]
    fn movable_rejects_non_transferables() {
        let err = Movable::new(Payload::Int(42)).unwrap_err();
        assert!(matches!(err, PoolError::InvalidTransfer { .. }));
    }

    #[test]
    fn encode_moves_listed_buffers_and_copies_the_rest() {
        let moved = Buffer::from_vec(vec![1, 2, 3]);
        let copied = Buffer::from_vec(vec![9, 9]);
        let payload = Payload::List(vec![
            Payload::Buffer(moved.clone()),
            Payload::Buffer(copied.clone()),
        ]);

        let wire = encode(&payload, &[moved.clone()]).unwrap();

        assert!(moved.is_detached());
        assert!(!copied.is_detached());

        let Payload::List(items) = wire else {
            panic!("expected list");
        };
        assert_eq!(items[0].as_buffer().unwrap().to_vec().unwrap(), vec![1, 2, 3]);
        assert_eq!(items[1].as_buffer().unwrap().to_vec().unwrap(), vec![9, 9]);
        // The wire copy is backed by fresh handles.
        assert!(!items[1].as_buffer().unwrap().same_handle(&copied));
    }

    #[test]
    fn encode_rejects_detached_transfer_entry() {
        let buf = Buffer::new(4);
        buf.take();
        let err = encode(&Payload::Buffer(buf.clone()), &[buf]).unwrap_err();
        assert!(matches!(err, PoolError::InvalidTransfer { .. }));
    }

    #[test]
    fn encode_rejects_duplicate_transfer_entry() {
        let buf = Buffer::new(4);
        let err = encode(&Payload::Buffer(buf.clone()), &[buf.clone(), buf.clone()]).unwrap_err();
        assert!(matches!(err, PoolError::InvalidTransfer { .. }));
        // The duplicate is caught before anything detaches.
        assert!(!buf.is_detached());
    }
}
