//! # WorkerSet: the async-ready pool of worker handles.
//!
//! Two disjoint id sets — `pending` (spawned, not yet ready) and `ready`
//! (eligible for selection) — over one handle map. Ready iteration preserves
//! insertion order, which is the selection tie-break.
//!
//! ## Rules
//! - `len() = |pending| + |ready|` and never exceeds `max_threads`
//!   (enforced by the scheduler's spawn sites).
//! - `pending_capacity` is the task headroom of still-warming workers; the
//!   queue admission bound includes it.

use std::collections::HashMap;

use crate::core::handle::WorkerHandle;

/// Pending/ready bookkeeping over the live worker handles.
pub(crate) struct WorkerSet {
    handles: HashMap<u64, WorkerHandle>,
    pending: Vec<u64>,
    ready: Vec<u64>,
    max_per_worker: usize,
}

impl WorkerSet {
    pub fn new(max_per_worker: usize) -> Self {
        Self {
            handles: HashMap::new(),
            pending: Vec::new(),
            ready: Vec::new(),
            max_per_worker,
        }
    }

    /// Total live workers, pending and ready.
    pub fn len(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    /// Task headroom of still-pending workers.
    pub fn pending_capacity(&self) -> usize {
        self.pending.len() * self.max_per_worker
    }

    /// Adds a freshly spawned worker to the pending set.
    pub fn insert_pending(&mut self, handle: WorkerHandle) {
        self.pending.push(handle.id());
        self.handles.insert(handle.id(), handle);
    }

    /// Adds a worker directly to the ready set (initial-fill shortcut: there
    /// is no work yet to post, so waiting for the sentinel buys nothing).
    pub fn insert_ready(&mut self, mut handle: WorkerHandle) {
        handle.mark_ready(false);
        self.ready.push(handle.id());
        self.handles.insert(handle.id(), handle);
    }

    /// Moves a pending worker to the ready set on its sentinel.
    ///
    /// Returns true when this was the pending→ready edge.
    pub fn mark_ready(&mut self, id: u64) -> bool {
        let Some(handle) = self.handles.get_mut(&id) else {
            return false;
        };
        let edge = handle.mark_ready(true);
        if edge {
            self.pending.retain(|&p| p != id);
            self.ready.push(id);
        }
        edge
    }

    /// Removes a worker entirely.
    pub fn remove(&mut self, id: u64) -> Option<WorkerHandle> {
        let handle = self.handles.remove(&id)?;
        self.pending.retain(|&p| p != id);
        self.ready.retain(|&r| r != id);
        Some(handle)
    }

    pub fn get(&self, id: u64) -> Option<&WorkerHandle> {
        self.handles.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut WorkerHandle> {
        self.handles.get_mut(&id)
    }

    /// All live worker ids, pending first, in insertion order.
    pub fn ids(&self) -> Vec<u64> {
        self.pending.iter().chain(self.ready.iter()).copied().collect()
    }

    /// The worker owning `task_id`, if any.
    pub fn find_owner(&self, task_id: u64) -> Option<u64> {
        self.handles
            .iter()
            .find(|(_, h)| h.contains_task(task_id))
            .map(|(&id, _)| id)
    }

    /// Least-loaded ready worker with spare capacity.
    ///
    /// A fully idle worker wins immediately; otherwise the lowest positive
    /// usage strictly below the per-worker limit; ties break by insertion
    /// order. Abortable occupants read as infinite usage and are never
    /// selected.
    pub fn find_available(&self) -> Option<u64> {
        let mut best: Option<(u64, usize)> = None;
        for &id in &self.ready {
            let Some(handle) = self.handles.get(&id) else {
                continue;
            };
            let usage = handle.current_usage();
            if usage == 0 {
                return Some(id);
            }
            if usage < self.max_per_worker && best.map_or(true, |(_, b)| usage < b) {
                best = Some((id, usage));
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::WakeChannel;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn handle(id: u64) -> WorkerHandle {
        let (signal, _rx) = mpsc::unbounded_channel();
        let (controller, _worker) = WakeChannel::create(id, signal);
        // A parked placeholder thread; never joined in these tests.
        let thread = std::thread::spawn(|| {});
        WorkerHandle::new(id, controller, thread, CancellationToken::new())
    }

    #[test]
    fn pending_and_ready_are_disjoint() {
        let mut set = WorkerSet::new(2);
        set.insert_pending(handle(1));
        set.insert_pending(handle(2));
        assert_eq!(set.len(), 2);
        assert_eq!(set.pending_capacity(), 4);
        assert_eq!(set.find_available(), None);

        assert!(set.mark_ready(1));
        assert!(!set.mark_ready(1));
        assert_eq!(set.len(), 2);
        assert_eq!(set.pending_capacity(), 2);
        assert_eq!(set.find_available(), Some(1));
    }

    #[test]
    fn initial_fill_shortcut_is_ready_without_sentinel() {
        let mut set = WorkerSet::new(1);
        set.insert_ready(handle(5));
        assert_eq!(set.pending_capacity(), 0);
        assert_eq!(set.find_available(), Some(5));
        assert!(!set.get(5).unwrap().is_bootstrapped());

        // The sentinel still lands, idempotently.
        assert!(!set.mark_ready(5));
        assert!(set.get(5).unwrap().is_bootstrapped());
    }

    #[test]
    fn remove_clears_both_sets() {
        let mut set = WorkerSet::new(1);
        set.insert_pending(handle(1));
        set.insert_ready(handle(2));
        assert!(set.remove(1).is_some());
        assert!(set.remove(2).is_some());
        assert!(set.remove(2).is_none());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn ready_iteration_order_breaks_ties() {
        let mut set = WorkerSet::new(4);
        set.insert_ready(handle(3));
        set.insert_ready(handle(1));
        set.insert_ready(handle(2));
        // All idle: first inserted wins.
        assert_eq!(set.find_available(), Some(3));
    }
}
