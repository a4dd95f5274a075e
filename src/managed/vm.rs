//! The managed virtual machine.
//!
//! Tracks which native threads are attached, the pending exception of each
//! thread, live transient references, and the native handle table.

use super::handle::HandleTable;
use super::object::Throwable;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// VM counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStats {
    pub attaches: u64,
    pub detaches: u64,
    pub exceptions_logged: u64,
}

#[derive(Debug, Default)]
struct ThreadState {
    attached: HashSet<ThreadId>,
    pending: HashMap<ThreadId, Throwable>,
    local_refs: HashMap<ThreadId, usize>,
}

/// Managed runtime instance shared by every bridge component.
#[derive(Debug)]
pub struct Vm {
    threads: Mutex<ThreadState>,
    handles: HandleTable,
    stats: Mutex<VmStats>,
}

impl Vm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            threads: Mutex::new(ThreadState::default()),
            handles: HandleTable::new(),
            stats: Mutex::new(VmStats::default()),
        })
    }

    fn threads(&self) -> MutexGuard<'_, ThreadState> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats_mut(&self) -> MutexGuard<'_, VmStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Native counterparts addressed by handle.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn stats(&self) -> VmStats {
        self.stats_mut().clone()
    }

    // =========================================================================
    // Thread attachment
    // =========================================================================

    pub fn is_current_thread_attached(&self) -> bool {
        self.threads().attached.contains(&thread::current().id())
    }

    /// Attach the calling thread. Returns true if this call performed the attach.
    pub fn attach_current_thread(&self) -> bool {
        let newly = self.threads().attached.insert(thread::current().id());
        if newly {
            self.stats_mut().attaches += 1;
            tracing::trace!("attached thread {:?}", thread::current().id());
        }
        newly
    }

    /// Detach the calling thread, discarding its per-thread state.
    pub fn detach_current_thread(&self) {
        let id = thread::current().id();
        let removed = {
            let mut threads = self.threads();
            threads.pending.remove(&id);
            threads.local_refs.remove(&id);
            threads.attached.remove(&id)
        };
        if removed {
            self.stats_mut().detaches += 1;
            tracing::trace!("detached thread {:?}", id);
        }
    }

    // =========================================================================
    // Pending exceptions
    // =========================================================================

    pub(crate) fn set_pending(&self, throwable: Throwable) {
        self.threads()
            .pending
            .insert(thread::current().id(), throwable);
    }

    pub(crate) fn pending(&self) -> Option<Throwable> {
        self.threads()
            .pending
            .get(&thread::current().id())
            .cloned()
    }

    pub(crate) fn take_pending(&self) -> Option<Throwable> {
        self.threads().pending.remove(&thread::current().id())
    }

    pub(crate) fn record_logged_exception(&self) {
        self.stats_mut().exceptions_logged += 1;
    }

    // =========================================================================
    // Transient references
    // =========================================================================

    pub(crate) fn acquire_local(&self) {
        *self
            .threads()
            .local_refs
            .entry(thread::current().id())
            .or_insert(0) += 1;
    }

    pub(crate) fn release_local(&self) {
        let mut threads = self.threads();
        if let Some(count) = threads.local_refs.get_mut(&thread::current().id()) {
            *count = count.saturating_sub(1);
        }
    }

    /// Live transient references held by the calling thread.
    pub fn local_ref_count(&self) -> usize {
        self.threads()
            .local_refs
            .get(&thread::current().id())
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_is_recorded_once() {
        let vm = Vm::new();
        assert!(!vm.is_current_thread_attached());
        assert!(vm.attach_current_thread());
        assert!(!vm.attach_current_thread());
        assert!(vm.is_current_thread_attached());

        vm.detach_current_thread();
        assert!(!vm.is_current_thread_attached());
        assert_eq!(vm.stats().attaches, 1);
        assert_eq!(vm.stats().detaches, 1);
    }

    #[test]
    fn test_pending_exception_is_per_thread() {
        let vm = Vm::new();
        vm.set_pending(Throwable::new("Boom", "main thread"));

        let other = Arc::clone(&vm);
        let seen = std::thread::spawn(move || other.pending().is_some())
            .join()
            .unwrap();
        assert!(!seen);
        assert_eq!(vm.take_pending().unwrap().class, "Boom");
        assert!(vm.pending().is_none());
    }

    #[test]
    fn test_detach_discards_thread_state() {
        let vm = Vm::new();
        vm.attach_current_thread();
        vm.set_pending(Throwable::new("Boom", ""));
        vm.acquire_local();
        vm.detach_current_thread();
        assert!(vm.pending().is_none());
        assert_eq!(vm.local_ref_count(), 0);
    }
}
