//! Finalization queue — runs `GcObject::finalize` at end of life.
//!
//! Managed objects are handed out as `Arc`s. The queue keeps one strong
//! reference to every registered object; an object whose only remaining
//! reference is the queue's is unreachable and gets finalized on the next
//! [`FinalizationQueue::collect`]. [`FinalizationQueue::shutdown`] finalizes
//! everything that is left with `is_shutdown = true`.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::object::GcObject;

thread_local! {
    /// Set while `shutdown` is finalizing on this thread. Finalizers must
    /// not touch other managed objects while it is set, they may already
    /// be gone.
    static GC_DEALLOC_IN_PROGRESS: Cell<bool> = const { Cell::new(false) };
}

/// Returns true if the queue is tearing down every object on this thread.
pub fn is_dealloc_in_progress() -> bool {
    GC_DEALLOC_IN_PROGRESS.with(|f| f.get())
}

/// Counters from the finalization queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizationStats {
    /// Objects currently registered
    pub registered: usize,
    /// Objects finalized by `collect`
    pub finalized: usize,
    /// Objects finalized by `shutdown`
    pub finalized_at_shutdown: usize,
}

/// Registry of objects awaiting finalization.
#[derive(Default)]
pub struct FinalizationQueue {
    entries: Mutex<Vec<Arc<dyn GcObject>>>,
    stats: Mutex<FinalizationStats>,
}

impl FinalizationQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an object until it becomes unreachable.
    pub fn register(&self, object: Arc<dyn GcObject>) {
        let mut entries = self.entries.lock();
        entries.push(object);
        self.stats.lock().registered = entries.len();
    }

    /// Number of tracked objects
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finalize and drop every object only the queue still references.
    ///
    /// Returns the number of finalized objects.
    pub fn collect(&self) -> usize {
        let dead: Vec<Arc<dyn GcObject>> = {
            let mut entries = self.entries.lock();
            let (dead, live): (Vec<_>, Vec<_>) = entries
                .drain(..)
                .partition(|object| Arc::strong_count(object) == 1);
            *entries = live;
            self.stats.lock().registered = entries.len();
            dead
        };

        // Finalizers run outside the lock; they may register new objects.
        for object in &dead {
            object.finalize(false);
        }

        let count = dead.len();
        self.stats.lock().finalized += count;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            finalized = count,
            remaining = self.len(),
            "Finalization pass complete"
        );

        count
    }

    /// Finalize every tracked object for runtime teardown.
    ///
    /// Returns the number of finalized objects.
    pub fn shutdown(&self) -> usize {
        let entries: Vec<Arc<dyn GcObject>> = std::mem::take(&mut *self.entries.lock());

        GC_DEALLOC_IN_PROGRESS.with(|f| f.set(true));
        for object in &entries {
            object.finalize(true);
        }
        GC_DEALLOC_IN_PROGRESS.with(|f| f.set(false));

        let count = entries.len();
        {
            let mut stats = self.stats.lock();
            stats.registered = 0;
            stats.finalized_at_shutdown += count;
        }

        #[cfg(feature = "gc_logging")]
        tracing::info!(target: "otter::gc", finalized = count, "Shutdown finalization complete");

        count
    }

    /// Snapshot of the queue counters
    pub fn stats(&self) -> FinalizationStats {
        *self.stats.lock()
    }
}
