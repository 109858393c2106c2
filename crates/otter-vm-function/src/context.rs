//! Script context: configuration, counters and finalization for the
//! function objects it creates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use otter_vm_gc::FinalizationQueue;

use crate::config::FunctionConfig;

/// Snapshot of function-object counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionStats {
    /// Number of closures instantiated.
    pub closures_created: u64,
    /// Number of entry points published.
    pub entry_point_changes: u64,
    /// Number of JitCompiled -> Interpreted downgrades.
    pub downgrades: u64,
    /// Number of compiled entries rejected for a stale inline cache generation.
    pub stale_code_rejected: u64,
    /// Number of recorded JIT bailouts.
    pub bailouts: u64,
    /// Number of inline cache blocks allocated.
    pub inline_cache_blocks_allocated: u64,
    /// Number of inline cache blocks released cooperatively.
    pub inline_cache_blocks_freed: u64,
    /// Number of inline cache blocks released during shutdown.
    pub inline_cache_blocks_freed_at_shutdown: u64,
    /// Number of cached scope invalidations that dropped a cache.
    pub scope_cache_invalidations: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    pub(crate) closures_created: AtomicU64,
    pub(crate) entry_point_changes: AtomicU64,
    pub(crate) downgrades: AtomicU64,
    pub(crate) stale_code_rejected: AtomicU64,
    pub(crate) bailouts: AtomicU64,
    pub(crate) inline_cache_blocks_allocated: AtomicU64,
    pub(crate) inline_cache_blocks_freed: AtomicU64,
    pub(crate) inline_cache_blocks_freed_at_shutdown: AtomicU64,
    pub(crate) scope_cache_invalidations: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FunctionStats {
        FunctionStats {
            closures_created: self.closures_created.load(Ordering::Relaxed),
            entry_point_changes: self.entry_point_changes.load(Ordering::Relaxed),
            downgrades: self.downgrades.load(Ordering::Relaxed),
            stale_code_rejected: self.stale_code_rejected.load(Ordering::Relaxed),
            bailouts: self.bailouts.load(Ordering::Relaxed),
            inline_cache_blocks_allocated: self.inline_cache_blocks_allocated.load(Ordering::Relaxed),
            inline_cache_blocks_freed: self.inline_cache_blocks_freed.load(Ordering::Relaxed),
            inline_cache_blocks_freed_at_shutdown: self
                .inline_cache_blocks_freed_at_shutdown
                .load(Ordering::Relaxed),
            scope_cache_invalidations: self.scope_cache_invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Owner of the function objects created for one script realm.
///
/// Closures are created through the methods in [`crate::closure`]. Every
/// closure is registered with the context's finalization queue so its
/// out-of-line state is released when it becomes unreachable or when the
/// context shuts down.
pub struct ScriptContext {
    config: FunctionConfig,
    pub(crate) counters: StatsCounters,
    pub(crate) finalization: FinalizationQueue,
}

impl ScriptContext {
    /// Create a context with the given configuration
    pub fn new(config: FunctionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            counters: StatsCounters::default(),
            finalization: FinalizationQueue::new(),
        })
    }

    /// Create a context configured from `OTTER_*` environment variables
    pub fn from_env() -> Arc<Self> {
        Self::new(FunctionConfig::from_env())
    }

    /// Active configuration
    pub fn config(&self) -> &FunctionConfig {
        &self.config
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> FunctionStats {
        self.counters.snapshot()
    }

    /// Number of function objects awaiting finalization
    pub fn live_functions(&self) -> usize {
        self.finalization.len()
    }

    /// Finalize closures nothing else references. Returns how many were
    /// finalized.
    pub fn collect_garbage(&self) -> usize {
        self.finalization.collect()
    }

    /// Finalize every remaining closure for runtime teardown.
    pub fn shutdown(&self) -> usize {
        let finalized = self.finalization.shutdown();
        tracing::debug!(target: "otter::function", finalized, "Script context shut down");
        finalized
    }
}

impl Default for ScriptContext {
    fn default() -> Self {
        Self {
            config: FunctionConfig::default(),
            counters: StatsCounters::default(),
            finalization: FinalizationQueue::new(),
        }
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("config", &self.config)
            .field("live_functions", &self.live_functions())
            .finish()
    }
}
