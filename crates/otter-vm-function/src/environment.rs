//! Captured lexical environments and the dynamic-lookup scope cache.
//!
//! A closure environment is the chain of scope frames visible to a nested
//! function, outermost first. Frames are shared between every closure
//! created against the same enclosing scope instance.
//!
//! [`CachedScope`] is derived data: a name -> frame-depth table built on the
//! first dynamic lookup. It is stamped with the environment's structural
//! epoch so a stale table is detectable; the owning function clears it on
//! every structural change it performs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::value::Value;

/// Bindings of one lexical scope
#[derive(Default)]
pub struct ScopeFrame {
    bindings: RwLock<IndexMap<Arc<str>, Value>>,
    /// Bumped whenever the binding set (not a binding's value) changes
    epoch: AtomicU64,
}

impl ScopeFrame {
    /// Create an empty frame
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a frame from initial bindings
    pub fn with_bindings<I, K>(bindings: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Arc<str>>,
    {
        let map = bindings.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Arc::new(Self {
            bindings: RwLock::new(map),
            epoch: AtomicU64::new(0),
        })
    }

    /// Read a binding
    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.read().get(name).cloned()
    }

    /// Whether the frame declares `name`
    pub fn has(&self, name: &str) -> bool {
        self.bindings.read().contains_key(name)
    }

    /// Assign an existing binding; false if the frame does not declare it
    pub fn set(&self, name: &str, value: Value) -> bool {
        match self.bindings.write().get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Declare (or redeclare) a binding
    pub fn declare(&self, name: impl Into<Arc<str>>, value: Value) {
        let previous = self.bindings.write().insert(name.into(), value);
        if previous.is_none() {
            self.epoch.fetch_add(1, Ordering::Release);
        }
    }

    /// Remove a binding; true if it existed
    pub fn delete(&self, name: &str) -> bool {
        let removed = self.bindings.write().shift_remove(name).is_some();
        if removed {
            self.epoch.fetch_add(1, Ordering::Release);
        }
        removed
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Whether the frame has no bindings
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Structural epoch of this frame
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Binding names in declaration order
    pub fn names(&self) -> Vec<Arc<str>> {
        self.bindings.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for ScopeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeFrame")
            .field("bindings", &self.names())
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// Chain of captured scope frames, outermost to innermost
#[derive(Debug, Default, Clone)]
pub struct ClosureEnvironment {
    frames: SmallVec<[Arc<ScopeFrame>; 4]>,
}

impl ClosureEnvironment {
    /// Environment over the given frames (outermost first)
    pub fn new(frames: impl IntoIterator<Item = Arc<ScopeFrame>>) -> Arc<Self> {
        Arc::new(Self {
            frames: frames.into_iter().collect(),
        })
    }

    /// A new environment with `frame` pushed as the innermost scope.
    ///
    /// Existing frames are shared, not copied.
    pub fn extend(&self, frame: Arc<ScopeFrame>) -> Arc<Self> {
        let mut frames = self.frames.clone();
        frames.push(frame);
        Arc::new(Self { frames })
    }

    /// Frame at `depth`, 0 being the outermost
    pub fn frame(&self, depth: usize) -> Option<&Arc<ScopeFrame>> {
        self.frames.get(depth)
    }

    /// Innermost frame
    pub fn innermost(&self) -> Option<&Arc<ScopeFrame>> {
        self.frames.last()
    }

    /// Number of frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether there are no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames, outermost first
    pub fn frames(&self) -> &[Arc<ScopeFrame>] {
        &self.frames
    }

    /// Depth of the frame that resolves `name`, innermost first
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.frames.iter().rposition(|frame| frame.has(name))
    }

    /// Resolve and read `name` without any cache
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.resolve(name).and_then(|depth| self.frames[depth].get(name))
    }

    /// Sum of frame epochs; changes whenever any frame's binding set does
    pub fn structural_epoch(&self) -> u64 {
        self.frames.iter().map(|frame| frame.epoch()).sum()
    }
}

/// Dynamic-lookup table materialized from a [`ClosureEnvironment`]
#[derive(Debug)]
pub struct CachedScope {
    slots: FxHashMap<Arc<str>, usize>,
    epoch: u64,
}

impl CachedScope {
    /// Build the table; inner frames shadow outer ones
    pub fn build(environment: &ClosureEnvironment) -> Arc<Self> {
        let mut slots = FxHashMap::default();
        for (depth, frame) in environment.frames().iter().enumerate() {
            for name in frame.names() {
                slots.insert(name, depth);
            }
        }
        Arc::new(Self {
            slots,
            epoch: environment.structural_epoch(),
        })
    }

    /// Frame depth resolving `name`
    pub fn depth_of(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    /// Environment epoch this table was built at
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the table still describes `environment`
    pub fn is_current(&self, environment: &ClosureEnvironment) -> bool {
        self.epoch == environment.structural_epoch()
    }

    /// Number of cached names
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no names are cached
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
