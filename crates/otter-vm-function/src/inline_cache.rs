//! Per-function inline cache blocks.
//!
//! A block holds one cache per site, laid out as load sites, then store
//! sites, then `instanceof` sites. Its length is fixed from the descriptor's
//! site counts when it is allocated and never changes.
//!
//! Cache contents are hints. Every entry is stamped with the block
//! generation it was written under; bumping the generation (on
//! deoptimization) makes every entry read as empty without touching it.

use std::sync::atomic::{AtomicU32, Ordering};
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicU8;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Maximum shapes a polymorphic site tracks before going megamorphic
pub const POLYMORPHIC_LIMIT: usize = 4;

/// Number of cache sites of each kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineCacheCounts {
    /// Property load sites
    pub load: u32,
    /// Property store sites
    pub store: u32,
    /// `instanceof` sites
    pub is_inst: u32,
}

impl InlineCacheCounts {
    /// Create site counts
    pub const fn new(load: u32, store: u32, is_inst: u32) -> Self {
        Self {
            load,
            store,
            is_inst,
        }
    }

    /// Total number of sites
    #[inline]
    pub const fn total(&self) -> usize {
        self.load as usize + self.store as usize + self.is_inst as usize
    }

    /// Block index of load site `n`
    #[inline]
    pub fn load_site(&self, n: u32) -> usize {
        debug_assert!(n < self.load, "load site {n} out of range");
        n as usize
    }

    /// Block index of store site `n`
    #[inline]
    pub fn store_site(&self, n: u32) -> usize {
        debug_assert!(n < self.store, "store site {n} out of range");
        self.load as usize + n as usize
    }

    /// Block index of `instanceof` site `n`
    #[inline]
    pub fn is_inst_site(&self, n: u32) -> usize {
        debug_assert!(n < self.is_inst, "instanceof site {n} out of range");
        self.load as usize + self.store as usize + n as usize
    }
}

/// State of a property access cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InlineCacheState {
    /// No information cached
    #[default]
    Uninitialized,
    /// One shape seen
    Monomorphic {
        /// Shape id of the receiver
        shape_id: u64,
        /// Slot offset of the property
        offset: u32,
    },
    /// Up to four shapes seen
    Polymorphic {
        /// Number of valid entries (2-4)
        count: u8,
        /// (shape_id, offset) pairs
        entries: [(u64, u32); POLYMORPHIC_LIMIT],
    },
    /// Too many shapes, always take the slow path
    Megamorphic,
}

impl InlineCacheState {
    /// Cached offset for `shape_id`
    pub fn lookup(&self, shape_id: u64) -> Option<u32> {
        match *self {
            Self::Monomorphic {
                shape_id: cached,
                offset,
            } if cached == shape_id => Some(offset),
            Self::Polymorphic { count, entries } => entries[..count as usize]
                .iter()
                .find(|(cached, _)| *cached == shape_id)
                .map(|&(_, offset)| offset),
            _ => None,
        }
    }

    /// Record a slow-path result, widening the state as needed
    pub fn record(&mut self, shape_id: u64, offset: u32) {
        *self = match *self {
            Self::Uninitialized => Self::Monomorphic { shape_id, offset },
            Self::Monomorphic {
                shape_id: cached, ..
            } if cached == shape_id => Self::Monomorphic { shape_id, offset },
            Self::Monomorphic {
                shape_id: first,
                offset: first_offset,
            } => {
                let mut entries = [(0, 0); POLYMORPHIC_LIMIT];
                entries[0] = (first, first_offset);
                entries[1] = (shape_id, offset);
                Self::Polymorphic { count: 2, entries }
            }
            Self::Polymorphic { count, mut entries } => {
                let len = count as usize;
                if let Some(entry) = entries[..len].iter_mut().find(|(s, _)| *s == shape_id) {
                    entry.1 = offset;
                    Self::Polymorphic { count, entries }
                } else if len < POLYMORPHIC_LIMIT {
                    entries[len] = (shape_id, offset);
                    Self::Polymorphic {
                        count: count + 1,
                        entries,
                    }
                } else {
                    Self::Megamorphic
                }
            }
            Self::Megamorphic => Self::Megamorphic,
        };
    }
}

/// Cached `instanceof` result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsInstCache {
    /// Identity of the tested object's prototype
    pub object_prototype: u64,
    /// Identity of the prototype tested against
    pub constructor_prototype: u64,
    /// Cached answer
    pub result: bool,
}

/// Contents of one cache slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InlineCache {
    /// Never written, or written under an older generation
    #[default]
    Empty,
    /// Property load/store cache
    Property(InlineCacheState),
    /// `instanceof` cache
    IsInst(IsInstCache),
}

impl InlineCache {
    /// Whether the slot holds anything
    pub fn is_populated(&self) -> bool {
        !matches!(self, Self::Empty | Self::Property(InlineCacheState::Uninitialized))
    }
}

/// Slot kind tag used by checked builds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Not used yet
    None = 0,
    /// Property cache
    Property = 1,
    /// `instanceof` cache
    IsInst = 2,
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotEntry {
    generation: u32,
    cache: InlineCache,
}

/// Fixed-length array of per-site caches
pub struct InlineCacheBlock {
    generation: AtomicU32,
    entries: RwLock<Box<[SlotEntry]>>,
    counts: InlineCacheCounts,
    #[cfg(debug_assertions)]
    kinds: Option<Box<[AtomicU8]>>,
}

impl InlineCacheBlock {
    /// Allocate a block sized from `counts`.
    ///
    /// `checked_kinds` enables per-slot kind tags; it has no effect without
    /// debug assertions.
    pub fn new(counts: InlineCacheCounts, checked_kinds: bool) -> Self {
        let len = counts.total();
        #[cfg(not(debug_assertions))]
        let _ = checked_kinds;
        Self {
            generation: AtomicU32::new(0),
            entries: RwLock::new(vec![SlotEntry::default(); len].into_boxed_slice()),
            counts,
            #[cfg(debug_assertions)]
            kinds: checked_kinds.then(|| {
                (0..len)
                    .map(|_| AtomicU8::new(CacheKind::None as u8))
                    .collect()
            }),
        }
    }

    /// Number of sites
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.total()
    }

    /// Whether the block has no sites
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Site counts this block was sized from
    #[inline]
    pub fn counts(&self) -> InlineCacheCounts {
        self.counts
    }

    /// Current generation
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether kind tags are being checked
    pub fn checks_kinds(&self) -> bool {
        #[cfg(debug_assertions)]
        let checked = self.kinds.is_some();
        #[cfg(not(debug_assertions))]
        let checked = false;
        checked
    }

    /// Current contents of slot `index`; stale slots read as empty
    pub fn get(&self, index: usize) -> InlineCache {
        self.check_index(index);
        let generation = self.generation();
        let entry = self.entries.read()[index];
        if entry.generation == generation {
            entry.cache
        } else {
            InlineCache::Empty
        }
    }

    /// Cached property offset at `index` for `shape_id`
    pub fn lookup_property(&self, index: usize, shape_id: u64) -> Option<u32> {
        self.check_kind(index, CacheKind::Property);
        match self.get(index) {
            InlineCache::Property(state) => state.lookup(shape_id),
            _ => None,
        }
    }

    /// Record a property slow-path result at `index`
    pub fn update_property(&self, index: usize, shape_id: u64, offset: u32) {
        self.check_index(index);
        self.check_kind(index, CacheKind::Property);
        let generation = self.generation();
        let mut entries = self.entries.write();
        let entry = &mut entries[index];
        let mut state = match entry.cache {
            InlineCache::Property(state) if entry.generation == generation => state,
            _ => InlineCacheState::Uninitialized,
        };
        state.record(shape_id, offset);
        *entry = SlotEntry {
            generation,
            cache: InlineCache::Property(state),
        };
    }

    /// Cached `instanceof` answer at `index`
    pub fn lookup_is_inst(&self, index: usize, object_prototype: u64, constructor_prototype: u64) -> Option<bool> {
        self.check_kind(index, CacheKind::IsInst);
        match self.get(index) {
            InlineCache::IsInst(cache)
                if cache.object_prototype == object_prototype && cache.constructor_prototype == constructor_prototype =>
            {
                Some(cache.result)
            }
            _ => None,
        }
    }

    /// Record an `instanceof` result at `index`
    pub fn update_is_inst(&self, index: usize, object_prototype: u64, constructor_prototype: u64, result: bool) {
        self.check_index(index);
        self.check_kind(index, CacheKind::IsInst);
        let generation = self.generation();
        self.entries.write()[index] = SlotEntry {
            generation,
            cache: InlineCache::IsInst(IsInstCache {
                object_prototype,
                constructor_prototype,
                result,
            }),
        };
    }

    /// Drop every cached assumption. Returns the new generation.
    pub fn invalidate_all(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Number of slots holding current data
    pub fn populated_count(&self) -> usize {
        let generation = self.generation();
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.generation == generation && entry.cache.is_populated())
            .count()
    }

    #[inline]
    fn check_index(&self, index: usize) {
        debug_assert!(
            index < self.len(),
            "inline cache index {index} out of range (count {})",
            self.len()
        );
    }

    #[cfg(debug_assertions)]
    #[inline]
    fn check_kind(&self, index: usize, kind: CacheKind) {
        let Some(kinds) = &self.kinds else {
            return;
        };
        if let Err(existing) = kinds[index].compare_exchange(
            CacheKind::None as u8,
            kind as u8,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            assert_eq!(
                existing, kind as u8,
                "inline cache {index} reused as {kind:?}"
            );
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn check_kind(&self, _index: usize, _kind: CacheKind) {}
}

impl std::fmt::Debug for InlineCacheBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineCacheBlock")
            .field("counts", &self.counts)
            .field("generation", &self.generation())
            .field("populated", &self.populated_count())
            .finish()
    }
}
