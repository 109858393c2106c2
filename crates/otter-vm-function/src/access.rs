//! Inline cache management on function objects and the cache-driven
//! property and `instanceof` paths used by the interpreter.
//!
//! Closures whose descriptor keeps caches on the function object own a
//! block; all other closures share the descriptor's block.

use std::sync::Arc;

use crate::capability::ScriptFunctionBase;
use crate::context::StatsCounters;
use crate::function::FunctionObject;
use crate::inline_cache::{InlineCache, InlineCacheBlock};
use crate::object::JsObject;
use crate::shape::PropertyKey;
use crate::value::Value;

impl FunctionObject {
    /// Number of cache sites, fixed for the life of the object
    pub fn inline_cache_count(&self) -> usize {
        match self.as_inline_cache() {
            Some(owner) => owner.inline_cache_counts().total(),
            None => self.descriptor().inline_cache_counts.total(),
        }
    }

    /// The cache block this function reads, if allocated
    pub fn inline_cache_block(&self) -> Option<Arc<InlineCacheBlock>> {
        match self.as_inline_cache() {
            Some(owner) => owner.inline_caches(),
            None => self.descriptor().shared_inline_caches(),
        }
    }

    /// Allocate the cache block on first use
    pub fn create_inline_cache(&self) -> Arc<InlineCacheBlock> {
        let checked = self.context().config().checked_cache_kinds;
        let (block, created) = match self.as_inline_cache() {
            Some(owner) => owner.ensure_inline_caches(checked),
            None => self.descriptor().ensure_shared_inline_caches(checked),
        };
        if created {
            StatsCounters::bump(&self.context().counters.inline_cache_blocks_allocated);
            tracing::debug!(
                target: "otter::function",
                function = self.id(),
                sites = block.len(),
                shared = self.as_inline_cache().is_none(),
                "Inline caches allocated"
            );
        }
        block
    }

    /// Contents of cache `index`; empty while the block is unallocated.
    ///
    /// `index` must be below [`Self::inline_cache_count`].
    pub fn get_inline_cache(&self, index: usize) -> InlineCache {
        debug_assert!(
            index < self.inline_cache_count(),
            "inline cache index {index} out of range (count {})",
            self.inline_cache_count()
        );
        self.inline_cache_block()
            .map_or(InlineCache::Empty, |block| block.get(index))
    }

    /// Release the function's own cache block while the function may still
    /// be referenced elsewhere. Returns whether a block was released.
    pub fn clear_inline_cache_on_function_object(&self) -> bool {
        self.free_own_inline_caches::<false>()
    }

    /// Release the function's own cache block. `IS_SHUTDOWN` skips the
    /// bookkeeping only needed while other code can still observe it.
    pub fn free_own_inline_caches<const IS_SHUTDOWN: bool>(&self) -> bool {
        self.as_inline_cache()
            .is_some_and(|owner| owner.free_inline_caches::<IS_SHUTDOWN>())
    }

    /// Property load through cache `site`
    pub fn get_property_cached(&self, site: usize, object: &JsObject, key: &PropertyKey) -> Option<Value> {
        let block = self.create_inline_cache();
        let shape = object.shape();
        if let Some(offset) = block.lookup_property(site, shape.id()) {
            return object.get_slot(offset as usize);
        }

        match shape.get_offset(key) {
            Some(offset) => {
                block.update_property(site, shape.id(), offset as u32);
                object.get_slot(offset)
            }
            None => object.get(key),
        }
    }

    /// Property store through cache `site`
    pub fn set_property_cached(&self, site: usize, object: &JsObject, key: PropertyKey, value: Value) {
        let block = self.create_inline_cache();
        let before = object.shape();
        if let Some(offset) = block.lookup_property(site, before.id()) {
            if object.set_slot(offset as usize, value.clone()) {
                return;
            }
        }

        let offset = object.set(key, value);
        // Only stores that keep the shape are cacheable.
        if object.shape().id() == before.id() {
            block.update_property(site, before.id(), offset as u32);
        }
    }

    /// `object instanceof C` through cache `site`, where `prototype` is
    /// `C.prototype`
    pub fn is_instance_cached(&self, site: usize, object: &JsObject, prototype: &JsObject) -> bool {
        let block = self.create_inline_cache();
        let object_prototype = object.prototype().map_or(0, |p| p.id());
        if let Some(result) = block.lookup_is_inst(site, object_prototype, prototype.id()) {
            return result;
        }
        let result = object.has_in_prototype_chain(prototype);
        block.update_is_inst(site, object_prototype, prototype.id(), result);
        result
    }
}
