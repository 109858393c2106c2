//! Entry points and tier transitions.
//!
//! A function object always has exactly one current [`EntryPoint`]:
//!
//! ```text
//! Deferred --first call--> Interpreted --compile--> JitCompiled
//!                              ^                        |
//!                              +------ downgrade -------+
//! ```
//!
//! `JitInFlight` is a flag that coexists with `Interpreted` while a
//! background compile runs.
//!
//! Publishing builds the new record completely, swaps it in under the entry
//! lock and stores the raw entry address with release ordering. A call
//! snapshots the current entry once and runs to completion on it, so a call
//! racing a publish finishes on the tier it started with.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::capability::ScriptFunctionBase;
use crate::context::StatsCounters;
use crate::error::{FunctionError, FunctionResult};
use crate::function::{FunctionObject, ScriptFunction};
use crate::value::Value;

/// Native calling convention shared by every tier
pub type JavascriptMethod = fn(&FunctionObject, &[Value]) -> FunctionResult<Value>;

static NEXT_ENTRY_POINT_ID: AtomicU64 = AtomicU64::new(1);

/// Execution tier of an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryTier {
    /// Body not parsed; the method parses on demand and re-dispatches
    Deferred,
    /// Bytecode interpreter
    Interpreted,
    /// Optimized native code
    JitCompiled,
}

/// Metadata describing code about to be published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointInfo {
    /// Tier of the code
    pub tier: EntryTier,
    /// Size of the native code in bytes (0 for thunks)
    pub code_size: u32,
    /// Inline cache generation the code was specialized against
    pub inline_cache_generation: Option<u32>,
}

impl EntryPointInfo {
    /// Deferred-parse thunk
    pub const fn deferred() -> Self {
        Self {
            tier: EntryTier::Deferred,
            code_size: 0,
            inline_cache_generation: None,
        }
    }

    /// Interpreter thunk
    pub const fn interpreted() -> Self {
        Self {
            tier: EntryTier::Interpreted,
            code_size: 0,
            inline_cache_generation: None,
        }
    }

    /// Compiled code of `code_size` bytes
    pub const fn jit_compiled(code_size: u32) -> Self {
        Self {
            tier: EntryTier::JitCompiled,
            code_size,
            inline_cache_generation: None,
        }
    }

    /// Record the cache generation the code depends on
    pub const fn with_inline_cache_generation(mut self, generation: u32) -> Self {
        self.inline_cache_generation = Some(generation);
        self
    }
}

/// A published entry point: tier metadata paired with its method
pub struct EntryPoint {
    id: u64,
    info: EntryPointInfo,
    method: JavascriptMethod,
}

impl EntryPoint {
    /// Build a fully initialized record
    pub fn new(info: EntryPointInfo, method: JavascriptMethod) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ENTRY_POINT_ID.fetch_add(1, Ordering::Relaxed),
            info,
            method,
        })
    }

    /// Unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tier metadata
    pub fn info(&self) -> EntryPointInfo {
        self.info
    }

    /// Tier
    pub fn tier(&self) -> EntryTier {
        self.info.tier
    }

    /// Method
    pub fn method(&self) -> JavascriptMethod {
        self.method
    }

    /// Code address stored in the function's entry word
    pub fn address(&self) -> usize {
        self.method as usize
    }

    /// Run this entry for `function`
    #[inline]
    pub fn invoke(&self, function: &FunctionObject, args: &[Value]) -> FunctionResult<Value> {
        (self.method)(function, args)
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoint")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}

/// Indirect call cell holding a function's entry point.
///
/// Thunks are patched when the entry point they target is replaced.
pub struct CallThunk {
    target: RwLock<Arc<EntryPoint>>,
    address: AtomicUsize,
    patches: AtomicU32,
}

impl CallThunk {
    fn new(target: Arc<EntryPoint>) -> Arc<Self> {
        Arc::new(Self {
            address: AtomicUsize::new(target.address()),
            target: RwLock::new(target),
            patches: AtomicU32::new(0),
        })
    }

    /// Entry point the thunk jumps to
    pub fn target(&self) -> Arc<EntryPoint> {
        self.target.read().clone()
    }

    /// Raw code address the thunk jumps to
    pub fn address(&self) -> usize {
        self.address.load(Ordering::Acquire)
    }

    /// Number of times the thunk was retargeted
    pub fn patch_count(&self) -> u32 {
        self.patches.load(Ordering::Relaxed)
    }

    /// Call through the thunk
    pub fn call(&self, function: &FunctionObject, args: &[Value]) -> FunctionResult<Value> {
        let target = self.target();
        target.invoke(function, args)
    }

    fn retarget(&self, old_id: u64, new: &Arc<EntryPoint>) -> bool {
        let mut target = self.target.write();
        if target.id != old_id {
            return false;
        }
        *target = new.clone();
        self.address.store(new.address(), Ordering::Release);
        self.patches.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl std::fmt::Debug for CallThunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallThunk")
            .field("target", &self.target.read().id)
            .field("patches", &self.patch_count())
            .finish()
    }
}

/// What the caller should do after a JIT bailout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BailoutAction {
    /// Resume in the interpreter; compiled code stays installed
    Resume,
    /// Threshold reached; compiled code was discarded
    Deoptimized,
}

/// Entry-point state of one function object
pub(crate) struct EntryPointSlot {
    current: RwLock<Arc<EntryPoint>>,
    thunks: Mutex<Vec<Weak<CallThunk>>>,
    jit_in_flight: AtomicBool,
    bailouts: AtomicU32,
}

impl EntryPointSlot {
    pub(crate) fn new(initial: Arc<EntryPoint>) -> Self {
        Self {
            current: RwLock::new(initial),
            thunks: Mutex::new(Vec::new()),
            jit_in_flight: AtomicBool::new(false),
            bailouts: AtomicU32::new(0),
        }
    }

    pub(crate) fn current(&self) -> Arc<EntryPoint> {
        self.current.read().clone()
    }

    /// Swap in `new` if `accept` approves the current entry, store its
    /// address into `address_word`, then patch thunks. `accept` runs under
    /// the entry write lock. Returns the replaced entry.
    fn publish_if(
        &self,
        new: Arc<EntryPoint>,
        address_word: &AtomicUsize,
        accept: impl FnOnce(&EntryPoint) -> bool,
    ) -> Option<Arc<EntryPoint>> {
        let old = {
            let mut current = self.current.write();
            if !accept(&current) {
                return None;
            }
            let old = std::mem::replace(&mut *current, new.clone());
            address_word.store(new.address(), Ordering::Release);
            old
        };

        self.thunks.lock().retain(|weak| match weak.upgrade() {
            Some(thunk) => {
                thunk.retarget(old.id, &new);
                true
            }
            None => false,
        });

        if new.tier() == EntryTier::JitCompiled {
            self.jit_in_flight.store(false, Ordering::Release);
        }
        Some(old)
    }
}

impl ScriptFunction {
    /// Snapshot of the entry point; a call uses one snapshot end to end
    pub fn current_entry_point(&self) -> Arc<EntryPoint> {
        self.entry.current()
    }

    /// Raw entry address word, as generated code reads it
    pub fn entry_address(&self) -> usize {
        self.entry_address.load(Ordering::Acquire)
    }

    pub(crate) fn publish_entry_point(&self, entry: Arc<EntryPoint>) {
        self.publish_entry_point_if(entry, |_| true);
    }

    fn publish_entry_point_if(
        &self,
        entry: Arc<EntryPoint>,
        accept: impl FnOnce(&EntryPoint) -> bool,
    ) -> Option<Arc<EntryPoint>> {
        let new_tier = entry.tier();
        let new_id = entry.id;
        let old = self.entry.publish_if(entry, &self.entry_address, accept)?;
        StatsCounters::bump(&self.context.counters.entry_point_changes);
        tracing::debug!(
            target: "otter::function",
            function = self.id(),
            from = ?old.tier(),
            to = ?new_tier,
            entry = new_id,
            "Entry point changed"
        );
        Some(old)
    }

    /// Note that a background compile for this function has started
    pub fn mark_jit_in_flight(&self) -> bool {
        !self.entry.jit_in_flight.swap(true, Ordering::AcqRel)
    }

    /// Clear the in-flight flag, e.g. after a failed compile
    pub fn clear_jit_in_flight(&self) {
        self.entry.jit_in_flight.store(false, Ordering::Release);
    }

    /// Whether a background compile is pending
    pub fn is_jit_in_flight(&self) -> bool {
        self.entry.jit_in_flight.load(Ordering::Acquire)
    }

    /// Register an indirect call cell kept in sync with this function's
    /// entry point
    pub fn register_call_thunk(&self) -> Arc<CallThunk> {
        let mut thunks = self.entry.thunks.lock();
        let thunk = CallThunk::new(self.entry.current());
        thunks.push(Arc::downgrade(&thunk));
        thunk
    }

    /// Whether the descriptor's default entry differs from this function's
    pub fn is_new_entry_point_available(&self) -> bool {
        self.descriptor().default_entry_point().id != self.entry.current().id
    }

    /// Parse a deferred body if needed and adopt the descriptor's default
    /// entry point.
    pub fn update_undeferred_body(&self) -> FunctionResult<()> {
        let descriptor = self.descriptor();
        descriptor
            .ensure_parsed()
            .map_err(|message| FunctionError::DeferredParse {
                function: descriptor.display_name().to_owned(),
                message,
            })?;
        if self.is_new_entry_point_available() {
            self.publish_entry_point(descriptor.default_entry_point());
        }
        Ok(())
    }

    /// Number of bailouts since the last downgrade
    pub fn bailout_count(&self) -> u32 {
        self.entry.bailouts.load(Ordering::Relaxed)
    }
}

impl FunctionObject {
    /// Publish new code for this function.
    ///
    /// The record is fully built before it becomes visible; thunks still
    /// targeting the replaced entry are patched. Compiled code that names an
    /// inline cache generation is rejected once the function's cache block
    /// has moved past it, and the in-flight flag is cleared. Returns the new
    /// entry if it was published.
    pub fn change_entry_point(&self, info: EntryPointInfo, method: JavascriptMethod) -> Option<Arc<EntryPoint>> {
        let core = self.core();
        let entry = EntryPoint::new(info, method);
        let block = info.inline_cache_generation.and_then(|_| self.inline_cache_block());
        let published = core.publish_entry_point_if(entry.clone(), |_| {
            match (info.inline_cache_generation, &block) {
                (Some(expected), Some(block)) => block.generation() == expected,
                _ => true,
            }
        });
        if published.is_none() {
            core.clear_jit_in_flight();
            StatsCounters::bump(&core.context.counters.stale_code_rejected);
            tracing::debug!(
                target: "otter::function",
                function = core.id(),
                entry = entry.id,
                ic_generation = ?info.inline_cache_generation,
                "Stale compiled code rejected"
            );
            return None;
        }
        Some(entry)
    }

    /// Revert JitCompiled code to the interpreter.
    ///
    /// Invalidates every inline cache the discarded code could have relied
    /// on before the interpreter entry is published; both happen under the
    /// entry lock, so a racing publish lands wholly before or after. Returns
    /// false if the function was not running compiled code.
    pub fn downgrade_entry_point(&self) -> bool {
        let core = self.core();
        let descriptor = core.descriptor();
        let interpreted = EntryPoint::new(EntryPointInfo::interpreted(), descriptor.interpreter);
        let block = self.inline_cache_block();
        let mut generation = None;

        let Some(discarded) = core.publish_entry_point_if(interpreted.clone(), |current| {
            if current.tier() != EntryTier::JitCompiled {
                return false;
            }
            generation = block.as_ref().map(|block| block.invalidate_all());
            true
        }) else {
            return false;
        };

        if descriptor.default_entry_point().id == discarded.id {
            descriptor.set_default_entry_point(interpreted);
        }
        core.entry.bailouts.store(0, Ordering::Relaxed);
        StatsCounters::bump(&core.context.counters.downgrades);

        tracing::debug!(
            target: "otter::function",
            function = core.id(),
            discarded = discarded.id,
            ic_generation = ?generation,
            "Deoptimized to interpreter"
        );
        true
    }

    /// Count a JIT bailout; deoptimize once the configured threshold is hit
    pub fn record_bailout(&self) -> BailoutAction {
        let core = self.core();
        StatsCounters::bump(&core.context.counters.bailouts);
        let count = core.entry.bailouts.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= core.context.config().deopt_threshold && self.downgrade_entry_point() {
            BailoutAction::Deoptimized
        } else {
            BailoutAction::Resume
        }
    }

    /// Invoke the function on its current entry point
    pub fn call(&self, args: &[Value]) -> FunctionResult<Value> {
        let entry = self.current_entry_point();
        let signature = self.as_wasm().map(|wasm| wasm.signature());
        if let Some(signature) = &signature {
            signature.check_arguments(args)?;
        }
        let result = entry.invoke(self, args)?;
        if let Some(signature) = &signature {
            signature.check_result(&result)?;
        }
        Ok(result)
    }
}

/// Method of the Deferred tier: parse the body, adopt the interpreter entry
/// and re-dispatch the call to it.
pub fn deferred_parsing_thunk(function: &FunctionObject, args: &[Value]) -> FunctionResult<Value> {
    function.update_undeferred_body()?;
    let entry = function.current_entry_point();
    if entry.tier() == EntryTier::Deferred {
        return Err(FunctionError::internal(format!(
            "function {} is still deferred after parsing",
            function.id()
        )));
    }
    entry.invoke(function, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(_: &FunctionObject, _: &[Value]) -> FunctionResult<Value> {
        Ok(Value::int32(42))
    }

    #[test]
    fn test_entry_ids_are_unique() {
        let a = EntryPoint::new(EntryPointInfo::interpreted(), answer);
        let b = EntryPoint::new(EntryPointInfo::interpreted(), answer);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_info_builders() {
        let info = EntryPointInfo::jit_compiled(128).with_inline_cache_generation(3);
        assert_eq!(info.tier, EntryTier::JitCompiled);
        assert_eq!(info.code_size, 128);
        assert_eq!(info.inline_cache_generation, Some(3));
        assert_eq!(EntryPointInfo::deferred().tier, EntryTier::Deferred);
    }

    #[test]
    fn test_publish_patches_matching_thunks() {
        let first = EntryPoint::new(EntryPointInfo::interpreted(), answer);
        let slot = EntryPointSlot::new(first.clone());
        let word = AtomicUsize::new(first.address());

        let thunk = CallThunk::new(slot.current());
        slot.thunks.lock().push(Arc::downgrade(&thunk));
        slot.jit_in_flight.store(true, Ordering::Relaxed);

        let compiled = EntryPoint::new(EntryPointInfo::jit_compiled(64), answer);
        let old = slot.publish_if(compiled.clone(), &word, |_| true).unwrap();
        assert_eq!(old.id(), first.id());
        assert_eq!(thunk.target().id(), compiled.id());
        assert_eq!(thunk.patch_count(), 1);
        assert!(!slot.jit_in_flight.load(Ordering::Relaxed));
        assert_eq!(word.load(Ordering::Relaxed), compiled.address());
    }

    #[test]
    fn test_dead_thunks_are_pruned() {
        let slot = EntryPointSlot::new(EntryPoint::new(EntryPointInfo::interpreted(), answer));
        let word = AtomicUsize::new(0);
        {
            let thunk = CallThunk::new(slot.current());
            slot.thunks.lock().push(Arc::downgrade(&thunk));
        }
        slot.publish_if(EntryPoint::new(EntryPointInfo::interpreted(), answer), &word, |_| true);
        assert!(slot.thunks.lock().is_empty());
    }

    #[test]
    fn test_rejected_publish_leaves_slot_untouched() {
        let first = EntryPoint::new(EntryPointInfo::interpreted(), answer);
        let slot = EntryPointSlot::new(first.clone());
        let word = AtomicUsize::new(first.address());
        let thunk = CallThunk::new(slot.current());
        slot.thunks.lock().push(Arc::downgrade(&thunk));

        let compiled = EntryPoint::new(EntryPointInfo::jit_compiled(8), answer);
        assert!(slot.publish_if(compiled, &word, |current| current.tier() == EntryTier::JitCompiled).is_none());
        assert_eq!(slot.current().id(), first.id());
        assert_eq!(thunk.patch_count(), 0);
    }
}
