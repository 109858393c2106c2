//! Script function records and the tagged [`FunctionObject`] handle.
//!
//! Every closure is one of a closed set of fixed-layout records. The core
//! record [`ScriptFunction`] is the first field of every variant, and
//! capability slots are appended by `#[repr(C)]` wrappers, so generated code
//! can read any field at a constant offset (see [`crate::layout`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use otter_vm_gc::{GcHeader, GcObject, tags};
use parking_lot::{Mutex, RwLock};

use crate::capability::ScriptFunctionBase;
use crate::context::{ScriptContext, StatsCounters};
use crate::descriptor::{DescriptorCell, FunctionDescriptor, FunctionFlags, FunctionKind};
use crate::entry::{EntryPoint, EntryPointSlot};
use crate::environment::{CachedScope, ClosureEnvironment};
use crate::inline_cache::{InlineCacheBlock, InlineCacheCounts};
use crate::numeric::{LinearMemory, ModuleMemory, WasmSignature};
use crate::slot::ArcSlot;
use crate::value::Value;

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// Concrete record layout of a function object
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionLayout {
    /// [`ScriptFunction`]
    Script = tags::SCRIPT_FUNCTION,
    /// [`ScriptFunctionWithComputedName`]
    ScriptWithComputedName = tags::SCRIPT_FUNCTION_WITH_COMPUTED_NAME,
    /// [`ScriptFunctionWithHomeObject`]
    ScriptWithHomeObject = tags::SCRIPT_FUNCTION_WITH_HOME_OBJECT,
    /// [`ScriptFunctionWithHomeObjectAndComputedName`]
    ScriptWithHomeObjectAndComputedName = tags::SCRIPT_FUNCTION_WITH_HOME_OBJECT_AND_COMPUTED_NAME,
    /// [`ScriptFunctionWithInlineCache`]
    ScriptWithInlineCache = tags::SCRIPT_FUNCTION_WITH_INLINE_CACHE,
    /// [`ScriptFunctionWithInlineCacheAndComputedName`]
    ScriptWithInlineCacheAndComputedName = tags::SCRIPT_FUNCTION_WITH_INLINE_CACHE_AND_COMPUTED_NAME,
    /// [`AsmJsScriptFunction`]
    AsmJs = tags::ASM_JS_FUNCTION,
    /// [`AsmJsScriptFunctionWithComputedName`]
    AsmJsWithComputedName = tags::ASM_JS_FUNCTION_WITH_COMPUTED_NAME,
    /// [`WasmScriptFunction`]
    Wasm = tags::WASM_FUNCTION,
}

impl FunctionLayout {
    /// Pick the record for a descriptor.
    ///
    /// A home object takes precedence over per-closure inline caches; such
    /// functions use the descriptor's shared cache block.
    /// The builder has already cleared capabilities a numeric kind has no
    /// record for.
    pub fn select(kind: FunctionKind, flags: &FunctionFlags, counts: InlineCacheCounts) -> Self {
        match kind {
            FunctionKind::Wasm => Self::Wasm,
            FunctionKind::AsmJs if flags.has_computed_name => Self::AsmJsWithComputedName,
            FunctionKind::AsmJs => Self::AsmJs,
            FunctionKind::Plain => {
                let own_caches = flags.inline_caches_on_function_object && counts.total() > 0;
                match (flags.has_home_object, flags.has_computed_name, own_caches) {
                    (true, true, _) => Self::ScriptWithHomeObjectAndComputedName,
                    (true, false, _) => Self::ScriptWithHomeObject,
                    (false, true, true) => Self::ScriptWithInlineCacheAndComputedName,
                    (false, false, true) => Self::ScriptWithInlineCache,
                    (false, true, false) => Self::ScriptWithComputedName,
                    (false, false, false) => Self::Script,
                }
            }
        }
    }

    /// GC header tag
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Whether the record has a home object slot
    pub const fn has_home_object(self) -> bool {
        matches!(
            self,
            Self::ScriptWithHomeObject | Self::ScriptWithHomeObjectAndComputedName
        )
    }

    /// Whether the record has a computed name slot
    pub const fn has_computed_name(self) -> bool {
        matches!(
            self,
            Self::ScriptWithComputedName
                | Self::ScriptWithHomeObjectAndComputedName
                | Self::ScriptWithInlineCacheAndComputedName
                | Self::AsmJsWithComputedName
        )
    }

    /// Whether the record owns an inline cache block
    pub const fn has_inline_cache(self) -> bool {
        matches!(
            self,
            Self::ScriptWithInlineCache | Self::ScriptWithInlineCacheAndComputedName
        )
    }
}

/// Core record shared by every function variant.
///
/// The fields up to `layout` form the native-code contract and are read at
/// the offsets in [`crate::layout::FunctionFieldOffsets`].
#[repr(C)]
pub struct ScriptFunction {
    pub(crate) header: GcHeader,
    pub(crate) environment: ArcSlot<ClosureEnvironment>,
    pub(crate) cached_scope: ArcSlot<CachedScope>,
    pub(crate) entry_address: AtomicUsize,
    pub(crate) has_inline_caches: AtomicBool,
    pub(crate) kind: FunctionKind,
    pub(crate) layout: FunctionLayout,
    /// Serializes every reference-slot swap of this object
    pub(crate) slot_lock: Mutex<()>,
    pub(crate) entry: EntryPointSlot,
    pub(crate) descriptor: Arc<DescriptorCell>,
    pub(crate) context: Arc<ScriptContext>,
    id: u64,
}

impl ScriptFunction {
    pub(crate) fn new(
        layout: FunctionLayout,
        kind: FunctionKind,
        environment: Option<Arc<ClosureEnvironment>>,
        entry: Arc<EntryPoint>,
        descriptor: Arc<DescriptorCell>,
        context: Arc<ScriptContext>,
    ) -> Self {
        Self {
            header: GcHeader::new(layout.tag()),
            environment: ArcSlot::new(environment),
            cached_scope: ArcSlot::new(None),
            entry_address: AtomicUsize::new(entry.address()),
            has_inline_caches: AtomicBool::new(false),
            kind,
            layout,
            slot_lock: Mutex::new(()),
            entry: EntryPointSlot::new(entry),
            descriptor,
            context,
            id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Unique object id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record layout
    pub fn layout(&self) -> FunctionLayout {
        self.layout
    }

    /// Function kind
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Current descriptor
    pub fn descriptor(&self) -> Arc<FunctionDescriptor> {
        self.descriptor.get()
    }

    /// Redirectable descriptor cell
    pub fn descriptor_ref(&self) -> &Arc<DescriptorCell> {
        &self.descriptor
    }

    /// Owning context
    pub fn context(&self) -> &Arc<ScriptContext> {
        &self.context
    }

    /// Whether the body references `super`
    pub fn has_super_reference(&self) -> bool {
        self.descriptor().flags.has_super_reference
    }

    /// Whether the body has been parsed
    pub fn has_function_body(&self) -> bool {
        self.descriptor().is_parsed()
    }

    /// True for asm.js and WebAssembly functions
    pub fn is_asm_js_function(&self) -> bool {
        matches!(self.kind, FunctionKind::AsmJs | FunctionKind::Wasm)
    }

    /// True for WebAssembly functions
    pub fn is_wasm_function(&self) -> bool {
        self.kind == FunctionKind::Wasm
    }

    /// Whether the per-object cache block is allocated. Always false for
    /// records without an inline-cache slot, even when the shared block is.
    pub fn has_inline_caches(&self) -> bool {
        self.has_inline_caches.load(Ordering::Acquire)
    }

    /// Captured environment
    pub fn environment(&self) -> Option<Arc<ClosureEnvironment>> {
        self.environment.load(&self.slot_lock.lock())
    }

    /// Replace the captured environment; the cached scope is dropped
    pub fn set_environment(&self, environment: Option<Arc<ClosureEnvironment>>) {
        let guard = self.slot_lock.lock();
        self.environment.replace(environment, &guard);
        self.drop_cached_scope(&guard);
    }

    /// Materialized scope cache, if built
    pub fn cached_scope(&self) -> Option<Arc<CachedScope>> {
        self.cached_scope.load(&self.slot_lock.lock())
    }

    /// Install a scope cache
    pub fn set_cached_scope(&self, scope: Option<Arc<CachedScope>>) {
        let guard = self.slot_lock.lock();
        self.cached_scope.replace(scope, &guard);
    }

    /// Drop the scope cache; it is rebuilt on the next dynamic lookup
    pub fn invalidate_cached_scope_chain(&self) {
        let guard = self.slot_lock.lock();
        self.drop_cached_scope(&guard);
    }

    fn drop_cached_scope(&self, guard: &parking_lot::MutexGuard<'_, ()>) {
        if self.cached_scope.replace(None, guard).is_some() {
            StatsCounters::bump(&self.context.counters.scope_cache_invalidations);
            tracing::debug!(
                target: "otter::function",
                function = self.id,
                "Cached scope invalidated"
            );
        }
    }

    /// Resolve `name` through the captured environment using the scope
    /// cache, building it on first use
    pub fn lookup_dynamic(&self, name: &str) -> Option<Value> {
        let guard = self.slot_lock.lock();
        let environment = self.environment.load(&guard)?;
        let cache = match self.cached_scope.load(&guard) {
            Some(cache) if cache.is_current(&environment) => cache,
            stale => {
                // Bindings changed through another closure sharing a frame.
                if stale.is_some() {
                    StatsCounters::bump(&self.context.counters.scope_cache_invalidations);
                    tracing::debug!(
                        target: "otter::function",
                        function = self.id,
                        "Rebuilding stale scope cache"
                    );
                }
                let cache = CachedScope::build(&environment);
                self.cached_scope.replace(Some(cache.clone()), &guard);
                cache
            }
        };
        drop(guard);

        let depth = cache.depth_of(name)?;
        environment.frame(depth)?.get(name)
    }

    /// Delete a binding through the environment and invalidate the cache.
    /// Returns whether a binding was removed.
    pub fn delete_dynamic_binding(&self, name: &str) -> bool {
        let Some(environment) = self.environment() else {
            return false;
        };
        let deleted = environment
            .resolve(name)
            .and_then(|depth| environment.frame(depth))
            .is_some_and(|frame| frame.delete(name));
        if deleted {
            self.invalidate_cached_scope_chain();
        }
        deleted
    }
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("entry", &self.entry.current())
            .finish()
    }
}

/// Adds a computed name slot to `B`
#[repr(C)]
pub struct WithComputedName<B> {
    pub(crate) base: B,
    pub(crate) computed_name: RwLock<Value>,
}

impl<B> WithComputedName<B> {
    pub(crate) fn new(base: B) -> Self {
        Self {
            base,
            computed_name: RwLock::new(Value::undefined()),
        }
    }

    /// Wrapped record
    pub fn base(&self) -> &B {
        &self.base
    }
}

/// Adds a home object slot to `B`
#[repr(C)]
pub struct WithHomeObject<B> {
    pub(crate) base: B,
    pub(crate) home_object: RwLock<Value>,
}

impl<B> WithHomeObject<B> {
    pub(crate) fn new(base: B) -> Self {
        Self {
            base,
            home_object: RwLock::new(Value::undefined()),
        }
    }

    /// Wrapped record
    pub fn base(&self) -> &B {
        &self.base
    }
}

/// Script function owning its inline cache block
#[repr(C)]
pub struct ScriptFunctionWithInlineCache {
    pub(crate) base: ScriptFunction,
    pub(crate) inline_caches: ArcSlot<InlineCacheBlock>,
    counts: InlineCacheCounts,
}

impl ScriptFunctionWithInlineCache {
    pub(crate) fn new(base: ScriptFunction, counts: InlineCacheCounts) -> Self {
        Self {
            base,
            inline_caches: ArcSlot::new(None),
            counts,
        }
    }

    /// Site counts fixed at creation
    pub fn inline_cache_counts(&self) -> InlineCacheCounts {
        self.counts
    }

    /// The block, if allocated
    pub fn inline_caches(&self) -> Option<Arc<InlineCacheBlock>> {
        self.inline_caches.load(&self.base.slot_lock.lock())
    }

    /// Allocate the block if absent. Returns the block and whether this
    /// call allocated it.
    pub(crate) fn ensure_inline_caches(&self, checked_kinds: bool) -> (Arc<InlineCacheBlock>, bool) {
        let guard = self.base.slot_lock.lock();
        if let Some(block) = self.inline_caches.load(&guard) {
            return (block, false);
        }
        let block = Arc::new(InlineCacheBlock::new(self.counts, checked_kinds));
        self.inline_caches.replace(Some(block.clone()), &guard);
        self.base.has_inline_caches.store(true, Ordering::Release);
        (block, true)
    }

    /// Release the block.
    ///
    /// The cooperative path invalidates the block so holders of an older
    /// reference read misses, and records the release. The shutdown path
    /// drops it without bookkeeping.
    pub fn free_inline_caches<const IS_SHUTDOWN: bool>(&self) -> bool {
        let block = {
            let guard = self.base.slot_lock.lock();
            self.inline_caches.replace(None, &guard)
        };
        let Some(block) = block else {
            return false;
        };
        self.base.has_inline_caches.store(false, Ordering::Release);

        let counters = &self.base.context.counters;
        if IS_SHUTDOWN {
            StatsCounters::bump(&counters.inline_cache_blocks_freed_at_shutdown);
        } else {
            block.invalidate_all();
            StatsCounters::bump(&counters.inline_cache_blocks_freed);
            tracing::debug!(
                target: "otter::function",
                function = self.base.id(),
                sites = block.len(),
                "Inline caches released"
            );
        }
        true
    }
}

/// asm.js function bound to its module memory
#[repr(C)]
pub struct AsmJsScriptFunction {
    pub(crate) base: ScriptFunction,
    pub(crate) module_memory: ArcSlot<ModuleMemory>,
}

impl AsmJsScriptFunction {
    pub(crate) fn new(base: ScriptFunction, module_memory: Option<Arc<ModuleMemory>>) -> Self {
        Self {
            base,
            module_memory: ArcSlot::new(module_memory),
        }
    }

    /// Module globals
    pub fn module_memory(&self) -> Option<Arc<ModuleMemory>> {
        self.module_memory.load(&self.base.slot_lock.lock())
    }

    /// Bind module globals
    pub fn set_module_memory(&self, memory: Option<Arc<ModuleMemory>>) {
        let guard = self.base.slot_lock.lock();
        self.module_memory.replace(memory, &guard);
    }

    /// Module heap
    pub fn asm_js_heap(&self) -> Option<Arc<LinearMemory>> {
        self.module_memory()?.heap().cloned()
    }
}

/// WebAssembly export: an asm.js record plus a fixed signature
#[repr(C)]
pub struct WasmScriptFunction {
    pub(crate) base: AsmJsScriptFunction,
    pub(crate) signature: ArcSlot<WasmSignature>,
}

impl WasmScriptFunction {
    pub(crate) fn new(base: AsmJsScriptFunction, signature: Arc<WasmSignature>) -> Self {
        Self {
            base,
            signature: ArcSlot::new(Some(signature)),
        }
    }

    /// The asm.js view of this function
    pub fn asm_js(&self) -> &AsmJsScriptFunction {
        &self.base
    }

    /// Signature checked on every call
    pub fn signature(&self) -> Arc<WasmSignature> {
        let guard = self.base.base.slot_lock.lock();
        // Set at construction and never replaced.
        self.signature.load(&guard).unwrap_or_default()
    }

    /// Linear memory of the instance
    pub fn web_assembly_memory(&self) -> Option<Arc<LinearMemory>> {
        self.base.asm_js_heap()
    }
}

/// Script function with a computed name
pub type ScriptFunctionWithComputedName = WithComputedName<ScriptFunction>;
/// Method with a home object
pub type ScriptFunctionWithHomeObject = WithHomeObject<ScriptFunction>;
/// Method with a home object and a computed name
pub type ScriptFunctionWithHomeObjectAndComputedName = WithComputedName<WithHomeObject<ScriptFunction>>;
/// Script function owning inline caches, with a computed name
pub type ScriptFunctionWithInlineCacheAndComputedName = WithComputedName<ScriptFunctionWithInlineCache>;
/// asm.js function with a computed name
pub type AsmJsScriptFunctionWithComputedName = WithComputedName<AsmJsScriptFunction>;

/// Tagged handle to a function object
#[derive(Clone)]
pub enum FunctionObject {
    /// Plain script function
    Script(Arc<ScriptFunction>),
    /// With computed name
    ScriptWithComputedName(Arc<ScriptFunctionWithComputedName>),
    /// With home object
    ScriptWithHomeObject(Arc<ScriptFunctionWithHomeObject>),
    /// With home object and computed name
    ScriptWithHomeObjectAndComputedName(Arc<ScriptFunctionWithHomeObjectAndComputedName>),
    /// Owning inline caches
    ScriptWithInlineCache(Arc<ScriptFunctionWithInlineCache>),
    /// Owning inline caches, with computed name
    ScriptWithInlineCacheAndComputedName(Arc<ScriptFunctionWithInlineCacheAndComputedName>),
    /// asm.js
    AsmJs(Arc<AsmJsScriptFunction>),
    /// asm.js with computed name
    AsmJsWithComputedName(Arc<AsmJsScriptFunctionWithComputedName>),
    /// WebAssembly
    Wasm(Arc<WasmScriptFunction>),
}

/// Expands `$body` once per variant with `$f` bound to the variant's `Arc`
macro_rules! dispatch {
    ($value:expr, $f:ident => $body:expr) => {
        match $value {
            FunctionObject::Script($f) => $body,
            FunctionObject::ScriptWithComputedName($f) => $body,
            FunctionObject::ScriptWithHomeObject($f) => $body,
            FunctionObject::ScriptWithHomeObjectAndComputedName($f) => $body,
            FunctionObject::ScriptWithInlineCache($f) => $body,
            FunctionObject::ScriptWithInlineCacheAndComputedName($f) => $body,
            FunctionObject::AsmJs($f) => $body,
            FunctionObject::AsmJsWithComputedName($f) => $body,
            FunctionObject::Wasm($f) => $body,
        }
    };
}
pub(crate) use dispatch;

impl FunctionObject {
    /// Address of the record, which is also the address of its core
    pub fn as_ptr(&self) -> *const ScriptFunction {
        dispatch!(self, f => Arc::as_ptr(f).cast::<ScriptFunction>())
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &FunctionObject) -> bool {
        std::ptr::eq(self.as_ptr(), other.as_ptr())
    }

    /// The record as a collector-managed object
    pub fn to_gc_object(&self) -> Arc<dyn GcObject> {
        dispatch!(self, f => f.clone() as Arc<dyn GcObject>)
    }

    /// Name used for display: computed name, then declared name, with
    /// accessor prefixes
    pub fn display_name(&self) -> String {
        crate::name::display_name(&self.descriptor(), self.computed_name().as_ref())
    }
}

impl std::ops::Deref for FunctionObject {
    type Target = ScriptFunction;

    fn deref(&self) -> &ScriptFunction {
        dispatch!(self, f => f.core())
    }
}

impl std::fmt::Debug for FunctionObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionObject")
            .field("id", &self.id())
            .field("layout", &self.layout())
            .field("name", &self.descriptor().display_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(home: bool, computed: bool, ic: bool) -> FunctionFlags {
        FunctionFlags {
            has_home_object: home,
            has_computed_name: computed,
            inline_caches_on_function_object: ic,
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_selection() {
        let counts = InlineCacheCounts::new(1, 0, 0);
        let none = InlineCacheCounts::default();
        let select = |kind, f: FunctionFlags, c| FunctionLayout::select(kind, &f, c);

        assert_eq!(select(FunctionKind::Plain, flags(false, false, false), counts), FunctionLayout::Script);
        assert_eq!(
            select(FunctionKind::Plain, flags(false, true, false), counts),
            FunctionLayout::ScriptWithComputedName
        );
        assert_eq!(
            select(FunctionKind::Plain, flags(true, false, true), counts),
            FunctionLayout::ScriptWithHomeObject
        );
        assert_eq!(
            select(FunctionKind::Plain, flags(true, true, false), counts),
            FunctionLayout::ScriptWithHomeObjectAndComputedName
        );
        assert_eq!(
            select(FunctionKind::Plain, flags(false, false, true), counts),
            FunctionLayout::ScriptWithInlineCache
        );
        assert_eq!(
            select(FunctionKind::Plain, flags(false, true, true), counts),
            FunctionLayout::ScriptWithInlineCacheAndComputedName
        );
        assert_eq!(select(FunctionKind::Plain, flags(false, false, true), none), FunctionLayout::Script);
        assert_eq!(select(FunctionKind::AsmJs, flags(true, false, true), counts), FunctionLayout::AsmJs);
        assert_eq!(
            select(FunctionKind::AsmJs, flags(false, true, false), counts),
            FunctionLayout::AsmJsWithComputedName
        );
        assert_eq!(select(FunctionKind::Wasm, flags(true, true, true), counts), FunctionLayout::Wasm);
    }

    #[test]
    fn test_layout_tags_are_function_tags() {
        for layout in [
            FunctionLayout::Script,
            FunctionLayout::ScriptWithInlineCacheAndComputedName,
            FunctionLayout::Wasm,
        ] {
            assert!(tags::is_script_function(layout.tag()));
        }
        assert!(FunctionLayout::ScriptWithHomeObjectAndComputedName.has_home_object());
        assert!(FunctionLayout::AsmJsWithComputedName.has_computed_name());
        assert!(!FunctionLayout::AsmJs.has_inline_cache());
    }
}
