//! Byte offsets of function-object fields read directly by generated code.
//!
//! Reordering or resizing any of these fields changes the native-code ABI.
//! Every constant is checked at compile time against the expected layout.

use std::mem::{offset_of, size_of};

use otter_vm_gc::GcHeader;

use crate::function::{
    AsmJsScriptFunction, AsmJsScriptFunctionWithComputedName, FunctionLayout, ScriptFunction,
    ScriptFunctionWithComputedName, ScriptFunctionWithHomeObject,
    ScriptFunctionWithHomeObjectAndComputedName, ScriptFunctionWithInlineCache,
    ScriptFunctionWithInlineCacheAndComputedName, WasmScriptFunction,
};

const WORD: usize = size_of::<usize>();

/// Offsets inside [`ScriptFunction`], valid for every variant
pub struct FunctionFieldOffsets;

impl FunctionFieldOffsets {
    /// GC header
    pub const HEADER: usize = offset_of!(ScriptFunction, header);
    /// Environment pointer (null when nothing is captured)
    pub const ENVIRONMENT: usize = offset_of!(ScriptFunction, environment);
    /// Cached scope pointer (null when not built)
    pub const CACHED_SCOPE: usize = offset_of!(ScriptFunction, cached_scope);
    /// Current entry code address
    pub const ENTRY_ADDRESS: usize = offset_of!(ScriptFunction, entry_address);
    /// Nonzero byte once a cache block is reachable
    pub const HAS_INLINE_CACHES: usize = offset_of!(ScriptFunction, has_inline_caches);
    /// Function kind byte
    pub const KIND: usize = offset_of!(ScriptFunction, kind);
    /// Layout tag byte
    pub const LAYOUT: usize = offset_of!(ScriptFunction, layout);
}

const _: () = {
    assert!(FunctionFieldOffsets::HEADER == 0);
    assert!(FunctionFieldOffsets::ENVIRONMENT == size_of::<GcHeader>());
    assert!(FunctionFieldOffsets::CACHED_SCOPE == FunctionFieldOffsets::ENVIRONMENT + WORD);
    assert!(FunctionFieldOffsets::ENTRY_ADDRESS == FunctionFieldOffsets::CACHED_SCOPE + WORD);
    assert!(FunctionFieldOffsets::HAS_INLINE_CACHES == FunctionFieldOffsets::ENTRY_ADDRESS + WORD);
    assert!(FunctionFieldOffsets::KIND == FunctionFieldOffsets::HAS_INLINE_CACHES + 1);
    assert!(FunctionFieldOffsets::LAYOUT == FunctionFieldOffsets::KIND + 1);
};

// The core record (and the asm.js record inside Wasm) sits at offset 0 of
// every variant, so one pointer serves for all of them.
const _: () = {
    assert!(offset_of!(ScriptFunctionWithComputedName, base) == 0);
    assert!(offset_of!(ScriptFunctionWithHomeObject, base) == 0);
    assert!(offset_of!(ScriptFunctionWithHomeObjectAndComputedName, base) == 0);
    assert!(offset_of!(ScriptFunctionWithInlineCache, base) == 0);
    assert!(offset_of!(ScriptFunctionWithInlineCacheAndComputedName, base) == 0);
    assert!(offset_of!(AsmJsScriptFunction, base) == 0);
    assert!(offset_of!(AsmJsScriptFunctionWithComputedName, base) == 0);
    assert!(offset_of!(WasmScriptFunction, base) == 0);
};

/// Variant slot offsets
pub mod variant {
    use super::*;

    /// Inline cache block pointer of [`ScriptFunctionWithInlineCache`]
    pub const INLINE_CACHES: usize = offset_of!(ScriptFunctionWithInlineCache, inline_caches);
    /// Module memory pointer of [`AsmJsScriptFunction`] and [`WasmScriptFunction`]
    pub const MODULE_MEMORY: usize = offset_of!(AsmJsScriptFunction, module_memory);
    /// Signature pointer of [`WasmScriptFunction`]
    pub const SIGNATURE: usize = offset_of!(WasmScriptFunction, signature);
    /// Home object of a home-object record
    pub const HOME_OBJECT: usize = offset_of!(ScriptFunctionWithHomeObject, home_object);
    /// Computed name of [`ScriptFunctionWithComputedName`]
    pub const COMPUTED_NAME: usize = offset_of!(ScriptFunctionWithComputedName, computed_name);
    /// Computed name of [`ScriptFunctionWithHomeObjectAndComputedName`]
    pub const HOME_OBJECT_COMPUTED_NAME: usize =
        offset_of!(ScriptFunctionWithHomeObjectAndComputedName, computed_name);
    /// Computed name of [`ScriptFunctionWithInlineCacheAndComputedName`]
    pub const INLINE_CACHE_COMPUTED_NAME: usize =
        offset_of!(ScriptFunctionWithInlineCacheAndComputedName, computed_name);
    /// Computed name of [`AsmJsScriptFunctionWithComputedName`]
    pub const ASM_JS_COMPUTED_NAME: usize = offset_of!(AsmJsScriptFunctionWithComputedName, computed_name);

    const _: () = {
        assert!(INLINE_CACHES == size_of::<ScriptFunction>());
        assert!(MODULE_MEMORY == size_of::<ScriptFunction>());
        assert!(SIGNATURE == size_of::<AsmJsScriptFunction>());
        assert!(HOME_OBJECT >= size_of::<ScriptFunction>());
        assert!(COMPUTED_NAME >= size_of::<ScriptFunction>());
        assert!(HOME_OBJECT_COMPUTED_NAME >= size_of::<ScriptFunctionWithHomeObject>());
        assert!(INLINE_CACHE_COMPUTED_NAME >= size_of::<ScriptFunctionWithInlineCache>());
        assert!(ASM_JS_COMPUTED_NAME >= size_of::<AsmJsScriptFunction>());
    };
}

/// Offsets of the optional slots present in one layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantOffsets {
    /// Home object slot
    pub home_object: Option<usize>,
    /// Computed name slot
    pub computed_name: Option<usize>,
    /// Inline cache block pointer
    pub inline_caches: Option<usize>,
    /// Module memory pointer
    pub module_memory: Option<usize>,
    /// Signature pointer
    pub signature: Option<usize>,
}

impl VariantOffsets {
    /// Slot offsets for `layout`
    pub const fn for_layout(layout: FunctionLayout) -> Self {
        let none = Self {
            home_object: None,
            computed_name: None,
            inline_caches: None,
            module_memory: None,
            signature: None,
        };
        match layout {
            FunctionLayout::Script => none,
            FunctionLayout::ScriptWithComputedName => Self {
                computed_name: Some(variant::COMPUTED_NAME),
                ..none
            },
            FunctionLayout::ScriptWithHomeObject => Self {
                home_object: Some(variant::HOME_OBJECT),
                ..none
            },
            FunctionLayout::ScriptWithHomeObjectAndComputedName => Self {
                home_object: Some(variant::HOME_OBJECT),
                computed_name: Some(variant::HOME_OBJECT_COMPUTED_NAME),
                ..none
            },
            FunctionLayout::ScriptWithInlineCache => Self {
                inline_caches: Some(variant::INLINE_CACHES),
                ..none
            },
            FunctionLayout::ScriptWithInlineCacheAndComputedName => Self {
                inline_caches: Some(variant::INLINE_CACHES),
                computed_name: Some(variant::INLINE_CACHE_COMPUTED_NAME),
                ..none
            },
            FunctionLayout::AsmJs => Self {
                module_memory: Some(variant::MODULE_MEMORY),
                ..none
            },
            FunctionLayout::AsmJsWithComputedName => Self {
                module_memory: Some(variant::MODULE_MEMORY),
                computed_name: Some(variant::ASM_JS_COMPUTED_NAME),
                ..none
            },
            FunctionLayout::Wasm => Self {
                module_memory: Some(variant::MODULE_MEMORY),
                signature: Some(variant::SIGNATURE),
                ..none
            },
        }
    }
}
