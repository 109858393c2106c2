//! Capability interface over the function record variants.
//!
//! Whether a record has a home object or computed name slot is decided at
//! closure creation. Reading an absent slot yields `None`. Writing one is a
//! caller bug: it panics with debug assertions and is ignored (with a
//! warning) otherwise.

use otter_vm_gc::{GcHeader, GcObject};

use crate::function::{
    AsmJsScriptFunction, FunctionObject, ScriptFunction, ScriptFunctionWithInlineCache,
    WasmScriptFunction, WithComputedName, WithHomeObject, dispatch,
};
use crate::snapshot::{HeldReference, HeldReferenceVisitor};
use crate::value::Value;

#[track_caller]
pub(crate) fn capability_misuse(function: &ScriptFunction, capability: &'static str) {
    if cfg!(debug_assertions) {
        panic!(
            "function {} was not created with a {capability} slot",
            function.id()
        );
    }
    tracing::warn!(
        target: "otter::function",
        function = function.id(),
        layout = ?function.layout(),
        capability,
        "Write to absent capability slot ignored"
    );
}

/// Operations every function record supports
pub trait ScriptFunctionBase: GcObject {
    /// Core record
    fn core(&self) -> &ScriptFunction;

    /// Home object used for `super` lookups
    fn home_object(&self) -> Option<Value> {
        None
    }

    /// Set the home object
    #[track_caller]
    fn set_home_object(&self, value: Value) {
        let _ = value;
        capability_misuse(self.core(), "home object");
    }

    /// Computed name value
    fn computed_name(&self) -> Option<Value> {
        None
    }

    /// Set the computed name
    #[track_caller]
    fn set_computed_name(&self, value: Value) {
        let _ = value;
        capability_misuse(self.core(), "computed name");
    }

    /// Whether the function has no name for display
    fn is_anonymous(&self) -> bool {
        crate::name::is_anonymous(&self.core().descriptor(), self.computed_name().as_ref())
    }

    /// Inline-cache-owning view
    fn as_inline_cache(&self) -> Option<&ScriptFunctionWithInlineCache> {
        None
    }

    /// asm.js view (also present for WebAssembly)
    fn as_asm_js(&self) -> Option<&AsmJsScriptFunction> {
        None
    }

    /// WebAssembly view
    fn as_wasm(&self) -> Option<&WasmScriptFunction> {
        None
    }

    /// Visit references held by variant-specific slots
    fn for_each_variant_reference(&self, visitor: &mut dyn HeldReferenceVisitor) {
        let _ = visitor;
    }
}

impl ScriptFunctionBase for ScriptFunction {
    fn core(&self) -> &ScriptFunction {
        self
    }
}

impl GcObject for ScriptFunction {
    fn header(&self) -> &GcHeader {
        &self.header
    }
}

impl<B: ScriptFunctionBase> ScriptFunctionBase for WithComputedName<B> {
    fn core(&self) -> &ScriptFunction {
        self.base.core()
    }

    fn home_object(&self) -> Option<Value> {
        self.base.home_object()
    }

    #[track_caller]
    fn set_home_object(&self, value: Value) {
        self.base.set_home_object(value);
    }

    fn computed_name(&self) -> Option<Value> {
        Some(self.computed_name.read().clone())
    }

    fn set_computed_name(&self, value: Value) {
        *self.computed_name.write() = value;
    }

    fn as_inline_cache(&self) -> Option<&ScriptFunctionWithInlineCache> {
        self.base.as_inline_cache()
    }

    fn as_asm_js(&self) -> Option<&AsmJsScriptFunction> {
        self.base.as_asm_js()
    }

    fn as_wasm(&self) -> Option<&WasmScriptFunction> {
        self.base.as_wasm()
    }

    fn for_each_variant_reference(&self, visitor: &mut dyn HeldReferenceVisitor) {
        self.base.for_each_variant_reference(visitor);
        visitor.visit(HeldReference::ComputedName(self.computed_name.read().clone()));
    }
}

impl<B: ScriptFunctionBase> GcObject for WithComputedName<B> {
    fn header(&self) -> &GcHeader {
        self.base.header()
    }

    fn finalize(&self, is_shutdown: bool) {
        self.base.finalize(is_shutdown);
    }
}

impl<B: ScriptFunctionBase> ScriptFunctionBase for WithHomeObject<B> {
    fn core(&self) -> &ScriptFunction {
        self.base.core()
    }

    fn home_object(&self) -> Option<Value> {
        Some(self.home_object.read().clone())
    }

    fn set_home_object(&self, value: Value) {
        *self.home_object.write() = value;
    }

    fn computed_name(&self) -> Option<Value> {
        self.base.computed_name()
    }

    #[track_caller]
    fn set_computed_name(&self, value: Value) {
        self.base.set_computed_name(value);
    }

    fn as_inline_cache(&self) -> Option<&ScriptFunctionWithInlineCache> {
        self.base.as_inline_cache()
    }

    fn as_asm_js(&self) -> Option<&AsmJsScriptFunction> {
        self.base.as_asm_js()
    }

    fn as_wasm(&self) -> Option<&WasmScriptFunction> {
        self.base.as_wasm()
    }

    fn for_each_variant_reference(&self, visitor: &mut dyn HeldReferenceVisitor) {
        self.base.for_each_variant_reference(visitor);
        visitor.visit(HeldReference::HomeObject(self.home_object.read().clone()));
    }
}

impl<B: ScriptFunctionBase> GcObject for WithHomeObject<B> {
    fn header(&self) -> &GcHeader {
        self.base.header()
    }

    fn finalize(&self, is_shutdown: bool) {
        self.base.finalize(is_shutdown);
    }
}

impl ScriptFunctionBase for ScriptFunctionWithInlineCache {
    fn core(&self) -> &ScriptFunction {
        &self.base
    }

    fn as_inline_cache(&self) -> Option<&ScriptFunctionWithInlineCache> {
        Some(self)
    }
}

impl GcObject for ScriptFunctionWithInlineCache {
    fn header(&self) -> &GcHeader {
        &self.base.header
    }

    fn finalize(&self, is_shutdown: bool) {
        if is_shutdown {
            self.free_inline_caches::<true>();
        } else {
            self.free_inline_caches::<false>();
        }
    }
}

impl ScriptFunctionBase for AsmJsScriptFunction {
    fn core(&self) -> &ScriptFunction {
        &self.base
    }

    fn as_asm_js(&self) -> Option<&AsmJsScriptFunction> {
        Some(self)
    }

    fn for_each_variant_reference(&self, visitor: &mut dyn HeldReferenceVisitor) {
        if let Some(memory) = self.module_memory() {
            visitor.visit(HeldReference::ModuleMemory(memory));
        }
    }
}

impl GcObject for AsmJsScriptFunction {
    fn header(&self) -> &GcHeader {
        &self.base.header
    }
}

impl ScriptFunctionBase for WasmScriptFunction {
    fn core(&self) -> &ScriptFunction {
        self.base.core()
    }

    fn as_asm_js(&self) -> Option<&AsmJsScriptFunction> {
        Some(&self.base)
    }

    fn as_wasm(&self) -> Option<&WasmScriptFunction> {
        Some(self)
    }

    fn for_each_variant_reference(&self, visitor: &mut dyn HeldReferenceVisitor) {
        self.base.for_each_variant_reference(visitor);
    }
}

impl GcObject for WasmScriptFunction {
    fn header(&self) -> &GcHeader {
        self.base.header()
    }
}

impl ScriptFunctionBase for FunctionObject {
    fn core(&self) -> &ScriptFunction {
        dispatch!(self, f => f.core())
    }

    fn home_object(&self) -> Option<Value> {
        dispatch!(self, f => f.home_object())
    }

    #[track_caller]
    fn set_home_object(&self, value: Value) {
        dispatch!(self, f => f.set_home_object(value))
    }

    fn computed_name(&self) -> Option<Value> {
        dispatch!(self, f => f.computed_name())
    }

    #[track_caller]
    fn set_computed_name(&self, value: Value) {
        dispatch!(self, f => f.set_computed_name(value))
    }

    fn is_anonymous(&self) -> bool {
        dispatch!(self, f => f.is_anonymous())
    }

    fn as_inline_cache(&self) -> Option<&ScriptFunctionWithInlineCache> {
        dispatch!(self, f => f.as_inline_cache())
    }

    fn as_asm_js(&self) -> Option<&AsmJsScriptFunction> {
        dispatch!(self, f => f.as_asm_js())
    }

    fn as_wasm(&self) -> Option<&WasmScriptFunction> {
        dispatch!(self, f => f.as_wasm())
    }

    fn for_each_variant_reference(&self, visitor: &mut dyn HeldReferenceVisitor) {
        dispatch!(self, f => f.for_each_variant_reference(visitor))
    }
}

impl GcObject for FunctionObject {
    fn header(&self) -> &GcHeader {
        dispatch!(self, f => f.header())
    }

    fn finalize(&self, is_shutdown: bool) {
        dispatch!(self, f => f.finalize(is_shutdown))
    }
}
