//! Closure instantiation

use std::sync::Arc;

use crate::capability::ScriptFunctionBase;
use crate::context::{ScriptContext, StatsCounters};
use crate::descriptor::DescriptorCell;
use crate::environment::ClosureEnvironment;
use crate::function::{
    AsmJsScriptFunction, FunctionLayout, FunctionObject, ScriptFunction,
    ScriptFunctionWithInlineCache, WasmScriptFunction, WithComputedName, WithHomeObject,
};
use crate::numeric::ModuleMemory;
use crate::value::Value;

impl ScriptContext {
    /// Instantiate a closure of `descriptor` over `environment`.
    ///
    /// The record variant follows the descriptor's flags and kind; the entry
    /// point starts at the descriptor's default.
    pub fn create_closure(
        self: &Arc<Self>,
        environment: Option<Arc<ClosureEnvironment>>,
        descriptor: &Arc<DescriptorCell>,
    ) -> FunctionObject {
        self.instantiate(environment, descriptor, None)
    }

    /// Instantiate a method closure and bind its home object.
    ///
    /// The descriptor must request a home object slot.
    pub fn create_closure_with_home_object(
        self: &Arc<Self>,
        environment: Option<Arc<ClosureEnvironment>>,
        descriptor: &Arc<DescriptorCell>,
        home_object: Value,
    ) -> FunctionObject {
        let function = self.instantiate(environment, descriptor, None);
        function.set_home_object(home_object);
        function
    }

    /// Instantiate an asm.js or WebAssembly closure bound to module memory
    pub fn create_asm_js_closure(
        self: &Arc<Self>,
        environment: Option<Arc<ClosureEnvironment>>,
        descriptor: &Arc<DescriptorCell>,
        module_memory: Arc<ModuleMemory>,
    ) -> FunctionObject {
        let function = self.instantiate(environment, descriptor, Some(module_memory));
        if function.as_asm_js().is_none() {
            tracing::warn!(
                target: "otter::function",
                function = function.id(),
                "Module memory ignored for a plain function"
            );
        }
        function
    }

    fn instantiate(
        self: &Arc<Self>,
        environment: Option<Arc<ClosureEnvironment>>,
        descriptor_ref: &Arc<DescriptorCell>,
        module_memory: Option<Arc<ModuleMemory>>,
    ) -> FunctionObject {
        let descriptor = descriptor_ref.get();
        let flags = descriptor.flags;
        let layout = FunctionLayout::select(descriptor.kind, &flags, descriptor.inline_cache_counts);
        let environment = environment.filter(|env| flags.captures_free_variables && !env.is_empty());

        let core = ScriptFunction::new(
            layout,
            descriptor.kind,
            environment,
            descriptor.default_entry_point(),
            descriptor_ref.clone(),
            self.clone(),
        );
        let counts = descriptor.inline_cache_counts;

        let function = match layout {
            FunctionLayout::Script => FunctionObject::Script(Arc::new(core)),
            FunctionLayout::ScriptWithComputedName => {
                FunctionObject::ScriptWithComputedName(Arc::new(WithComputedName::new(core)))
            }
            FunctionLayout::ScriptWithHomeObject => {
                FunctionObject::ScriptWithHomeObject(Arc::new(WithHomeObject::new(core)))
            }
            FunctionLayout::ScriptWithHomeObjectAndComputedName => {
                FunctionObject::ScriptWithHomeObjectAndComputedName(Arc::new(WithComputedName::new(
                    WithHomeObject::new(core),
                )))
            }
            FunctionLayout::ScriptWithInlineCache => FunctionObject::ScriptWithInlineCache(Arc::new(
                ScriptFunctionWithInlineCache::new(core, counts),
            )),
            FunctionLayout::ScriptWithInlineCacheAndComputedName => {
                FunctionObject::ScriptWithInlineCacheAndComputedName(Arc::new(WithComputedName::new(
                    ScriptFunctionWithInlineCache::new(core, counts),
                )))
            }
            FunctionLayout::AsmJs => {
                FunctionObject::AsmJs(Arc::new(AsmJsScriptFunction::new(core, module_memory)))
            }
            FunctionLayout::AsmJsWithComputedName => FunctionObject::AsmJsWithComputedName(Arc::new(
                WithComputedName::new(AsmJsScriptFunction::new(core, module_memory)),
            )),
            FunctionLayout::Wasm => {
                let signature = descriptor.signature.clone().unwrap_or_default();
                FunctionObject::Wasm(Arc::new(WasmScriptFunction::new(
                    AsmJsScriptFunction::new(core, module_memory),
                    signature,
                )))
            }
        };

        if self.config().eager_inline_caches && counts.total() > 0 {
            function.create_inline_cache();
        }
        self.finalization.register(function.to_gc_object());
        StatsCounters::bump(&self.counters.closures_created);

        tracing::debug!(
            target: "otter::function",
            function = function.id(),
            layout = ?layout,
            name = descriptor.display_name(),
            captures = function.environment().is_some(),
            "Closure created"
        );
        function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FunctionConfig;
    use crate::descriptor::{FunctionDescriptor, FunctionKind};
    use crate::environment::ScopeFrame;
    use crate::inline_cache::InlineCacheCounts;

    #[test]
    fn test_environment_dropped_without_free_variables() {
        let ctx = ScriptContext::new(FunctionConfig::default());
        let env = ClosureEnvironment::new([ScopeFrame::new()]);

        let pure = DescriptorCell::new(FunctionDescriptor::builder().build());
        assert!(ctx.create_closure(Some(env.clone()), &pure).environment().is_none());

        let capturing =
            DescriptorCell::new(FunctionDescriptor::builder().captures_free_variables(true).build());
        let f = ctx.create_closure(Some(env.clone()), &capturing);
        assert!(Arc::ptr_eq(&f.environment().unwrap(), &env));

        let empty = ClosureEnvironment::new([]);
        assert!(ctx.create_closure(Some(empty), &capturing).environment().is_none());
    }

    #[test]
    fn test_eager_inline_caches() {
        let ctx = ScriptContext::new(FunctionConfig {
            eager_inline_caches: true,
            ..FunctionConfig::default()
        });
        let desc = DescriptorCell::new(
            FunctionDescriptor::builder()
                .inline_caches_on_function_object(true)
                .inline_cache_counts(InlineCacheCounts::new(2, 1, 0))
                .build(),
        );
        let f = ctx.create_closure(None, &desc);
        assert_eq!(f.layout(), FunctionLayout::ScriptWithInlineCache);
        assert!(f.has_inline_caches());
        assert_eq!(f.inline_cache_block().map(|b| b.len()), Some(3));
        assert_eq!(ctx.stats().inline_cache_blocks_allocated, 1);
    }

    #[test]
    fn test_closures_are_registered() {
        let ctx = ScriptContext::new(FunctionConfig::default());
        let desc = DescriptorCell::new(FunctionDescriptor::builder().kind(FunctionKind::AsmJs).build());
        let f = ctx.create_asm_js_closure(None, &desc, ModuleMemory::new(1));
        assert_eq!(ctx.live_functions(), 1);
        assert_eq!(ctx.stats().closures_created, 1);
        assert!(f.as_asm_js().unwrap().module_memory().is_some());

        drop(f);
        assert_eq!(ctx.collect_garbage(), 1);
        assert_eq!(ctx.live_functions(), 0);
    }
}
