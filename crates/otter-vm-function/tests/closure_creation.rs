//! Closure creation tests
//!
//! Covers record selection, capability slots, descriptor redirection and
//! registration with the context's finalization queue.

mod common;

use std::sync::Arc;
use std::thread;

use common::{cell, context, named};
use otter_vm_function::{
    ClosureEnvironment, FunctionDescriptor, FunctionKind, FunctionLayout, InlineCacheCounts,
    JsObject, ModuleMemory, ScopeFrame, ScriptFunctionBase, Symbol, Value,
};
use otter_vm_gc::GcObject;

// ============================================================================
// Record selection
// ============================================================================

#[test]
fn test_header_tag_matches_layout() {
    let ctx = context();
    let cases = [
        (named("plain"), FunctionLayout::Script),
        (named("computed").has_computed_name(true), FunctionLayout::ScriptWithComputedName),
        (named("method").has_home_object(true), FunctionLayout::ScriptWithHomeObject),
        (
            named("both").has_home_object(true).has_computed_name(true),
            FunctionLayout::ScriptWithHomeObjectAndComputedName,
        ),
        (
            named("cached")
                .inline_caches_on_function_object(true)
                .inline_cache_counts(InlineCacheCounts::new(1, 0, 0)),
            FunctionLayout::ScriptWithInlineCache,
        ),
        (named("asm").kind(FunctionKind::AsmJs), FunctionLayout::AsmJs),
        (named("wasm").kind(FunctionKind::Wasm), FunctionLayout::Wasm),
    ];

    for (builder, expected) in cases {
        let f = ctx.create_closure(None, &cell(builder));
        assert_eq!(f.layout(), expected);
        assert_eq!(f.header().tag(), expected.tag());
    }
    assert_eq!(ctx.stats().closures_created, 7);
}

#[test]
fn test_home_object_wins_over_own_inline_caches() {
    let ctx = context();
    let desc = cell(
        named("m")
            .has_home_object(true)
            .inline_caches_on_function_object(true)
            .inline_cache_counts(InlineCacheCounts::new(2, 0, 0)),
    );
    let f = ctx.create_closure_with_home_object(None, &desc, Value::null());
    assert_eq!(f.layout(), FunctionLayout::ScriptWithHomeObject);
    assert!(f.as_inline_cache().is_none());

    // Caches still work, through the descriptor's shared block.
    let block = f.create_inline_cache();
    assert_eq!(block.len(), 2);
    assert!(Arc::ptr_eq(&block, &desc.get().shared_inline_caches().unwrap()));
}

#[test]
fn test_siblings_share_descriptor_but_not_identity() {
    let ctx = context();
    let desc = cell(named("f"));
    let a = ctx.create_closure(None, &desc);
    let b = ctx.create_closure(None, &desc);
    assert!(!a.ptr_eq(&b));
    assert_ne!(a.id(), b.id());
    assert!(Arc::ptr_eq(a.descriptor_ref(), b.descriptor_ref()));
    assert!(a.ptr_eq(&a.clone()));
}

// ============================================================================
// Capability slots
// ============================================================================

#[test]
fn test_home_object_slot() {
    let ctx = context();
    let home = JsObject::new(None);
    let desc = cell(named("method").has_home_object(true).has_super_reference(true));
    let f = ctx.create_closure_with_home_object(None, &desc, Value::object(home.clone()));

    assert!(f.has_super_reference());
    let stored = f.home_object().unwrap();
    assert!(Arc::ptr_eq(stored.as_object().unwrap(), &home));

    f.set_home_object(Value::undefined());
    assert!(f.home_object().unwrap().is_undefined());
    assert!(f.computed_name().is_none());
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "home object slot"))]
fn test_home_object_write_without_slot() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("plain")));
    f.set_home_object(Value::null());
    assert!(f.home_object().is_none());
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "computed name slot"))]
fn test_computed_name_write_without_slot() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("plain").has_home_object(true)));
    f.set_computed_name(Value::string("x"));
    assert!(f.computed_name().is_none());
}

#[test]
fn test_computed_name_display() {
    let ctx = context();
    let desc = cell(FunctionDescriptor::builder().has_computed_name(true).is_anonymous(true));
    let f = ctx.create_closure(None, &desc);

    assert!(f.is_anonymous());
    assert_eq!(f.display_name(), "");

    f.set_computed_name(Value::symbol(Symbol::new(Some("Symbol.iterator"))));
    assert!(!f.is_anonymous());
    assert_eq!(f.display_name(), "[Symbol.iterator]");

    let as_value = Value::function(f.clone());
    assert_eq!(as_value.type_of(), "function");
    assert_eq!(as_value.to_display_string(), "function [Symbol.iterator]() { [code] }");
    assert!(as_value.as_function().unwrap().ptr_eq(&f));
}

#[test]
fn test_accessor_names() {
    let ctx = context();
    let getter = ctx.create_closure(None, &cell(named("size").is_getter(true)));
    let setter = ctx.create_closure(None, &cell(named("size").is_setter(true)));
    assert_eq!(getter.display_name(), "get size");
    assert_eq!(setter.display_name(), "set size");
    assert!(!getter.is_anonymous());
}

// ============================================================================
// Environment and descriptor
// ============================================================================

#[test]
fn test_environment_captured_only_when_needed() {
    let ctx = context();
    let frame = ScopeFrame::with_bindings([("x", Value::int32(1))]);
    let env = ClosureEnvironment::new([frame]);

    let capturing = ctx.create_closure(Some(env.clone()), &cell(named("f").captures_free_variables(true)));
    let pure = ctx.create_closure(Some(env.clone()), &cell(named("g")));

    assert!(Arc::ptr_eq(&capturing.environment().unwrap(), &env));
    assert!(pure.environment().is_none());
    assert_eq!(capturing.lookup_dynamic("x"), Some(Value::int32(1)));
    assert_eq!(pure.lookup_dynamic("x"), None);
}

#[test]
fn test_descriptor_redirect_reaches_existing_closures() {
    let ctx = context();
    let desc = cell(named("before"));
    let f = ctx.create_closure(None, &desc);

    let old = desc.redirect(named("after").build());
    assert_eq!(old.display_name(), "before");
    assert_eq!(f.descriptor().display_name(), "after");
    assert_eq!(f.display_name(), "after");
}

// ============================================================================
// Finalization
// ============================================================================

#[test]
fn test_collect_finalizes_unreachable_closures() {
    let ctx = context();
    let desc = cell(named("f"));
    let kept = ctx.create_closure(None, &desc);
    {
        let _dropped = ctx.create_closure(None, &desc);
        let _also_dropped = ctx.create_closure(None, &desc);
        assert_eq!(ctx.live_functions(), 3);
    }

    assert_eq!(ctx.collect_garbage(), 2);
    assert_eq!(ctx.live_functions(), 1);
    assert_eq!(ctx.shutdown(), 1);
    assert_eq!(ctx.live_functions(), 0);
    drop(kept);
}

#[test]
fn test_asm_js_memory_ignored_for_plain_function() {
    let ctx = context();
    let f = ctx.create_asm_js_closure(None, &cell(named("plain")), ModuleMemory::new(2));
    assert_eq!(f.layout(), FunctionLayout::Script);
    assert!(f.as_asm_js().is_none());
    assert!(!f.is_asm_js_function());
}

#[test]
fn test_closures_cross_threads() {
    let ctx = context();
    let desc = cell(named("shared").has_computed_name(true));
    let f = ctx.create_closure(None, &desc);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let f = f.clone();
            thread::spawn(move || {
                f.set_computed_name(Value::int32(i));
                f.call(&[]).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Value::int32(1));
    }
    assert!(f.computed_name().unwrap().is_int32());
}
