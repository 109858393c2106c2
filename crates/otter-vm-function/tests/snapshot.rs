//! Heap snapshot enumeration tests

mod common;

use std::sync::Arc;

use common::{cell, context, named};
use otter_vm_function::{
    ClosureEnvironment, FunctionKind, HeldReference, InlineCacheCounts, ModuleMemory, ScopeFrame,
    ScriptFunctionBase, Value,
};

#[test]
fn test_asm_js_reports_module_memory() {
    let ctx = context();
    let memory = ModuleMemory::new(3);
    let f = ctx.create_asm_js_closure(None, &cell(named("asm").kind(FunctionKind::AsmJs)), memory.clone());

    let references = f.held_references();
    assert_eq!(references.len(), 1);
    match &references[0] {
        HeldReference::ModuleMemory(held) => assert!(Arc::ptr_eq(held, &memory)),
        other => panic!("unexpected reference {other:?}"),
    }
}

#[test]
fn test_visitor_sees_environment_first() {
    let ctx = context();
    let env = ClosureEnvironment::new([ScopeFrame::new()]);
    let desc = cell(named("m").captures_free_variables(true).has_computed_name(true));
    let f = ctx.create_closure(Some(env.clone()), &desc);
    f.set_computed_name(Value::string("key"));

    let mut seen = Vec::new();
    f.for_each_held_reference(&mut |reference: HeldReference| seen.push(reference));
    assert_eq!(seen.len(), 2);
    assert!(matches!(&seen[0], HeldReference::Environment(e) if Arc::ptr_eq(e, &env)));
    assert!(matches!(&seen[1], HeldReference::ComputedName(v) if v.as_str() == Some("key")));
}

#[test]
fn test_snapshot_record_json() {
    let ctx = context();
    let desc = cell(
        named("tracked")
            .inline_caches_on_function_object(true)
            .inline_cache_counts(InlineCacheCounts::new(2, 1, 0)),
    );
    let f = ctx.create_closure(None, &desc);
    f.create_inline_cache();

    let json: serde_json::Value = serde_json::from_str(&f.snapshot_json().unwrap()).unwrap();
    assert_eq!(json["id"], f.id());
    assert_eq!(json["name"], "tracked");
    assert_eq!(json["layout"], "ScriptFunctionWithInlineCache");
    assert_eq!(json["tier"], "Interpreted");
    assert_eq!(json["inline_cache_count"], 3);
    assert_eq!(json["has_inline_caches"], true);
    assert_eq!(json["references"], serde_json::json!([]));
}
