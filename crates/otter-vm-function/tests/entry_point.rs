//! Entry-point state machine tests
//!
//! Deferred parsing, tier publication with calls in flight, call thunks and
//! bailout-driven deoptimization.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use common::{cell, compiled_three, compiled_two, context, interpreted_one, named};
use otter_vm_function::{
    BailoutAction, EntryPoint, EntryPointInfo, EntryTier, FunctionConfig, FunctionDescriptor,
    FunctionError, InlineCacheCounts, ScriptContext,
};

// ============================================================================
// Deferred parsing
// ============================================================================

static SIBLING_PARSES: AtomicUsize = AtomicUsize::new(0);

fn counting_parser(_: &FunctionDescriptor) -> Result<(), String> {
    SIBLING_PARSES.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn failing_parser(_: &FunctionDescriptor) -> Result<(), String> {
    Err("unexpected token".to_owned())
}

#[test]
fn test_deferred_body_parsed_once_for_all_siblings() {
    let ctx = context();
    let desc = cell(named("lazy").is_deferred(true).parser(counting_parser));
    let a = ctx.create_closure(None, &desc);
    let b = ctx.create_closure(None, &desc);

    assert_eq!(a.current_entry_point().tier(), EntryTier::Deferred);
    assert!(!a.has_function_body());

    assert_eq!(a.call(&[]).unwrap().as_int32(), Some(1));
    assert_eq!(a.current_entry_point().tier(), EntryTier::Interpreted);
    assert!(b.has_function_body());

    // The sibling still holds the deferred entry until it is called.
    assert_eq!(b.current_entry_point().tier(), EntryTier::Deferred);
    assert!(b.is_new_entry_point_available());
    assert_eq!(b.call(&[]).unwrap().as_int32(), Some(1));
    assert_eq!(b.current_entry_point().id(), a.current_entry_point().id());

    assert_eq!(SIBLING_PARSES.load(Ordering::SeqCst), 1);

    // Closures created after the parse start interpreted.
    let c = ctx.create_closure(None, &desc);
    assert_eq!(c.current_entry_point().tier(), EntryTier::Interpreted);
}

#[test]
fn test_deferred_parse_failure_keeps_deferred_entry() {
    let ctx = context();
    let desc = cell(named("broken").is_deferred(true).parser(failing_parser));
    let f = ctx.create_closure(None, &desc);

    match f.call(&[]) {
        Err(FunctionError::DeferredParse { function, message }) => {
            assert_eq!(function, "broken");
            assert_eq!(message, "unexpected token");
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert_eq!(f.current_entry_point().tier(), EntryTier::Deferred);
    assert!(!f.has_function_body());
}

// ============================================================================
// Publication
// ============================================================================

#[test]
fn test_change_entry_point_publishes_address() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("hot")));
    let before = ctx.stats().entry_point_changes;

    let entry = f.change_entry_point(EntryPointInfo::jit_compiled(256), compiled_two).unwrap();
    assert_eq!(f.current_entry_point().id(), entry.id());
    assert_eq!(f.entry_address(), entry.address());
    assert_eq!(f.current_entry_point().info().code_size, 256);
    assert_eq!(f.call(&[]).unwrap().as_int32(), Some(2));
    assert_eq!(ctx.stats().entry_point_changes, before + 1);
}

#[test]
fn test_call_in_flight_finishes_on_its_snapshot() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("racy")));

    let snapshot = f.current_entry_point();
    f.change_entry_point(EntryPointInfo::jit_compiled(32), compiled_two);

    assert_eq!(snapshot.invoke(&f, &[]).unwrap().as_int32(), Some(1));
    assert_eq!(f.call(&[]).unwrap().as_int32(), Some(2));
}

#[test]
fn test_background_compile_publish() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("background")));

    assert!(f.mark_jit_in_flight());
    assert!(!f.mark_jit_in_flight());
    assert!(f.is_jit_in_flight());

    let (tx, rx) = mpsc::channel();
    let compiling = f.clone();
    let worker = thread::spawn(move || {
        let entry = compiling.change_entry_point(EntryPointInfo::jit_compiled(512), compiled_two).unwrap();
        tx.send(entry.id()).unwrap();
    });

    // Calls racing the publish observe one tier or the other, never a mix.
    for _ in 0..100 {
        let result = f.call(&[]).unwrap().as_int32();
        assert!(matches!(result, Some(1) | Some(2)));
    }

    let published = rx.recv().unwrap();
    worker.join().unwrap();
    assert_eq!(f.current_entry_point().id(), published);
    assert_eq!(f.entry_address(), f.current_entry_point().address());
    assert!(!f.is_jit_in_flight());
    assert_eq!(f.call(&[]).unwrap().as_int32(), Some(2));
}

#[test]
fn test_failed_compile_clears_in_flight() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("f")));
    f.mark_jit_in_flight();
    f.clear_jit_in_flight();
    assert!(!f.is_jit_in_flight());
    assert_eq!(f.current_entry_point().tier(), EntryTier::Interpreted);
}

#[test]
fn test_call_thunks_follow_publication() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("thunked")));
    let thunk = f.register_call_thunk();
    assert_eq!(thunk.target().id(), f.current_entry_point().id());
    assert_eq!(thunk.call(&f, &[]).unwrap().as_int32(), Some(1));

    let compiled = f.change_entry_point(EntryPointInfo::jit_compiled(64), compiled_two).unwrap();
    assert_eq!(thunk.target().id(), compiled.id());
    assert_eq!(thunk.address(), compiled.address());
    assert_eq!(thunk.call(&f, &[]).unwrap().as_int32(), Some(2));

    f.change_entry_point(EntryPointInfo::jit_compiled(64), compiled_three);
    assert_eq!(thunk.patch_count(), 2);
    assert_eq!(thunk.call(&f, &[]).unwrap().as_int32(), Some(3));
}

// ============================================================================
// Downgrade and bailouts
// ============================================================================

#[test]
fn test_downgrade_requires_compiled_code() {
    let ctx = context();
    let f = ctx.create_closure(None, &cell(named("cold")));
    assert!(!f.downgrade_entry_point());

    f.change_entry_point(EntryPointInfo::jit_compiled(16), compiled_two);
    assert!(f.downgrade_entry_point());
    assert_eq!(f.current_entry_point().tier(), EntryTier::Interpreted);
    assert_eq!(f.call(&[]).unwrap().as_int32(), Some(1));
    assert_eq!(ctx.stats().downgrades, 1);
}

#[test]
fn test_downgrade_invalidates_inline_caches() {
    let ctx = context();
    let desc = cell(
        named("deopt")
            .inline_caches_on_function_object(true)
            .inline_cache_counts(InlineCacheCounts::new(1, 0, 0)),
    );
    let f = ctx.create_closure(None, &desc);
    let block = f.create_inline_cache();
    block.update_property(0, 7, 0);
    let generation = block.generation();

    let info = EntryPointInfo::jit_compiled(16).with_inline_cache_generation(generation);
    f.change_entry_point(info, compiled_two);
    assert!(f.downgrade_entry_point());

    assert!(block.generation() > generation);
    assert_eq!(block.populated_count(), 0);
    assert_eq!(block.lookup_property(0, 7), None);
}

#[test]
fn test_compile_against_invalidated_caches_is_rejected() {
    let ctx = context();
    let desc = cell(
        named("stale")
            .inline_caches_on_function_object(true)
            .inline_cache_counts(InlineCacheCounts::new(1, 0, 0)),
    );
    let f = ctx.create_closure(None, &desc);
    let block = f.create_inline_cache();
    let compiled_at = block.generation();
    let info = EntryPointInfo::jit_compiled(16).with_inline_cache_generation(compiled_at);
    f.change_entry_point(info, compiled_two).unwrap();

    // A recompile is started, then the running code deoptimizes.
    assert!(f.mark_jit_in_flight());
    assert!(f.downgrade_entry_point());

    let stale = EntryPointInfo::jit_compiled(32).with_inline_cache_generation(compiled_at);
    assert!(f.change_entry_point(stale, compiled_three).is_none());
    assert_eq!(f.current_entry_point().tier(), EntryTier::Interpreted);
    assert!(!f.is_jit_in_flight());
    assert_eq!(f.call(&[]).unwrap().as_int32(), Some(1));
    assert_eq!(ctx.stats().stale_code_rejected, 1);

    let fresh = EntryPointInfo::jit_compiled(32).with_inline_cache_generation(block.generation());
    assert!(f.change_entry_point(fresh, compiled_three).is_some());
    assert_eq!(f.call(&[]).unwrap().as_int32(), Some(3));
}

#[test]
fn test_racing_downgrades_discard_once() {
    let ctx = context();
    let desc = cell(
        named("contended")
            .inline_caches_on_function_object(true)
            .inline_cache_counts(InlineCacheCounts::new(1, 0, 0)),
    );
    let f = ctx.create_closure(None, &desc);
    let block = f.create_inline_cache();
    f.change_entry_point(EntryPointInfo::jit_compiled(16), compiled_two).unwrap();

    let downgraded = thread::scope(|scope| {
        let workers: Vec<_> = (0..8).map(|_| scope.spawn(|| f.downgrade_entry_point())).collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .filter(|&won| won)
            .count()
    });

    assert_eq!(downgraded, 1);
    assert_eq!(ctx.stats().downgrades, 1);
    assert_eq!(block.generation(), 1);
    assert_eq!(f.current_entry_point().tier(), EntryTier::Interpreted);
}

#[test]
fn test_downgrade_resets_shared_default() {
    let ctx = context();
    let desc = cell(named("shared"));
    let f = ctx.create_closure(None, &desc);

    let compiled = EntryPoint::new(EntryPointInfo::jit_compiled(48), compiled_two);
    desc.get().set_default_entry_point(compiled.clone());
    assert!(f.is_new_entry_point_available());
    f.update_undeferred_body().unwrap();
    assert_eq!(f.current_entry_point().id(), compiled.id());

    let sibling = ctx.create_closure(None, &desc);
    assert_eq!(sibling.current_entry_point().tier(), EntryTier::JitCompiled);

    assert!(f.downgrade_entry_point());
    assert_eq!(desc.get().default_entry_point().tier(), EntryTier::Interpreted);
    assert!(sibling.is_new_entry_point_available());
}

#[test]
fn test_bailouts_deoptimize_at_threshold() {
    let ctx = ScriptContext::new(FunctionConfig {
        deopt_threshold: 3,
        ..FunctionConfig::default()
    });
    let f = ctx.create_closure(None, &cell(named("flaky").interpreter(interpreted_one)));
    f.change_entry_point(EntryPointInfo::jit_compiled(64), compiled_two);

    assert_eq!(f.record_bailout(), BailoutAction::Resume);
    assert_eq!(f.record_bailout(), BailoutAction::Resume);
    assert_eq!(f.bailout_count(), 2);
    assert_eq!(f.record_bailout(), BailoutAction::Deoptimized);

    assert_eq!(f.current_entry_point().tier(), EntryTier::Interpreted);
    assert_eq!(f.bailout_count(), 0);
    let stats = ctx.stats();
    assert_eq!(stats.bailouts, 3);
    assert_eq!(stats.downgrades, 1);
}

#[test]
fn test_bailouts_in_interpreter_do_not_deoptimize() {
    let ctx = ScriptContext::new(FunctionConfig {
        deopt_threshold: 1,
        ..FunctionConfig::default()
    });
    let f = ctx.create_closure(None, &cell(named("interp")));
    assert_eq!(f.record_bailout(), BailoutAction::Resume);
    assert_eq!(ctx.stats().downgrades, 0);
}
