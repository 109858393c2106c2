//! Inline cache and entry-point benchmarks
//!
//! Measures cached property loads per IC state and the cost of calling
//! through a function's current entry point.

use criterion::{Criterion, criterion_group, criterion_main};
use otter_vm_function::{
    DescriptorCell, EntryPointInfo, FunctionConfig, FunctionDescriptor, FunctionObject, FunctionResult,
    InlineCacheCounts, JsObject, PropertyKey, ScriptContext, Value,
};
use std::hint::black_box;
use std::sync::Arc;

fn interpreted(_: &FunctionObject, args: &[Value]) -> FunctionResult<Value> {
    Ok(args.first().cloned().unwrap_or_default())
}

fn compiled(_: &FunctionObject, args: &[Value]) -> FunctionResult<Value> {
    Ok(args.first().cloned().unwrap_or_default())
}

fn cached_function(own_caches: bool) -> FunctionObject {
    let ctx = ScriptContext::new(FunctionConfig::default());
    let desc = DescriptorCell::new(
        FunctionDescriptor::builder()
            .name("bench")
            .inline_caches_on_function_object(own_caches)
            .inline_cache_counts(InlineCacheCounts::new(1, 1, 1))
            .interpreter(interpreted)
            .build(),
    );
    ctx.create_closure(None, &desc)
}

/// Objects with `count` distinct shapes that all have property `x`
fn objects_with_shapes(count: usize) -> Vec<Arc<JsObject>> {
    (0..count)
        .map(|i| {
            let obj = JsObject::new(None);
            for pad in 0..i {
                obj.set(PropertyKey::from(format!("pad{pad}").as_str()), Value::null());
            }
            obj.set(PropertyKey::from("x"), Value::int32(i as i32));
            obj
        })
        .collect()
}

fn bench_property_loads(c: &mut Criterion) {
    let key = PropertyKey::from("x");
    let mut group = c.benchmark_group("property_load");

    for (label, shapes) in [("monomorphic", 1), ("polymorphic", 4), ("megamorphic", 8)] {
        let f = cached_function(true);
        let objects = objects_with_shapes(shapes);
        group.bench_function(label, |b| {
            b.iter(|| {
                for obj in &objects {
                    black_box(f.get_property_cached(0, obj, &key));
                }
            })
        });
    }

    let shared = cached_function(false);
    let objects = objects_with_shapes(1);
    group.bench_function("shared_block", |b| {
        b.iter(|| black_box(shared.get_property_cached(0, &objects[0], &key)))
    });
    group.finish();
}

fn bench_instanceof(c: &mut Criterion) {
    let f = cached_function(true);
    let proto = JsObject::new(None);
    let obj = JsObject::new(Some(proto.clone()));
    c.bench_function("instanceof_cached", |b| {
        b.iter(|| black_box(f.is_instance_cached(2, &obj, &proto)))
    });
}

fn bench_calls(c: &mut Criterion) {
    let args = [Value::int32(7)];
    let mut group = c.benchmark_group("call");

    let interp = cached_function(false);
    group.bench_function("interpreted", |b| b.iter(|| black_box(interp.call(&args))));

    let jit = cached_function(false);
    jit.change_entry_point(EntryPointInfo::jit_compiled(64), compiled);
    group.bench_function("jit_compiled", |b| b.iter(|| black_box(jit.call(&args))));

    let thunk = jit.register_call_thunk();
    group.bench_function("through_thunk", |b| b.iter(|| black_box(thunk.call(&jit, &args))));
    group.finish();
}

criterion_group!(benches, bench_property_loads, bench_instanceof, bench_calls);
criterion_main!(benches);
