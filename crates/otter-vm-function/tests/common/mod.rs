//! Shared helpers for function-object integration tests

#![allow(dead_code)]

use std::sync::Arc;

use otter_vm_function::{
    DescriptorCell, FunctionConfig, FunctionDescriptor, FunctionDescriptorBuilder, FunctionObject,
    FunctionResult, ScriptContext, Value,
};

/// Context with default configuration
pub fn context() -> Arc<ScriptContext> {
    ScriptContext::new(FunctionConfig::default())
}

/// Wrap a built descriptor in a cell
pub fn cell(builder: FunctionDescriptorBuilder) -> Arc<DescriptorCell> {
    DescriptorCell::new(builder.build())
}

/// Descriptor builder for a named function whose interpreter returns 1
pub fn named(name: &str) -> FunctionDescriptorBuilder {
    FunctionDescriptor::builder().name(name).interpreter(interpreted_one)
}

pub fn interpreted_one(_: &FunctionObject, _: &[Value]) -> FunctionResult<Value> {
    Ok(Value::int32(1))
}

pub fn compiled_two(_: &FunctionObject, _: &[Value]) -> FunctionResult<Value> {
    Ok(Value::int32(2))
}

pub fn compiled_three(_: &FunctionObject, _: &[Value]) -> FunctionResult<Value> {
    Ok(Value::int32(3))
}

/// Returns its first argument
pub fn identity(_: &FunctionObject, args: &[Value]) -> FunctionResult<Value> {
    Ok(args.first().cloned().unwrap_or_default())
}
