//! # Otter VM Function
//!
//! Script function objects for the Otter VM.
//!
//! ## Design
//!
//! - **Fixed layouts**: each closure is one of nine `#[repr(C)]` records
//!   that share a [`ScriptFunction`] core at offset 0; hot fields sit at
//!   constant offsets ([`layout`]) so generated code can read them directly
//! - **Capability slots**: home object and computed name slots exist only
//!   on records created with them ([`ScriptFunctionBase`])
//! - **Tiering**: entry points move Deferred -> Interpreted -> JitCompiled
//!   and back, published atomically while calls are in flight
//! - **Lazy inline caches**: per-function cache blocks are allocated on
//!   first use and released cooperatively or at shutdown
//! - **asm.js / WebAssembly**: module memory binding and signature-checked
//!   calls

#![warn(clippy::all)]
#![warn(missing_docs)]
// Reference slots are raw pointer words; all unsafe code has SAFETY comments

pub mod access;
pub mod capability;
pub mod closure;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod entry;
pub mod environment;
pub mod error;
pub mod function;
pub mod inline_cache;
pub mod layout;
pub mod name;
pub mod numeric;
pub mod object;
pub mod shape;
pub mod snapshot;
pub mod value;

mod slot;

pub use capability::ScriptFunctionBase;
pub use config::{DEOPT_THRESHOLD, FunctionConfig};
pub use context::{FunctionStats, ScriptContext};
pub use descriptor::{
    DescriptorCell, FunctionDescriptor, FunctionDescriptorBuilder, FunctionFlags, FunctionKind,
    ParserHook,
};
pub use entry::{
    BailoutAction, CallThunk, EntryPoint, EntryPointInfo, EntryTier, JavascriptMethod,
    deferred_parsing_thunk,
};
pub use environment::{CachedScope, ClosureEnvironment, ScopeFrame};
pub use error::{FunctionError, FunctionResult};
pub use function::{
    AsmJsScriptFunction, AsmJsScriptFunctionWithComputedName, FunctionLayout, FunctionObject,
    ScriptFunction, ScriptFunctionWithComputedName, ScriptFunctionWithHomeObject,
    ScriptFunctionWithHomeObjectAndComputedName, ScriptFunctionWithInlineCache,
    ScriptFunctionWithInlineCacheAndComputedName, WasmScriptFunction, WithComputedName,
    WithHomeObject,
};
pub use inline_cache::{
    CacheKind, InlineCache, InlineCacheBlock, InlineCacheCounts, InlineCacheState, IsInstCache,
    POLYMORPHIC_LIMIT,
};
pub use layout::{FunctionFieldOffsets, VariantOffsets};
pub use numeric::{LinearMemory, MAX_WASM_PAGES, ModuleMemory, WASM_PAGE_SIZE, WasmSignature, WasmType};
pub use object::JsObject;
pub use shape::{PropertyKey, Shape};
pub use snapshot::{HeldReference, HeldReferenceVisitor, SnapshotRecord};
pub use value::{Symbol, Value};
