//! Enumeration of the references a function object holds, for heap
//! snapshots.

use std::sync::Arc;

use serde::Serialize;

use crate::capability::ScriptFunctionBase;
use crate::entry::EntryTier;
use crate::environment::{CachedScope, ClosureEnvironment};
use crate::function::{FunctionLayout, FunctionObject};
use crate::numeric::ModuleMemory;
use crate::value::Value;

/// A reference held by a function object
#[derive(Debug, Clone)]
pub enum HeldReference {
    /// Captured environment
    Environment(Arc<ClosureEnvironment>),
    /// Materialized scope cache
    CachedScope(Arc<CachedScope>),
    /// Home object slot
    HomeObject(Value),
    /// Computed name slot
    ComputedName(Value),
    /// asm.js / WebAssembly module memory
    ModuleMemory(Arc<ModuleMemory>),
}

impl HeldReference {
    /// Edge label used in snapshots
    pub fn label(&self) -> &'static str {
        match self {
            Self::Environment(_) => "environment",
            Self::CachedScope(_) => "cached_scope",
            Self::HomeObject(_) => "home_object",
            Self::ComputedName(_) => "computed_name",
            Self::ModuleMemory(_) => "module_memory",
        }
    }
}

/// Receives each reference during enumeration
pub trait HeldReferenceVisitor {
    /// Called once per held reference
    fn visit(&mut self, reference: HeldReference);
}

impl<F: FnMut(HeldReference)> HeldReferenceVisitor for F {
    fn visit(&mut self, reference: HeldReference) {
        self(reference)
    }
}

/// Serializable summary of one function object
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    /// Object id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Record layout
    pub layout: String,
    /// Current entry tier
    pub tier: EntryTier,
    /// Inline cache sites
    pub inline_cache_count: usize,
    /// Whether a cache block is reachable
    pub has_inline_caches: bool,
    /// Labels of held references, in enumeration order
    pub references: Vec<&'static str>,
}

impl SnapshotRecord {
    /// Serialize as a single JSON object
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl FunctionObject {
    /// Visit the environment, the cached scope, then the variant slots.
    ///
    /// Empty slots are skipped; home object and computed name slots are
    /// reported whenever the record has them.
    pub fn for_each_held_reference(&self, visitor: &mut dyn HeldReferenceVisitor) {
        if let Some(environment) = self.environment() {
            visitor.visit(HeldReference::Environment(environment));
        }
        if let Some(scope) = self.cached_scope() {
            visitor.visit(HeldReference::CachedScope(scope));
        }
        self.for_each_variant_reference(visitor);
    }

    /// Collect the held references into a vector
    pub fn held_references(&self) -> Vec<HeldReference> {
        let mut references = Vec::new();
        self.for_each_held_reference(&mut |reference: HeldReference| references.push(reference));
        references
    }

    /// Summary record for heap snapshots
    pub fn snapshot_record(&self) -> SnapshotRecord {
        let mut references = Vec::new();
        self.for_each_held_reference(&mut |reference: HeldReference| references.push(reference.label()));
        SnapshotRecord {
            id: self.id(),
            name: self.display_name(),
            layout: layout_name(self.layout()).to_owned(),
            tier: self.current_entry_point().tier(),
            inline_cache_count: self.inline_cache_count(),
            has_inline_caches: self.has_inline_caches(),
            references,
        }
    }

    /// The snapshot record as JSON
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        self.snapshot_record().to_json()
    }
}

fn layout_name(layout: FunctionLayout) -> &'static str {
    match layout {
        FunctionLayout::Script => "ScriptFunction",
        FunctionLayout::ScriptWithComputedName => "ScriptFunctionWithComputedName",
        FunctionLayout::ScriptWithHomeObject => "ScriptFunctionWithHomeObject",
        FunctionLayout::ScriptWithHomeObjectAndComputedName => "ScriptFunctionWithHomeObjectAndComputedName",
        FunctionLayout::ScriptWithInlineCache => "ScriptFunctionWithInlineCache",
        FunctionLayout::ScriptWithInlineCacheAndComputedName => {
            "ScriptFunctionWithInlineCacheAndComputedName"
        }
        FunctionLayout::AsmJs => "AsmJsScriptFunction",
        FunctionLayout::AsmJsWithComputedName => "AsmJsScriptFunctionWithComputedName",
        FunctionLayout::Wasm => "WasmScriptFunction",
    }
}
