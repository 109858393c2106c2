//! Function descriptors: compile-time metadata shared by every closure
//! instantiated from the same source function.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::entry::{EntryPoint, EntryPointInfo, JavascriptMethod, deferred_parsing_thunk};
use crate::error::FunctionResult;
use crate::function::FunctionObject;
use crate::inline_cache::{InlineCacheBlock, InlineCacheCounts};
use crate::numeric::WasmSignature;
use crate::value::Value;

/// Parses a deferred function body on first call
pub type ParserHook = fn(&FunctionDescriptor) -> Result<(), String>;

/// Capability and behavior flags fixed at compile time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Closures get a home object slot (methods using `super`)
    pub has_home_object: bool,
    /// Closures get a computed name slot
    pub has_computed_name: bool,
    /// Body not parsed yet; first call parses it
    pub is_deferred: bool,
    /// Declared without a name
    pub is_anonymous: bool,
    /// Body references bindings of an enclosing scope
    pub captures_free_variables: bool,
    /// Inline caches live on each closure rather than on the descriptor
    pub inline_caches_on_function_object: bool,
    /// Body contains `super.x` or `super(...)`
    pub has_super_reference: bool,
    /// Is a getter
    pub is_getter: bool,
    /// Is a setter
    pub is_setter: bool,
    /// Is strict mode
    pub is_strict: bool,
}

/// Function kind; fixed for every closure of a descriptor
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Ordinary script function
    #[default]
    Plain = 0,
    /// asm.js module function
    AsmJs = 1,
    /// WebAssembly export
    Wasm = 2,
}

fn no_interpreter(function: &FunctionObject, _args: &[Value]) -> FunctionResult<Value> {
    tracing::warn!(
        target: "otter::function",
        function = function.id(),
        "Function has no interpreter entry; returning undefined"
    );
    Ok(Value::undefined())
}

/// Compile-time metadata of a source function
pub struct FunctionDescriptor {
    /// Function name (empty for anonymous)
    pub name: Option<Arc<str>>,
    /// Number of declared parameters
    pub param_count: u8,
    /// Flags
    pub flags: FunctionFlags,
    /// Kind
    pub kind: FunctionKind,
    /// Inline cache site counts
    pub inline_cache_counts: InlineCacheCounts,
    /// Signature of a WebAssembly export
    pub signature: Option<Arc<WasmSignature>>,
    /// Interpreter tier method
    pub interpreter: JavascriptMethod,
    parser: Option<ParserHook>,
    parsed: AtomicBool,
    parse_lock: Mutex<()>,
    default_entry: RwLock<Arc<EntryPoint>>,
    shared_inline_caches: OnceLock<Arc<InlineCacheBlock>>,
}

impl FunctionDescriptor {
    /// Create a new descriptor builder
    pub fn builder() -> FunctionDescriptorBuilder {
        FunctionDescriptorBuilder::new()
    }

    /// Name for display, `<anonymous>` if unnamed
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Whether the body has been parsed
    pub fn is_parsed(&self) -> bool {
        self.parsed.load(Ordering::Acquire)
    }

    /// Entry point new closures start with
    pub fn default_entry_point(&self) -> Arc<EntryPoint> {
        self.default_entry.read().clone()
    }

    /// Replace the default entry point, e.g. after compiling the body.
    ///
    /// Existing closures notice through
    /// [`FunctionObject::is_new_entry_point_available`].
    pub fn set_default_entry_point(&self, entry: Arc<EntryPoint>) {
        *self.default_entry.write() = entry;
    }

    /// Parse the deferred body if needed. Runs the parser at most once; on
    /// success the default entry becomes the interpreter.
    ///
    /// The parser hook may read the descriptor but must not call
    /// `ensure_parsed` again.
    pub fn ensure_parsed(&self) -> Result<(), String> {
        if self.is_parsed() {
            return Ok(());
        }
        let _parsing = self.parse_lock.lock();
        if self.is_parsed() {
            return Ok(());
        }
        if let Some(parser) = self.parser {
            parser(self)?;
        }
        self.parsed.store(true, Ordering::Release);
        self.set_default_entry_point(EntryPoint::new(EntryPointInfo::interpreted(), self.interpreter));
        tracing::debug!(
            target: "otter::function",
            name = self.display_name(),
            "Deferred body parsed"
        );
        Ok(())
    }

    /// Descriptor-level cache block used when caches are not per-closure
    pub fn shared_inline_caches(&self) -> Option<Arc<InlineCacheBlock>> {
        self.shared_inline_caches.get().cloned()
    }

    /// Allocate the shared block if absent. Returns the block and whether
    /// this call allocated it.
    pub(crate) fn ensure_shared_inline_caches(&self, checked_kinds: bool) -> (Arc<InlineCacheBlock>, bool) {
        let mut created = false;
        let block = self.shared_inline_caches.get_or_init(|| {
            created = true;
            Arc::new(InlineCacheBlock::new(self.inline_cache_counts, checked_kinds))
        });
        (block.clone(), created)
    }
}

impl std::fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("kind", &self.kind)
            .field("inline_cache_counts", &self.inline_cache_counts)
            .field("parsed", &self.is_parsed())
            .finish()
    }
}

/// Builder for function descriptors
#[derive(Debug, Default)]
pub struct FunctionDescriptorBuilder {
    name: Option<Arc<str>>,
    param_count: u8,
    flags: FunctionFlags,
    kind: FunctionKind,
    inline_cache_counts: InlineCacheCounts,
    signature: Option<WasmSignature>,
    interpreter: Option<JavascriptMethod>,
    parser: Option<ParserHook>,
}

impl FunctionDescriptorBuilder {
    /// Create a new descriptor builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set function name
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u8) -> Self {
        self.param_count = count;
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Require a home object slot
    pub fn has_home_object(mut self, value: bool) -> Self {
        self.flags.has_home_object = value;
        self
    }

    /// Require a computed name slot
    pub fn has_computed_name(mut self, value: bool) -> Self {
        self.flags.has_computed_name = value;
        self
    }

    /// Defer parsing to the first call
    pub fn is_deferred(mut self, value: bool) -> Self {
        self.flags.is_deferred = value;
        self
    }

    /// Mark as anonymous
    pub fn is_anonymous(mut self, value: bool) -> Self {
        self.flags.is_anonymous = value;
        self
    }

    /// Mark as capturing enclosing bindings
    pub fn captures_free_variables(mut self, value: bool) -> Self {
        self.flags.captures_free_variables = value;
        self
    }

    /// Keep inline caches on each closure
    pub fn inline_caches_on_function_object(mut self, value: bool) -> Self {
        self.flags.inline_caches_on_function_object = value;
        self
    }

    /// Mark as referencing `super`
    pub fn has_super_reference(mut self, value: bool) -> Self {
        self.flags.has_super_reference = value;
        self
    }

    /// Mark as a getter
    pub fn is_getter(mut self, value: bool) -> Self {
        self.flags.is_getter = value;
        self
    }

    /// Mark as a setter
    pub fn is_setter(mut self, value: bool) -> Self {
        self.flags.is_setter = value;
        self
    }

    /// Mark as strict mode
    pub fn is_strict(mut self, value: bool) -> Self {
        self.flags.is_strict = value;
        self
    }

    /// Set the function kind
    pub fn kind(mut self, kind: FunctionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set inline cache site counts
    pub fn inline_cache_counts(mut self, counts: InlineCacheCounts) -> Self {
        self.inline_cache_counts = counts;
        self
    }

    /// Make this a WebAssembly export with `signature`
    pub fn wasm_signature(mut self, signature: WasmSignature) -> Self {
        self.kind = FunctionKind::Wasm;
        self.signature = Some(signature);
        self
    }

    /// Set the interpreter tier method
    pub fn interpreter(mut self, method: JavascriptMethod) -> Self {
        self.interpreter = Some(method);
        self
    }

    /// Set the deferred-body parser
    pub fn parser(mut self, parser: ParserHook) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Build the descriptor
    pub fn build(self) -> Arc<FunctionDescriptor> {
        let flags = supported_flags(self.name.as_deref(), self.kind, self.flags);
        let interpreter = self.interpreter.unwrap_or(no_interpreter);
        let deferred = self.flags.is_deferred;
        let default_entry = if deferred {
            EntryPoint::new(EntryPointInfo::deferred(), deferred_parsing_thunk)
        } else {
            EntryPoint::new(EntryPointInfo::interpreted(), interpreter)
        };
        let signature = match self.kind {
            FunctionKind::Wasm => Some(Arc::new(self.signature.unwrap_or_default())),
            _ => None,
        };

        Arc::new(FunctionDescriptor {
            name: self.name,
            param_count: self.param_count,
            flags,
            kind: self.kind,
            inline_cache_counts: self.inline_cache_counts,
            signature,
            interpreter,
            parser: self.parser,
            parsed: AtomicBool::new(!deferred),
            parse_lock: Mutex::new(()),
            default_entry: RwLock::new(default_entry),
            shared_inline_caches: OnceLock::new(),
        })
    }
}

/// Clear capability flags that `kind` has no record for.
///
/// asm.js functions support a computed name only; WebAssembly exports
/// support neither capability.
#[track_caller]
fn supported_flags(name: Option<&str>, kind: FunctionKind, mut flags: FunctionFlags) -> FunctionFlags {
    let numeric = matches!(kind, FunctionKind::AsmJs | FunctionKind::Wasm);
    for (capability, requested, supported) in [
        ("home object", &mut flags.has_home_object, !numeric),
        ("computed name", &mut flags.has_computed_name, kind != FunctionKind::Wasm),
    ] {
        if !*requested || supported {
            continue;
        }
        if cfg!(debug_assertions) {
            panic!("{kind:?} function {name:?} cannot have a {capability} slot");
        }
        tracing::warn!(
            target: "otter::function",
            function = name.unwrap_or(""),
            ?kind,
            capability,
            "Capability unsupported by function kind ignored"
        );
        *requested = false;
    }
    flags
}

/// Redirectable reference from a function object to its descriptor
pub struct DescriptorCell {
    current: RwLock<Arc<FunctionDescriptor>>,
}

impl DescriptorCell {
    /// Wrap a descriptor
    pub fn new(descriptor: Arc<FunctionDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(descriptor),
        })
    }

    /// Current descriptor
    pub fn get(&self) -> Arc<FunctionDescriptor> {
        self.current.read().clone()
    }

    /// Point every holder of this cell at `descriptor`
    pub fn redirect(&self, descriptor: Arc<FunctionDescriptor>) -> Arc<FunctionDescriptor> {
        std::mem::replace(&mut *self.current.write(), descriptor)
    }
}

impl std::fmt::Debug for DescriptorCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DescriptorCell").field(&*self.current.read()).finish()
    }
}
