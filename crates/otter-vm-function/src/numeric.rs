//! Module memory, linear memory and WebAssembly signatures for
//! numeric-specialized functions.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{FunctionError, FunctionResult};
use crate::value::Value;

/// Size of one linear memory page
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Largest linear memory in pages (4 GiB)
pub const MAX_WASM_PAGES: u32 = 65536;

fn page_bytes(pages: u32) -> Option<usize> {
    usize::try_from(pages).ok()?.checked_mul(WASM_PAGE_SIZE)
}

/// Growable byte heap of an asm.js or WebAssembly module
pub struct LinearMemory {
    bytes: RwLock<Vec<u8>>,
    maximum_pages: u32,
}

impl LinearMemory {
    /// Allocate `initial_pages` zeroed pages. The maximum is capped at
    /// [`MAX_WASM_PAGES`]; returns `None` if `initial_pages` exceeds it or
    /// does not fit the address space.
    pub fn new(initial_pages: u32, maximum_pages: Option<u32>) -> Option<Arc<Self>> {
        let maximum_pages = maximum_pages.map_or(MAX_WASM_PAGES, |max| max.min(MAX_WASM_PAGES));
        if initial_pages > maximum_pages {
            return None;
        }
        Some(Arc::new(Self {
            bytes: RwLock::new(vec![0; page_bytes(initial_pages)?]),
            maximum_pages,
        }))
    }

    /// Current size in pages
    pub fn size_pages(&self) -> u32 {
        (self.bytes.read().len() / WASM_PAGE_SIZE) as u32
    }

    /// Current size in bytes
    pub fn byte_len(&self) -> usize {
        self.bytes.read().len()
    }

    /// Maximum size in pages
    pub fn maximum_pages(&self) -> u32 {
        self.maximum_pages
    }

    /// Grow by `delta` pages. Returns the previous size, or `None` if the
    /// maximum would be exceeded.
    pub fn grow(&self, delta: u32) -> Option<u32> {
        let mut bytes = self.bytes.write();
        let previous = (bytes.len() / WASM_PAGE_SIZE) as u32;
        let next = previous.checked_add(delta)?;
        if next > self.maximum_pages {
            return None;
        }
        bytes.resize(page_bytes(next)?, 0);
        Some(previous)
    }

    /// Copy `len` bytes starting at `offset`
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        self.bytes.read().get(offset..end).map(<[u8]>::to_vec)
    }

    /// Write `data` at `offset`; false if out of bounds
    pub fn write(&self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        match self.bytes.write().get_mut(offset..end) {
            Some(target) => {
                target.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Little-endian i32 load
    pub fn load_i32(&self, offset: usize) -> Option<i32> {
        let bytes = self.read(offset, 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Little-endian i32 store
    pub fn store_i32(&self, offset: usize, value: i32) -> bool {
        self.write(offset, &value.to_le_bytes())
    }
}

impl fmt::Debug for LinearMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearMemory")
            .field("pages", &self.size_pages())
            .field("maximum_pages", &self.maximum_pages)
            .finish()
    }
}

/// Module-level globals of an asm.js / WebAssembly module.
///
/// Addressed by index, independent of any lexical environment.
pub struct ModuleMemory {
    globals: RwLock<Box<[Value]>>,
    heap: Option<Arc<LinearMemory>>,
}

impl ModuleMemory {
    /// `global_count` undefined globals and no heap
    pub fn new(global_count: usize) -> Arc<Self> {
        Self::build(global_count, None)
    }

    /// Globals plus a module heap
    pub fn with_heap(global_count: usize, heap: Arc<LinearMemory>) -> Arc<Self> {
        Self::build(global_count, Some(heap))
    }

    fn build(global_count: usize, heap: Option<Arc<LinearMemory>>) -> Arc<Self> {
        Arc::new(Self {
            globals: RwLock::new(vec![Value::undefined(); global_count].into_boxed_slice()),
            heap,
        })
    }

    /// Read global `index`
    pub fn get(&self, index: usize) -> Option<Value> {
        self.globals.read().get(index).cloned()
    }

    /// Write global `index`; false if out of range
    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.globals.write().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Number of globals
    pub fn len(&self) -> usize {
        self.globals.read().len()
    }

    /// Whether the module has no globals
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Module heap
    pub fn heap(&self) -> Option<&Arc<LinearMemory>> {
        self.heap.as_ref()
    }
}

impl fmt::Debug for ModuleMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleMemory")
            .field("globals", &self.len())
            .field("heap", &self.heap)
            .finish()
    }
}

/// WebAssembly value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WasmType {
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl WasmType {
    /// Text-format name
    pub const fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    /// Whether `value` belongs to the value class this type accepts at the
    /// JS boundary. `i64` has no number representation and accepts nothing.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::I32 => value.is_int32(),
            Self::I64 => false,
            Self::F32 | Self::F64 => value.is_number(),
        }
    }
}

impl fmt::Display for WasmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter and result types of a WebAssembly export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasmSignature {
    /// Parameter types
    pub params: SmallVec<[WasmType; 4]>,
    /// Result type, `None` for void
    pub result: Option<WasmType>,
}

impl WasmSignature {
    /// Create a signature
    pub fn new(params: impl IntoIterator<Item = WasmType>, result: Option<WasmType>) -> Self {
        Self {
            params: params.into_iter().collect(),
            result,
        }
    }

    /// Validate call-site arguments against the parameter list
    pub fn check_arguments(&self, args: &[Value]) -> FunctionResult<()> {
        if args.len() != self.params.len() {
            return Err(FunctionError::ArityMismatch {
                expected: self.params.len(),
                actual: args.len(),
            });
        }
        for (index, (ty, arg)) in self.params.iter().zip(args).enumerate() {
            if !ty.accepts(arg) {
                return Err(FunctionError::ParameterType {
                    index,
                    expected: *ty,
                    actual: arg.type_of(),
                });
            }
        }
        Ok(())
    }

    /// Validate a returned value against the result type
    pub fn check_result(&self, value: &Value) -> FunctionResult<()> {
        let ok = match self.result {
            Some(ty) => ty.accepts(value),
            None => value.is_undefined(),
        };
        if ok {
            Ok(())
        } else {
            Err(FunctionError::ResultType {
                expected: self.result.map_or("void", WasmType::name),
                actual: value.type_of(),
            })
        }
    }
}

impl fmt::Display for WasmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        match self.result {
            Some(result) => write!(f, ") -> {result}"),
            None => f.write_str(")"),
        }
    }
}
