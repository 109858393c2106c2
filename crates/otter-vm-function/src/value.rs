//! JavaScript values with NaN-boxing
//!
//! Same encoding as the interpreter's value representation, so the bits a
//! capability slot or module-memory global holds are the bits generated
//! code expects:
//!
//! ```text
//! - Double:     stored directly (except NaN)
//! - NaN:        0x7FFA_0000_0000_0000
//! - Integer:    0x7FF8_0001_XXXX_XXXX (32-bit signed in lower bits)
//! - Pointer:    0x7FFC_XXXX_XXXX_XXXX (48-bit pointer)
//! - Undefined:  0x7FF8_0000_0000_0000
//! - Null:       0x7FF8_0000_0000_0001
//! - True:       0x7FF8_0000_0000_0002
//! - False:      0x7FF8_0000_0000_0003
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::function::FunctionObject;
use crate::object::JsObject;

const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;
const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const INT32_TAG_MASK: u64 = 0xFFFF_FFFF_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
const TAG_NAN: u64 = 0x7FFA_0000_0000_0000;
const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
const TAG_POINTER: u64 = 0x7FFC_0000_0000_0000;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// A JavaScript Symbol
#[derive(Debug)]
pub struct Symbol {
    /// Symbol description
    pub description: Option<String>,
    /// Unique ID
    pub id: u64,
}

impl Symbol {
    /// Create a fresh, unique symbol
    pub fn new(description: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            description: description.map(str::to_owned),
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
        })
    }
}

/// Reference to heap-allocated data
#[derive(Clone)]
pub enum HeapRef {
    /// String value
    String(Arc<str>),
    /// Symbol
    Symbol(Arc<Symbol>),
    /// Plain object
    Object(Arc<JsObject>),
    /// Script function
    Function(FunctionObject),
}

impl std::fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapRef::String(s) => f.debug_tuple("String").field(s).finish(),
            HeapRef::Symbol(s) => f.debug_tuple("Symbol").field(s).finish(),
            HeapRef::Object(o) => f.debug_tuple("Object").field(&o.id()).finish(),
            HeapRef::Function(func) => f.debug_tuple("Function").field(func).finish(),
        }
    }
}

/// A JavaScript value using NaN-boxing for efficient storage
#[derive(Clone)]
pub struct Value {
    bits: u64,
    /// Keeps the referent alive; `Some` only for pointer values
    heap_ref: Option<HeapRef>,
}

impl Value {
    /// Create undefined value
    #[inline]
    pub const fn undefined() -> Self {
        Self {
            bits: TAG_UNDEFINED,
            heap_ref: None,
        }
    }

    /// Create null value
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: TAG_NULL,
            heap_ref: None,
        }
    }

    /// Create boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: if b { TAG_TRUE } else { TAG_FALSE },
            heap_ref: None,
        }
    }

    /// Create 32-bit integer value
    #[inline]
    pub fn int32(n: i32) -> Self {
        Self {
            bits: TAG_INT32 | (n as u32 as u64),
            heap_ref: None,
        }
    }

    /// Create number (f64) value, narrowing to int32 when exact
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            return Self {
                bits: TAG_NAN,
                heap_ref: None,
            };
        }

        // Preserve -0.0 as a double
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && (n != 0.0 || (1.0_f64 / n).is_sign_positive())
        {
            return Self::int32(n as i32);
        }

        Self {
            bits: n.to_bits(),
            heap_ref: None,
        }
    }

    /// Create string value
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        let s: Arc<str> = s.into();
        let ptr = Arc::as_ptr(&s) as *const u8;
        Self::pointer(ptr, HeapRef::String(s))
    }

    /// Create symbol value
    pub fn symbol(symbol: Arc<Symbol>) -> Self {
        let ptr = Arc::as_ptr(&symbol) as *const u8;
        Self::pointer(ptr, HeapRef::Symbol(symbol))
    }

    /// Create object value
    pub fn object(object: Arc<JsObject>) -> Self {
        let ptr = Arc::as_ptr(&object) as *const u8;
        Self::pointer(ptr, HeapRef::Object(object))
    }

    /// Create function value
    pub fn function(function: FunctionObject) -> Self {
        let ptr = function.as_ptr() as *const u8;
        Self::pointer(ptr, HeapRef::Function(function))
    }

    fn pointer(ptr: *const u8, heap_ref: HeapRef) -> Self {
        Self {
            bits: TAG_POINTER | (ptr as u64 & PAYLOAD_MASK),
            heap_ref: Some(heap_ref),
        }
    }

    /// Raw NaN-boxed bits
    #[inline]
    pub fn to_bits(&self) -> u64 {
        self.bits
    }

    /// Check if undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.bits == TAG_UNDEFINED
    }

    /// Check if null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.bits == TAG_NULL
    }

    /// Check if null or undefined
    #[inline]
    pub fn is_nullish(&self) -> bool {
        self.is_undefined() || self.is_null()
    }

    /// Get as boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self.bits {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Check if an int32-tagged number
    #[inline]
    pub fn is_int32(&self) -> bool {
        (self.bits & INT32_TAG_MASK) == TAG_INT32
    }

    /// Get as int32 if the value is int32-tagged
    #[inline]
    pub fn as_int32(&self) -> Option<i32> {
        self.is_int32().then_some(self.bits as u32 as i32)
    }

    /// Check if a number (int32, double or NaN)
    #[inline]
    pub fn is_number(&self) -> bool {
        self.is_int32() || self.bits == TAG_NAN || (self.bits & QUIET_NAN) != QUIET_NAN
    }

    /// Get as f64 for any number
    pub fn as_number(&self) -> Option<f64> {
        if let Some(n) = self.as_int32() {
            Some(n as f64)
        } else if self.bits == TAG_NAN {
            Some(f64::NAN)
        } else if (self.bits & QUIET_NAN) != QUIET_NAN {
            Some(f64::from_bits(self.bits))
        } else {
            None
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match &self.heap_ref {
            Some(HeapRef::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Get as symbol
    pub fn as_symbol(&self) -> Option<&Arc<Symbol>> {
        match &self.heap_ref {
            Some(HeapRef::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&Arc<JsObject>> {
        match &self.heap_ref {
            Some(HeapRef::Object(o)) => Some(o),
            _ => None,
        }
    }

    /// Get as function
    pub fn as_function(&self) -> Option<&FunctionObject> {
        match &self.heap_ref {
            Some(HeapRef::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Check if a heap pointer value
    #[inline]
    pub fn is_pointer(&self) -> bool {
        (self.bits & TAG_MASK) == TAG_POINTER
    }

    /// The `typeof` result for this value
    pub fn type_of(&self) -> &'static str {
        match &self.heap_ref {
            Some(HeapRef::String(_)) => "string",
            Some(HeapRef::Symbol(_)) => "symbol",
            Some(HeapRef::Object(_)) => "object",
            Some(HeapRef::Function(_)) => "function",
            None if self.is_undefined() => "undefined",
            None if self.as_boolean().is_some() => "boolean",
            None if self.is_number() => "number",
            None => "object",
        }
    }

    /// String conversion used for display names and diagnostics
    pub fn to_display_string(&self) -> String {
        if let Some(s) = self.as_str() {
            return s.to_owned();
        }
        if let Some(symbol) = self.as_symbol() {
            return format!("Symbol({})", symbol.description.as_deref().unwrap_or(""));
        }
        if let Some(n) = self.as_int32() {
            return n.to_string();
        }
        if let Some(n) = self.as_number() {
            return format_number(n);
        }
        if let Some(b) = self.as_boolean() {
            return b.to_string();
        }
        match &self.heap_ref {
            Some(HeapRef::Object(_)) => "[object Object]".to_owned(),
            Some(HeapRef::Function(f)) => format!("function {}() {{ [code] }}", f.display_name()),
            _ if self.is_null() => "null".to_owned(),
            _ => "undefined".to_owned(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n.is_sign_positive() { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_str(), other.as_str()) {
            (Some(a), Some(b)) => a == b,
            _ => self.bits == other.bits,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.heap_ref {
            Some(heap_ref) => heap_ref.fmt(f),
            None => write!(f, "{}", self.to_display_string()),
        }
    }
}
