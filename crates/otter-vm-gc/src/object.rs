//! GC object layout

use std::sync::atomic::{AtomicU8, Ordering};

/// GC object header
///
/// Always the first field of a managed record, so a record pointer is also
/// a header pointer.
#[repr(C)]
pub struct GcHeader {
    /// Mark bits for tri-color marking
    mark: AtomicU8,
    /// Object layout tag
    tag: u8,
    /// Reserved
    _reserved: [u8; 6],
}

const _: () = assert!(std::mem::size_of::<GcHeader>() == 8);

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

impl GcHeader {
    /// Create new header
    pub const fn new(tag: u8) -> Self {
        Self {
            mark: AtomicU8::new(MarkColor::White as u8),
            tag,
            _reserved: [0; 6],
        }
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        match self.mark.load(Ordering::Acquire) {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }

    /// Set mark color
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.store(color as u8, Ordering::Release);
    }

    /// Get object tag
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Byte offset of the tag inside the header, for generated code.
    pub const fn offset_of_tag() -> usize {
        std::mem::offset_of!(GcHeader, tag)
    }
}

impl std::fmt::Debug for GcHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcHeader")
            .field("mark", &self.mark())
            .field("tag", &self.tag)
            .finish()
    }
}

/// Trait for GC-managed objects
pub trait GcObject: Send + Sync {
    /// Get the GC header
    fn header(&self) -> &GcHeader;

    /// Release out-of-line resources before the object is reclaimed.
    ///
    /// `is_shutdown` is true when the whole runtime is being torn down; no
    /// other subsystem will observe the object or anything it frees.
    fn finalize(&self, is_shutdown: bool) {
        let _ = is_shutdown;
    }
}

/// Object layout tags
///
/// Function tags are contiguous so a single range check identifies any
/// script function variant.
pub mod tags {
    /// Plain object
    pub const OBJECT: u8 = 3;
    /// Script function, no optional slots
    pub const SCRIPT_FUNCTION: u8 = 0x10;
    /// Script function with a computed name slot
    pub const SCRIPT_FUNCTION_WITH_COMPUTED_NAME: u8 = 0x11;
    /// Script function with a home object slot
    pub const SCRIPT_FUNCTION_WITH_HOME_OBJECT: u8 = 0x12;
    /// Script function with home object and computed name slots
    pub const SCRIPT_FUNCTION_WITH_HOME_OBJECT_AND_COMPUTED_NAME: u8 = 0x13;
    /// Script function owning its inline caches
    pub const SCRIPT_FUNCTION_WITH_INLINE_CACHE: u8 = 0x14;
    /// Script function owning its inline caches, with a computed name slot
    pub const SCRIPT_FUNCTION_WITH_INLINE_CACHE_AND_COMPUTED_NAME: u8 = 0x15;
    /// asm.js function
    pub const ASM_JS_FUNCTION: u8 = 0x16;
    /// asm.js function with a computed name slot
    pub const ASM_JS_FUNCTION_WITH_COMPUTED_NAME: u8 = 0x17;
    /// WebAssembly export function
    pub const WASM_FUNCTION: u8 = 0x18;

    /// Whether `tag` names any script function layout.
    pub const fn is_script_function(tag: u8) -> bool {
        tag >= SCRIPT_FUNCTION && tag <= WASM_FUNCTION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_marking() {
        let header = GcHeader::new(tags::OBJECT);
        assert_eq!(header.mark(), MarkColor::White);

        header.set_mark(MarkColor::Gray);
        assert_eq!(header.mark(), MarkColor::Gray);

        header.set_mark(MarkColor::Black);
        assert_eq!(header.mark(), MarkColor::Black);
    }

    #[test]
    fn test_function_tag_range() {
        assert!(tags::is_script_function(tags::SCRIPT_FUNCTION));
        assert!(tags::is_script_function(tags::ASM_JS_FUNCTION));
        assert!(tags::is_script_function(tags::WASM_FUNCTION));
        assert!(!tags::is_script_function(tags::OBJECT));
    }

    #[test]
    fn test_tag_offset() {
        assert_eq!(GcHeader::offset_of_tag(), 1);
    }
}
