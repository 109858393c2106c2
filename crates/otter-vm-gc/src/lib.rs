//! # Otter VM GC hooks
//!
//! The part of the collector that heap objects see.
//!
//! ## Design
//!
//! - **Header**: every managed record starts with an 8-byte [`GcHeader`]
//!   carrying the mark color and a layout tag readable by generated code
//! - **Tags**: one tag per fixed object layout, see [`object::tags`]
//! - **Finalization**: [`FinalizationQueue`] calls [`GcObject::finalize`]
//!   once an object is unreachable, and once more for everything left at
//!   runtime teardown with `is_shutdown = true`

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod finalization;
pub mod object;

pub use finalization::{FinalizationQueue, FinalizationStats, is_dealloc_in_progress};
pub use object::{GcHeader, GcObject, MarkColor, tags};
