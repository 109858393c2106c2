//! Plain objects: home objects, prototypes and inline cache receivers

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use otter_vm_gc::{GcHeader, GcObject, tags};
use parking_lot::RwLock;

use crate::shape::{PropertyKey, Shape};
use crate::value::Value;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// A JavaScript object with shape-indexed slots
pub struct JsObject {
    header: GcHeader,
    id: u64,
    shape: RwLock<Arc<Shape>>,
    slots: RwLock<Vec<Value>>,
    prototype: Option<Arc<JsObject>>,
}

impl JsObject {
    /// Create an empty object
    pub fn new(prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::OBJECT),
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            shape: RwLock::new(Shape::root()),
            slots: RwLock::new(Vec::new()),
            prototype,
        })
    }

    /// Object identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current shape
    pub fn shape(&self) -> Arc<Shape> {
        self.shape.read().clone()
    }

    /// Prototype, if any
    pub fn prototype(&self) -> Option<&Arc<JsObject>> {
        self.prototype.as_ref()
    }

    /// Get an own property
    pub fn get_own(&self, key: &PropertyKey) -> Option<Value> {
        let offset = self.shape.read().get_offset(key)?;
        self.get_slot(offset)
    }

    /// Get a property, walking the prototype chain
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        let mut current = Some(self);
        while let Some(object) = current {
            if let Some(value) = object.get_own(key) {
                return Some(value);
            }
            current = object.prototype.as_deref();
        }
        None
    }

    /// Set an own property, transitioning the shape on first definition.
    ///
    /// Returns the slot offset the value was stored at.
    pub fn set(&self, key: PropertyKey, value: Value) -> usize {
        let mut shape = self.shape.write();
        let mut slots = self.slots.write();
        if let Some(offset) = shape.get_offset(&key) {
            slots[offset] = value;
            return offset;
        }
        let next = shape.transition(key);
        let offset = slots.len();
        slots.push(value);
        *shape = next;
        offset
    }

    /// Read a slot by offset
    pub fn get_slot(&self, offset: usize) -> Option<Value> {
        self.slots.read().get(offset).cloned()
    }

    /// Write a slot by offset; false if out of range
    pub fn set_slot(&self, offset: usize, value: Value) -> bool {
        match self.slots.write().get_mut(offset) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Whether `prototype` appears on this object's prototype chain
    pub fn has_in_prototype_chain(&self, prototype: &JsObject) -> bool {
        let mut current = self.prototype.as_deref();
        while let Some(object) = current {
            if object.id == prototype.id {
                return true;
            }
            current = object.prototype.as_deref();
        }
        false
    }
}

impl GcObject for JsObject {
    fn header(&self) -> &GcHeader {
        &self.header
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsObject")
            .field("id", &self.id)
            .field("shape", &self.shape.read().id())
            .finish()
    }
}
