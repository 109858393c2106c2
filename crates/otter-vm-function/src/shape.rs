//! Hidden classes for objects reached through function inline caches.
//!
//! Objects with the same property insertion order share a shape through a
//! transition tree, so a cache keyed by shape id stays valid until the
//! object changes structure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::value::Symbol;

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);
static ROOT_SHAPE: OnceLock<Arc<Shape>> = OnceLock::new();

/// Property key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String key
    String(Arc<str>),
    /// Symbol key, by symbol id
    Symbol(u64),
}

impl PropertyKey {
    /// Create a string key
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    /// Create a symbol key
    pub fn symbol(symbol: &Symbol) -> Self {
        Self::Symbol(symbol.id)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

/// Layout of an object's own properties
pub struct Shape {
    id: u64,
    parent: Option<Arc<Shape>>,
    key: Option<PropertyKey>,
    offset: Option<usize>,
    /// Child -> parent is strong, parent -> child is weak
    transitions: Mutex<FxHashMap<PropertyKey, Weak<Shape>>>,
    property_map: FxHashMap<PropertyKey, usize>,
}

impl Shape {
    /// The shared empty shape every object starts from
    pub fn root() -> Arc<Self> {
        ROOT_SHAPE
            .get_or_init(|| {
                Arc::new(Self {
                    id: NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed),
                    parent: None,
                    key: None,
                    offset: None,
                    transitions: Mutex::new(FxHashMap::default()),
                    property_map: FxHashMap::default(),
                })
            })
            .clone()
    }

    /// Unique shape id, the key inline caches store
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shape this one was transitioned from
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// Key added by the transition into this shape
    pub fn key(&self) -> Option<&PropertyKey> {
        self.key.as_ref()
    }

    /// Find the transition for `key`, creating it if needed.
    pub fn transition(self: &Arc<Self>, key: PropertyKey) -> Arc<Self> {
        let mut transitions = self.transitions.lock();
        if let Some(shape) = transitions.get(&key).and_then(Weak::upgrade) {
            return shape;
        }

        let next_offset = self.offset.map(|o| o + 1).unwrap_or(0);
        let mut property_map = self.property_map.clone();
        property_map.insert(key.clone(), next_offset);

        let shape = Arc::new(Self {
            id: NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed),
            parent: Some(Arc::clone(self)),
            key: Some(key.clone()),
            offset: Some(next_offset),
            transitions: Mutex::new(FxHashMap::default()),
            property_map,
        });
        transitions.insert(key, Arc::downgrade(&shape));
        shape
    }

    /// Slot offset of `key`
    pub fn get_offset(&self, key: &PropertyKey) -> Option<usize> {
        self.property_map.get(key).copied()
    }

    /// Number of properties described by this shape
    pub fn property_count(&self) -> usize {
        self.property_map.len()
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("offset", &self.offset)
            .field("property_count", &self.property_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_shared() {
        let root = Shape::root();
        let a = root.transition("x".into());
        let b = root.transition("x".into());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.get_offset(&"x".into()), Some(0));

        let c = a.transition("y".into());
        assert_eq!(c.get_offset(&"y".into()), Some(1));
        assert_eq!(c.property_count(), 2);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_root_is_singleton() {
        assert_eq!(Shape::root().id(), Shape::root().id());
        assert!(Shape::root().parent().is_none());
    }
}
