//! Pointer-sized reference slots readable by generated code.

use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::MutexGuard;

/// An optional `Arc<T>` stored as a single raw pointer word.
///
/// The word is either null or the result of `Arc::into_raw`, so native code
/// reading it at a fixed offset sees the same address `Arc::as_ptr` returns.
/// The slot owns one strong count.
///
/// `load` and `replace` take the owner's slot-lock guard: a replace may drop
/// the last count of the old value, so a concurrent load must not be able to
/// observe the old pointer mid-upgrade.
#[repr(transparent)]
pub(crate) struct ArcSlot<T> {
    ptr: AtomicPtr<T>,
    _owns: PhantomData<Arc<T>>,
}

impl<T> ArcSlot<T> {
    pub(crate) fn new(value: Option<Arc<T>>) -> Self {
        Self {
            ptr: AtomicPtr::new(into_raw(value)),
            _owns: PhantomData,
        }
    }

    /// Clone the held reference
    pub(crate) fn load(&self, _guard: &MutexGuard<'_, ()>) -> Option<Arc<T>> {
        let raw = self.ptr.load(Ordering::Acquire);
        if raw.is_null() {
            return None;
        }
        // SAFETY: `raw` came from `Arc::into_raw` and the slot still owns a
        // count for it; replacement is excluded by the slot lock.
        unsafe {
            Arc::increment_strong_count(raw);
            Some(Arc::from_raw(raw))
        }
    }

    /// Store `value`, returning the previously held reference
    pub(crate) fn replace(&self, value: Option<Arc<T>>, _guard: &MutexGuard<'_, ()>) -> Option<Arc<T>> {
        let old = self.ptr.swap(into_raw(value), Ordering::AcqRel);
        // SAFETY: `old` is null or a pointer whose count the slot owned.
        (!old.is_null()).then(|| unsafe { Arc::from_raw(old) })
    }

    /// The raw word, as generated code sees it
    #[inline]
    pub(crate) fn as_raw(&self) -> *const T {
        self.ptr.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_some(&self) -> bool {
        !self.as_raw().is_null()
    }
}

impl<T> Drop for ArcSlot<T> {
    fn drop(&mut self) {
        let raw = *self.ptr.get_mut();
        if !raw.is_null() {
            // SAFETY: exclusive access; the slot owns this count.
            drop(unsafe { Arc::from_raw(raw) });
        }
    }
}

fn into_raw<T>(value: Option<Arc<T>>) -> *mut T {
    value.map_or(ptr::null_mut(), |arc| Arc::into_raw(arc).cast_mut())
}
