//! Lock-free compare-and-swap cell over immutable snapshots

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Atomic reference to an immutable value, replaced wholesale by CAS
///
/// Readers take a snapshot with [`CasCell::load`] and never block. Writers
/// build a new value from a snapshot and publish it with
/// [`CasCell::compare_and_swap`], retrying from a fresh snapshot when
/// another writer won.
pub struct CasCell<T> {
    inner: ArcSwap<T>,
}

impl<T> CasCell<T> {
    pub fn new(value: T) -> Self {
        CasCell {
            inner: ArcSwap::from_pointee(value),
        }
    }

    /// Current snapshot
    #[inline]
    pub fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Publish `new` if the cell still holds `expected`
    pub fn compare_and_swap(&self, expected: &Arc<T>, new: T) -> bool {
        let previous = self.inner.compare_and_swap(expected, Arc::new(new));
        Arc::ptr_eq(expected, &*previous)
    }
}

impl<T: Default> Default for CasCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for CasCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CasCell").field(&*self.load()).finish()
    }
}
