//! Persisted key-value surface and store identity.
//!
//! [`StorageArea`] is the adapter every backend implements: a flat, ordered
//! map of string keys to string values, modelled on the DOM `Storage`
//! interface. [`Store`] wraps an area in a reference-counted handle whose
//! identity (not content) is what caches and watchers key on.
//!
//! Caches never keep a store alive: they hold a [`WeakStore`] next to the
//! store's [`StoreId`], and entries for dropped stores are pruned lazily.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// A synchronous, ordered string-to-string store.
///
/// Methods take `&self`; implementations use interior mutability.
pub trait StorageArea {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str);

    fn remove_item(&self, key: &str);

    fn clear(&self);

    fn len(&self) -> usize;

    /// Key at position `index` in the area's iteration order.
    fn key(&self, index: usize) -> Option<String>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys in iteration order.
    fn keys(&self) -> Vec<String> {
        (0..self.len()).filter_map(|index| self.key(index)).collect()
    }
}

/// Process-unique store identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

struct StoreInner {
    id: StoreId,
    area: Box<dyn StorageArea>,
}

/// Identity handle to a storage area. Clones are the same store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    pub fn new(area: impl StorageArea + 'static) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                id: StoreId::next(),
                area: Box::new(area),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    #[must_use]
    pub fn area(&self) -> &dyn StorageArea {
        self.inner.area.as_ref()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.inner.area.get_item(key)
    }

    pub fn set_item(&self, key: &str, value: &str) {
        self.inner.area.set_item(key, value);
    }

    pub fn remove_item(&self, key: &str) {
        self.inner.area.remove_item(key);
    }

    pub fn clear(&self) {
        self.inner.area.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.area.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.area.is_empty()
    }

    #[must_use]
    pub fn key(&self, index: usize) -> Option<String> {
        self.inner.area.key(index)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.area.keys()
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Store {}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Non-owning reference to a [`Store`].
#[derive(Clone)]
pub struct WeakStore {
    id: StoreId,
    inner: Weak<StoreInner>,
}

impl WeakStore {
    #[inline]
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.id
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStorage;

    #[test]
    fn identity_is_by_reference() {
        let a = Store::new(MemoryStorage::new());
        let b = Store::new(MemoryStorage::new());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn delegates_to_area() {
        let store = Store::new(MemoryStorage::new());
        store.set_item("b", "2");
        store.set_item("a", "1");
        assert_eq!(store.get_item("a").as_deref(), Some("1"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);

        store.remove_item("a");
        assert_eq!(store.get_item("a"), None);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn weak_handle_does_not_retain_store() {
        let store = Store::new(MemoryStorage::new());
        let weak = store.downgrade();
        assert_eq!(weak.id(), store.id());
        assert!(weak.upgrade().is_some_and(|s| s.ptr_eq(&store)));

        drop(store);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn display_id() {
        let store = Store::new(MemoryStorage::new());
        assert_eq!(store.id().to_string(), format!("store#{}", store.id().raw()));
    }
}
