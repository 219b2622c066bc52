//! Storage-backed cells.
//!
//! A [`StorageItem`] is an [`Observable`] of raw JSON tied to one key of one
//! store:
//!
//! ```text
//!   local set(v) ──► Observable ──► write-back ──► store.set_item(key, encode(v))
//!                         ▲
//!   foreign event ──► echo set ∪ {v}, set(v)      (write-back consumes v, skips)
//! ```
//!
//! # Invariants
//!
//! 1. The write-back observer is the first subscriber and runs exactly once
//!    per value change, in change order.
//! 2. A value applied through [`StorageItem::apply_external`] is never written
//!    back: it is placed in the echo-suppression set before the cell changes
//!    and the write-back observer consumes it instead of persisting.
//! 3. The echo-suppression set is empty whenever no external application is
//!    in progress.
//!
//! # Failure Modes
//!
//! - **Store dropped**: the cell holds only a weak store reference; writes
//!   after the store is gone are logged and skipped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tabstore_reactive::{Observable, Subscription};
use tracing::{debug, trace, warn};

use crate::codec::{self, NO_VALUE};
use crate::store::{Store, StoreId, WeakStore};

/// Values that must not be written back when they reach the write-back
/// observer.
#[derive(Clone, Default)]
struct EchoSuppression {
    pending: Rc<RefCell<Vec<Value>>>,
}

impl EchoSuppression {
    fn insert(&self, value: Value) {
        self.pending.borrow_mut().push(value);
    }

    /// Consume one entry equal to `value`.
    fn take(&self, value: &Value) -> bool {
        let mut pending = self.pending.borrow_mut();
        match pending.iter().position(|v| v == value) {
            Some(index) => {
                pending.swap_remove(index);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.pending.borrow().len()
    }
}

struct ItemInner {
    key: String,
    store: WeakStore,
    value: Observable<Value>,
    echoes: EchoSuppression,
    watch_leases: Cell<usize>,
    _write_back: Subscription,
}

/// Reactive cell persisted under one key of one store.
///
/// Clones are the same cell.
#[derive(Clone)]
pub struct StorageItem {
    inner: Rc<ItemInner>,
}

impl StorageItem {
    /// Seed a new cell from the store and install its write-back observer.
    ///
    /// Callers wanting the cached, watched cell go through
    /// [`WebStorage::acquire_cell`](crate::WebStorage::acquire_cell).
    pub(crate) fn open(store: &Store, key: &str) -> Self {
        let raw = store.get_item(key);
        let initial = codec::decode(raw.as_deref());
        debug!(store = %store.id(), key, present = raw.is_some(), "opening storage item");

        let value = Observable::new(initial);
        let echoes = EchoSuppression::default();
        let write_back = value.subscribe(write_back(store.downgrade(), key, echoes.clone()));

        Self {
            inner: Rc::new(ItemInner {
                key: key.to_owned(),
                store: store.downgrade(),
                value,
                echoes,
                watch_leases: Cell::new(0),
                _write_back: write_back,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.inner.store.id()
    }

    /// The backing store, unless it has been dropped.
    #[must_use]
    pub fn store(&self) -> Option<Store> {
        self.inner.store.upgrade()
    }

    /// The underlying reactive cell.
    #[must_use]
    pub fn value(&self) -> &Observable<Value> {
        &self.inner.value
    }

    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.value.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.inner.value.with(f)
    }

    /// Set the value and, if it changed, persist it.
    pub fn set(&self, value: Value) {
        self.inner.value.set(value);
    }

    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        self.inner.value.update(f);
    }

    pub fn subscribe(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.value.subscribe(callback)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.value.version()
    }

    /// Delete the persisted entry and reset the cell to the no-value
    /// sentinel without writing `null` back.
    pub fn remove(&self) {
        if let Some(store) = self.store() {
            store.remove_item(&self.inner.key);
        }
        self.apply_external(NO_VALUE);
    }

    /// Set a value that already reflects the store, suppressing write-back.
    pub(crate) fn apply_external(&self, value: Value) {
        self.inner.echoes.insert(value.clone());
        if !self.inner.value.set(value.clone()) {
            // Unchanged: the observer never ran, so drop the entry here or
            // it would swallow a later local write of the same value.
            self.inner.echoes.take(&value);
        }
    }

    /// Whether some open scope currently holds a watch lease on this cell.
    #[must_use]
    pub fn is_watched(&self) -> bool {
        self.inner.watch_leases.get() > 0
    }

    /// Returns the lease count after the change.
    pub(crate) fn add_watch_lease(&self) -> usize {
        let leases = self.inner.watch_leases.get() + 1;
        self.inner.watch_leases.set(leases);
        leases
    }

    pub(crate) fn drop_watch_lease(&self) -> usize {
        let leases = self.inner.watch_leases.get().saturating_sub(1);
        self.inner.watch_leases.set(leases);
        leases
    }

    /// Entries waiting in the echo-suppression set.
    #[must_use]
    pub fn pending_echoes(&self) -> usize {
        self.inner.echoes.len()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

fn write_back(store: WeakStore, key: &str, echoes: EchoSuppression) -> impl Fn(&Value) + 'static {
    let key = key.to_owned();
    move |next: &Value| {
        if echoes.take(next) {
            trace!(store = %store.id(), key = %key, "externally applied value; write-back skipped");
            return;
        }
        let Some(store) = store.upgrade() else {
            warn!(store = %store.id(), key = %key, "store dropped; write-back skipped");
            return;
        };
        let encoded = codec::encode(next);
        trace!(store = %store.id(), key = %key, len = encoded.len(), "writing back");
        store.set_item(&key, &encoded);
    }
}

impl fmt::Debug for StorageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageItem")
            .field("key", &self.inner.key)
            .field("store", &self.inner.store.id())
            .field("value", &self.inner.value.get())
            .field("version", &self.inner.value.version())
            .field("watched", &self.is_watched())
            .finish()
    }
}
