//! Identity-keyed per-store tables.
//!
//! [`StoreMap`] is the two-level `store → key → V` table used by both the
//! cell registry and the watcher. The outer level is keyed by [`StoreId`] and
//! keeps only a [`WeakStore`], so a table never extends a store's lifetime.
//! Entries of dropped stores are pruned on the next insertion, which is the
//! closest safe equivalent of a weak-keyed map.
//!
//! [`CellRegistry`] is the public cache built on top of it: at most one cell
//! per (store, key).

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use tracing::trace;

use crate::store::{Store, StoreId, WeakStore};

struct StoreEntry<V> {
    store: WeakStore,
    items: HashMap<String, V>,
}

pub(crate) struct StoreMap<V> {
    entries: HashMap<StoreId, StoreEntry<V>>,
}

impl<V> Default for StoreMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> StoreMap<V> {
    pub(crate) fn get(&self, store: StoreId, key: &str) -> Option<&V> {
        self.entries.get(&store)?.items.get(key)
    }

    /// Every entry registered for `store`, or `None` if the store has no table.
    pub(crate) fn items(&self, store: StoreId) -> Option<&HashMap<String, V>> {
        self.entries.get(&store).map(|entry| &entry.items)
    }

    pub(crate) fn entry(&mut self, store: &Store, key: &str) -> Entry<'_, String, V> {
        self.prune();
        self.entries
            .entry(store.id())
            .or_insert_with(|| StoreEntry {
                store: store.downgrade(),
                items: HashMap::new(),
            })
            .items
            .entry(key.to_owned())
    }

    pub(crate) fn insert(&mut self, store: &Store, key: &str, value: V) -> Option<V> {
        match self.entry(store, key) {
            Entry::Occupied(mut slot) => Some(slot.insert(value)),
            Entry::Vacant(slot) => {
                slot.insert(value);
                None
            }
        }
    }

    /// Remove one entry. The store's table stays, possibly empty.
    pub(crate) fn remove(&mut self, store: StoreId, key: &str) -> Option<V> {
        self.entries.get_mut(&store)?.items.remove(key)
    }

    /// Drop the tables of stores that no longer exist.
    pub(crate) fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.store.is_alive());
        let pruned = before - self.entries.len();
        if pruned > 0 {
            trace!(pruned, "pruned tables of dropped stores");
        }
        pruned
    }

    /// Tables currently held, including ones for dropped stores not yet pruned.
    pub(crate) fn store_count(&self) -> usize {
        self.entries.len()
    }
}

/// Cache of one cell per (store, key).
///
/// `C` is any cheaply clonable handle; lookups return a clone of the cached
/// handle, so callers observe the identical cell.
pub struct CellRegistry<C> {
    map: RefCell<StoreMap<C>>,
}

impl<C> Default for CellRegistry<C> {
    fn default() -> Self {
        Self {
            map: RefCell::new(StoreMap::default()),
        }
    }
}

impl<C: Clone> CellRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cell cached for (`store`, `key`), if any.
    #[must_use]
    pub fn get(&self, store: &Store, key: &str) -> Option<C> {
        self.map.borrow().get(store.id(), key).cloned()
    }

    /// Cache `cell` for (`store`, `key`), replacing any previous cell for
    /// that pair only.
    pub fn put(&self, store: &Store, key: &str, cell: C) {
        self.map.borrow_mut().insert(store, key, cell);
    }

    /// Cached cells for `store`.
    #[must_use]
    pub fn len_for(&self, store: &Store) -> usize {
        self.map
            .borrow()
            .items(store.id())
            .map_or(0, HashMap::len)
    }

    /// Stores with a table, including dropped ones not yet pruned.
    #[must_use]
    pub fn store_count(&self) -> usize {
        self.map.borrow().store_count()
    }

    /// Drop tables of stores that no longer exist; returns how many.
    pub fn prune(&self) -> usize {
        self.map.borrow_mut().prune()
    }
}

impl<C> fmt::Debug for CellRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellRegistry")
            .field("stores", &self.map.borrow().store_count())
            .finish()
    }
}
