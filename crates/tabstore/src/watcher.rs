//! Cross-context change watcher.
//!
//! One [`StorageWatcher`] per service listens to the [`StorageEventChannel`]
//! and routes each [`StorageEvent`] to the cells watched for the event's
//! store:
//!
//! | Event                               | Cells updated                      |
//! |-------------------------------------|------------------------------------|
//! | no `storage_area`                   | none                               |
//! | store without a watched table       | none                               |
//! | `key = None` (clear)                | every watched cell of that store   |
//! | `key = Some(k)`                     | the cell watched for `k`, if any   |
//!
//! Updated cells take the value through
//! [`StorageItem::apply_external`], so the change is never written back.
//!
//! # Invariants
//!
//! 1. The channel listener is installed at most once per watcher, on the
//!    first [`StorageWatcher::start_watching`] call.
//! 2. The watched table holds at most one entry per (store, key); it stays
//!    while any [`WatchLease`] on that cell is unreleased.
//! 3. Routing never holds a borrow of the table while a cell is updated, so
//!    cell subscribers may start or stop watching re-entrantly.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tabstore_reactive::Subscription;
use tracing::{debug, trace};

use crate::cache::StoreMap;
use crate::codec;
use crate::event::{StorageEvent, StorageEventChannel};
use crate::item::StorageItem;
use crate::store::Store;

struct WatcherInner {
    channel: StorageEventChannel,
    watched: RefCell<StoreMap<StorageItem>>,
    listener: RefCell<Option<Subscription>>,
}

/// Routes external change notifications to watched cells.
#[derive(Clone)]
pub struct StorageWatcher {
    inner: Rc<WatcherInner>,
}

impl StorageWatcher {
    /// A watcher over `channel`. Nothing is subscribed until the first cell
    /// starts watching.
    #[must_use]
    pub fn new(channel: &StorageEventChannel) -> Self {
        Self {
            inner: Rc::new(WatcherInner {
                channel: channel.clone(),
                watched: RefCell::new(StoreMap::default()),
                listener: RefCell::new(None),
            }),
        }
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.inner.listener.borrow().is_some()
    }

    /// Register `item` for external updates on `store`. The registration
    /// lasts until every returned lease for the cell is released.
    pub fn start_watching(&self, store: &Store, item: &StorageItem) -> WatchLease {
        self.ensure_listening();
        let leases = item.add_watch_lease();
        self.inner
            .watched
            .borrow_mut()
            .insert(store, item.key(), item.clone());
        trace!(store = %store.id(), key = item.key(), leases, "watching storage item");
        WatchLease {
            watcher: Rc::downgrade(&self.inner),
            item: item.clone(),
            released: Cell::new(false),
        }
    }

    /// Whether a cell is currently watched for (`store`, `key`).
    #[must_use]
    pub fn is_watching(&self, store: &Store, key: &str) -> bool {
        self.inner.watched.borrow().get(store.id(), key).is_some()
    }

    /// Watched cells for `store`.
    #[must_use]
    pub fn watched_count(&self, store: &Store) -> usize {
        self.inner
            .watched
            .borrow()
            .items(store.id())
            .map_or(0, |items| items.len())
    }

    /// Route one event. Called by the channel listener; public so hosts
    /// with their own event plumbing can feed events directly.
    pub fn handle_event(&self, event: &StorageEvent) {
        let Some(store) = event.storage_area.as_ref() else {
            trace!(key = ?event.key, "storage event without a storage area; ignored");
            return;
        };
        let targets: Vec<StorageItem> = {
            let watched = self.inner.watched.borrow();
            let Some(items) = watched.items(store.id()) else {
                return;
            };
            match event.key.as_deref() {
                None => items.values().cloned().collect(),
                Some(key) => items.get(key).cloned().into_iter().collect(),
            }
        };

        for item in targets {
            // A clear carries no values; re-read what the store holds now.
            let raw = match event.key {
                Some(_) => event.new_value.clone(),
                None => store.get_item(item.key()),
            };
            trace!(
                store = %store.id(),
                key = item.key(),
                clear = event.is_clear(),
                "routing storage event"
            );
            item.apply_external(codec::decode(raw.as_deref()));
        }
    }

    /// Subscribe to the channel unless already subscribed.
    fn ensure_listening(&self) {
        let mut listener = self.inner.listener.borrow_mut();
        if listener.is_some() {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        *listener = Some(self.inner.channel.listen(move |event| {
            if let Some(inner) = weak.upgrade() {
                StorageWatcher { inner }.handle_event(event);
            }
        }));
        debug!("storage watcher listening for external changes");
    }

    fn release(inner: &WatcherInner, item: &StorageItem) {
        let remaining = item.drop_watch_lease();
        if remaining > 0 {
            return;
        }
        let mut watched = inner.watched.borrow_mut();
        let current = watched.get(item.store_id(), item.key());
        if current.is_some_and(|cell| cell.ptr_eq(item)) {
            watched.remove(item.store_id(), item.key());
            trace!(store = %item.store_id(), key = item.key(), "stopped watching storage item");
        }
    }
}

impl fmt::Debug for StorageWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageWatcher")
            .field("listening", &self.is_listening())
            .field("stores", &self.inner.watched.borrow().store_count())
            .finish()
    }
}

/// Keeps a cell registered with a [`StorageWatcher`].
///
/// Released explicitly, or on drop. Releasing twice is a no-op.
#[must_use = "dropping a WatchLease stops watching immediately"]
pub struct WatchLease {
    watcher: Weak<WatcherInner>,
    item: StorageItem,
    released: Cell<bool>,
}

impl WatchLease {
    pub fn release(&self) {
        if self.released.replace(true) {
            return;
        }
        match self.watcher.upgrade() {
            Some(inner) => StorageWatcher::release(&inner, &self.item),
            None => {
                self.item.drop_watch_lease();
            }
        }
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl Drop for WatchLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for WatchLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchLease")
            .field("key", &self.item.key())
            .field("released", &self.released.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStorage;
    use serde_json::json;

    struct Fixture {
        channel: StorageEventChannel,
        watcher: StorageWatcher,
        store: Store,
    }

    fn fixture(entries: &[(&str, &str)]) -> Fixture {
        let channel = StorageEventChannel::new();
        Fixture {
            watcher: StorageWatcher::new(&channel),
            store: Store::new(MemoryStorage::with_entries(entries.iter().copied())),
            channel,
        }
    }

    #[test]
    fn listens_lazily_and_once() {
        let f = fixture(&[]);
        assert!(!f.watcher.is_listening());
        assert_eq!(f.channel.listener_count(), 0);

        let a = StorageItem::open(&f.store, "a");
        let b = StorageItem::open(&f.store, "b");
        let _la = f.watcher.start_watching(&f.store, &a);
        let _lb = f.watcher.start_watching(&f.store, &b);

        assert!(f.watcher.is_listening());
        assert_eq!(f.channel.listener_count(), 1);
    }

    #[test]
    fn routes_keyed_event_to_matching_cell_without_write_back() {
        let f = fixture(&[("k", "\"y\"")]);
        let item = StorageItem::open(&f.store, "k");
        let other = StorageItem::open(&f.store, "other");
        let _l1 = f.watcher.start_watching(&f.store, &item);
        let _l2 = f.watcher.start_watching(&f.store, &other);

        f.channel.dispatch(&StorageEvent::changed(
            &f.store,
            "k",
            Some("\"y\"".into()),
            Some("\"x\"".into()),
        ));

        assert_eq!(item.get(), json!("x"));
        assert_eq!(other.version(), 0);
        assert_eq!(f.store.get_item("k").as_deref(), Some("\"y\""));
    }

    #[test]
    fn ignores_unwatched_keys_stores_and_missing_area() {
        let f = fixture(&[]);
        let item = StorageItem::open(&f.store, "k");
        let _lease = f.watcher.start_watching(&f.store, &item);
        let elsewhere = Store::new(MemoryStorage::new());

        f.channel
            .dispatch(&StorageEvent::changed(&f.store, "nope", None, Some("1".into())));
        f.channel
            .dispatch(&StorageEvent::changed(&elsewhere, "k", None, Some("1".into())));
        f.channel.dispatch(&StorageEvent {
            storage_area: None,
            key: Some("k".into()),
            old_value: None,
            new_value: Some("1".into()),
        });

        assert_eq!(item.version(), 0);
    }

    #[test]
    fn malformed_new_value_becomes_no_value() {
        let f = fixture(&[("k", "1")]);
        let item = StorageItem::open(&f.store, "k");
        let _lease = f.watcher.start_watching(&f.store, &item);
        f.channel
            .dispatch(&StorageEvent::changed(&f.store, "k", None, Some("{bad".into())));
        assert_eq!(item.get(), codec::NO_VALUE);
        assert_eq!(f.store.get_item("k").as_deref(), Some("1"));
    }

    #[test]
    fn clear_refreshes_every_watched_cell_from_store() {
        let f = fixture(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let items: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|k| StorageItem::open(&f.store, k))
            .collect();
        let _leases: Vec<_> = items
            .iter()
            .map(|item| f.watcher.start_watching(&f.store, item))
            .collect();

        f.store.remove_item("a");
        f.store.set_item("b", "20");
        f.channel.dispatch(&StorageEvent::cleared(&f.store));

        assert_eq!(items[0].get(), codec::NO_VALUE);
        assert_eq!(items[1].get(), json!(20));
        assert_eq!(items[2].get(), json!(3));
        assert!(items.iter().all(|item| item.pending_echoes() == 0));
    }

    #[test]
    fn lease_release_is_idempotent_and_counts() {
        let f = fixture(&[]);
        let item = StorageItem::open(&f.store, "k");
        let first = f.watcher.start_watching(&f.store, &item);
        let second = f.watcher.start_watching(&f.store, &item);
        assert_eq!(f.watcher.watched_count(&f.store), 1);

        first.release();
        first.release();
        assert!(first.is_released());
        assert!(f.watcher.is_watching(&f.store, "k"));
        assert!(item.is_watched());

        drop(second);
        assert!(!f.watcher.is_watching(&f.store, "k"));
        assert!(!item.is_watched());

        f.channel
            .dispatch(&StorageEvent::changed(&f.store, "k", None, Some("1".into())));
        assert_eq!(item.version(), 0);
    }

    #[test]
    fn subscriber_may_watch_reentrantly() {
        let f = fixture(&[]);
        let item = StorageItem::open(&f.store, "k");
        let _lease = f.watcher.start_watching(&f.store, &item);
        let late = StorageItem::open(&f.store, "late");
        let held = Rc::new(RefCell::new(Vec::new()));

        let watcher = f.watcher.clone();
        let store = f.store.clone();
        let late_clone = late.clone();
        let held_clone = Rc::clone(&held);
        let _sub = item.subscribe(move |_| {
            held_clone
                .borrow_mut()
                .push(watcher.start_watching(&store, &late_clone));
        });

        f.channel
            .dispatch(&StorageEvent::changed(&f.store, "k", None, Some("1".into())));
        assert!(f.watcher.is_watching(&f.store, "late"));
        assert_eq!(held.borrow().len(), 1);
    }
}
