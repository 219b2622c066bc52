//! One storage area shared by several contexts.
//!
//! Each [`SharedMemory::attach`] call models a new context (a browser tab):
//! it gets its own [`Store`] identity over the common entries and registers
//! the context's [`StorageEventChannel`]. Mutations made through one context's
//! store are dispatched as [`StorageEvent`]s to every *other* attached
//! context, with `storage_area` set to the receiving context's store. The
//! writer is never notified of its own changes, and writes that leave a value
//! unchanged notify nobody.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::event::{StorageEvent, StorageEventChannel};
use crate::store::{StorageArea, Store, WeakStore};

struct Context {
    id: u64,
    store: WeakStore,
    channel: StorageEventChannel,
}

#[derive(Default)]
struct SharedInner {
    entries: RefCell<BTreeMap<String, String>>,
    contexts: RefCell<Vec<Context>>,
    next_context: Cell<u64>,
}

impl SharedInner {
    fn broadcast(&self, from: u64, make: impl Fn(&Store) -> StorageEvent) {
        let targets: Vec<(Store, StorageEventChannel)> = {
            let mut contexts = self.contexts.borrow_mut();
            contexts.retain(|ctx| ctx.store.is_alive());
            contexts
                .iter()
                .filter(|ctx| ctx.id != from)
                .filter_map(|ctx| ctx.store.upgrade().map(|s| (s, ctx.channel.clone())))
                .collect()
        };
        for (store, channel) in targets {
            let event = make(&store);
            trace!(from, to = %store.id(), key = ?event.key, "broadcasting storage event");
            channel.dispatch(&event);
        }
    }
}

/// Entries shared between attached contexts.
#[derive(Clone, Default)]
pub struct SharedMemory {
    inner: Rc<SharedInner>,
}

impl SharedMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let shared = Self::new();
        shared.inner.entries.borrow_mut().extend(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into())),
        );
        shared
    }

    /// Open a new context over the shared entries. Changes made through other
    /// contexts are reported on `channel`.
    pub fn attach(&self, channel: &StorageEventChannel) -> Store {
        let id = self.inner.next_context.get();
        self.inner.next_context.set(id + 1);
        let store = Store::new(SharedArea {
            shared: Rc::clone(&self.inner),
            context: id,
        });
        self.inner.contexts.borrow_mut().push(Context {
            id,
            store: store.downgrade(),
            channel: channel.clone(),
        });
        store
    }

    /// Attached contexts whose store is still alive.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.inner
            .contexts
            .borrow()
            .iter()
            .filter(|ctx| ctx.store.is_alive())
            .count()
    }

    /// Raw entry, bypassing every context.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner.entries.borrow().get(key).cloned()
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("entries", &self.inner.entries.borrow().len())
            .field("contexts", &self.context_count())
            .finish()
    }
}

/// One context's view of a [`SharedMemory`].
struct SharedArea {
    shared: Rc<SharedInner>,
    context: u64,
}

impl StorageArea for SharedArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.shared.entries.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        let old = self
            .shared
            .entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        if old.as_deref() == Some(value) {
            return;
        }
        self.shared.broadcast(self.context, |store| {
            StorageEvent::changed(store, key, old.clone(), Some(value.to_owned()))
        });
    }

    fn remove_item(&self, key: &str) {
        let old = self.shared.entries.borrow_mut().remove(key);
        if old.is_none() {
            return;
        }
        self.shared.broadcast(self.context, |store| {
            StorageEvent::changed(store, key, old.clone(), None)
        });
    }

    fn clear(&self) {
        {
            let mut entries = self.shared.entries.borrow_mut();
            if entries.is_empty() {
                return;
            }
            entries.clear();
        }
        self.shared.broadcast(self.context, StorageEvent::cleared);
    }

    fn len(&self) -> usize {
        self.shared.entries.borrow().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.shared.entries.borrow().keys().nth(index).cloned()
    }
}
