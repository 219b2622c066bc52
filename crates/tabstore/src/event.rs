//! External change notifications.
//!
//! A [`StorageEventChannel`] plays the role of the host's `storage` event
//! target: backends (or the host runtime) dispatch a [`StorageEvent`] to it
//! whenever *another* context changes a store, and listeners react. Listeners
//! are held weakly, exactly like [`Observable`](tabstore_reactive::Observable)
//! subscribers, so dropping the returned [`Subscription`] detaches them.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tabstore_reactive::Subscription;

use crate::store::Store;

type ListenerRc = Rc<dyn Fn(&StorageEvent)>;
type ListenerWeak = Weak<dyn Fn(&StorageEvent)>;

/// A change made to a store by another context.
#[derive(Clone, Debug)]
pub struct StorageEvent {
    /// The receiving context's handle to the changed store.
    pub storage_area: Option<Store>,
    /// Changed key; `None` means the whole store was cleared.
    pub key: Option<String>,
    pub old_value: Option<String>,
    /// New raw value; `None` when the key was removed.
    pub new_value: Option<String>,
}

impl StorageEvent {
    #[must_use]
    pub fn changed(
        store: &Store,
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            storage_area: Some(store.clone()),
            key: Some(key.into()),
            old_value,
            new_value,
        }
    }

    #[must_use]
    pub fn cleared(store: &Store) -> Self {
        Self {
            storage_area: Some(store.clone()),
            key: None,
            old_value: None,
            new_value: None,
        }
    }

    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.key.is_none()
    }
}

/// Event target delivering [`StorageEvent`]s to registered listeners.
#[derive(Clone, Default)]
pub struct StorageEventChannel {
    listeners: Rc<RefCell<Vec<ListenerWeak>>>,
}

impl StorageEventChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; it stays attached while the guard lives.
    pub fn listen(&self, listener: impl Fn(&StorageEvent) + 'static) -> Subscription {
        let strong: ListenerRc = Rc::new(listener);
        self.listeners.borrow_mut().push(Rc::downgrade(&strong));
        Subscription::holding(strong)
    }

    /// Deliver `event` to every live listener in registration order.
    pub fn dispatch(&self, event: &StorageEvent) {
        let live: Vec<ListenerRc> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|w| w.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in &live {
            listener(event);
        }
    }

    /// Registered listeners, including detached ones not yet pruned.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl fmt::Debug for StorageEventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEventChannel")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}
