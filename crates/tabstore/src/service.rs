//! The consumer-facing service.
//!
//! [`WebStorage`] ties the pieces together: it caches one [`StorageItem`]
//! per (store, key), registers acquired cells with its [`StorageWatcher`]
//! for the lifetime of the acquiring [`Scope`], and builds typed views on
//! request.
//!
//! ```text
//! acquire_cell(store, key)
//!   ├─ scope open?            no  → Error::Scope
//!   ├─ cached?                yes → cached cell
//!   │                         no  → seed from store, install write-back, cache
//!   └─ watch_storage?         yes → one lease per scope until its teardown
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tabstore_reactive::Scope;
use tracing::trace;

use crate::cache::CellRegistry;
use crate::config::WebStorageConfig;
use crate::error::Result;
use crate::event::StorageEventChannel;
use crate::item::StorageItem;
use crate::schema::{DefaultPolicy, Schema};
use crate::store::{Store, StoreId};
use crate::typed::TypedStorageItem;
use crate::watcher::StorageWatcher;

const ACQUIRE_CELL: &str = "WebStorage::acquire_cell";
const ACQUIRE_TYPED_CELL: &str = "WebStorage::acquire_typed_cell";

/// (scope id, store, key) of a live watch lease.
type LeaseKey = (u64, StoreId, String);

struct ServiceInner {
    config: WebStorageConfig,
    cache: CellRegistry<StorageItem>,
    watcher: StorageWatcher,
    /// At most one lease per scope and cell; entries leave at teardown.
    leased: Rc<RefCell<HashSet<LeaseKey>>>,
}

/// Reactive storage service for one context.
///
/// Clones share the cache and the watcher.
#[derive(Clone)]
pub struct WebStorage {
    inner: Rc<ServiceInner>,
}

impl WebStorage {
    /// A service with the default configuration, watching `channel` for
    /// changes made by other contexts.
    #[must_use]
    pub fn new(channel: &StorageEventChannel) -> Self {
        Self::with_config(WebStorageConfig::default(), channel)
    }

    #[must_use]
    pub fn with_config(config: WebStorageConfig, channel: &StorageEventChannel) -> Self {
        Self {
            inner: Rc::new(ServiceInner {
                config,
                cache: CellRegistry::new(),
                watcher: StorageWatcher::new(channel),
                leased: Rc::new(RefCell::new(HashSet::new())),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &WebStorageConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn watcher(&self) -> &StorageWatcher {
        &self.inner.watcher
    }

    #[must_use]
    pub fn cache(&self) -> &CellRegistry<StorageItem> {
        &self.inner.cache
    }

    /// The raw cell for (`store`, `key`) in the ambient scope.
    pub fn acquire_cell(&self, store: &Store, key: &str) -> Result<StorageItem> {
        let scope = Scope::require(ACQUIRE_CELL)?;
        self.acquire_cell_in(&scope, store, key)
    }

    /// The raw cell for (`store`, `key`), watched until `scope` closes.
    pub fn acquire_cell_in(&self, scope: &Scope, store: &Store, key: &str) -> Result<StorageItem> {
        scope.ensure_open(ACQUIRE_CELL)?;
        self.acquire_open(scope, store, key)
    }

    /// A typed view of the cell for (`store`, `key`) in the ambient scope.
    pub fn acquire_typed_cell<T, S>(
        &self,
        store: &Store,
        key: &str,
        schema: S,
        default: impl Into<DefaultPolicy<T>>,
    ) -> Result<TypedStorageItem<T>>
    where
        T: Clone + PartialEq + Serialize + 'static,
        S: Schema<Output = T> + 'static,
    {
        let scope = Scope::require(ACQUIRE_TYPED_CELL)?;
        self.acquire_typed_cell_in(&scope, store, key, schema, default)
    }

    pub fn acquire_typed_cell_in<T, S>(
        &self,
        scope: &Scope,
        store: &Store,
        key: &str,
        schema: S,
        default: impl Into<DefaultPolicy<T>>,
    ) -> Result<TypedStorageItem<T>>
    where
        T: Clone + PartialEq + Serialize + 'static,
        S: Schema<Output = T> + 'static,
    {
        scope.ensure_open(ACQUIRE_TYPED_CELL)?;
        let raw = self.acquire_open(scope, store, key)?;
        TypedStorageItem::bind(raw, schema, default.into())
    }

    fn acquire_open(&self, scope: &Scope, store: &Store, key: &str) -> Result<StorageItem> {
        let item = match self.inner.cache.get(store, key) {
            Some(item) => {
                trace!(store = %store.id(), key, "storage item cache hit");
                item
            }
            None => {
                let item = StorageItem::open(store, key);
                self.inner.cache.put(store, key, item.clone());
                item
            }
        };

        if self.inner.config.watch_storage {
            let lease_key = (scope.id(), store.id(), key.to_owned());
            if self.inner.leased.borrow_mut().insert(lease_key.clone()) {
                let lease = self.inner.watcher.start_watching(store, &item);
                let leased = Rc::downgrade(&self.inner.leased);
                scope.on_teardown(move || {
                    lease.release();
                    if let Some(leased) = leased.upgrade() {
                        leased.borrow_mut().remove(&lease_key);
                    }
                });
            }
        }
        Ok(item)
    }
}

impl fmt::Debug for WebStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebStorage")
            .field("config", &self.inner.config)
            .field("watcher", &self.inner.watcher)
            .finish()
    }
}
