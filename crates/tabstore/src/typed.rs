//! Schema-validated views over raw storage cells.
//!
//! A [`TypedStorageItem`] keeps a typed [`Observable`] linked both ways with
//! its raw [`StorageItem`]:
//!
//! ```text
//!   raw change ──► resolve(schema, default) ──► typed.set     (never persisted)
//!   typed.set  ──► to_raw ──► raw.set ──► write-back           (persisted as written)
//! ```
//!
//! A shared re-entry flag stops each direction from bouncing back through
//! the other, so a value the view produced is never validated again and a
//! value derived from storage is never written back by the view.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tabstore_reactive::{Observable, Subscription};
use tracing::{error, trace, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::item::StorageItem;
use crate::schema::{self, DefaultPolicy, Schema};

/// Marks one direction of the link as in progress for its lifetime.
struct SyncGuard<'a>(&'a Cell<bool>);

impl<'a> SyncGuard<'a> {
    /// `None` if a sync is already running.
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct TypedInner<T> {
    raw: StorageItem,
    typed: Observable<T>,
    syncing: Rc<Cell<bool>>,
    _from_raw: Subscription,
    _to_raw: Subscription,
}

/// Typed, validated cell over a raw storage cell.
pub struct TypedStorageItem<T> {
    inner: Rc<TypedInner<T>>,
}

impl<T> Clone for TypedStorageItem<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> TypedStorageItem<T>
where
    T: Clone + PartialEq + Serialize + 'static,
{
    /// Resolve the raw cell's current value and link the two cells.
    ///
    /// Binding never writes to the store, even when the value falls back to
    /// the default. Fails if `schema` cannot validate synchronously.
    pub fn bind<S>(raw: StorageItem, schema: S, default: DefaultPolicy<T>) -> Result<Self>
    where
        S: Schema<Output = T> + 'static,
    {
        let initial = raw
            .with(|value| schema::resolve(value, &schema, &default))
            .map_err(|source| Error::AsyncValidation {
                key: raw.key().to_owned(),
                source,
            })?;
        let typed = Observable::new(initial);
        let syncing = Rc::new(Cell::new(false));

        let from_raw = raw.subscribe({
            let typed = typed.clone();
            let syncing = Rc::clone(&syncing);
            let key = raw.key().to_owned();
            move |value: &Value| {
                let Some(_guard) = SyncGuard::enter(&syncing) else {
                    return;
                };
                match schema::resolve(value, &schema, &default) {
                    Ok(resolved) => {
                        trace!(key = %key, "raw value resolved into typed view");
                        typed.set(resolved);
                    }
                    Err(source) => {
                        let err = Error::AsyncValidation {
                            key: key.clone(),
                            source,
                        };
                        error!(key = %key, "asynchronous schema reached during propagation");
                        panic!("{err}");
                    }
                }
            }
        });

        let to_raw = typed.subscribe({
            let raw = raw.clone();
            let syncing = Rc::clone(&syncing);
            move |value: &T| {
                let Some(_guard) = SyncGuard::enter(&syncing) else {
                    return;
                };
                match codec::to_raw(value) {
                    Ok(encoded) => raw.set(encoded),
                    Err(err) => {
                        warn!(key = raw.key(), error = %err, "typed value is not representable as JSON; not persisted");
                    }
                }
            }
        });

        Ok(Self {
            inner: Rc::new(TypedInner {
                raw,
                typed,
                syncing,
                _from_raw: from_raw,
                _to_raw: to_raw,
            }),
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.inner.raw.key()
    }

    /// The underlying raw cell.
    #[must_use]
    pub fn raw(&self) -> &StorageItem {
        &self.inner.raw
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.inner.typed.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.typed.with(f)
    }

    /// Set the typed value and persist its JSON encoding.
    ///
    /// A value that cannot be encoded is kept in memory and logged; use
    /// [`try_set`](Self::try_set) to reject it instead.
    pub fn set(&self, value: T) {
        if !self.inner.typed.set(value) {
            self.persist_unchanged();
        }
    }

    /// Like [`set`](Self::set), but leaves both cells untouched when the
    /// value cannot be encoded.
    pub fn try_set(&self, value: T) -> Result<()> {
        let encoded = codec::to_raw(&value).map_err(|source| Error::Encode {
            key: self.key().to_owned(),
            source,
        })?;
        if !self.inner.typed.set(value) {
            self.write_raw_if_different(encoded);
        }
        Ok(())
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if !self.inner.typed.update(f) {
            self.persist_unchanged();
        }
    }

    /// An explicit write of the value already shown still reaches the store
    /// when the raw cell holds something else (a defaulted or coerced read).
    fn persist_unchanged(&self) {
        match self.inner.typed.with(|value| codec::to_raw(value)) {
            Ok(encoded) => self.write_raw_if_different(encoded),
            Err(err) => {
                warn!(key = self.key(), error = %err, "typed value is not representable as JSON; not persisted");
            }
        }
    }

    fn write_raw_if_different(&self, encoded: Value) {
        let raw = &self.inner.raw;
        if raw.with(|current| *current == encoded) {
            return;
        }
        let Some(_guard) = SyncGuard::enter(&self.inner.syncing) else {
            return;
        };
        trace!(key = raw.key(), "typed value unchanged; aligning raw cell");
        raw.set(encoded);
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.typed.subscribe(callback)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.typed.version()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether a sync between the two cells is running right now.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for TypedStorageItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedStorageItem")
            .field("key", &self.inner.raw.key())
            .field("value", &self.inner.typed)
            .finish()
    }
}
