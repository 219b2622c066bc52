#![forbid(unsafe_code)]

//! Reactive, schema-validated cells over key-value stores shared between
//! contexts.
//!
//! A [`WebStorage`] service hands out one [`StorageItem`] per (store, key).
//! Local writes to a cell are persisted immediately; changes made by other
//! contexts arrive as [`StorageEvent`]s and update the cell without being
//! written back. [`TypedStorageItem`] layers a [`Schema`] with a default
//! fallback on top of a raw cell.
//!
//! ```text
//!  consumer ──► WebStorage::acquire_cell ──► CellRegistry ──► StorageItem ◄──┐
//!                        │                                      │ write-back │
//!                        └─► StorageWatcher ◄── StorageEvent    ▼            │
//!                                   └──────── apply_external ── Store ───────┘
//! ```
//!
//! # Modules
//!
//! - [`store`]: the [`StorageArea`] trait and identity-carrying [`Store`]
//!   handles.
//! - [`backend`]: memory, shared multi-context, and JSON file areas.
//! - [`event`]: storage events and the channel delivering them.
//! - [`codec`]: JSON encoding with a no-value sentinel for bad input.
//! - [`schema`]: synchronous validation and default policies.
//! - [`cache`]: the per-store cell registry.
//! - [`item`], [`watcher`], [`typed`]: the sync engine.
//! - [`service`], [`config`]: the consumer surface.
//!
//! # Threading
//!
//! All types are `!Send` and `!Sync`; one service belongs to one context.

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod item;
pub mod schema;
pub mod service;
pub mod store;
pub mod typed;
pub mod watcher;

pub use backend::{JsonFileStorage, MemoryStorage, SharedMemory};
pub use cache::CellRegistry;
pub use codec::NO_VALUE;
pub use config::{WATCH_STORAGE_ENV, WebStorageConfig};
pub use error::{Error, Result};
pub use event::{StorageEvent, StorageEventChannel};
pub use item::StorageItem;
pub use schema::{AsyncValidationError, DefaultPolicy, Issue, Schema, Validation};
pub use serde_json::Value;
pub use service::WebStorage;
pub use store::{StorageArea, Store, StoreId, WeakStore};
pub use tabstore_reactive::{Observable, Scope, ScopeError, Subscription};
pub use typed::TypedStorageItem;
pub use watcher::{StorageWatcher, WatchLease};
