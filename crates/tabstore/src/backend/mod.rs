//! [`StorageArea`](crate::store::StorageArea) implementations.
//!
//! - [`MemoryStorage`]: a private in-memory area.
//! - [`SharedMemory`]: one in-memory area seen by several contexts, each with
//!   its own [`Store`](crate::store::Store) and event channel; a write in one
//!   context notifies all the others.
//! - [`JsonFileStorage`]: an area persisted to a JSON file on every mutation.

pub mod file;
pub mod memory;
pub mod shared;

pub use file::JsonFileStorage;
pub use memory::MemoryStorage;
pub use shared::SharedMemory;
