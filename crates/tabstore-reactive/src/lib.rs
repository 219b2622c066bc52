#![forbid(unsafe_code)]

//! Host-side primitives for tabstore.
//!
//! - [`Observable`]: a shared, version-tracked value cell with synchronous
//!   change notification via subscriber callbacks.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Scope`]: an owner of teardown closures, optionally installed as the
//!   ambient scope for a block of code.
//!
//! # Architecture
//!
//! Everything here is single-threaded (`Rc<RefCell<..>>`), so none of these
//! types are `Send` or `Sync`. Subscribers are stored as `Weak` callbacks and
//! pruned lazily during notification.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order, before `set` returns.
//! 3. Setting a value equal to the current value is a no-op.
//! 4. A scope runs each teardown exactly once, newest first.

pub mod observable;
pub mod scope;

pub use observable::{Observable, Subscription};
pub use scope::{Scope, ScopeError};
