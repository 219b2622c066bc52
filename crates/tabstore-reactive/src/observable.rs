#![forbid(unsafe_code)]

//! Shared value cell with synchronous change notification.
//!
//! # Design
//!
//! [`Observable<T>`] keeps a value of type `T` in reference-counted storage
//! (`Rc<RefCell<..>>`). Every handle obtained through `clone()` points at the
//! same cell, so identity is observable through [`Observable::ptr_eq`]. A
//! `set()` that changes the value (by `PartialEq`) bumps the version and calls
//! every live subscriber synchronously, in registration order, before
//! returning.
//!
//! # Failure Modes
//!
//! - **Nested set**: a subscriber may call `set()` on the cell it observes.
//!   The nested change is delivered to every subscriber before the outer
//!   notification loop resumes; subscribers later in the outer loop then
//!   receive the outer (older) value.
//! - **Subscriber leak**: callbacks live as long as their [`Subscription`]
//!   guard. Dead weak entries are pruned on the next notification.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type CallbackRc<T> = Rc<dyn Fn(&T)>;
type CallbackWeak<T> = Weak<dyn Fn(&T)>;

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<CallbackWeak<T>>,
}

/// A shared, version-tracked value with change notification.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing mutation.
/// 2. `set(v)` where `v == current` is a no-op and notifies nobody.
/// 3. Subscribers are notified synchronously, in registration order.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a cell holding `value` at version 0.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value for the duration of `f`.
    ///
    /// `f` must not call `set()` on this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value. Returns `true` when the value changed and
    /// subscribers were notified.
    pub fn set(&self, value: T) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return false;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
        true
    }

    /// Mutate the value in place. Subscribers run only if the result differs
    /// from the value before `f`.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let before = inner.value.clone();
            f(&mut inner.value);
            if inner.value == before {
                false
            } else {
                inner.version += 1;
                true
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Register `callback` for every future change. Dropping the returned
    /// guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription::holding(strong)
    }

    /// Number of value-changing mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Registered subscribers, including dropped ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Whether both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(&self) {
        // Snapshot callbacks and value so no borrow is held while user code
        // runs; subscribers are free to read or write this cell.
        let (callbacks, value) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            let callbacks: Vec<CallbackRc<T>> =
                inner.subscribers.iter().filter_map(Weak::upgrade).collect();
            (callbacks, inner.value.clone())
        };
        for callback in &callbacks {
            callback(&value);
        }
    }
}

/// RAII guard keeping a callback registered.
///
/// Dropping the guard drops the only strong reference to the callback, so the
/// weak entry held by the notifier stops upgrading.
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl Subscription {
    /// Wrap any value whose lifetime controls a registration.
    ///
    /// Used by notifiers outside this module that follow the same
    /// weak-callback scheme.
    #[must_use]
    pub fn holding<G: 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
