#![forbid(unsafe_code)]

//! Lifetime scopes with deterministic teardown.
//!
//! A [`Scope`] owns a list of cleanup closures and runs them exactly once,
//! newest first, when the scope is closed (explicitly via [`Scope::close`] or
//! implicitly when the last handle is dropped).
//!
//! Scopes can also be made *ambient*: [`Scope::run`] installs the scope as the
//! current one for the duration of a closure, and [`Scope::require`] lets
//! library code fetch it without threading it through every signature. Code
//! that needs a scope and finds none fails with [`ScopeError::Missing`].
//!
//! # Example
//!
//! ```
//! use tabstore_reactive::scope::Scope;
//!
//! let scope = Scope::new();
//! let id = scope.run(|| Scope::require("example").map(|s| s.id()));
//! assert_eq!(id, Ok(scope.id()));
//! assert!(Scope::require("example").is_err());
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

// ─── Scope ID generation ─────────────────────────────────────────────────────

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_scope_id() -> u64 {
    NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Ambient stack ───────────────────────────────────────────────────────────

thread_local! {
    static ACTIVE: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// Pops the ambient stack on exit from [`Scope::run`], including unwinds.
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        // The popped handle may be the last one; drop it outside the borrow
        // so its teardowns can query the stack.
        let popped = ACTIVE.try_with(|stack| stack.borrow_mut().pop()).ok().flatten();
        drop(popped);
    }
}

// ─── Inner shared state ──────────────────────────────────────────────────────

type Teardown = Box<dyn FnOnce()>;

struct ScopeInner {
    id: u64,
    closed: Cell<bool>,
    teardowns: RefCell<Vec<Teardown>>,
}

impl ScopeInner {
    /// Returns `false` if the scope was already closed.
    fn close(&self) -> bool {
        if self.closed.replace(true) {
            return false;
        }
        let teardowns = std::mem::take(&mut *self.teardowns.borrow_mut());
        trace!(scope_id = self.id, count = teardowns.len(), "running scope teardowns");
        for teardown in teardowns.into_iter().rev() {
            teardown();
        }
        true
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if self.close() {
            debug!(scope_id = self.id, "scope dropped while open; teardowns ran");
        }
    }
}

// ─── Scope ───────────────────────────────────────────────────────────────────

/// Handle to a lifetime scope. Clones share the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create an open root scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                id: next_scope_id(),
                closed: Cell::new(false),
                teardowns: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a scope that is closed no later than `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let weak = Rc::downgrade(&child.inner);
        self.on_teardown(move || {
            if let Some(inner) = weak.upgrade() {
                inner.close();
            }
        });
        child
    }

    /// Unique identifier (for tracing/logging).
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Pending teardowns.
    #[must_use]
    pub fn teardown_count(&self) -> usize {
        self.inner.teardowns.borrow().len()
    }

    /// Register `teardown` to run when the scope closes. On an already closed
    /// scope it runs immediately.
    pub fn on_teardown(&self, teardown: impl FnOnce() + 'static) {
        if self.is_closed() {
            teardown();
            return;
        }
        self.inner.teardowns.borrow_mut().push(Box::new(teardown));
    }

    /// Run all teardowns, newest first. Idempotent.
    pub fn close(&self) {
        if self.inner.close() {
            debug!(scope_id = self.inner.id, "scope closed");
        }
    }

    /// Run `f` with `self` as the ambient scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        ACTIVE.with(|stack| stack.borrow_mut().push(self.clone()));
        let _exit = ActiveGuard;
        f()
    }

    /// The innermost ambient scope, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        ACTIVE
            .try_with(|stack| stack.borrow().last().cloned())
            .ok()
            .flatten()
    }

    /// The ambient scope, or an error naming `operation` when there is none
    /// or it has already been closed.
    pub fn require(operation: &'static str) -> Result<Self, ScopeError> {
        let scope = Self::current().ok_or(ScopeError::Missing { operation })?;
        scope.ensure_open(operation)?;
        Ok(scope)
    }

    /// Fail with [`ScopeError::Closed`] if the scope has been closed.
    pub fn ensure_open(&self, operation: &'static str) -> Result<(), ScopeError> {
        if self.is_closed() {
            return Err(ScopeError::Closed {
                operation,
                scope_id: self.inner.id,
            });
        }
        Ok(())
    }

    /// Whether both handles refer to the same scope.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .field("teardown_count", &self.teardown_count())
            .finish()
    }
}

// ─── ScopeError ──────────────────────────────────────────────────────────────

/// Error returned when an operation needs an open scope and has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// Invoked outside of any [`Scope::run`].
    Missing { operation: &'static str },
    /// The scope was closed before the operation ran.
    Closed {
        operation: &'static str,
        scope_id: u64,
    },
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { operation } => {
                write!(f, "{operation} can only be used within a scope")
            }
            Self::Closed {
                operation,
                scope_id,
            } => write!(f, "{operation} called on closed scope #{scope_id}"),
        }
    }
}

impl std::error::Error for ScopeError {}

// ─── Tests ───────────────────────────────────────────────────────────────────
