//! Synchronous schema validation with default-value fallback.
//!
//! A [`Schema`] turns a decoded [`Value`] into a typed output or a list of
//! [`Issue`]s. [`resolve`] applies the fallback policy:
//!
//! | Validator answer       | Resolved value                          |
//! |------------------------|-----------------------------------------|
//! | `Valid(v)`             | `v` (possibly coerced by the schema)    |
//! | `Invalid(issues)`      | `default.resolve(&issues)`              |
//! | `Pending(_)`           | [`AsyncValidationError`]                |
//!
//! Pending results exist so that asynchronous validators can be represented
//! and rejected; nothing in this crate ever polls them.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// One reason a value failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub message: String,
    /// Location of the offending value, outermost segment first.
    pub path: Vec<String>,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// Prefix the path with `segment`.
    #[must_use]
    pub fn at(mut self, segment: impl Into<String>) -> Self {
        self.path.insert(0, segment.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// Result of an asynchronous validator.
pub type PendingValidation<T> = Pin<Box<dyn Future<Output = Result<T, Vec<Issue>>>>>;

/// Answer of [`Schema::validate`].
pub enum Validation<T> {
    Valid(T),
    Invalid(Vec<Issue>),
    /// The validator could not answer synchronously.
    Pending(PendingValidation<T>),
}

impl<T> Validation<T> {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl<T: fmt::Debug> fmt::Debug for Validation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid(value) => f.debug_tuple("Valid").field(value).finish(),
            Self::Invalid(issues) => f.debug_tuple("Invalid").field(issues).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A validator from raw JSON to `Output`.
pub trait Schema {
    type Output;

    fn validate(&self, value: &Value) -> Validation<Self::Output>;

    /// Additionally require `predicate` to hold on the output.
    fn refine<F>(self, predicate: F, message: impl Into<String>) -> Refine<Self, F>
    where
        Self: Sized,
        F: Fn(&Self::Output) -> bool,
    {
        Refine {
            inner: self,
            predicate,
            message: message.into(),
        }
    }

    /// Additionally require an asynchronous predicate. Every input then
    /// yields [`Validation::Pending`], which [`resolve`] rejects; the inner
    /// schema's answer is only observable by awaiting it.
    fn refine_async<F, Fut>(self, predicate: F, message: impl Into<String>) -> AsyncRefine<Self, F>
    where
        Self: Sized,
        F: Fn(&Self::Output) -> Fut + 'static,
        Fut: Future<Output = bool> + 'static,
    {
        AsyncRefine {
            inner: self,
            predicate: Rc::new(predicate),
            message: message.into(),
        }
    }
}

impl<S: Schema + ?Sized> Schema for Box<S> {
    type Output = S::Output;

    fn validate(&self, value: &Value) -> Validation<Self::Output> {
        (**self).validate(value)
    }
}

// ─── Built-in schemas ────────────────────────────────────────────────────────

/// Accepts anything `T` can be deserialized from.
pub struct Json<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        json()
    }
}

impl<T> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json<{}>", std::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned> Schema for Json<T> {
    type Output = T;

    fn validate(&self, value: &Value) -> Validation<T> {
        match T::deserialize(value) {
            Ok(output) => Validation::Valid(output),
            Err(err) => Validation::Invalid(vec![Issue::new(err.to_string())]),
        }
    }
}

/// Schema accepting whatever deserializes into `T`.
#[must_use]
pub fn json<T>() -> Json<T> {
    Json {
        _marker: PhantomData,
    }
}

/// Schema accepting JSON strings.
#[must_use]
pub fn string() -> Json<String> {
    json()
}

/// Schema backed by a closure.
#[derive(Clone)]
pub struct FnSchema<F>(F);

impl<T, F> Schema for FnSchema<F>
where
    F: Fn(&Value) -> Validation<T>,
{
    type Output = T;

    fn validate(&self, value: &Value) -> Validation<T> {
        (self.0)(value)
    }
}

pub fn from_fn<T, F>(validate: F) -> FnSchema<F>
where
    F: Fn(&Value) -> Validation<T>,
{
    FnSchema(validate)
}

/// See [`Schema::refine`].
pub struct Refine<S, F> {
    inner: S,
    predicate: F,
    message: String,
}

impl<S, F> Schema for Refine<S, F>
where
    S: Schema,
    F: Fn(&S::Output) -> bool,
{
    type Output = S::Output;

    fn validate(&self, value: &Value) -> Validation<S::Output> {
        match self.inner.validate(value) {
            Validation::Valid(output) if (self.predicate)(&output) => Validation::Valid(output),
            Validation::Valid(_) => Validation::Invalid(vec![Issue::new(self.message.clone())]),
            other => other,
        }
    }
}

/// See [`Schema::refine_async`].
pub struct AsyncRefine<S, F> {
    inner: S,
    predicate: Rc<F>,
    message: String,
}

impl<S, F, Fut> Schema for AsyncRefine<S, F>
where
    S: Schema,
    S::Output: 'static,
    F: Fn(&S::Output) -> Fut + 'static,
    Fut: Future<Output = bool> + 'static,
{
    type Output = S::Output;

    /// Always pending, so a misconfigured schema is caught whatever the
    /// stored value looks like.
    fn validate(&self, value: &Value) -> Validation<S::Output> {
        let inner = self.inner.validate(value);
        let predicate = Rc::clone(&self.predicate);
        let message = self.message.clone();
        Validation::Pending(Box::pin(async move {
            let output = match inner {
                Validation::Valid(output) => output,
                Validation::Invalid(issues) => return Err(issues),
                Validation::Pending(check) => check.await?,
            };
            if (*predicate)(&output).await {
                Ok(output)
            } else {
                Err(vec![Issue::new(message)])
            }
        }))
    }
}

// ─── Default policy ──────────────────────────────────────────────────────────

/// What a failed validation resolves to.
pub enum DefaultPolicy<T> {
    /// A fixed value, cloned on every fallback.
    Value(T),
    /// Computed from the validator's issues.
    With(Box<dyn Fn(&[Issue]) -> T>),
}

impl<T: Clone> DefaultPolicy<T> {
    pub fn with(f: impl Fn(&[Issue]) -> T + 'static) -> Self {
        Self::With(Box::new(f))
    }

    #[must_use]
    pub fn resolve(&self, issues: &[Issue]) -> T {
        match self {
            Self::Value(value) => value.clone(),
            Self::With(f) => f(issues),
        }
    }
}

impl<T> From<T> for DefaultPolicy<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for DefaultPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::With(_) => f.write_str("With(..)"),
        }
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// The schema answered with [`Validation::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Asynchronous validation is not supported for storage items.")]
pub struct AsyncValidationError;

/// Validate `raw` and fall back to `default` on failure.
pub fn resolve<S>(
    raw: &Value,
    schema: &S,
    default: &DefaultPolicy<S::Output>,
) -> Result<S::Output, AsyncValidationError>
where
    S: Schema + ?Sized,
    S::Output: Clone,
{
    match schema.validate(raw) {
        Validation::Valid(output) => Ok(output),
        Validation::Invalid(issues) => {
            debug!(
                issues = issues.len(),
                first = issues.first().map(|i| i.message.as_str()).unwrap_or_default(),
                "validation failed; using default"
            );
            Ok(default.resolve(&issues))
        }
        Validation::Pending(_) => Err(AsyncValidationError),
    }
}
