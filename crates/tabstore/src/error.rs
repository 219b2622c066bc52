use tabstore_reactive::ScopeError;
use thiserror::Error;

use crate::schema::AsyncValidationError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by tabstore.
///
/// Only contract violations end up here. Malformed persisted data and schema
/// mismatches are absorbed into the no-value sentinel or the default policy.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation needs an enclosing scope.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// The schema for `key` answered with a pending result.
    #[error("storage item `{key}`: {source}")]
    AsyncValidation {
        key: String,
        #[source]
        source: AsyncValidationError,
    },

    /// A typed value could not be represented as JSON.
    #[error("value for storage item `{key}` is not JSON-serializable: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid web storage configuration: {0}")]
    Config(#[source] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error reports a caller contract violation (missing scope
    /// or asynchronous validator) rather than an environment failure.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Scope(_) | Self::AsyncValidation { .. })
    }
}
