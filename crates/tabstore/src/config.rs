//! Service configuration.
//!
//! ```json
//! { "watchStorage": false }
//! ```
//!
//! Missing fields keep their defaults. The environment variable
//! [`WATCH_STORAGE_ENV`] overrides `watchStorage` when set.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Overrides [`WebStorageConfig::watch_storage`] in [`WebStorageConfig::from_env`].
pub const WATCH_STORAGE_ENV: &str = "TABSTORE_WATCH_STORAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct WebStorageConfig {
    /// Apply changes made by other contexts to acquired cells.
    pub watch_storage: bool,
}

impl Default for WebStorageConfig {
    fn default() -> Self {
        Self {
            watch_storage: true,
        }
    }
}

impl WebStorageConfig {
    #[must_use]
    pub fn with_watch_storage(mut self, watch: bool) -> Self {
        self.watch_storage = watch;
        self
    }

    /// Parse a JSON object, merging it over the defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::Config)
    }

    /// Defaults, overridden by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Defaults, overridden by whatever `get_env` reports.
    #[must_use]
    pub fn from_env_with<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = get_env(WATCH_STORAGE_ENV) {
            config.watch_storage = env_flag(&value);
        }
        config
    }
}

#[inline]
fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watching_is_on_by_default() {
        assert!(WebStorageConfig::default().watch_storage);
        assert!(!WebStorageConfig::default().with_watch_storage(false).watch_storage);
    }

    #[test]
    fn json_merges_over_defaults() {
        assert_eq!(
            WebStorageConfig::from_json_str("{}").unwrap(),
            WebStorageConfig::default()
        );
        assert!(
            !WebStorageConfig::from_json_str(r#"{"watchStorage": false}"#)
                .unwrap()
                .watch_storage
        );
    }

    #[test]
    fn json_rejects_unknown_fields_and_bad_types() {
        let err = WebStorageConfig::from_json_str(r#"{"watch": false}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(WebStorageConfig::from_json_str(r#"{"watchStorage": "no"}"#).is_err());
    }

    #[test]
    fn env_overrides_default() {
        let off = WebStorageConfig::from_env_with(|name| {
            (name == WATCH_STORAGE_ENV).then(|| "0".to_string())
        });
        assert!(!off.watch_storage);

        let on = WebStorageConfig::from_env_with(|_| Some(" Yes ".to_string()));
        assert!(on.watch_storage);

        let unset = WebStorageConfig::from_env_with(|_| None);
        assert!(unset.watch_storage);
    }

    #[test]
    fn env_flag_values() {
        for truthy in ["1", "true", "TRUE", "yes", "on"] {
            assert!(env_flag(truthy), "{truthy}");
        }
        for falsy in ["0", "false", "off", "", "maybe"] {
            assert!(!env_flag(falsy), "{falsy}");
        }
    }
}
