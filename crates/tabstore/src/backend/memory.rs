use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::store::StorageArea;

/// In-memory storage area ordered by key.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated area.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RefCell::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl StorageArea for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
    }

    fn remove_item(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }

    fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.entries.borrow().keys().nth(index).cloned()
    }
}
