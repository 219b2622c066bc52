//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tabstore::{StorageArea, Store};

/// One mutation observed by a [`SpyStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Set(String, String),
    Remove(String),
    Clear,
}

/// In-memory area that records every mutation made through it.
#[derive(Clone, Default)]
pub struct SpyStorage {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
    writes: Rc<RefCell<Vec<Write>>>,
}

impl SpyStorage {
    pub fn with_entries(entries: &[(&str, &str)]) -> Self {
        let spy = Self::default();
        spy.entries.borrow_mut().extend(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned())),
        );
        spy
    }

    /// A store over this area; the spy keeps access to the same entries.
    pub fn store(&self) -> Store {
        Store::new(self.clone())
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.borrow().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }

    /// Writes that targeted `key`.
    pub fn writes_to(&self, key: &str) -> Vec<String> {
        self.writes
            .borrow()
            .iter()
            .filter_map(|w| match w {
                Write::Set(k, v) if k == key => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    /// Change an entry without recording it, as another context would.
    pub fn poke(&self, key: &str, value: Option<&str>) {
        let mut entries = self.entries.borrow_mut();
        match value {
            Some(value) => {
                entries.insert(key.to_owned(), value.to_owned());
            }
            None => {
                entries.remove(key);
            }
        }
    }
}

impl StorageArea for SpyStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.writes
            .borrow_mut()
            .push(Write::Set(key.to_owned(), value.to_owned()));
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
    }

    fn remove_item(&self, key: &str) {
        self.writes.borrow_mut().push(Write::Remove(key.to_owned()));
        self.entries.borrow_mut().remove(key);
    }

    fn clear(&self) {
        self.writes.borrow_mut().push(Write::Clear);
        self.entries.borrow_mut().clear();
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.entries.borrow().keys().nth(index).cloned()
    }
}
