//! Storage area persisted to a JSON file.
//!
//! The whole area is kept in memory and rewritten to disk after every
//! mutation: the JSON object is written to a temporary file in the target
//! directory and renamed over the destination, so readers never observe a
//! half-written file. A write failure is logged and leaves the in-memory
//! state updated; the next successful write catches the file up.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::StorageArea;

#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    entries: RefCell<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    /// Load `path` if it exists, otherwise start empty. A file that is not a
    /// JSON object of strings is treated as empty and overwritten on the next
    /// mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "unreadable storage file; starting empty");
                BTreeMap::new()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "opened file storage");
        Ok(Self {
            path,
            entries: RefCell::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current entries to disk now.
    pub fn flush(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&*self.entries.borrow()).map_err(io::Error::from)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(err) = self.flush() {
            warn!(path = %self.path.display(), error = %err, "failed to persist storage file");
        }
    }
}

impl StorageArea for JsonFileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        self.persist();
    }

    fn remove_item(&self, key: &str) {
        let removed = self.entries.borrow_mut().remove(key);
        if removed.is_some() {
            self.persist();
        }
    }

    fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.persist();
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.entries.borrow().keys().nth(index).cloned()
    }
}
