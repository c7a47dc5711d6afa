//! Shared per-tileset-pair state registry.
//!
//! Maps that reference the same tileset pair must land in the same atlas
//! builder, so the converter keys shared state by pair name and hands out
//! `Arc` clones. The registry lock is only held for the lookup; the values
//! carry their own synchronization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A concurrent name-to-value registry. Values are created at most once per
/// key and shared by reference count afterwards.
#[derive(Debug, Default)]
pub struct Registry<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the value registered under `key`, creating it with `init` on
    /// first use. Later callers get a clone of the same `Arc`.
    pub fn get_or_insert_with(&self, key: &str, init: impl FnOnce() -> T) -> Arc<T> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(key) {
            return Arc::clone(existing);
        }
        let value = Arc::new(init());
        entries.insert(key.to_string(), Arc::clone(&value));
        value
    }

    /// Get the value registered under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries.lock().unwrap().get(key).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// All registered keys and values, snapshot order unspecified.
    pub fn entries(&self) -> Vec<(String, Arc<T>)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}

/// Canonical key for a primary/secondary tileset pair. Maps sharing both
/// tilesets share one atlas.
pub fn pair_key(primary: &str, secondary: Option<&str>) -> String {
    match secondary {
        Some(secondary) => format!("{primary}+{secondary}"),
        None => primary.to_string(),
    }
}
