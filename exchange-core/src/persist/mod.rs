//! Hierarchical key/value document persisted atomically to disk (§4.1).
//!
//! `Persist` backs both `MessageStore`'s metadata (`sequence`,
//! `pending_offset`, `server_sequence`, `accepted_types`) and `Identity`.
//! The document is addressed by dotted paths (`"foo.bar.0"` — list
//! indices are plain integer segments) over a `serde_json::Value` tree.
//!
//! Atomic `save()` follows the same recipe as `Alb-O-xeno`'s
//! `crates/editor/src/io.rs::write_atomic`: write to a `NamedTempFile` in
//! the same directory as the target, `sync_all`, then `persist()` (a
//! same-filesystem rename), so a crash mid-write never leaves a partial
//! file on disk (§3 invariant 5).

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Failures from loading, saving, or navigating a [`Persist`] document.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read persisted document at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write persisted document at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse persisted document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no snapshot has been taken to restore")]
    NoSnapshot,

    #[error("stash is empty, nothing to pop")]
    EmptyStash,

    #[error("path segment {segment:?} in {path:?} addresses a non-container value")]
    NotAContainer { path: String, segment: String },
}

/// A hierarchical document addressed by dotted paths.
#[derive(Debug, Clone)]
pub struct Persist {
    filename: Option<PathBuf>,
    root: Value,
    snapshot: Option<Value>,
    stash: Vec<Value>,
}

impl Default for Persist {
    fn default() -> Self {
        Self {
            filename: None,
            root: Value::Object(serde_json::Map::new()),
            snapshot: None,
            stash: Vec::new(),
        }
    }
}

impl Persist {
    /// An in-memory-only document (never saved/loaded from disk).
    pub fn new() -> Self {
        Self::default()
    }

    /// A document backed by `filename`. Does not touch disk until
    /// [`Persist::load`] or [`Persist::save`] is called.
    pub fn with_filename(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Read the backing file (if any) and replace the in-memory document.
    /// A missing file is not an error — the document starts empty, matching
    /// a first-run agent with no prior state.
    pub fn load(&mut self) -> Result<(), PersistError> {
        let Some(path) = self.filename.clone() else {
            return Ok(());
        };
        if !path.exists() {
            self.root = Value::Object(serde_json::Map::new());
            return Ok(());
        }
        let bytes = std::fs::read(&path).map_err(|source| PersistError::Read {
            path: path.clone(),
            source,
        })?;
        self.root = serde_json::from_slice(&bytes).map_err(|source| PersistError::Parse { path, source })?;
        Ok(())
    }

    /// Atomically persist the current document to the backing file.
    pub fn save(&self) -> Result<(), PersistError> {
        let Some(path) = &self.filename else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.root).map_err(|source| PersistError::Parse {
            path: path.clone(),
            source,
        })?;
        crate::atomic::write_atomic(path, &bytes).map_err(|source| PersistError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        navigate(&self.root, path)
    }

    /// Set the value at `path`, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        set_at(&mut self.root, &segments, value);
    }

    /// Append `value` to the list at `path`, creating an empty list first
    /// if nothing is there yet.
    pub fn add(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        let slot = ensure_mut(&mut self.root, &segments);
        match slot {
            Value::Array(items) => items.push(value),
            other @ Value::Null => *other = Value::Array(vec![value]),
            _ => {}
        }
    }

    /// Remove and return the value at `path`, if present.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        remove_at(&mut self.root, &segments)
    }

    /// Save a copy of the whole document into the single snapshot slot.
    pub fn save_snapshot(&mut self) {
        self.snapshot = Some(self.root.clone());
    }

    /// Replace the document with the previously saved snapshot.
    pub fn restore_snapshot(&mut self) -> Result<(), PersistError> {
        self.root = self.snapshot.clone().ok_or(PersistError::NoSnapshot)?;
        Ok(())
    }

    /// Push a copy of the current document onto the stash stack.
    pub fn stash(&mut self) {
        self.stash.push(self.root.clone());
    }

    /// Pop the most recent stashed document and make it current.
    pub fn pop_restore(&mut self) -> Result<(), PersistError> {
        self.root = self.stash.pop().ok_or(PersistError::EmptyStash)?;
        Ok(())
    }
}

fn navigate<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn ensure_mut<'a>(root: &'a mut Value, segments: &[&str]) -> &'a mut Value {
    let mut current = root;
    for segment in segments {
        if !matches!(current, Value::Object(_)) {
            *current = Value::Object(serde_json::Map::new());
        }
        let Value::Object(map) = current else { unreachable!() };
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    current
}

fn set_at(root: &mut Value, segments: &[&str], value: Value) {
    let slot = ensure_mut(root, segments);
    *slot = value;
}

fn remove_at(root: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => map.get_mut(*segment)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => map.remove(*last),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_round_trip_on_nested_path() {
        let mut p = Persist::new();
        p.set("store.sequence", Value::from(42));
        assert_eq!(p.get("store.sequence"), Some(&Value::from(42)));
    }

    #[test]
    fn add_appends_to_list_creating_it() {
        let mut p = Persist::new();
        p.add("accepted_types", Value::from("a"));
        p.add("accepted_types", Value::from("b"));
        assert_eq!(p.get("accepted_types"), Some(&Value::from(vec!["a", "b"])));
    }

    #[test]
    fn remove_drops_the_value() {
        let mut p = Persist::new();
        p.set("x", Value::from(1));
        assert_eq!(p.remove("x"), Some(Value::from(1)));
        assert_eq!(p.get("x"), None);
    }

    #[test]
    fn save_then_load_is_atomic_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message-store");
        let mut p = Persist::with_filename(&path);
        p.set("sequence", Value::from(7));
        p.save().unwrap();

        let mut reloaded = Persist::with_filename(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("sequence"), Some(&Value::from(7)));
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut p = Persist::new();
        p.set("x", Value::from(1));
        p.save_snapshot();
        p.set("x", Value::from(2));
        p.restore_snapshot().unwrap();
        assert_eq!(p.get("x"), Some(&Value::from(1)));
    }

    #[test]
    fn stash_pop_restore_is_a_stack() {
        let mut p = Persist::new();
        p.set("x", Value::from(1));
        p.stash();
        p.set("x", Value::from(2));
        p.stash();
        p.set("x", Value::from(3));

        p.pop_restore().unwrap();
        assert_eq!(p.get("x"), Some(&Value::from(2)));
        p.pop_restore().unwrap();
        assert_eq!(p.get("x"), Some(&Value::from(1)));
        assert!(p.pop_restore().is_err());
    }

    #[test]
    fn restore_without_snapshot_errors() {
        let mut p = Persist::new();
        assert!(p.restore_snapshot().is_err());
    }
}
