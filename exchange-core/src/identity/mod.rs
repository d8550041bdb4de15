//! Persisted `{secure_id, insecure_id}` pair used to authenticate exchanges
//! (§4.6).
//!
//! Both ids may be unset (registration pending); `Identity` only stores and
//! persists them under the same [`crate::persist::Persist`] document
//! `MessageStore` uses, at a distinct dotted-path prefix, matching §6.4's
//! separate `identity` file. Populating them is an external registration
//! hook, out of scope for this crate (spec.md §1).

use std::path::Path;

use crate::persist::{Persist, PersistError};

const SECURE_ID_PATH: &str = "secure-id";
const INSECURE_ID_PATH: &str = "insecure-id";

pub struct Identity {
    persist: Persist,
}

impl Identity {
    /// An in-memory-only identity (no on-disk backing), useful for tests.
    pub fn new() -> Self {
        Self { persist: Persist::new() }
    }

    /// An identity backed by `path` (the §6.4 `identity` file).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let mut persist = Persist::with_filename(path.as_ref());
        persist.load()?;
        Ok(Self { persist })
    }

    pub fn secure_id(&self) -> Option<String> {
        self.persist.get(SECURE_ID_PATH).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn insecure_id(&self) -> Option<String> {
        self.persist.get(INSECURE_ID_PATH).and_then(|v| v.as_str()).map(str::to_string)
    }

    pub fn set_secure_id(&mut self, id: impl Into<String>) {
        self.persist.set(SECURE_ID_PATH, serde_json::Value::from(id.into()));
    }

    pub fn set_insecure_id(&mut self, id: impl Into<String>) {
        self.persist.set(INSECURE_ID_PATH, serde_json::Value::from(id.into()));
    }

    /// `computer_id` sent with every exchange: the secure id, if registered.
    pub fn computer_id(&self) -> Option<String> {
        self.secure_id()
    }

    pub fn save(&self) -> Result<(), PersistError> {
        self.persist.save()
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_identity_reports_no_ids() {
        let identity = Identity::new();
        assert_eq!(identity.secure_id(), None);
        assert_eq!(identity.computer_id(), None);
    }

    #[test]
    fn set_ids_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");
        let mut identity = Identity::open(&path).unwrap();
        identity.set_secure_id("secure-1");
        identity.set_insecure_id("insecure-1");
        identity.save().unwrap();

        let reopened = Identity::open(&path).unwrap();
        assert_eq!(reopened.secure_id().as_deref(), Some("secure-1"));
        assert_eq!(reopened.insecure_id().as_deref(), Some("insecure-1"));
        assert_eq!(reopened.computer_id().as_deref(), Some("secure-1"));
    }
}
