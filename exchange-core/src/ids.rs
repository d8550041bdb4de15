//! Opaque identifiers handed back to callers of `MessageStore::add`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a message returned by [`crate::store::MessageStore::add`].
///
/// A [`MessageId::Pending`] wraps the absolute sequence position the
/// message occupies in the store's pending queue at the moment it was
/// appended — `store.get_sequence() + pending.len()` before the append
/// (see the "MessageStore — unchanged + identifier decision" entry in
/// SPEC_FULL.md). `is_pending` can therefore answer purely from the
/// store's current `sequence` and pending length, with no separate
/// lookup table.
///
/// A [`MessageId::Held`] wraps a counter from a disjoint namespace: held
/// messages have no sequence position until promoted, and promotion does
/// not retroactively mint a new id for an already-issued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    Pending(u64),
    Held(u64),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Pending(n) => write!(f, "pending:{n}"),
            MessageId::Held(n) => write!(f, "held:{n}"),
        }
    }
}
