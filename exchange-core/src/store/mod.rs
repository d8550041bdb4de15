//! Durable, schema-filtered FIFO of outbound messages (§4.2).
//!
//! `MessageStore` owns the pending/held queues and the persisted scheduling
//! metadata (`sequence`, `pending_offset`, `server_sequence`,
//! `accepted_types`). It is the one piece of state `MessageExchange`
//! mutates on every exchange cycle; no other component writes to it.

pub mod queue_dir;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::ids::MessageId;
use crate::message::{Message, Schema, SchemaError};
use crate::persist::{Persist, PersistError};
use crate::reactor::{Event, Reactor, Topic};
use queue_dir::MessageDir;

const SEQUENCE_PATH: &str = "sequence";
const PENDING_OFFSET_PATH: &str = "pending_offset";
const SERVER_SEQUENCE_PATH: &str = "server_sequence";
const ACCEPTED_TYPES_PATH: &str = "accepted_types";

/// Errors a [`MessageStore`] operation can raise.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Durable FIFO of outbound messages, filtered by the server's currently
/// accepted types (§4.2).
pub struct MessageStore {
    reactor: Arc<dyn Reactor>,
    persist: Persist,
    schemas: HashMap<String, Schema>,
    accepted_types: BTreeSet<String>,
    pending: VecDeque<Message>,
    held: VecDeque<Message>,
    sequence: u64,
    pending_offset: u64,
    server_sequence: u64,
    next_held_id: u64,
    pending_dir: Option<MessageDir>,
    held_dir: Option<MessageDir>,
}

impl MessageStore {
    /// An in-memory-only store (no on-disk mirror), convenient for tests.
    pub fn new(reactor: Arc<dyn Reactor>) -> Self {
        Self {
            reactor,
            persist: Persist::new(),
            schemas: HashMap::new(),
            accepted_types: BTreeSet::new(),
            pending: VecDeque::new(),
            held: VecDeque::new(),
            sequence: 0,
            pending_offset: 0,
            server_sequence: 0,
            next_held_id: 0,
            pending_dir: None,
            held_dir: None,
        }
    }

    /// A store backed by the §6.4 on-disk layout: `base/message-store` for
    /// metadata, `base/messages/` and `base/held/` for one-file-per-message
    /// queue mirrors.
    pub fn open(reactor: Arc<dyn Reactor>, base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref();
        let mut persist = Persist::with_filename(base.join("message-store"));
        persist.load()?;

        let sequence = persist.get(SEQUENCE_PATH).and_then(|v| v.as_u64()).unwrap_or(0);
        let pending_offset = persist.get(PENDING_OFFSET_PATH).and_then(|v| v.as_u64()).unwrap_or(0);
        let server_sequence = persist.get(SERVER_SEQUENCE_PATH).and_then(|v| v.as_u64()).unwrap_or(0);
        let accepted_types: BTreeSet<String> = persist
            .get(ACCEPTED_TYPES_PATH)
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let (pending_dir, pending) = MessageDir::open(base.join("messages"))?;
        let (held_dir, held) = MessageDir::open(base.join("held"))?;

        Ok(Self {
            reactor,
            persist,
            schemas: HashMap::new(),
            accepted_types,
            pending,
            held,
            sequence,
            pending_offset,
            server_sequence,
            next_held_id: 0,
            pending_dir: Some(pending_dir),
            held_dir: Some(held_dir),
        })
    }

    /// Register (or replace) the schema for a message type. Idempotent per
    /// type.
    pub fn add_schema(&mut self, schema: Schema) {
        self.schemas.insert(schema.type_name().to_string(), schema);
    }

    /// Validate `message` against its registered schema and enqueue it into
    /// `pending` (if its type is currently accepted) or `held` otherwise.
    pub fn add(&mut self, message: Message) -> Result<MessageId, StoreError> {
        let schema = self
            .schemas
            .get(&message.message_type)
            .ok_or_else(|| SchemaError::UnregisteredType(message.message_type.clone()))?;
        schema.validate(&message.fields)?;

        if self.accepted_types.contains(&message.message_type) {
            let id = MessageId::Pending(self.sequence + self.pending.len() as u64);
            if let Some(dir) = &mut self.pending_dir {
                dir.append(&message)?;
            }
            self.pending.push_back(message);
            Ok(id)
        } else {
            let id = MessageId::Held(self.next_held_id);
            self.next_held_id += 1;
            if let Some(dir) = &mut self.held_dir {
                dir.append(&message)?;
            }
            self.held.push_back(message);
            Ok(id)
        }
    }

    /// Atomically replace the accepted-types set, promoting newly accepted
    /// held messages into pending (preserving their original order) and
    /// firing one `MessageTypeAcceptanceChanged` event per type whose
    /// acceptance changed — additions (alphabetical) before removals
    /// (alphabetical), matching the set's natural iteration order.
    pub fn set_accepted_types(&mut self, types: impl IntoIterator<Item = String>) -> Result<(), StoreError> {
        let new_types: BTreeSet<String> = types.into_iter().collect();
        let added: Vec<String> = new_types.difference(&self.accepted_types).cloned().collect();
        let removed: Vec<String> = self.accepted_types.difference(&new_types).cloned().collect();

        for type_name in &added {
            let (promoted, kept): (VecDeque<Message>, VecDeque<Message>) =
                self.held.drain(..).partition(|m| &m.message_type == type_name);
            self.held = kept;
            for message in promoted {
                if let Some(dir) = &mut self.pending_dir {
                    dir.append(&message)?;
                }
                self.pending.push_back(message);
            }
            if let Some(dir) = &mut self.held_dir {
                dir.rewrite(&self.held)?;
            }
        }

        self.accepted_types = new_types;
        self.persist.set(
            ACCEPTED_TYPES_PATH,
            serde_json::Value::Array(self.accepted_types.iter().cloned().map(serde_json::Value::from).collect()),
        );

        for type_name in &added {
            self.reactor.fire(
                Topic::MessageTypeAcceptanceChanged,
                Event::TypeAcceptance {
                    type_name: type_name.clone(),
                    accepted: true,
                },
            );
        }
        for type_name in &removed {
            self.reactor.fire(
                Topic::MessageTypeAcceptanceChanged,
                Event::TypeAcceptance {
                    type_name: type_name.clone(),
                    accepted: false,
                },
            );
        }
        Ok(())
    }

    pub fn accepted_types(&self) -> &BTreeSet<String> {
        &self.accepted_types
    }

    /// Raw MD5 digest of `";".join(sorted(accepted_types))` (§3 invariant 4).
    pub fn get_accepted_types_digest(&self) -> [u8; 16] {
        let joined = self.accepted_types.iter().cloned().collect::<Vec<_>>().join(";");
        md5::compute(joined.as_bytes()).0
    }

    /// Pending messages starting at `pending_offset`, optionally capped at
    /// `max`.
    pub fn get_pending_messages(&self, max: Option<usize>) -> Vec<Message> {
        let start = self.pending_offset as usize;
        let slice = self.pending.iter().skip(start);
        match max {
            Some(max) => slice.take(max).cloned().collect(),
            None => slice.cloned().collect(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Count of currently held messages of the given type.
    pub fn held_messages_of_type(&self, type_name: &str) -> usize {
        self.held.iter().filter(|m| m.message_type == type_name).count()
    }

    /// Advance `pending_offset` by `n`; once it reaches the queue length,
    /// truncate the acknowledged prefix and advance `sequence` by the
    /// removed count.
    pub fn add_pending_offset(&mut self, n: u64) -> Result<(), StoreError> {
        self.pending_offset += n;
        if self.pending_offset >= self.pending.len() as u64 {
            let removed = self.pending.len();
            self.pending.clear();
            if let Some(dir) = &self.pending_dir {
                dir.remove_oldest(removed)?;
            }
            self.sequence += removed as u64;
            self.pending_offset = 0;
        }
        Ok(())
    }

    pub fn set_pending_offset(&mut self, n: u64) {
        self.pending_offset = n;
    }

    pub fn get_pending_offset(&self) -> u64 {
        self.pending_offset
    }

    pub fn get_sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, n: u64) {
        self.sequence = n;
    }

    pub fn get_server_sequence(&self) -> u64 {
        self.server_sequence
    }

    pub fn set_server_sequence(&mut self, n: u64) {
        self.server_sequence = n;
    }

    /// Flush `sequence`, `pending_offset`, `server_sequence` and
    /// `accepted_types` to the backing `Persist` document.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.persist.set(SEQUENCE_PATH, serde_json::Value::from(self.sequence));
        self.persist.set(PENDING_OFFSET_PATH, serde_json::Value::from(self.pending_offset));
        self.persist.set(SERVER_SEQUENCE_PATH, serde_json::Value::from(self.server_sequence));
        self.persist.save()?;
        Ok(())
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        match id {
            MessageId::Pending(position) => position >= self.sequence && position < self.sequence + self.pending.len() as u64,
            MessageId::Held(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::message::FieldType;
    use crate::reactor::VirtualReactor;

    fn store() -> MessageStore {
        let reactor = Arc::new(VirtualReactor::new());
        let mut store = MessageStore::new(reactor);
        store.add_schema(Schema::new("data", [("value".to_string(), FieldType::Int)]));
        store
    }

    #[test]
    fn add_rejects_unregistered_type() {
        let mut store = MessageStore::new(Arc::new(VirtualReactor::new()));
        let err = store.add(Message::new("mystery"));
        assert!(matches!(err, Err(StoreError::Schema(SchemaError::UnregisteredType(_)))));
    }

    #[test]
    fn add_diverts_non_accepted_type_to_held() {
        let mut store = store();
        let id = store.add(Message::new("data").with_field("value", 1)).unwrap();
        assert!(matches!(id, MessageId::Held(0)));
        assert_eq!(store.pending_len(), 0);
        assert!(!store.is_pending(id));
    }

    #[test]
    fn add_enqueues_accepted_type_as_pending() {
        let mut store = store();
        store.set_accepted_types(["data".to_string()]).unwrap();
        let id = store.add(Message::new("data").with_field("value", 1)).unwrap();
        assert!(matches!(id, MessageId::Pending(0)));
        assert_eq!(store.pending_len(), 1);
        assert!(store.is_pending(id));
    }

    #[test]
    fn set_accepted_types_promotes_held_messages_in_order() {
        let mut store = store();
        store.add(Message::new("data").with_field("value", 1)).unwrap();
        store.add(Message::new("data").with_field("value", 2)).unwrap();
        store.set_accepted_types(["data".to_string()]).unwrap();
        let pending = store.get_pending_messages(None);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].field("value"), Some(&serde_json::Value::from(1)));
        assert_eq!(pending[1].field("value"), Some(&serde_json::Value::from(2)));
    }

    #[test]
    fn set_accepted_types_fires_one_event_per_changed_type() {
        let reactor = Arc::new(VirtualReactor::new());
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log2 = log.clone();
        reactor.call_on(
            Topic::MessageTypeAcceptanceChanged,
            Arc::new(move |event: &Event| {
                if let Event::TypeAcceptance { type_name, accepted } = event {
                    log2.lock().push((type_name.clone(), *accepted));
                }
                Ok(())
            }),
        );
        let mut store = MessageStore::new(reactor);
        store.add_schema(Schema::new("data", []));
        store.set_accepted_types(["data".to_string()]).unwrap();
        store.set_accepted_types([]).unwrap();
        assert_eq!(*log.lock(), vec![("data".to_string(), true), ("data".to_string(), false)]);
    }

    #[test]
    fn accepted_types_digest_matches_md5_of_sorted_join() {
        let mut store = store();
        store.set_accepted_types(["b".to_string(), "a".to_string()]).unwrap();
        let expected = md5::compute(b"a;b").0;
        assert_eq!(store.get_accepted_types_digest(), expected);
    }

    #[test]
    fn empty_accepted_types_digest_is_md5_of_empty_string() {
        let store = store();
        assert_eq!(store.get_accepted_types_digest(), md5::compute(b"").0);
    }

    #[test]
    fn add_pending_offset_truncates_and_advances_sequence_on_full_ack() {
        let mut store = store();
        store.set_accepted_types(["data".to_string()]).unwrap();
        store.add(Message::new("data").with_field("value", 1)).unwrap();
        store.add(Message::new("data").with_field("value", 2)).unwrap();
        store.add_pending_offset(2).unwrap();
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.get_sequence(), 2);
        assert_eq!(store.get_pending_offset(), 0);
    }

    #[test]
    fn add_pending_offset_partial_ack_does_not_truncate() {
        let mut store = store();
        store.set_accepted_types(["data".to_string()]).unwrap();
        store.add(Message::new("data").with_field("value", 1)).unwrap();
        store.add(Message::new("data").with_field("value", 2)).unwrap();
        store.add_pending_offset(1).unwrap();
        assert_eq!(store.pending_len(), 2);
        assert_eq!(store.get_sequence(), 0);
        assert_eq!(store.get_pending_offset(), 1);
    }

    #[test]
    fn on_disk_store_round_trips_metadata_and_queues() {
        let dir = tempfile::tempdir().unwrap();
        let reactor = Arc::new(VirtualReactor::new());
        let mut store = MessageStore::open(reactor.clone(), dir.path()).unwrap();
        store.add_schema(Schema::new("data", [("value".to_string(), FieldType::Int)]));
        store.set_accepted_types(["data".to_string()]).unwrap();
        store.add(Message::new("data").with_field("value", 1)).unwrap();
        store.set_sequence(3);
        store.commit().unwrap();

        let mut reopened = MessageStore::open(reactor, dir.path()).unwrap();
        reopened.add_schema(Schema::new("data", [("value".to_string(), FieldType::Int)]));
        assert_eq!(reopened.get_sequence(), 3);
        assert_eq!(reopened.accepted_types().iter().cloned().collect::<Vec<_>>(), vec!["data".to_string()]);
        assert_eq!(reopened.pending_len(), 1);
    }

    proptest! {
        /// `sequence` only ever advances or holds steady, never regresses,
        /// across an arbitrary run of acknowledgements (§3 invariant).
        #[test]
        fn sequence_never_decreases_across_offsets(offsets in proptest::collection::vec(0u64..5, 0..20)) {
            let mut store = store();
            store.set_accepted_types(["data".to_string()]).unwrap();
            for i in 0..100 {
                store.add(Message::new("data").with_field("value", i as i64)).unwrap();
            }

            let mut last_sequence = store.get_sequence();
            for n in offsets {
                store.add_pending_offset(n).unwrap();
                let sequence = store.get_sequence();
                prop_assert!(sequence >= last_sequence);
                last_sequence = sequence;
            }
        }

        /// The digest is a pure function of the *set* of accepted types,
        /// independent of the order they were declared in (§3 invariant 4).
        #[test]
        fn accepted_types_digest_is_independent_of_insertion_order(
            mut types in proptest::collection::vec("[a-z]{1,6}", 1..6)
        ) {
            types.sort();
            types.dedup();

            let mut forward = store();
            forward.set_accepted_types(types.iter().cloned()).unwrap();

            let mut shuffled = types.clone();
            shuffled.reverse();
            let mut backward = store();
            backward.set_accepted_types(shuffled).unwrap();

            prop_assert_eq!(forward.get_accepted_types_digest(), backward.get_accepted_types_digest());
        }

        /// Every added message lands in exactly one of `pending`/`held`,
        /// decided solely by whether its type is currently accepted.
        #[test]
        fn held_and_pending_partition_every_added_message(accept in any::<bool>()) {
            let mut store = store();
            if accept {
                store.set_accepted_types(["data".to_string()]).unwrap();
            }
            let id = store.add(Message::new("data").with_field("value", 1)).unwrap();
            if accept {
                prop_assert_eq!(store.pending_len(), 1);
                prop_assert!(store.is_pending(id));
            } else {
                prop_assert_eq!(store.pending_len(), 0);
                prop_assert!(!store.is_pending(id));
            }
        }
    }
}
