//! # exchange-core — client-side message exchange engine
//!
//! The durable, schedulable pipe a system-management agent uses to talk to
//! its server: plugins enqueue outbound messages into a [`store`] that
//! persists them across restarts, a [`reactor`] fires topic events and
//! timers, [`exchange`] drives the periodic exchange cycle over a
//! [`transport`], and [`broker`] exposes the whole thing to local clients
//! over an IPC method-call surface.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use exchange_core::exchange::{ExchangeConfig, MessageExchange};
//! use exchange_core::identity::Identity;
//! use exchange_core::message::Message;
//! use exchange_core::reactor::TokioReactor;
//! use exchange_core::store::MessageStore;
//! use exchange_core::transport::HttpTransport;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let reactor = Arc::new(TokioReactor::new());
//! let transport = Arc::new(HttpTransport::new("https://exchange.example/message-system")?);
//! let store = MessageStore::new(reactor.clone());
//! let identity = Identity::new();
//!
//! let exchange = MessageExchange::new(reactor, transport, store, identity, ExchangeConfig::default());
//! exchange.start();
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`message`] — the tagged, schema-validated `Message` envelope (§3)
//! - [`persist`] — dotted-path JSON document with atomic save/restore (§4.1)
//! - [`store`] — `MessageStore`: the durable pending/held FIFO (§4.2)
//! - [`reactor`] — `Reactor`: topic-keyed pub/sub plus timers (§4.3)
//! - [`transport`] — `Transport`: one stateless POST per exchange (§4.4)
//! - [`identity`] — the persisted `{secure_id, insecure_id}` pair (§4.6)
//! - [`exchange`] — `MessageExchange`: scheduling and the exchange cycle (§4.5)
//! - [`broker`] — `BrokerServer`: the local IPC method-call facade (§4.7)
//! - [`ids`] — `MessageId`, the opaque identifier `MessageStore::add` returns
//! - [`atomic`] — shared write-temp-then-rename helper used by [`persist`] and [`store`]
//!
//! # Concurrency Model (§5)
//!
//! The exchange engine is single-threaded cooperative: one event loop owns
//! the reactor, all timers, and all persisted-state mutations, with the
//! transport call as the only suspension point. `parking_lot` guards are
//! always dropped before that `.await`, so there is no lock discipline
//! internal to the engine — see [`exchange::MessageExchange::exchange`].

pub mod atomic;
pub mod broker;
pub mod exchange;
pub mod identity;
pub mod ids;
pub mod message;
pub mod persist;
pub mod reactor;
pub mod store;
pub mod transport;

pub use broker::{BrokerError, BrokerServer};
pub use exchange::{ExchangeConfig, ExchangeError, MessageExchange};
pub use identity::Identity;
pub use ids::MessageId;
pub use message::{FieldType, Message, Schema, SchemaError};
pub use persist::{Persist, PersistError};
pub use reactor::{Event, Reactor, ReactorError, Topic};
pub use store::{MessageStore, StoreError};
pub use transport::{Transport, TransportError};
