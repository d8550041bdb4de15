//! The broker's registry of connected local clients (§4.7).
//!
//! A `DashMap`-backed concurrent table, keyed by the client's registered
//! name, carrying a notice channel rather than a mailbox sender — one
//! entry per connected plugin, told to `exit` on shutdown.

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Broadcast to every registered client by `BrokerServer::stop_clients`.
#[derive(Debug, Clone, Copy)]
pub enum ClientNotice {
    Exit,
}

/// Concurrent table of connected clients, keyed by the name they
/// registered under.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, mpsc::UnboundedSender<ClientNotice>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { clients: DashMap::new() }
    }

    /// Record `name` as connected and return the receiving half of its
    /// notice channel. Re-registering the same name replaces its sender,
    /// so the old connection simply stops receiving notices.
    pub fn register(&self, name: impl Into<String>) -> mpsc::UnboundedReceiver<ClientNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(name.into(), tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Broadcast `notice` to every registered client, then forget them —
    /// mirrors `BrokerServer.stop_clients` in the original, which does not
    /// expect clients to reconnect afterwards.
    pub fn notify_all(&self, notice: ClientNotice) {
        for entry in self.clients.iter() {
            let _ = entry.value().send(notice);
        }
        self.clients.clear();
    }
}
