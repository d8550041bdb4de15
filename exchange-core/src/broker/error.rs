//! Errors surfaced by the [`super::BrokerServer`] facade and its IPC
//! transport (§4.7, §6.3).

use thiserror::Error;

use crate::exchange::ExchangeError;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// No client is registered under the given name.
    #[error("no client registered under {0:?}")]
    UnknownClient(String),

    /// The underlying message exchange rejected the operation.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// A caller-supplied configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An IPC frame could not be decoded, or named an unknown method.
    #[error("malformed IPC frame: {0}")]
    Protocol(String),

    /// The IPC socket could not be bound, accepted on, or read/written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
