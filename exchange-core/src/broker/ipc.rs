//! Length-prefixed `postcard` framing over a Unix domain socket (§6.3),
//! grounded on `Alb-O-xeno`'s `crates/broker/broker/src/ipc.rs`: a `u32`-LE
//! byte length followed by the `postcard`-encoded frame, one
//! `tokio::spawn`-per-connection accept loop, frames serviced strictly in
//! arrival order per connection (read the next request only after the
//! previous response has been written).

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use super::protocol::{IpcRequest, IpcResponse};
use super::BrokerServer;

async fn write_frame<T: serde::Serialize>(stream: &mut UnixStream, frame: &T) -> std::io::Result<()> {
    let bytes = postcard::to_allocvec(frame)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    stream.write_u32_le(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}

async fn read_frame<T: serde::de::DeserializeOwned>(stream: &mut UnixStream) -> std::io::Result<T> {
    let len = stream.read_u32_le().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    postcard::from_bytes(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Bind `socket_path` and accept connections until the process exits,
/// spawning one task per connection.
pub async fn serve(socket_path: impl AsRef<Path>, broker: Arc<BrokerServer>) -> std::io::Result<()> {
    let path = socket_path.as_ref();
    if path.exists() {
        tokio::fs::remove_file(path).await?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!(path = %path.display(), "broker IPC server listening");

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(stream, broker).await {
                        tracing::error!(error = %error, "broker connection error");
                    }
                });
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to accept broker connection");
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, broker: Arc<BrokerServer>) -> std::io::Result<()> {
    tracing::info!("new broker IPC connection");
    loop {
        let request: IpcRequest = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::info!("broker IPC connection closed");
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        let response = broker.handle_request(request).await;
        write_frame(&mut stream, &response).await?;
    }
}

/// Connect to a running broker as a client.
pub async fn connect(socket_path: impl AsRef<Path>) -> std::io::Result<UnixStream> {
    UnixStream::connect(socket_path).await
}

/// Send one request over an already-connected stream and await its
/// response. Helper for local (in-process) client code and tests; the
/// wire protocol itself places no restriction on how a client pipelines
/// requests, but the server only reads the next frame after replying, so
/// one call at a time per connection is the only supported pattern.
pub async fn call(stream: &mut UnixStream, request: IpcRequest) -> std::io::Result<IpcResponse> {
    write_frame(stream, &request).await?;
    read_frame(stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::config::ExchangeConfig;
    use crate::exchange::MessageExchange;
    use crate::identity::Identity;
    use crate::reactor::VirtualReactor;
    use crate::store::MessageStore;
    use crate::transport::FakeTransport;

    fn test_broker() -> Arc<BrokerServer> {
        let reactor = Arc::new(VirtualReactor::new());
        let transport = Arc::new(FakeTransport::new());
        let store = MessageStore::new(reactor.clone());
        let identity = Identity::new();
        let exchange = MessageExchange::new(reactor, transport, store, identity, ExchangeConfig::default());
        Arc::new(BrokerServer::new(exchange))
    }

    #[tokio::test]
    async fn ping_roundtrip_over_unix_socket_pair() {
        let broker = test_broker();
        let (mut client, server) = UnixStream::pair().unwrap();
        let server_task = tokio::spawn(async move { handle_connection(server, broker).await });

        let response = call(&mut client, IpcRequest::new("ping", serde_json::json!({})))
            .await
            .unwrap();
        assert!(matches!(response, IpcResponse::Ok { .. }));

        drop(client);
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_method_yields_protocol_error() {
        let broker = test_broker();
        let (mut client, server) = UnixStream::pair().unwrap();
        let server_task = tokio::spawn(async move { handle_connection(server, broker).await });

        let response = call(&mut client, IpcRequest::new("does-not-exist", serde_json::json!({})))
            .await
            .unwrap();
        assert!(matches!(response, IpcResponse::Err { .. }));

        drop(client);
        server_task.await.unwrap().unwrap();
    }
}
