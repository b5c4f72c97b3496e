//! Inbound listener, bound to every locally configured address.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use ringcast_core::wire::Packet;
use ringcast_core::SyncAddress;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionKind, ConnectionRegistry, OutboundMessage};
use crate::shutdown::ShutdownController;

/// An inbound connection that has been accepted and framed, not yet
/// authenticated. The caller reads the first packet (expected to be a
/// `HELLO`) before handing the connection off to a sync session.
pub struct AcceptedConnection {
    pub inbound: mpsc::Receiver<Packet>,
    pub registry_handle: Arc<crate::connection::ConnectionHandle>,
}

/// Binds a listener on `addr` and accepts connections until the shutdown
/// signal fires, registering each one in `registry` and handing its first
/// decoded packets to `on_accept`.
pub async fn serve(
    addr: &SyncAddress,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
    connection: ConnectionConfig,
    on_accept: mpsc::Sender<AcceptedConnection>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr.to_string()).await?;
    info!(%addr, "listening for peer connections");

    let mut shutdown_rx = shutdown.shutdown_receiver();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                debug!(%peer_addr, "accepted connection");

                let codec = FrameCodec::new(connection.compression_threshold_bytes);
                let framed = Framed::new(stream, codec);
                let (handle, mut outbound_rx) = registry.register(None, ConnectionKind::Inbound, connection.outbound_channel_capacity);
                let (inbound_tx, inbound_rx) = mpsc::channel(connection.outbound_channel_capacity);

                tokio::spawn(async move {
                    let (mut sink, mut stream) = framed.split();
                    let writer = async {
                        while let Some(msg) = outbound_rx.recv().await {
                            match msg {
                                OutboundMessage::Frame(bytes) => {
                                    if sink.send(bytes.as_slice()).await.is_err() {
                                        break;
                                    }
                                }
                                OutboundMessage::Close => break,
                            }
                        }
                    };
                    let reader = async {
                        while let Some(frame) = stream.next().await {
                            let Ok(bytes) = frame else { break };
                            let Ok(packet) = rmp_serde::from_slice::<Packet>(&bytes) else {
                                debug!("dropping malformed frame from inbound connection");
                                continue;
                            };
                            if inbound_tx.send(packet).await.is_err() {
                                break;
                            }
                        }
                    };
                    tokio::select! {
                        _ = writer => {}
                        _ = reader => {}
                    }
                });

                let accepted = AcceptedConnection { inbound: inbound_rx, registry_handle: handle };
                if on_accept.send(accepted).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!(%addr, "listener shutting down");
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serve_binds_and_accepts_one_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Arc::new(ShutdownController::new());
        let addr = SyncAddress::new("127.0.0.1", 0);
        let (tx, mut rx) = mpsc::channel(4);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bound_port = listener.local_addr().unwrap().port();
        drop(listener);

        let bound_addr = SyncAddress::new("127.0.0.1", bound_port);
        let registry_clone = Arc::clone(&registry);
        let shutdown_clone = Arc::clone(&shutdown);
        let server = tokio::spawn(async move {
            serve(&bound_addr, registry_clone, shutdown_clone, ConnectionConfig::default(), tx).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _client = tokio::net::TcpStream::connect(("127.0.0.1", bound_port)).await.unwrap();

        let accepted = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("accept within timeout");
        assert!(accepted.is_some());

        shutdown.trigger_shutdown();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), server).await;
        let _ = addr;
    }
}
