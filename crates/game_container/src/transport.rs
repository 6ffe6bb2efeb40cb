//! Tokio TCP adapter between listening endpoints and the session layer.

use crate::config::ContainerConfig;
use crate::error::ContainerError;
use crate::facade::GameAppFactory;
use crate::meta::MetaContext;
use crate::session::TransportSink;
use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Creates a nonblocking listener with address reuse and the configured
/// backlog.
pub fn bind_listener(
    addr: SocketAddr,
    config: &ContainerConfig,
) -> Result<TcpListener, ContainerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ContainerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();

    socket
        .bind(&addr.into())
        .map_err(|e| ContainerError::Network(format!("Bind to {addr} failed: {e}")))?;
    socket
        .listen(config.listen_backlog)
        .map_err(|e| ContainerError::Network(format!("Listen on {addr} failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ContainerError::Network(format!("Nonblocking mode failed: {e}")))?;

    TcpListener::from_std(std_listener)
        .map_err(|e| ContainerError::Network(format!("Tokio listener creation failed: {e}")))
}

/// Runs the accept loop of one endpoint until `shutdown` fires.
pub(crate) fn spawn_acceptor(
    listener: TcpListener,
    meta: Arc<MetaContext>,
    factory: Arc<dyn GameAppFactory>,
    config: ContainerConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let live = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("❌ Failed to accept {} connection: {}", meta.app_type(), e);
                            continue;
                        }
                    };

                    if live.load(Ordering::Acquire) >= config.max_connections {
                        warn!(
                            "⚠️ {} connection limit ({}) reached, dropping {}",
                            meta.app_type(),
                            config.max_connections,
                            remote_addr
                        );
                        continue;
                    }
                    if config.nodelay {
                        stream.set_nodelay(true).ok();
                    }

                    live.fetch_add(1, Ordering::AcqRel);
                    let meta = Arc::clone(&meta);
                    let factory = Arc::clone(&factory);
                    let live = Arc::clone(&live);
                    let read_buffer_size = config.read_buffer_size;
                    tokio::spawn(async move {
                        handle_connection(stream, remote_addr, meta, factory, read_buffer_size).await;
                        live.fetch_sub(1, Ordering::AcqRel);
                    });
                }
                _ = shutdown.recv() => {
                    info!("🛑 {} listener stopped", meta.app_type());
                    break;
                }
            }
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    meta: Arc<MetaContext>,
    factory: Arc<dyn GameAppFactory>,
    read_buffer_size: usize,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let (close_tx, mut close_rx) = watch::channel(false);
    let mut close_signal = close_tx.subscribe();

    let sink = Arc::new(TcpSink {
        outbound: outbound_tx,
        close: close_tx,
    });
    let session = meta.accept_connection(remote_addr, sink, factory.create_filter_chain());

    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                next = outbound_rx.recv() => match next {
                    Some(bytes) => {
                        if let Err(e) = writer.write_all(&bytes).await {
                            debug!("Write to {} failed: {}", remote_addr, e);
                            return;
                        }
                    }
                    None => break,
                },
                changed = close_rx.changed() => {
                    if changed.is_err() || *close_rx.borrow() {
                        while let Ok(bytes) = outbound_rx.try_recv() {
                            if writer.write_all(&bytes).await.is_err() {
                                return;
                            }
                        }
                        break;
                    }
                }
            }
        }
        writer.shutdown().await.ok();
    });

    let mut buffer = BytesMut::with_capacity(read_buffer_size);
    loop {
        if session.is_closed() {
            break;
        }
        buffer.reserve(read_buffer_size);
        let read = tokio::select! {
            read = reader.read_buf(&mut buffer) => read,
            _ = close_signal.changed() => break,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                let data = buffer.split().freeze();
                match session.on_inbound_bytes(data) {
                    Ok(()) => {}
                    Err(ContainerError::SessionClosed(_))
                    | Err(ContainerError::RoutingFailure { .. })
                    | Err(ContainerError::ShuttingDown) => break,
                    Err(e) => debug!("Inbound data from {} dropped: {}", remote_addr, e),
                }
            }
            Err(e) => {
                debug!("Read from {} failed: {}", remote_addr, e);
                break;
            }
        }
    }

    session.on_disconnected();
    writer_task.await.ok();
    debug!("🔌 Connection {} finished", remote_addr);
}

/// Outbound half handed to the session: queued writes plus a close signal
/// observed by both the reader loop and the writer task.
struct TcpSink {
    outbound: mpsc::UnboundedSender<Bytes>,
    close: watch::Sender<bool>,
}

impl TransportSink for TcpSink {
    fn write(&self, bytes: Bytes) -> Result<(), ContainerError> {
        if *self.close.borrow() {
            return Err(ContainerError::Network("connection is closing".to_string()));
        }
        self.outbound
            .send(bytes)
            .map_err(|_| ContainerError::Network("connection writer is gone".to_string()))
    }

    fn close(&self) {
        self.close.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_listener_on_ephemeral_port() {
        let config = ContainerConfig::default();
        let listener = bind_listener("127.0.0.1:0".parse().expect("Failed to parse address"), &config)
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to read local address");
        assert_ne!(addr.port(), 0);

        let taken = bind_listener(addr, &config);
        assert!(matches!(taken, Err(ContainerError::Network(_))));
    }

    #[tokio::test]
    async fn test_sink_refuses_writes_after_close() {
        let (outbound, mut rx) = mpsc::unbounded_channel();
        let (close, _) = watch::channel(false);
        let sink = TcpSink { outbound, close };

        sink.write(Bytes::from_static(b"one")).expect("Failed to queue write");
        sink.close();
        sink.close();
        assert!(sink.write(Bytes::from_static(b"two")).is_err());
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"one")));
    }
}
