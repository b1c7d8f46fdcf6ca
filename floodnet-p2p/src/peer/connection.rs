//! Per-connection reader loop.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use crate::manager::ConnectionHandle;
use crate::peer::sender::run_writer;
use crate::peer::{ConnectionDirection, ConnectionId, ConnectionInfo, ReaderContext, ReaderState};
use crate::protocol::MessageCodec;
use crate::routing::RoutingEngine;

/// Read messages off one connection and route each in arrival order.
///
/// Malformed frames are logged and skipped. The loop ends on end of stream,
/// on an I/O or framing failure, when `shutdown` fires, or when the
/// connection's writer goes away (`writer_closed` resolves).
pub async fn run_reader<R>(
    id: ConnectionId,
    reader: R,
    engine: Arc<RoutingEngine>,
    mut shutdown: broadcast::Receiver<()>,
    mut writer_closed: oneshot::Receiver<()>,
) -> ReaderContext
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, MessageCodec::new());
    let mut ctx = ReaderContext::new();

    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(conn = %id, "Reader shutting down");
                break;
            }
            _ = &mut writer_closed => {
                tracing::debug!(conn = %id, "Writer gone, dropping connection");
                break;
            }
            frame = frames.next() => frame,
        };

        ctx.transition_to(ReaderState::Decoding);
        match frame {
            None => {
                tracing::debug!(conn = %id, "Peer closed connection");
                break;
            }
            Some(Err(e)) => {
                tracing::debug!(conn = %id, error = %e, "Connection read failed");
                break;
            }
            Some(Ok(Err(e))) => {
                ctx.record_rejected();
                tracing::warn!(conn = %id, error = %e, "Discarding malformed message");
            }
            Some(Ok(Ok(message))) => {
                ctx.transition_to(ReaderState::Routing);
                tracing::trace!(conn = %id, msg = %message, "Received message");
                let outcome = engine.route(id, message).await;
                tracing::trace!(conn = %id, outcome = ?outcome, "Routed message");
                ctx.record_routed();
            }
        }
        ctx.transition_to(ReaderState::AwaitingMessage);
    }

    ctx.transition_to(ReaderState::Closed);
    ctx
}

/// Register a connection and start its reader and writer.
///
/// The connection is in the registry before the first byte is read, so a
/// search arriving on it can already be answered and fanned out. When the
/// reader stops the connection is deregistered and its writer is told to
/// close after flushing. A writer still stuck after the shutdown grace
/// period is aborted along with whatever it had queued.
pub async fn spawn_connection<R, W>(
    reader: R,
    writer: W,
    addr: SocketAddr,
    direction: ConnectionDirection,
    engine: Arc<RoutingEngine>,
    shutdown: broadcast::Receiver<()>,
) -> (ConnectionId, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let registry = engine.registry().clone();
    let id = registry.next_connection_id();
    let info = ConnectionInfo::new(id, addr, direction);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(info.clone(), command_tx);

    registry.register(handle.clone()).await;
    tracing::info!(conn = %id, addr = %addr, direction = %direction, "Connection established");

    let ledger = engine.ledger().clone();
    let grace = engine.config().shutdown_grace;
    let task = tokio::spawn(async move {
        let (closed_tx, closed_rx) = oneshot::channel();
        let mut writer_task = tokio::spawn(async move {
            let result = run_writer(id, writer, command_rx, ledger).await;
            let _ = closed_tx.send(());
            result
        });

        let ctx = run_reader(id, reader, engine, shutdown, closed_rx).await;

        registry.deregister(id).await;
        let _ = handle.disconnect();
        drop(handle);

        match tokio::time::timeout(grace, &mut writer_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::debug!(conn = %id, error = %e, "Writer ended with error"),
            Ok(Err(e)) => tracing::warn!(conn = %id, error = %e, "Writer task failed"),
            Err(_) => {
                tracing::warn!(conn = %id, "Writer did not drain in time, dropping pending sends");
                writer_task.abort();
            }
        }

        tracing::info!(
            conn = %id,
            addr = %info.addr,
            routed = ctx.messages_routed,
            rejected = ctx.messages_rejected,
            duration = ?info.connection_duration(),
            "Connection closed"
        );
    });

    (id, task)
}
