//! Per-connection sender.
//!
//! Each connection has exactly one writer task draining a command queue, so
//! messages queued concurrently by different readers are written whole and
//! in enqueue order. The TTL gate lives here rather than in the router: a
//! message fanned out to several connections after one decrement is checked
//! again at the moment it would hit the wire.

use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;

use crate::error::P2pResult;
use crate::peer::ConnectionId;
use crate::protocol::{Message, MessageCodec};
use crate::routing::LocalSearchLedger;

/// Commands accepted by a connection's writer.
#[derive(Debug, Clone)]
pub enum PeerCommand {
    /// Transmit a message.
    Send(Message),
    /// Close the connection after everything queued before this.
    Disconnect,
}

/// Write one message if its hop budget allows. Returns whether it was sent.
async fn transmit<W>(
    id: ConnectionId,
    sink: &mut FramedWrite<W, MessageCodec>,
    message: Message,
    ledger: &LocalSearchLedger,
) -> P2pResult<bool>
where
    W: AsyncWrite + Unpin,
{
    if message.ttl() < 1 {
        tracing::trace!(conn = %id, msg = %message, "TTL exhausted, not transmitting");
        return Ok(false);
    }

    let search = match &message {
        Message::Search(search) => Some((*search.header().id(), search.query().to_string())),
        Message::Response(_) => None,
    };

    tracing::trace!(conn = %id, msg = %message, "Sending message");
    sink.send(message).await?;

    if let Some((search_id, query)) = search {
        ledger.record_query_text(search_id, &query).await;
    }
    Ok(true)
}

/// Drain a connection's command queue onto the wire.
///
/// Returns when asked to disconnect, when every sender is gone, or on the
/// first write failure.
pub async fn run_writer<W>(
    id: ConnectionId,
    writer: W,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    ledger: Arc<LocalSearchLedger>,
) -> P2pResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, MessageCodec::new());

    while let Some(command) = commands.recv().await {
        match command {
            PeerCommand::Send(message) => {
                if let Err(e) = transmit(id, &mut sink, message, &ledger).await {
                    tracing::debug!(conn = %id, error = %e, "Write failed, closing writer");
                    return Err(e);
                }
            }
            PeerCommand::Disconnect => {
                tracing::debug!(conn = %id, "Writer disconnecting");
                break;
            }
        }
    }

    sink.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Header, MessageId, Response, RoutingService, Search};
    use futures::StreamExt;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio_util::codec::FramedRead;

    fn search(ttl: u8, query: &str) -> Search {
        let header = Header::new(MessageId::random(), ttl, RoutingService::BreadthFirst);
        Search::new(header, query).unwrap()
    }

    fn response(ttl: u8) -> Response {
        let header = Header::new(MessageId::random(), ttl, RoutingService::BreadthFirst);
        Response::new(header, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5001)).unwrap()
    }

    async fn drain(reader: tokio::io::DuplexStream) -> Vec<Message> {
        let mut frames = FramedRead::new(reader, MessageCodec::new());
        let mut messages = Vec::new();
        while let Some(frame) = frames.next().await {
            messages.push(frame.unwrap().unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn test_writes_in_enqueue_order() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Arc::new(LocalSearchLedger::new());

        let first = search(3, "alpha");
        let second = response(3);
        let third = search(3, "gamma");
        tx.send(PeerCommand::Send(first.clone().into())).unwrap();
        tx.send(PeerCommand::Send(second.clone().into())).unwrap();
        tx.send(PeerCommand::Send(third.clone().into())).unwrap();
        tx.send(PeerCommand::Disconnect).unwrap();

        run_writer(ConnectionId::new(1), client, rx, ledger).await.unwrap();

        let received = drain(server).await;
        assert_eq!(
            received,
            vec![first.into(), second.into(), Message::from(third)]
        );
    }

    #[tokio::test]
    async fn test_ttl_zero_not_transmitted() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Arc::new(LocalSearchLedger::new());

        let exhausted = search(0, "dead");
        let alive = search(1, "alive");
        tx.send(PeerCommand::Send(exhausted.clone().into())).unwrap();
        tx.send(PeerCommand::Send(response(0).into())).unwrap();
        tx.send(PeerCommand::Send(alive.clone().into())).unwrap();
        drop(tx);

        run_writer(ConnectionId::new(1), client, rx, ledger.clone())
            .await
            .unwrap();

        assert_eq!(drain(server).await, vec![Message::from(alive.clone())]);

        // Only transmitted searches are recorded
        assert!(ledger.query_text(exhausted.header().id()).await.is_none());
        assert_eq!(
            ledger.query_text(alive.header().id()).await.as_deref(),
            Some("alive")
        );
    }

    #[tokio::test]
    async fn test_write_failure_ends_writer() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(PeerCommand::Send(search(3, "bob").into())).unwrap();

        let result = run_writer(
            ConnectionId::new(1),
            client,
            rx,
            Arc::new(LocalSearchLedger::new()),
        )
        .await;
        assert!(result.is_err());
    }
}
