//! Accept loop and per-connection reader/writer tasks.
//!
//! Connection tasks never interpret envelopes. They move whole envelopes
//! between the socket and the owning dispatch loop, which receives a
//! [`TransportEvent`] for every open, envelope, and close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::TransportConfig;
use crate::wire::codec::{read_envelope, write_envelope};
use crate::wire::{Envelope, FrameLimits};

/// Process-unique connection identifier.
pub type ConnectionId = u64;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed)
}

/// Identity frame for a connection.
pub fn encode_identity(conn: ConnectionId) -> Bytes {
    Bytes::copy_from_slice(&conn.to_be_bytes())
}

pub fn decode_identity(frame: &[u8]) -> Option<ConnectionId> {
    let bytes: [u8; 8] = frame.try_into().ok()?;
    Some(ConnectionId::from_be_bytes(bytes))
}

#[derive(Debug)]
pub enum ConnectionEvent {
    /// Connection accepted; envelopes sent on this sender are written to it.
    Opened(mpsc::Sender<Envelope>),
    /// One complete inbound envelope.
    Envelope(Envelope),
    /// Peer closed or the connection failed.
    Closed,
}

/// Event delivered to a dispatch loop, tagged with the socket it came from.
#[derive(Debug)]
pub struct TransportEvent<S> {
    pub source: S,
    pub conn: ConnectionId,
    pub event: ConnectionEvent,
}

/// Accept connections until `cancel` fires.
pub(crate) fn spawn_accept_loop<S>(
    listener: TcpListener,
    source: S,
    events: mpsc::Sender<TransportEvent<S>>,
    config: TransportConfig,
    cancel: CancellationToken,
) where
    S: Clone + Send + std::fmt::Debug + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Accept loop for {:?} shutting down", source);
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept on {:?} failed: {}", source, e);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };
                    tracing::debug!("Connection from {} on {:?}", peer, source);
                    spawn_connection(
                        stream,
                        source.clone(),
                        events.clone(),
                        config.clone(),
                        cancel.child_token(),
                    );
                }
            }
        }
    });
}

/// Drive one accepted (or dialed) connection until it closes.
pub(crate) fn spawn_connection<S>(
    stream: TcpStream,
    source: S,
    events: mpsc::Sender<TransportEvent<S>>,
    config: TransportConfig,
    cancel: CancellationToken,
) -> ConnectionId
where
    S: Clone + Send + std::fmt::Debug + 'static,
{
    let conn = next_connection_id();
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, conn, source.clone(), events, config, cancel).await {
            tracing::warn!("Connection {} on {:?} error: {}", conn, source, e);
        }
    });
    conn
}

async fn handle_connection<S>(
    stream: TcpStream,
    conn: ConnectionId,
    source: S,
    events: mpsc::Sender<TransportEvent<S>>,
    config: TransportConfig,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    S: Clone + Send + 'static,
{
    let (mut reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel(config.channel_capacity);

    let opened = TransportEvent {
        source: source.clone(),
        conn,
        event: ConnectionEvent::Opened(out_tx),
    };
    if events.send(opened).await.is_err() {
        return Ok(()); // dispatch loop is gone
    }

    let writer_task = tokio::spawn(write_loop(
        writer,
        out_rx,
        config.write_timeout,
        cancel.clone(),
    ));

    let limits = FrameLimits::from(&config);
    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            read = read_envelope(&mut reader, limits) => match read {
                Ok(Some(envelope)) => {
                    let event = TransportEvent {
                        source: source.clone(),
                        conn,
                        event: ConnectionEvent::Envelope(envelope),
                    };
                    if events.send(event).await.is_err() {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()), // clean EOF
                Err(e) => break Err(e),
            },
        }
    };

    let closed = TransportEvent {
        source,
        conn,
        event: ConnectionEvent::Closed,
    };
    let _ = events.send(closed).await;
    writer_task.abort();
    result
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Envelope>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        if let Err(e) = timed_write(&mut writer, &envelope, timeout).await {
            tracing::warn!("Dropping connection after failed write: {}", e);
            cancel.cancel();
            break;
        }
    }
}

/// Write an envelope with a timeout. Returns an error if the write takes too
/// long (prevents slow consumers from holding connections indefinitely).
pub(crate) async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_envelope(writer, envelope))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({}ms), dropping connection", timeout.as_millis());
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
