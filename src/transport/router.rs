//! Many-to-many frontend socket.
//!
//! Every inbound envelope gets the originating connection's identity pushed
//! onto its header section; [`Router::send`] pops that identity to pick the
//! connection. Callers never track client identities themselves, they only
//! carry the header section along.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::transport::connection::{
    decode_identity, encode_identity, spawn_accept_loop, ConnectionEvent, ConnectionId,
    TransportEvent,
};
use crate::transport::Endpoint;
use crate::types::{Error, Result, TransportConfig};
use crate::wire::Envelope;

#[derive(Debug, Clone, Copy)]
struct Frontend;

#[derive(Debug)]
pub struct Router {
    local_addr: SocketAddr,
    events: mpsc::Receiver<TransportEvent<Frontend>>,
    peers: HashMap<ConnectionId, mpsc::Sender<Envelope>>,
    cancel: CancellationToken,
}

impl Router {
    /// Bind the endpoint and start accepting connections.
    pub async fn bind(endpoint: &Endpoint, config: &TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.bind_addr())
            .await
            .map_err(|e| Error::bind(format!("{}: {}", endpoint, e)))?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let cancel = CancellationToken::new();
        spawn_accept_loop(listener, Frontend, tx, config.clone(), cancel.clone());

        tracing::info!("Router bound at {} ({})", endpoint, local_addr);
        Ok(Self {
            local_addr,
            events: rx,
            peers: HashMap::new(),
            cancel,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next inbound envelope, identity frame first in its header.
    ///
    /// Cancel-safe: connection bookkeeping happens between awaits, so
    /// dropping the future inside `select!` loses nothing.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let TransportEvent { conn, event, .. } = self.events.recv().await?;
            match event {
                ConnectionEvent::Opened(tx) => {
                    self.peers.insert(conn, tx);
                }
                ConnectionEvent::Envelope(mut envelope) => {
                    envelope.push_identity(encode_identity(conn));
                    return Some(envelope);
                }
                ConnectionEvent::Closed => {
                    self.peers.remove(&conn);
                }
            }
        }
    }

    /// Route an envelope to the connection named by its leading identity frame.
    ///
    /// Never blocks: a peer whose outbound queue is full is reported as an
    /// error rather than stalling the dispatch loop.
    pub fn send(&mut self, mut envelope: Envelope) -> Result<()> {
        let identity = envelope
            .pop_identity()
            .ok_or_else(|| Error::protocol("envelope has no identity frame"))?;
        let conn = decode_identity(&identity)
            .ok_or_else(|| Error::protocol("malformed identity frame"))?;
        let peer = self
            .peers
            .get(&conn)
            .ok_or_else(|| Error::not_found(format!("connection {} is gone", conn)))?;

        match peer.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::internal(format!(
                "outbound queue for connection {} is full",
                conn
            ))),
            Err(TrySendError::Closed(_)) => {
                self.peers.remove(&conn);
                Err(Error::not_found(format!("connection {} is gone", conn)))
            }
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
