//! Bound backend channel.
//!
//! The broker binds one dealer per registered service at the service's own
//! address; workers dial in. Envelopes go round-robin to connected workers
//! and wait in a bounded queue while none is connected.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::transport::connection::{spawn_accept_loop, ConnectionId, TransportEvent};
use crate::transport::Endpoint;
use crate::types::{Error, Result, TransportConfig};
use crate::wire::{Envelope, ErrorCode, ErrorStatus};

/// Identifies one bind of a backend channel. A re-registration that moves a
/// service gets a new channel id, so events from the old bind can be told
/// apart.
pub type ChannelId = u64;

#[derive(Debug)]
pub struct Dealer {
    channel: ChannelId,
    endpoint: Endpoint,
    local_addr: SocketAddr,
    peers: Vec<(ConnectionId, mpsc::Sender<Envelope>)>,
    next: usize,
    pending: VecDeque<Envelope>,
    queue_limit: usize,
    cancel: CancellationToken,
}

impl Dealer {
    /// Bind `endpoint`; connection events are reported on `events` tagged
    /// with `channel`.
    pub async fn bind(
        channel: ChannelId,
        endpoint: &Endpoint,
        events: mpsc::Sender<TransportEvent<ChannelId>>,
        config: &TransportConfig,
        queue_limit: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.bind_addr())
            .await
            .map_err(|e| Error::bind(format!("{}: {}", endpoint, e)))?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        spawn_accept_loop(listener, channel, events, config.clone(), cancel.clone());

        Ok(Self {
            channel,
            endpoint: endpoint.clone(),
            local_addr,
            peers: Vec::new(),
            next: 0,
            pending: VecDeque::new(),
            queue_limit,
            cancel,
        })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// A worker connected. Queued envelopes drain to it first.
    pub fn attach(&mut self, conn: ConnectionId, tx: mpsc::Sender<Envelope>) {
        self.peers.push((conn, tx));
        self.flush();
    }

    pub fn detach(&mut self, conn: ConnectionId) {
        self.peers.retain(|(id, _)| *id != conn);
    }

    /// Hand an envelope to the next worker in turn, or queue it behind
    /// anything already waiting.
    pub fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.flush();
        let envelope = if self.pending.is_empty() {
            match self.dispatch(envelope) {
                Ok(()) => return Ok(()),
                Err(returned) => returned,
            }
        } else {
            envelope
        };

        if self.pending.len() >= self.queue_limit {
            return Err(Error::ServiceUnavailable(ErrorStatus::new(
                ErrorCode::Unavailable,
                format!("no worker connected at {} and queue is full", self.endpoint),
            )));
        }
        self.pending.push_back(envelope);
        Ok(())
    }

    /// Move queued envelopes to workers, oldest first, until every worker's
    /// outbound channel is full. Returns how many were handed over.
    pub fn flush(&mut self) -> usize {
        let mut moved = 0;
        while let Some(envelope) = self.pending.pop_front() {
            if let Err(returned) = self.dispatch(envelope) {
                self.pending.push_front(returned);
                break;
            }
            moved += 1;
        }
        moved
    }

    /// Try each connected worker once, starting at the round-robin cursor.
    /// Workers whose connection is gone are dropped along the way.
    fn dispatch(&mut self, envelope: Envelope) -> std::result::Result<(), Envelope> {
        let mut envelope = envelope;
        let mut tries = self.peers.len();
        while tries > 0 && !self.peers.is_empty() {
            tries -= 1;
            let index = self.next % self.peers.len();
            self.next = self.next.wrapping_add(1);
            match self.peers[index].1.try_send(envelope) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => envelope = returned,
                Err(TrySendError::Closed(returned)) => {
                    self.peers.remove(index);
                    envelope = returned;
                }
            }
        }
        Err(envelope)
    }
}

impl Drop for Dealer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
