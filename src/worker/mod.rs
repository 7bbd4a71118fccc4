//! Worker harness.
//!
//! A worker serves one service id. It registers once at startup and then
//! answers requests with `[reply signature, "", reply]`, echoing the header
//! section, and answers heartbeat probes with the ready marker.
//!
//! Two topologies:
//! - [`ServeMode::Bound`]: the worker binds its own address and registers with
//!   a directory. Requests arrive as `[service id, payload...]`.
//! - [`ServeMode::Dialed`]: the worker registers with a broker, which binds
//!   the address; the worker dials in. Requests arrive as payload frames only.

mod handlers;

pub use handlers::{builtin, HelloHandler, ServiceHandler, TimeHandler};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::client::RequestClient;
use crate::registry::ServiceDescriptor;
use crate::transport::{Endpoint, Router};
use crate::types::{Error, Result, TransportConfig};
use crate::wire::codec::{read_envelope, write_envelope};
use crate::wire::tokens::REGISTERED;
use crate::wire::{Envelope, FrameLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
    /// Bind the descriptor's address.
    Bound,
    /// Dial the descriptor's address, bound by a broker.
    Dialed,
}

#[derive(Debug, Clone)]
pub struct Worker {
    descriptor: ServiceDescriptor,
    handler: Arc<dyn ServiceHandler>,
    client: RequestClient,
    transport: TransportConfig,
    reconnect_interval: Duration,
}

impl Worker {
    pub fn new(
        descriptor: ServiceDescriptor,
        handler: Arc<dyn ServiceHandler>,
        client: RequestClient,
        transport: TransportConfig,
    ) -> Self {
        let reconnect_interval = client.request_policy().reconnect_interval;
        Self {
            descriptor,
            handler,
            client,
            transport,
            reconnect_interval,
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Register, then serve until `cancel` fires.
    pub async fn run(
        &self,
        registrar: &Endpoint,
        mode: ServeMode,
        cancel: CancellationToken,
    ) -> Result<()> {
        match mode {
            ServeMode::Bound => {
                let router = self.listen().await?;
                self.register(registrar).await?;
                self.serve_bound(router, cancel).await
            }
            ServeMode::Dialed => {
                self.register(registrar).await?;
                self.serve_dialed(cancel).await
            }
        }
    }

    /// Announce the descriptor to a broker or directory.
    pub async fn register(&self, registrar: &Endpoint) -> Result<()> {
        let ack = self.client.register(registrar, &self.descriptor).await?;
        if !ack.starts_with(REGISTERED) {
            return Err(Error::protocol(format!("unexpected registration reply {:?}", ack)));
        }
        if ack.len() > REGISTERED.len() {
            tracing::warn!("Registered {} with warning: {}", self.descriptor.id, ack);
        } else {
            tracing::info!("Registered {} at {}", self.descriptor.id, registrar);
        }
        Ok(())
    }

    // =========================================================================
    // Bound mode
    // =========================================================================

    pub async fn listen(&self) -> Result<Router> {
        Router::bind(&self.descriptor.endpoint()?, &self.transport).await
    }

    pub async fn serve_bound(&self, mut router: Router, cancel: CancellationToken) -> Result<()> {
        tracing::info!("Serving {} at {}", self.descriptor.id, router.local_addr());
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                inbound = router.recv() => match inbound {
                    Some(request) => request,
                    None => return Ok(()),
                },
            };
            let reply = self.respond(&request, ServeMode::Bound).await;
            if let Err(e) = router.send(reply) {
                tracing::warn!("Dropping reply: {}", e);
            }
        }
    }

    // =========================================================================
    // Dialed mode
    // =========================================================================

    /// Keep one connection to the broker-bound address, reconnecting after
    /// every disconnect.
    pub async fn serve_dialed(&self, cancel: CancellationToken) -> Result<()> {
        let endpoint = self.descriptor.endpoint()?;
        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                stream = self.connect(&endpoint) => stream,
            };
            tracing::info!("Serving {} via {}", self.descriptor.id, endpoint);

            match self.serve_connection(stream, &cancel).await {
                Ok(()) => tracing::info!("Connection to {} closed", endpoint),
                Err(e) => tracing::warn!("Connection to {} failed: {}", endpoint, e),
            }
            if cancel.is_cancelled() {
                return Ok(());
            }
            tokio::time::sleep(self.reconnect_interval).await;
        }
    }

    async fn connect(&self, endpoint: &Endpoint) -> TcpStream {
        loop {
            match TcpStream::connect(endpoint.connect_addr()).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("TCP_NODELAY not set: {}", e);
                    }
                    return stream;
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", endpoint, e);
                    tokio::time::sleep(self.reconnect_interval).await;
                }
            }
        }
    }

    async fn serve_connection(
        &self,
        mut stream: TcpStream,
        cancel: &CancellationToken,
    ) -> std::io::Result<()> {
        let limits = FrameLimits::from(&self.transport);
        loop {
            let inbound = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                inbound = read_envelope(&mut stream, limits) => inbound?,
            };
            let Some(request) = inbound else {
                return Ok(());
            };
            let reply = self.respond(&request, ServeMode::Dialed).await;
            write_envelope(&mut stream, &reply).await?;
        }
    }

    // =========================================================================
    // Request handling
    // =========================================================================

    async fn respond(&self, request: &Envelope, mode: ServeMode) -> Envelope {
        if request.is_heartbeat() {
            return request.respond_ready();
        }

        let own = Bytes::copy_from_slice(self.descriptor.reply.as_bytes());
        let (signature, outcome) = match mode {
            ServeMode::Dialed => (own, self.handler.handle(request.body()).await),
            ServeMode::Bound => match request.body().split_first() {
                Some((sid, payload)) if sid.as_ref() == self.descriptor.id.as_bytes() => {
                    (own, self.handler.handle(payload).await)
                }
                Some((sid, _)) => (
                    sid.clone(),
                    Err(Error::invalid_service(String::from_utf8_lossy(sid))),
                ),
                None => (own, Err(Error::decode("empty request"))),
            },
        };

        let reply = match outcome {
            Ok(payload) => Envelope::reply(signature, None, payload),
            Err(e) => {
                tracing::debug!("{} failed a request: {}", self.descriptor.id, e);
                Envelope::reply(signature, Some(&e.to_error_status()), Bytes::new())
            }
        };
        request.respond(reply.into_parts().1)
    }
}
