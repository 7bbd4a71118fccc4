//! Envelope-routing broker.
//!
//! One dispatch loop owns the frontend router, the route table and the
//! registry:
//! ```text
//!   clients ──► Router (frontend) ──┐
//!                                   ├──► Broker loop ──► RouteTable ──► Dealer ──► workers
//!   workers ──► Dealer events ──────┘          │
//!                                              └──► Registry (record file)
//! ```
//! Requests are classified into a closed [`RequestKind`]. Service calls are
//! forwarded verbatim: header frames first, then the payload frames. Replies
//! from workers are routed back by the identity frame the frontend stamped
//! on the request.

mod routes;

pub use routes::RouteTable;

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::{Registry, ServiceDescriptor};
use crate::transport::{ChannelId, ConnectionEvent, Endpoint, Router, TransportEvent};
use crate::types::{Config, Error, Result, ServiceId};
use crate::wire::tokens::{self, REGISTERED};
use crate::wire::{fallback_signature, Envelope, RequestKind};

#[derive(Debug)]
pub struct Broker {
    frontend: Router,
    routes: RouteTable,
    registry: Registry,
    backend_events: mpsc::Receiver<TransportEvent<ChannelId>>,
}

impl Broker {
    /// Bind the frontend, load the registry and bind every known service.
    ///
    /// Failing to bind the frontend is fatal. A stored service whose address
    /// cannot be bound is left out of the route table but stays registered.
    pub async fn bind(config: &Config, mut registry: Registry) -> Result<Self> {
        let endpoint: Endpoint = config.broker.frontend_addr.parse()?;
        let frontend = Router::bind(&endpoint, &config.transport).await?;

        registry.load()?;
        registry.log_services();

        let (tx, rx) = mpsc::channel(config.transport.channel_capacity);
        let mut routes = RouteTable::new(
            tx,
            config.transport.clone(),
            config.broker.backend_queue_limit,
        );
        for descriptor in registry.list() {
            if let Err(e) = routes.bind(&descriptor).await {
                tracing::warn!("No route for {}: {}", descriptor.id, e);
            }
        }

        tracing::info!(
            "Broker frontend at {} with {} route(s)",
            frontend.local_addr(),
            routes.len()
        );
        Ok(Self {
            frontend,
            routes,
            registry,
            backend_events: rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.frontend.local_addr()
    }

    /// Dispatch until `cancel` fires or the frontend shuts down.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Broker shutting down");
                    break;
                }
                inbound = self.frontend.recv() => match inbound {
                    Some(envelope) => self.handle_request(envelope).await,
                    None => break,
                },
                Some(event) = self.backend_events.recv() => self.handle_backend(event),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Frontend
    // =========================================================================

    async fn handle_request(&mut self, request: Envelope) {
        let kind = match RequestKind::classify(request.body()) {
            Ok(kind) => kind,
            Err(e) => {
                let signature = fallback_signature(request.body());
                let (header, _) = request.into_parts();
                self.answer(header, signature, Err(e));
                return;
            }
        };
        let signature = Bytes::copy_from_slice(kind.signature().as_bytes());

        match kind {
            RequestKind::Register(record) => {
                let outcome = self.register(&record).await.map(Bytes::from);
                self.answer(request.into_parts().0, signature, outcome);
            }
            RequestKind::Lookup(id) => {
                let outcome = self
                    .registry
                    .lookup(&id)
                    .and_then(ServiceDescriptor::encode)
                    .map(Bytes::from);
                self.answer(request.into_parts().0, signature, outcome);
            }
            RequestKind::Heartbeat => self.send_frontend(request.respond_ready()),
            RequestKind::Call { service, payload } => {
                let (header, _) = request.into_parts();
                self.forward(header, service, payload, signature);
            }
        }
    }

    /// Decode, bind, then record. A bind failure leaves the registry alone:
    /// when an existing id fails to move to a new address, its previous route
    /// and record stay in place rather than being removed.
    async fn register(&mut self, record: &[u8]) -> Result<String> {
        let descriptor = ServiceDescriptor::decode(record)?;
        if tokens::is_reserved(descriptor.id.as_str()) {
            return Err(Error::decode(format!(
                "service id {} is reserved",
                descriptor.id
            )));
        }

        self.routes.bind(&descriptor).await?;

        let id = descriptor.id.clone();
        match self.registry.register(descriptor) {
            Ok(()) => {
                tracing::info!("Registered {}", id);
                Ok(REGISTERED.to_string())
            }
            Err(Error::Persist(e)) => {
                tracing::warn!("Registered {} but the record file was not updated: {}", id, e);
                Ok(format!("{}:PersistFail {}", REGISTERED, e))
            }
            Err(e) => Err(e),
        }
    }

    fn forward(
        &mut self,
        header: Vec<Bytes>,
        service: ServiceId,
        payload: Vec<Bytes>,
        signature: Bytes,
    ) {
        let Some(dealer) = self.routes.get_mut(&service) else {
            tracing::debug!("No route for {}", service);
            self.answer(header, signature, Err(Error::invalid_service(service.to_string())));
            return;
        };

        let outbound = Envelope::with_header(header.clone(), payload);
        if let Err(e) = dealer.send(outbound) {
            tracing::warn!("Backend for {} refused envelope: {}", service, e);
            self.answer(header, signature, Err(e));
        }
    }

    /// Reply `[signature, status, payload]` behind `header`.
    fn answer(&mut self, header: Vec<Bytes>, signature: Bytes, outcome: Result<Bytes>) {
        let reply = match outcome {
            Ok(payload) => Envelope::reply(signature, None, payload),
            Err(e) => {
                tracing::debug!("Request failed: {}", e);
                Envelope::reply(signature, Some(&e.to_error_status()), Bytes::new())
            }
        };
        let (_, body) = reply.into_parts();
        self.send_frontend(Envelope::with_header(header, body));
    }

    fn send_frontend(&mut self, envelope: Envelope) {
        if let Err(e) = self.frontend.send(envelope) {
            tracing::warn!("Dropping unroutable reply: {}", e);
        }
    }

    // =========================================================================
    // Backend
    // =========================================================================

    fn handle_backend(&mut self, event: TransportEvent<ChannelId>) {
        let TransportEvent {
            source,
            conn,
            event,
        } = event;

        match event {
            ConnectionEvent::Opened(tx) => match self.routes.by_channel(source) {
                Some(dealer) => {
                    tracing::debug!("Worker {} connected at {}", conn, dealer.endpoint());
                    dealer.attach(conn, tx);
                }
                None => tracing::debug!("Ignoring connection on released channel {}", source),
            },
            ConnectionEvent::Closed => {
                if let Some(dealer) = self.routes.by_channel(source) {
                    dealer.detach(conn);
                    dealer.flush();
                }
            }
            ConnectionEvent::Envelope(reply) => {
                // The worker has taken work off its outbound channel.
                if let Some(dealer) = self.routes.by_channel(source) {
                    dealer.flush();
                }
                self.send_frontend(reply);
            }
        }
    }
}
