//! Directory service.
//!
//! A standalone registry host. Workers register their own bound address
//! here; clients look a service up and then call it directly. Every lookup
//! of a registered service first probes it, and a service that fails the
//! probe is reported `Unavailable` instead of being handed out.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::heartbeat::HeartbeatVerifier;
use crate::registry::{HeartbeatState, Registry, ServiceDescriptor};
use crate::transport::{Endpoint, Router};
use crate::types::{Config, Error, Result, ServiceId};
use crate::wire::tokens::{LOOKUP, REGISTER, REGISTERED};
use crate::wire::{fallback_signature, Envelope, ErrorCode, ErrorStatus, RequestKind};

/// Bootstrap entries naming the directory's own control endpoints.
pub fn bootstrap_entries(advertised: &str) -> Result<Vec<ServiceDescriptor>> {
    [(LOOKUP, "Directory Lookup"), (REGISTER, "Directory Registration")]
        .into_iter()
        .map(|(token, name)| {
            let id = ServiceId::from_string(token.to_string()).map_err(Error::validation)?;
            let descriptor = ServiceDescriptor::new(id, name, advertised, token);
            descriptor.endpoint()?;
            Ok(descriptor)
        })
        .collect()
}

#[derive(Debug)]
pub struct Directory {
    frontend: Router,
    registry: Registry,
    verifier: HeartbeatVerifier,
}

impl Directory {
    /// Pin the bootstrap entries, load the record file and bind.
    pub async fn bind(
        config: &Config,
        mut registry: Registry,
        verifier: HeartbeatVerifier,
    ) -> Result<Self> {
        for entry in bootstrap_entries(&config.directory.advertised_addr)? {
            registry.pin(entry);
        }
        registry.load()?;

        let endpoint: Endpoint = config.directory.bind_addr.parse()?;
        let frontend = Router::bind(&endpoint, &config.transport).await?;
        tracing::info!(
            "Directory at {} with {} service(s)",
            frontend.local_addr(),
            registry.len()
        );
        registry.log_services();

        Ok(Self {
            frontend,
            registry,
            verifier,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.frontend.local_addr()
    }

    /// Dispatch until `cancel` fires. Lookups block the loop for the
    /// duration of their heartbeat probe.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Directory shutting down");
                    break;
                }
                inbound = self.frontend.recv() => match inbound {
                    Some(request) => {
                        let reply = self.handle(&request).await;
                        if let Err(e) = self.frontend.send(reply) {
                            tracing::warn!("Dropping unroutable reply: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }

    async fn handle(&mut self, request: &Envelope) -> Envelope {
        let kind = match RequestKind::classify(request.body()) {
            Ok(kind) => kind,
            Err(e) => return reply(request, fallback_signature(request.body()), Err(e)),
        };
        let signature = Bytes::copy_from_slice(kind.signature().as_bytes());

        let outcome = match kind {
            RequestKind::Heartbeat => return request.respond_ready(),
            RequestKind::Register(record) => match self.registry.register_encoded(&record) {
                Ok(descriptor) => {
                    tracing::info!("Registered {} at {}", descriptor.id, descriptor.address);
                    Ok(Bytes::from_static(REGISTERED.as_bytes()))
                }
                Err(Error::Persist(e)) => {
                    tracing::warn!("Registration kept in memory only: {}", e);
                    Ok(Bytes::from(format!("{}:PersistFail {}", REGISTERED, e)))
                }
                Err(e) => Err(e),
            },
            RequestKind::Lookup(id) => self.lookup(&id).await,
            RequestKind::Call { service, .. } => Err(Error::invalid_service(service.to_string())),
        };
        reply(request, signature, outcome)
    }

    /// Heartbeat-gated lookup. Pinned entries are the directory itself and
    /// are answered without a probe.
    async fn lookup(&mut self, id: &ServiceId) -> Result<Bytes> {
        let mut descriptor = self.registry.lookup(id)?.clone();
        if !self.registry.is_pinned(id) {
            let state = self.verifier.check(&mut descriptor).await;
            self.registry.update_heartbeat(id, &state)?;
            if let HeartbeatState::Failed(reason) = state {
                return Err(Error::ServiceUnavailable(ErrorStatus::new(
                    ErrorCode::Unavailable,
                    reason,
                )));
            }
        }
        Ok(Bytes::from(descriptor.encode()?))
    }
}

fn reply(request: &Envelope, signature: Bytes, outcome: Result<Bytes>) -> Envelope {
    let reply = match outcome {
        Ok(payload) => Envelope::reply(signature, None, payload),
        Err(e) => Envelope::reply(signature, Some(&e.to_error_status()), Bytes::new()),
    };
    request.respond(reply.into_parts().1)
}
