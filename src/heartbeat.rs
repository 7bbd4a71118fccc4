//! Liveness probe.
//!
//! A probe sends the single-frame heartbeat marker to a service address and
//! expects the ready marker back within the heartbeat policy. It runs on
//! demand (at lookup time); there is no background timer.

use crate::client::RequestClient;
use crate::registry::{HeartbeatState, ServiceDescriptor};
use crate::transport::Endpoint;

#[derive(Debug, Clone, Default)]
pub struct HeartbeatVerifier {
    client: RequestClient,
}

impl HeartbeatVerifier {
    pub fn new(client: RequestClient) -> Self {
        Self { client }
    }

    /// Probe `endpoint` once under the heartbeat policy.
    pub async fn probe(&self, endpoint: &Endpoint) -> HeartbeatState {
        match self.client.heartbeat(endpoint).await {
            Ok(()) => HeartbeatState::alive_now(),
            Err(e) => {
                tracing::warn!("Heartbeat to {} failed: {}", endpoint, e);
                HeartbeatState::Failed(e.to_string())
            }
        }
    }

    /// Probe a descriptor's address and record the outcome on it.
    pub async fn check(&self, descriptor: &mut ServiceDescriptor) -> HeartbeatState {
        let state = match descriptor.endpoint() {
            Ok(endpoint) => self.probe(&endpoint).await,
            Err(e) => HeartbeatState::Failed(e.to_string()),
        };
        descriptor.heartbeat_state = state.to_wire();
        state
    }
}
