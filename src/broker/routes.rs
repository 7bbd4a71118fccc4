//! Service id to backend channel mapping.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::registry::ServiceDescriptor;
use crate::transport::{ChannelId, Dealer, Endpoint, TransportEvent};
use crate::types::{Error, Result, ServiceId, TransportConfig};

/// Live backend channels, one per bound service.
#[derive(Debug)]
pub struct RouteTable {
    routes: HashMap<ServiceId, Dealer>,
    next_channel: ChannelId,
    events: mpsc::Sender<TransportEvent<ChannelId>>,
    transport: TransportConfig,
    queue_limit: usize,
}

impl RouteTable {
    pub fn new(
        events: mpsc::Sender<TransportEvent<ChannelId>>,
        transport: TransportConfig,
        queue_limit: usize,
    ) -> Self {
        Self {
            routes: HashMap::new(),
            next_channel: 1,
            events,
            transport,
            queue_limit,
        }
    }

    /// Ensure a backend channel is bound at the descriptor's address.
    ///
    /// An unchanged address keeps the live channel and its connected
    /// workers. A new address binds first; the old channel is only dropped
    /// once the new bind succeeded.
    pub async fn bind(&mut self, descriptor: &ServiceDescriptor) -> Result<&Dealer> {
        let endpoint: Endpoint = descriptor.endpoint()?;
        let reuse = self
            .routes
            .get(&descriptor.id)
            .is_some_and(|dealer| dealer.endpoint() == &endpoint);

        if !reuse {
            let channel = self.next_channel;
            self.next_channel += 1;
            let dealer = Dealer::bind(
                channel,
                &endpoint,
                self.events.clone(),
                &self.transport,
                self.queue_limit,
            )
            .await?;
            tracing::info!(
                "Bound backend for {} at {} ({})",
                descriptor.id,
                endpoint,
                dealer.local_addr()
            );
            if let Some(old) = self.routes.insert(descriptor.id.clone(), dealer) {
                tracing::info!(
                    "Released previous backend for {} at {}",
                    descriptor.id,
                    old.endpoint()
                );
            }
        }

        self.routes
            .get(&descriptor.id)
            .ok_or_else(|| Error::internal("route vanished after bind"))
    }

    pub fn get_mut(&mut self, id: &ServiceId) -> Option<&mut Dealer> {
        self.routes.get_mut(id)
    }

    /// Route for the channel an event came from. Events from a replaced
    /// channel find nothing.
    pub fn by_channel(&mut self, channel: ChannelId) -> Option<&mut Dealer> {
        self.routes
            .values_mut()
            .find(|dealer| dealer.channel() == channel)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
