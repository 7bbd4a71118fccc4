//! Client-side service resolution with a local descriptor cache.
//!
//! Lookups hit the cache first. A miss asks the directory, and the answer is
//! written through to the cache file so the next process start already knows
//! it.

use bytes::Bytes;

use crate::client::RequestClient;
use crate::registry::{Registry, ServiceDescriptor};
use crate::transport::Endpoint;
use crate::types::{Error, Result, ServiceId};

#[derive(Debug)]
pub struct ServiceResolver {
    directory: Endpoint,
    cache: Registry,
    client: RequestClient,
}

impl ServiceResolver {
    /// Resolver over a preloaded cache registry.
    pub fn new(directory: Endpoint, cache: Registry, client: RequestClient) -> Self {
        Self {
            directory,
            cache,
            client,
        }
    }

    pub fn cache(&self) -> &Registry {
        &self.cache
    }

    /// Descriptor for `service`, from cache or from the directory.
    pub async fn resolve(&mut self, service: &str) -> Result<ServiceDescriptor> {
        let id = ServiceId::from_string(service.to_string()).map_err(Error::validation)?;
        if let Ok(cached) = self.cache.lookup(&id) {
            tracing::debug!("Resolved {} from cache: {}", id, cached.address);
            return Ok(cached.clone());
        }

        let descriptor = self.client.lookup(&self.directory, service).await?;
        if descriptor.id != id {
            return Err(Error::protocol(format!(
                "directory answered {} for lookup of {}",
                descriptor.id, id
            )));
        }

        match self.cache.register(descriptor.clone()) {
            Ok(()) => {}
            Err(Error::Persist(e)) => tracing::warn!("Service cache not saved: {}", e),
            Err(e) => return Err(e),
        }
        tracing::info!("Resolved {} via directory: {}", id, descriptor.address);
        Ok(descriptor)
    }

    /// Resolve `service` and call it directly.
    pub async fn call(&mut self, service: &str, payload: Vec<Bytes>) -> Result<Vec<Bytes>> {
        let descriptor = self.resolve(service).await?;
        self.client.call(&descriptor, payload).await
    }
}
