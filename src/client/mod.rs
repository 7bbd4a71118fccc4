//! Resilient request client.
//!
//! Every request runs under a [`RetryPolicy`]: a bounded number of attempts,
//! each with its own deadline. An attempt that times out throws its channel
//! away; the next attempt opens a fresh one, so a reply that straggles in
//! late can never be mistaken for the answer to a later attempt.

mod resolver;

pub use resolver::ServiceResolver;

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::registry::ServiceDescriptor;
use crate::transport::{Endpoint, Requester};
use crate::types::{ClientConfig, Error, Result};
use crate::wire::tokens::{LOOKUP, REGISTER};
use crate::wire::{Envelope, ErrorStatus, FrameLimits};

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry with a per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up. Zero behaves like one.
    pub attempts: u32,
    /// Deadline for one attempt, connect included.
    pub timeout: Duration,
    /// Pause between connect attempts inside one deadline.
    pub reconnect_interval: Duration,
}

impl RetryPolicy {
    /// Policy for ordinary requests.
    pub fn request(config: &ClientConfig) -> Self {
        Self {
            attempts: config.request_retries,
            timeout: config.request_timeout,
            reconnect_interval: config.reconnect_interval,
        }
    }

    /// Policy for liveness probes: shorter, usually a single attempt.
    pub fn heartbeat(config: &ClientConfig) -> Self {
        Self {
            attempts: config.heartbeat_retries,
            timeout: config.heartbeat_timeout,
            reconnect_interval: config.reconnect_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::request(&ClientConfig::default())
    }
}

// =============================================================================
// Single-shot channel
// =============================================================================

/// A connection that carries exactly one exchange and is then dropped.
#[derive(Debug)]
struct SingleShot {
    requester: Requester,
}

impl SingleShot {
    /// Connect, retrying every `interval` until the caller's deadline
    /// cancels this future.
    async fn open(endpoint: &Endpoint, limits: FrameLimits, interval: Duration) -> Self {
        loop {
            match Requester::connect(endpoint, limits).await {
                Ok(requester) => return Self { requester },
                Err(e) => {
                    tracing::trace!("Connect to {} failed: {}", endpoint, e);
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// A reply that does not parse is a protocol fault, not a transient one.
    async fn exchange(mut self, envelope: &Envelope) -> Result<Envelope> {
        self.requester
            .request(envelope)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => {
                    Error::protocol(format!("malformed reply: {}", e))
                }
                _ => Error::from(e),
            })
    }
}

// =============================================================================
// Request Client
// =============================================================================

#[derive(Debug, Clone)]
pub struct RequestClient {
    request_policy: RetryPolicy,
    heartbeat_policy: RetryPolicy,
    limits: FrameLimits,
}

impl RequestClient {
    pub fn new(config: &ClientConfig, limits: FrameLimits) -> Self {
        Self {
            request_policy: RetryPolicy::request(config),
            heartbeat_policy: RetryPolicy::heartbeat(config),
            limits,
        }
    }

    /// Override the request policy.
    pub fn with_request_policy(mut self, policy: RetryPolicy) -> Self {
        self.request_policy = policy;
        self
    }

    /// Override the heartbeat policy.
    pub fn with_heartbeat_policy(mut self, policy: RetryPolicy) -> Self {
        self.heartbeat_policy = policy;
        self
    }

    pub fn request_policy(&self) -> RetryPolicy {
        self.request_policy
    }

    /// Send `[token, payload...]` and return the reply's payload frames.
    ///
    /// Fails with `Timeout` once every attempt is spent, `Protocol` if the
    /// reply is not signed with `expected_signature` or is too short, and
    /// `ServiceUnavailable` if the reply carries an error status. Only
    /// timeouts and connection failures are retried; a malformed reply fails
    /// at once with `Protocol`.
    pub async fn send_request(
        &self,
        endpoint: &Endpoint,
        token: &str,
        payload: Vec<Bytes>,
        expected_signature: &str,
    ) -> Result<Vec<Bytes>> {
        let mut body = Vec::with_capacity(payload.len() + 1);
        body.push(Bytes::copy_from_slice(token.as_bytes()));
        body.extend(payload);

        let reply = self
            .exchange(endpoint, &Envelope::new(body), self.request_policy)
            .await?;
        check_reply(reply.body(), expected_signature)
    }

    /// Probe `endpoint` with a heartbeat and expect the ready marker back.
    pub async fn heartbeat(&self, endpoint: &Endpoint) -> Result<()> {
        let reply = self
            .exchange(endpoint, &Envelope::heartbeat(), self.heartbeat_policy)
            .await?;
        if reply.is_ready() {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "unexpected heartbeat reply from {} ({} frame(s))",
                endpoint,
                reply.body().len()
            )))
        }
    }

    /// Call a service directly at its registered address.
    pub async fn call(
        &self,
        descriptor: &ServiceDescriptor,
        payload: Vec<Bytes>,
    ) -> Result<Vec<Bytes>> {
        let endpoint = descriptor.endpoint()?;
        self.send_request(&endpoint, descriptor.id.as_str(), payload, &descriptor.reply)
            .await
    }

    /// Call a service through a broker frontend.
    pub async fn call_via(
        &self,
        broker: &Endpoint,
        service: &str,
        payload: Vec<Bytes>,
        expected_signature: &str,
    ) -> Result<Vec<Bytes>> {
        self.send_request(broker, service, payload, expected_signature)
            .await
    }

    /// Register a descriptor with a broker or directory.
    ///
    /// Returns the acknowledgement text.
    pub async fn register(
        &self,
        registrar: &Endpoint,
        descriptor: &ServiceDescriptor,
    ) -> Result<String> {
        let record = Bytes::from(descriptor.encode()?);
        let reply = self
            .send_request(registrar, REGISTER, vec![record], REGISTER)
            .await?;
        Ok(first_frame_text(&reply))
    }

    /// Ask a broker or directory for the descriptor of `service`.
    pub async fn lookup(&self, registrar: &Endpoint, service: &str) -> Result<ServiceDescriptor> {
        let reply = self
            .send_request(
                registrar,
                LOOKUP,
                vec![Bytes::copy_from_slice(service.as_bytes())],
                LOOKUP,
            )
            .await?;
        let record = reply
            .first()
            .ok_or_else(|| Error::protocol("lookup reply carries no record"))?;
        ServiceDescriptor::decode(record)
    }

    async fn exchange(
        &self,
        endpoint: &Endpoint,
        envelope: &Envelope,
        policy: RetryPolicy,
    ) -> Result<Envelope> {
        let attempts = policy.attempts.max(1);
        let started = Instant::now();

        for attempt in 1..=attempts {
            let deadline = Instant::now() + policy.timeout;
            let outcome = tokio::time::timeout_at(deadline, async {
                let channel =
                    SingleShot::open(endpoint, self.limits, policy.reconnect_interval).await;
                channel.exchange(envelope).await
            })
            .await
            .unwrap_or_else(|_| {
                Err(Error::timeout(format!(
                    "attempt timed out after {:?}",
                    policy.timeout
                )))
            });

            match outcome {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "Attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        endpoint,
                        e
                    );
                    // A failed attempt still spends its whole window.
                    tokio::time::sleep_until(deadline).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::timeout(format!(
            "no reply from {} after {} attempt(s) in {:?}",
            endpoint,
            attempts,
            started.elapsed()
        )))
    }
}

impl Default for RequestClient {
    fn default() -> Self {
        Self::new(&ClientConfig::default(), FrameLimits::default())
    }
}

/// Validate a reply body against the expected signature and error frame.
fn check_reply(body: &[Bytes], expected_signature: &str) -> Result<Vec<Bytes>> {
    let signature = body
        .first()
        .ok_or_else(|| Error::protocol("empty reply"))?;
    if signature.as_ref() != expected_signature.as_bytes() {
        return Err(Error::protocol(format!(
            "reply signed {:?}, expected {:?}",
            String::from_utf8_lossy(signature),
            expected_signature
        )));
    }
    let status = body
        .get(1)
        .ok_or_else(|| Error::protocol("reply has no error frame"))?;
    if !status.is_empty() {
        return Err(Error::ServiceUnavailable(ErrorStatus::decode(status)));
    }
    Ok(body[2..].to_vec())
}

fn first_frame_text(frames: &[Bytes]) -> String {
    frames
        .first()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .unwrap_or_default()
}
