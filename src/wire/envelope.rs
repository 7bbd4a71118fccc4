//! Multi-part envelope with an explicit header section.

use crate::wire::tokens::{HEARTBEAT, READY};
use crate::wire::ErrorStatus;
use bytes::Bytes;

/// Ordered sequence of opaque frames.
///
/// `header` holds addressing frames (connection identities, caller-supplied
/// routing frames) that every hop echoes back ahead of the reply; `body`
/// holds the request or reply proper. The split is declared on the wire, not
/// inferred from frame contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    header: Vec<Bytes>,
    body: Vec<Bytes>,
}

impl Envelope {
    pub fn new(body: Vec<Bytes>) -> Self {
        Self {
            header: Vec::new(),
            body,
        }
    }

    pub fn with_header(header: Vec<Bytes>, body: Vec<Bytes>) -> Self {
        Self { header, body }
    }

    /// Two-frame request: `[token, payload]`.
    pub fn request(token: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self::new(vec![token.into(), payload.into()])
    }

    /// Single-frame liveness probe.
    pub fn heartbeat() -> Self {
        Self::new(vec![Bytes::from_static(HEARTBEAT)])
    }

    /// Three-frame reply: `[signature, error status, payload]`.
    pub fn reply(
        signature: impl Into<Bytes>,
        status: Option<&ErrorStatus>,
        payload: impl Into<Bytes>,
    ) -> Self {
        let status = status.map(ErrorStatus::encode).unwrap_or_default();
        Self::new(vec![signature.into(), status, payload.into()])
    }

    /// Build a response that carries this envelope's header section.
    pub fn respond(&self, body: Vec<Bytes>) -> Self {
        Self {
            header: self.header.clone(),
            body,
        }
    }

    /// Response to a heartbeat probe, echoing the header section.
    pub fn respond_ready(&self) -> Self {
        self.respond(vec![Bytes::from_static(READY)])
    }

    pub fn header(&self) -> &[Bytes] {
        &self.header
    }

    pub fn body(&self) -> &[Bytes] {
        &self.body
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    pub fn frame_count(&self) -> usize {
        self.header.len() + self.body.len()
    }

    /// All frames in wire order.
    pub fn frames(&self) -> impl Iterator<Item = &Bytes> {
        self.header.iter().chain(self.body.iter())
    }

    /// Prepend an addressing frame to the header section.
    pub fn push_identity(&mut self, identity: Bytes) {
        self.header.insert(0, identity);
    }

    /// Remove and return the leading addressing frame.
    pub fn pop_identity(&mut self) -> Option<Bytes> {
        if self.header.is_empty() {
            None
        } else {
            Some(self.header.remove(0))
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.body.len() == 1 && self.body[0].as_ref() == HEARTBEAT
    }

    pub fn is_ready(&self) -> bool {
        self.body.len() == 1 && self.body[0].as_ref() == READY
    }

    pub fn into_parts(self) -> (Vec<Bytes>, Vec<Bytes>) {
        (self.header, self.body)
    }
}
