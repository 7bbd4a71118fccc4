//! Request classification.
//!
//! Every host (broker, directory) handles the same closed set of request
//! kinds with one exhaustive match.

use crate::types::{Error, Result, ServiceId};
use crate::wire::tokens::{LOOKUP, REGISTER};
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// `[register, descriptor record]`
    Register(Bytes),
    /// `[lookup, service id]`
    Lookup(ServiceId),
    /// `[0x02]`
    Heartbeat,
    /// `[service id, payload...]`
    Call { service: ServiceId, payload: Vec<Bytes> },
}

impl RequestKind {
    /// Classify a request body. Header frames are never inspected.
    pub fn classify(body: &[Bytes]) -> Result<Self> {
        if body.len() == 1 && body[0].as_ref() == crate::wire::tokens::HEARTBEAT {
            return Ok(RequestKind::Heartbeat);
        }
        if body.len() < 2 {
            return Err(Error::decode(format!(
                "expected [token, payload], got {} frame(s)",
                body.len()
            )));
        }

        let token = std::str::from_utf8(&body[0])
            .map_err(|_| Error::decode("request token is not UTF-8"))?;
        match token {
            REGISTER => {
                expect_two_frames(body, REGISTER)?;
                Ok(RequestKind::Register(body[1].clone()))
            }
            LOOKUP => {
                expect_two_frames(body, LOOKUP)?;
                let id = std::str::from_utf8(&body[1])
                    .map_err(|_| Error::decode("lookup id is not UTF-8"))?;
                Ok(RequestKind::Lookup(service_id(id)?))
            }
            other => Ok(RequestKind::Call {
                service: service_id(other)?,
                payload: body[1..].to_vec(),
            }),
        }
    }

    /// Token that synthesized replies to this request are signed with.
    pub fn signature(&self) -> &str {
        match self {
            RequestKind::Register(_) => REGISTER,
            RequestKind::Lookup(_) => LOOKUP,
            RequestKind::Heartbeat => "",
            RequestKind::Call { service, .. } => service.as_str(),
        }
    }
}

fn expect_two_frames(body: &[Bytes], token: &str) -> Result<()> {
    if body.len() != 2 {
        return Err(Error::decode(format!(
            "{} expects exactly one payload frame, got {}",
            token,
            body.len() - 1
        )));
    }
    Ok(())
}

fn service_id(id: &str) -> Result<ServiceId> {
    ServiceId::from_string(id.to_string()).map_err(|e| Error::decode(e.to_string()))
}

/// Signature for a reply to a body that could not be classified.
pub fn fallback_signature(body: &[Bytes]) -> Bytes {
    body.first().cloned().unwrap_or_default()
}
