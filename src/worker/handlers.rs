//! Request handlers a worker can serve.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};

use crate::types::Result;

/// Answers the payload frames of one request with a single reply frame.
#[async_trait]
pub trait ServiceHandler: Send + Sync + std::fmt::Debug {
    async fn handle(&self, payload: &[Bytes]) -> Result<Bytes>;
}

/// Replies "World" to anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelloHandler;

#[async_trait]
impl ServiceHandler for HelloHandler {
    async fn handle(&self, _payload: &[Bytes]) -> Result<Bytes> {
        Ok(Bytes::from_static(b"World"))
    }
}

/// Replies with the current UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeHandler;

#[async_trait]
impl ServiceHandler for TimeHandler {
    async fn handle(&self, _payload: &[Bytes]) -> Result<Bytes> {
        Ok(Bytes::from(
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
    }
}

/// Built-in handler by service id.
pub fn builtin(service: &str) -> Option<Arc<dyn ServiceHandler>> {
    match service {
        "hello" => Some(Arc::new(HelloHandler)),
        "time" => Some(Arc::new(TimeHandler)),
        _ => None,
    }
}
