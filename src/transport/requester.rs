//! Strict request/reply channel to one endpoint.

use tokio::net::TcpStream;

use crate::transport::Endpoint;
use crate::wire::codec::{read_envelope, write_envelope};
use crate::wire::{Envelope, FrameLimits};

#[derive(Debug)]
pub struct Requester {
    stream: TcpStream,
    limits: FrameLimits,
}

impl Requester {
    pub async fn connect(endpoint: &Endpoint, limits: FrameLimits) -> std::io::Result<Self> {
        let stream = TcpStream::connect(endpoint.connect_addr()).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, limits })
    }

    /// Send one envelope and wait for the reply envelope.
    pub async fn request(&mut self, envelope: &Envelope) -> std::io::Result<Envelope> {
        write_envelope(&mut self.stream, envelope).await?;
        read_envelope(&mut self.stream, self.limits)
            .await?
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed before replying",
                )
            })
    }
}
