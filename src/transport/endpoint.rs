//! Transport endpoint URIs (`tcp://host:port`).

use crate::types::{Error, Result};
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "tcp://";

/// A `tcp://host:port` endpoint. Host `*` means every interface when binding
/// and the loopback interface when connecting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address to hand to `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        match self.host.as_str() {
            "*" => format!("0.0.0.0:{}", self.port),
            host => socket_addr(host, self.port),
        }
    }

    /// Address to hand to `TcpStream::connect`.
    pub fn connect_addr(&self) -> String {
        match self.host.as_str() {
            "*" => format!("127.0.0.1:{}", self.port),
            host => socket_addr(host, self.port),
        }
    }
}

fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::validation(format!("unsupported endpoint scheme: {}", s)))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::validation(format!("endpoint has no port: {}", s)))?;
        if host.is_empty() {
            return Err(Error::validation(format!("endpoint has no host: {}", s)));
        }
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::validation(format!("invalid endpoint port: {}", s)))?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}[{}]:{}", SCHEME, self.host, self.port)
        } else {
            write!(f, "{}{}:{}", SCHEME, self.host, self.port)
        }
    }
}
