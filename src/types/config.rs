//! Configuration structures.
//!
//! Configuration is loaded from an optional JSON file; the binary layers CLI
//! flags and environment variables on top of it.

use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global fabric configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Directory service configuration.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Resilient request client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Frame transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Frontend bind endpoint.
    pub frontend_addr: String,

    /// Backing record file for registered services.
    pub services_file: PathBuf,

    /// Envelopes held per backend channel while no worker is connected.
    pub backend_queue_limit: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            frontend_addr: "tcp://*:5559".to_string(),
            services_file: PathBuf::from("services.json"),
            backend_queue_limit: 1024,
        }
    }
}

/// Directory service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Bind endpoint.
    pub bind_addr: String,

    /// Endpoint advertised in the bootstrap `lookup`/`register` descriptors.
    pub advertised_addr: String,

    /// Backing record file for registered services.
    pub services_file: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind_addr: "tcp://*:5569".to_string(),
            advertised_addr: "tcp://localhost:5569".to_string(),
            services_file: PathBuf::from("dservices.json"),
        }
    }
}

/// Resilient request client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Attempts per request before giving up.
    pub request_retries: u32,

    /// Per-attempt reply timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Attempts per heartbeat probe.
    pub heartbeat_retries: u32,

    /// Per-attempt heartbeat timeout.
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    /// Delay between connection attempts inside one attempt window.
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Local cache of resolved descriptors.
    pub cache_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_retries: 3,
            request_timeout: Duration::from_millis(2500),
            heartbeat_retries: 1,
            heartbeat_timeout: Duration::from_millis(1500),
            reconnect_interval: Duration::from_millis(100),
            cache_file: PathBuf::from("dcservicelist.json"),
        }
    }
}

/// Frame transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Maximum frame body size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum frames in one envelope.
    pub max_envelope_frames: usize,

    /// Bounded channel capacity between connection tasks and a dispatch loop.
    pub channel_capacity: usize,

    /// Write timeout per envelope. Peers that cannot accept an envelope
    /// within this window are dropped.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_envelope_frames: 64,
            channel_capacity: 256,
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
