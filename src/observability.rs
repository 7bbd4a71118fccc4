//! Process-wide tracing setup.
//!
//! Every binary role (broker, directory, worker, call) goes through
//! [`init_tracing`] once at startup. Log lines are plain format strings;
//! the output format is picked here, not at the call sites.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

/// Overrides `json_logs` when set to `json` or `text`.
pub const LOG_FORMAT_ENV: &str = "SVCFABRIC_LOG_FORMAT";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// An unrecognised override falls back to the configured format.
    fn select(config: &ObservabilityConfig, override_value: Option<&str>) -> Self {
        match override_value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("text") => LogFormat::Compact,
            _ if config.json_logs => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// `RUST_LOG` wins over the configured level. A level that does not parse
/// falls back to `info`.
fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|e| {
            eprintln!("invalid log level {:?}: {}", config.log_level, e);
            EnvFilter::new("info")
        })
}

/// Install the subscriber. Later calls are no-ops.
pub fn init_tracing(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let format = LogFormat::select(config, std::env::var(LOG_FORMAT_ENV).ok().as_deref());
        let registry = tracing_subscriber::registry().with(env_filter(config));

        let result = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        };
        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}
