//! # svcfabric - service-oriented request/reply messaging fabric
//!
//! Provides:
//! - An envelope-routing broker that forwards multi-part envelopes between
//!   frontend clients and backend services by service id
//! - A durable service registry mirrored to a JSON-lines record file
//! - A directory service that gates lookups on a heartbeat probe
//! - A resilient request client with bounded retries and a fresh channel per
//!   attempt
//! - A worker harness for serving one service id
//!
//! ## Architecture
//!
//! Every process runs a single dispatch loop that owns all mutable state;
//! connection tasks only move envelopes between sockets and the loop:
//! ```text
//!                   ┌──────────────────────────────┐
//!   clients  ─────► │ Router ─► Broker loop        │
//!                   │           ├─ RouteTable ─► Dealer ─────► workers
//!                   │           └─ Registry ─► record file     │
//!                   └──────────────────────────────┘           │
//!                          ▲                                   │
//!                          └────────── replies ◄───────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod broker;
pub mod client;
pub mod directory;
pub mod heartbeat;
pub mod registry;
pub mod transport;
pub mod types;
pub mod wire;
pub mod worker;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
