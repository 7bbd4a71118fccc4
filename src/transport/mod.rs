//! TCP frame transport.
//!
//! Three socket shapes sit on top of the envelope codec:
//! - [`Router`]: multiplexed frontend that stamps each inbound envelope with
//!   the connection identity and routes replies by it
//! - [`Dealer`]: bound backend channel that load-balances to dialed-in workers
//! - [`Requester`]: one strict request/reply exchange at a time

pub mod connection;
pub mod dealer;
mod endpoint;
pub mod requester;
pub mod router;

pub use connection::{ConnectionEvent, ConnectionId, TransportEvent};
pub use dealer::{ChannelId, Dealer};
pub use endpoint::Endpoint;
pub use requester::Requester;
pub use router::Router;
