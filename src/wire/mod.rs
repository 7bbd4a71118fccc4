//! Envelope wire protocol: frame codec, envelope model, control tokens and
//! reply error statuses.

pub mod codec;
mod envelope;
mod kind;
mod status;
pub mod tokens;

pub use codec::FrameLimits;
pub use envelope::Envelope;
pub use kind::{fallback_signature, RequestKind};
pub use status::{ErrorCode, ErrorStatus};
