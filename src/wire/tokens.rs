//! Reserved control tokens. None of these may be registered as a service id.

/// Registration request token.
pub const REGISTER: &str = "register";
/// Descriptor lookup token.
pub const LOOKUP: &str = "lookup";
/// Heartbeat probe, sent as the only frame of an envelope.
pub const HEARTBEAT: &[u8] = b"\x02";
/// Heartbeat answer, sent as the only frame of an envelope.
pub const READY: &[u8] = b"\x01";

/// Registration acknowledgement payload.
pub const REGISTERED: &str = "Registered";

/// Whether `id` collides with a control token.
pub fn is_reserved(id: &str) -> bool {
    id == REGISTER || id == LOOKUP || id.as_bytes() == HEARTBEAT || id.as_bytes() == READY
}
