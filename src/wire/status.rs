//! Error status carried in the second frame of a reply.
//!
//! Encoded as `Code` or `Code:detail`. An empty frame means success.

use bytes::Bytes;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No route or handler for the requested service id.
    InvalidService,
    /// Lookup of an unknown id.
    NotFound,
    /// Registration payload or request envelope could not be decoded.
    DecodeFail,
    /// Backend address could not be bound.
    BindFail,
    /// The service exists but cannot answer (failed heartbeat, full queue).
    Unavailable,
    /// The request could not be received intact.
    Receive,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidService => "InvalidService",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::DecodeFail => "DecodeFail",
            ErrorCode::BindFail => "BindFail",
            ErrorCode::Unavailable => "Unavailable",
            ErrorCode::Receive => "Receive",
            ErrorCode::Internal => "Internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "InvalidService" => Some(ErrorCode::InvalidService),
            "NotFound" => Some(ErrorCode::NotFound),
            "DecodeFail" => Some(ErrorCode::DecodeFail),
            "BindFail" => Some(ErrorCode::BindFail),
            "Unavailable" => Some(ErrorCode::Unavailable),
            "Receive" => Some(ErrorCode::Receive),
            "Internal" => Some(ErrorCode::Internal),
            _ => None,
        }
    }
}

/// Typed view of a reply's error frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorStatus {
    pub code: ErrorCode,
    pub detail: String,
}

impl ErrorStatus {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn bare(code: ErrorCode) -> Self {
        Self::new(code, String::new())
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    /// Decode a non-empty error frame. Text without a known code is kept
    /// whole as an `Internal` detail.
    pub fn decode(frame: &[u8]) -> Self {
        let text = String::from_utf8_lossy(frame);
        let (code, detail) = match text.split_once(':') {
            Some((code, detail)) => (code, detail),
            None => (text.as_ref(), ""),
        };
        match ErrorCode::parse(code) {
            Some(code) => Self::new(code, detail),
            None => Self::new(ErrorCode::Internal, text.into_owned()),
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.code.as_str())
        } else {
            write!(f, "{}:{}", self.code.as_str(), self.detail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_detail() {
        let status = ErrorStatus::decode(b"BindFail:address in use: tcp://*:5580");
        assert_eq!(status.code, ErrorCode::BindFail);
        assert_eq!(status.detail, "address in use: tcp://*:5580");
    }

    #[test]
    fn test_decode_bare_code() {
        let status = ErrorStatus::decode(b"InvalidService");
        assert_eq!(status, ErrorStatus::bare(ErrorCode::InvalidService));
        assert_eq!(status.encode().as_ref(), b"InvalidService");
    }

    #[test]
    fn test_decode_foreign_text() {
        let status = ErrorStatus::decode(b"disk on fire");
        assert_eq!(status.code, ErrorCode::Internal);
        assert_eq!(status.detail, "disk on fire");
    }
}
