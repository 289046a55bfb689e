//! Error codes for meshline
//!
//! Every error that is logged instead of returned carries one of these codes
//! so operators can correlate log lines with failure counters.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Error code attached to log lines as the `err_code` field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ErrorCode {
    pub code: i32,
    pub message: &'static str,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.code)
    }
}

// Resource generation
pub const UNKNOWN_TYPE_URL: ErrorCode = ErrorCode {
    code: 5001,
    message: "no resource generator registered for discovery type",
};

pub const GENERATING_REQUESTED_RESOURCE: ErrorCode = ErrorCode {
    code: 5002,
    message: "error generating resources for discovery request",
};

// Response building
pub const MARSHALLING_XDS_RESOURCE: ErrorCode = ErrorCode {
    code: 5003,
    message: "error marshalling resource into discovery response",
};

pub const SENDING_DISCOVERY_RESPONSE: ErrorCode = ErrorCode {
    code: 5004,
    message: "error sending discovery response to proxy",
};

// Snapshot cache
pub const RECORDING_SNAPSHOT: ErrorCode = ErrorCode {
    code: 5005,
    message: "error recording resource snapshot for proxy",
};

// Request handling
pub const DISCOVERY_REQUEST_NACKED: ErrorCode = ErrorCode {
    code: 5006,
    message: "proxy rejected discovery response",
};

pub const PROXY_NOT_CONNECTED: ErrorCode = ErrorCode {
    code: 5007,
    message: "discovery request for a proxy that is not connected",
};
