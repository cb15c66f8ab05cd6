//! Error handling for the ONVIF client

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing caller argument, raised before any network activity
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection-level failure (refused, unreachable, fixture missing)
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx HTTP response
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Request timeout
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Device rejected the request at the SOAP layer
    #[error("SOAP fault: {reason} (code: {code})")]
    Fault {
        reason: String,
        code: String,
        detail: String,
    },

    /// Response parsed but lacks the expected `<Method>Response` node
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Malformed XML or envelope
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the device itself rejected or declined the operation, as
    /// opposed to a transport-level failure.
    pub fn is_protocol_rejection(&self) -> bool {
        matches!(self, Error::Fault { .. } | Error::UnsupportedOperation(_))
    }
}
