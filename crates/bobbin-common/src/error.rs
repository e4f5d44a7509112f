use smol_str::SmolStr;

/// Transport-level errors that occur during HTTP communication
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TransportError {
    /// Failed to establish connection to server
    #[error("Connection error: {0}")]
    #[diagnostic(code(bobbin_common::transport::connect))]
    Connect(SmolStr),

    /// Request timed out
    #[error("Request timeout")]
    #[diagnostic(code(bobbin_common::transport::timeout))]
    Timeout,

    /// Request could not be built (bad URI, header, ...)
    #[error("Invalid request: {0}")]
    #[diagnostic(code(bobbin_common::transport::invalid_request))]
    InvalidRequest(SmolStr),

    /// Other transport error
    #[error("Transport error: {0}")]
    #[diagnostic(code(bobbin_common::transport::other))]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// True for failures that are worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout)
    }
}

#[cfg(feature = "reqwest-client")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string().into())
        } else if e.is_builder() || e.is_request() {
            Self::InvalidRequest(e.to_string().into())
        } else {
            Self::Other(Box::new(e))
        }
    }
}

impl From<http::Error> for TransportError {
    fn from(e: http::Error) -> Self {
        Self::InvalidRequest(e.to_string().into())
    }
}
