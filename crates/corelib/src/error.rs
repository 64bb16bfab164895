//! Error types for the core library.
//!
//! Two classes of failure exist at this layer:
//! - [`CommunicationError`]: anything that went wrong while talking to a
//!   node (unreachable peer, closed connection, wire decoding, an endpoint
//!   refusing a call in its current lifecycle state). Every `Node` method
//!   returns it.
//! - [`Error`]: local usage errors detected synchronously (bad identifiers,
//!   malformed addresses, duplicate endpoints, ...). These indicate a caller
//!   defect and are not meant to be retried.

use std::fmt;

use crate::url::Url;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type of every `Node` contract method.
pub type ComResult<T> = std::result::Result<T, CommunicationError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Transport-level failure surfaced through the `Node` contract.
///
/// Transport specific error types are folded into this one type at the
/// proxy/endpoint boundary; the original cause is kept as `source`.
pub struct CommunicationError {
    message: String,
    source: Option<BoxError>,
}

impl CommunicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicationError")
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for CommunicationError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("i/o failure", err)
    }
}

/// Local usage errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("identifier length mismatch: {left} != {right} bits")]
    LengthMismatch { left: usize, right: usize },

    #[error("power of two {power} out of range [0, {bits})")]
    PowerOutOfRange { power: usize, bits: usize },

    #[error("malformed url {0:?}: {1}")]
    MalformedUrl(String, &'static str),

    #[error("protocol {0:?} is not known")]
    UnknownProtocol(String),

    #[error("endpoint for {0} already created")]
    DuplicateEndpoint(Url),

    #[error("source and destination must differ: {0}")]
    SelfProxy(Url),

    #[error("illegal endpoint transition from {from} to {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("endpoint {0} has been disconnected and cannot be reused")]
    EndpointRetired(Url),

    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

impl Error {
    /// True if this error is a transport failure rather than a usage error.
    pub fn is_communication(&self) -> bool {
        matches!(self, Error::Communication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_communication_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CommunicationError::from(io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_error_classification() {
        let err: Error = CommunicationError::new("down").into();
        assert!(err.is_communication());
        assert!(!Error::LengthMismatch { left: 8, right: 16 }.is_communication());
    }
}
