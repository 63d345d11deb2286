//! Error types shared by every vttsource crate.
//!
//! Parameter, access and state errors are raised before any mutation takes
//! place. Parse errors are scoped to the box or segment that failed.

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad index, track, handler type, MIME type or missing field.
    Parameter,
    /// The container is not writable.
    Access,
    /// Malformed or truncated box stream.
    Parse,
    /// Operation not valid in the current state.
    State,
    /// The decoded-media quota is exhausted.
    Capacity,
    /// Underlying I/O failure.
    Io,
}

/// Common error type for vttsource.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied argument was invalid.
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// The requested MIME type has no parser.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The container cannot be modified.
    #[error("Access denied: {0}")]
    Access(String),

    /// The byte stream does not follow the box framing rules.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The byte stream ended before the declared size.
    #[error("Truncated input: need {need} bytes, have {have}")]
    Truncated { need: u64, have: u64 },

    /// Boxes are nested deeper than the reader accepts.
    #[error("Box nesting deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    /// Operation invalid in the current state machine state.
    #[error("Invalid state: {0}")]
    State(String),

    /// The buffer is full; the caller must remove media first.
    #[error("Buffer full: {0}")]
    Capacity(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new Parameter error.
    pub fn parameter<S: Into<String>>(msg: S) -> Self {
        Self::Parameter(msg.into())
    }

    /// Create a new NotSupported error.
    pub fn not_supported<S: Into<String>>(msg: S) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a new Access error.
    pub fn access<S: Into<String>>(msg: S) -> Self {
        Self::Access(msg.into())
    }

    /// Create a new Parse error.
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new Truncated error.
    pub fn truncated(need: u64, have: u64) -> Self {
        Self::Truncated { need, have }
    }

    /// Create a new State error.
    pub fn state<S: Into<String>>(msg: S) -> Self {
        Self::State(msg.into())
    }

    /// Create a new Capacity error.
    pub fn capacity<S: Into<String>>(msg: S) -> Self {
        Self::Capacity(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parameter(_) | Error::NotSupported(_) => ErrorKind::Parameter,
            Error::Access(_) => ErrorKind::Access,
            Error::Parse(_) | Error::Truncated { .. } | Error::NestingTooDeep { .. } => {
                ErrorKind::Parse
            }
            Error::State(_) => ErrorKind::State,
            Error::Capacity(_) => ErrorKind::Capacity,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::parameter("description index 0");
        assert_eq!(err.to_string(), "Invalid parameter: description index 0");

        let err = Error::truncated(16, 9);
        assert_eq!(err.to_string(), "Truncated input: need 16 bytes, have 9");

        let err = Error::state("append while closed");
        assert_eq!(err.to_string(), "Invalid state: append while closed");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::parameter("x").kind(), ErrorKind::Parameter);
        assert_eq!(Error::not_supported("video/x").kind(), ErrorKind::Parameter);
        assert_eq!(Error::access("read-only").kind(), ErrorKind::Access);
        assert_eq!(Error::parse("bad size").kind(), ErrorKind::Parse);
        assert_eq!(Error::truncated(8, 2).kind(), ErrorKind::Parse);
        assert_eq!(Error::state("busy").kind(), ErrorKind::State);
        assert_eq!(Error::capacity("full").kind(), ErrorKind::Capacity);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
