//! Error type returned at the service edges (HTTP handlers, startup).
//!
//! Domain modules keep their own `thiserror` enums and convert into
//! [`Error`] where a request or startup step ends.

use thiserror::Error;

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Rule or service configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource exists but its state does not allow the request
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Conflict(_) => 409,
            // Rejected rule reload
            Self::Config(_) => 422,
            Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::NotFound("job".into()).status_code(), 404);
        assert_eq!(Error::InvalidInput("test".into()).status_code(), 400);
        assert_eq!(Error::Conflict("not ready".into()).status_code(), 409);
        assert_eq!(Error::Config("bad weights".into()).status_code(), 422);
        assert_eq!(Error::Internal("test".into()).status_code(), 500);
    }

    #[test]
    fn test_display_keeps_detail() {
        let err = Error::Conflict("job j-1 is ANALYZING".into());
        assert_eq!(err.to_string(), "Conflict: job j-1 is ANALYZING");
    }
}
