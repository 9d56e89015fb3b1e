//! Unified error type.
//!
//! Gases and handlers report failures through this channel instead of
//! building error responses themselves. The centralized error handler in
//! [`service`](crate::service) decides how each variant is rendered.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

/// The error type carried by every handler [`Outcome`](crate::Outcome).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An HTTP-level failure (401, 403, 404, ...) with an optional message
    /// and headers that must reach the client, such as a
    /// `WWW-Authenticate` challenge.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// A panic caught by the [`Recover`](crate::middleware::Recover) gas.
    #[error("panic recovered: {message}")]
    Panic { message: String, stack: Option<String> },

    /// File or stream I/O failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Status the default error handler renders this error with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http(e) => e.status,
            Self::Panic { .. } | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Headers that travel with the error to the client.
    ///
    /// Only HTTP errors carry headers; panics and I/O failures are rendered
    /// as bare 500s.
    pub fn headers_mut(&mut self) -> Option<&mut HeaderMap> {
        match self {
            Self::Http(e) => Some(&mut e.headers),
            Self::Panic { .. } | Self::Io(_) => None,
        }
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Self::Http(HttpError::new(status))
    }
}

/// An HTTP error: status, client-facing message and extra headers.
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
}

impl HttpError {
    /// Error with the canonical reason phrase as its message.
    pub fn new(status: StatusCode) -> Self {
        let message = status.canonical_reason().unwrap_or("Unknown Status").to_owned();
        Self { status, message, headers: HeaderMap::new() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for HttpError {}
