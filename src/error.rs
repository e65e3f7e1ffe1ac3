//! Error types for influxdb-platform.

use thiserror::Error;

/// Boxed error used for transport failures coming from any [`Transport`](crate::transport::Transport).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for influxdb-platform operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The token or session was rejected (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Auth {
        /// Message returned by the server.
        message: String,
    },

    /// Onboarding was attempted on an instance that is already set up.
    ///
    /// Recover by calling [`discover`](crate::onboarding::discover).
    #[error("Instance has already been onboarded")]
    AlreadyOnboarded,

    /// A point or record was rejected locally, before any network call.
    #[error("Invalid point: {0}")]
    Validation(String),

    /// Network or connection failure, including failures while reading a body.
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The query response did not have the expected annotated CSV shape.
    #[error("Failed to decode response: {message} (at `{fragment}`)")]
    Decode {
        /// Description of what failed to decode.
        message: String,
        /// Raw CSV row that could not be decoded.
        fragment: String,
    },

    /// Query returned an error table from InfluxDB.
    #[error("Query error from InfluxDB: {message}")]
    Query {
        /// Error message returned by InfluxDB.
        message: String,
        /// Optional reference link for debugging.
        reference: Option<String>,
    },

    /// Any other non-success HTTP status.
    #[error("Server responded with {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// InfluxDB error code (e.g. "invalid"), if present.
        code: Option<String>,
        /// Error message, or the raw body if it was not JSON.
        message: String,
    },

    /// A lookup returned no entries (e.g. no bucket visible during discovery).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The client or handle has been closed.
    #[error("Client is closed")]
    Closed,

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the caller may reasonably retry the same operation.
    ///
    /// The client never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Server { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn decode(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
            fragment: fragment.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(Box::new(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(Box::new(e))
    }
}

/// Result type alias for influxdb-platform operations.
pub type Result<T> = std::result::Result<T, Error>;
