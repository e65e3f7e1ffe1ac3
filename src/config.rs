//! Client configuration.
//!
//! Options are plain values passed into each client; nothing is read from
//! process-wide state unless [`ClientOptions::from_env`] is called.
//!
//! # Example
//!
//! ```toml
//! url = "http://localhost:8086"
//! token = "my-token"
//! timeout_secs = 30
//!
//! [write]
//! batch_size = 500
//! ```

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable holding the server URL.
pub const ENV_URL: &str = "INFLUXDB_URL";

/// Environment variable holding the API token.
pub const ENV_TOKEN: &str = "INFLUXDB_TOKEN";

/// Connection and authentication options for a [`PlatformClient`](crate::PlatformClient).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Base URL of the server.
    /// Default: "http://localhost:8086"
    pub url: String,

    /// API token sent as `Authorization: Token <token>`.
    pub token: String,

    /// Whole-request timeout in seconds.
    /// Default: 60
    pub timeout_secs: u64,

    /// Connect timeout in seconds.
    /// Default: 10
    pub connect_timeout_secs: u64,

    /// User agent header.
    pub user_agent: String,

    /// Defaults for write clients.
    pub write: WriteOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            timeout_secs: 60,
            connect_timeout_secs: 10,
            user_agent: concat!("influxdb-platform/", env!("CARGO_PKG_VERSION")).to_string(),
            write: WriteOptions::default(),
        }
    }
}

impl std::fmt::Display for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never prints the token.
        write!(
            f,
            "url={} timeout={}s batch_size={}",
            self.url, self.timeout_secs, self.write.batch_size
        )
    }
}

impl ClientOptions {
    /// Options for `url` authenticated with `token`.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    /// Read `INFLUXDB_URL` and `INFLUXDB_TOKEN`.
    ///
    /// The URL falls back to the default; a missing token is an error.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(url) = std::env::var(ENV_URL) {
            options.url = url;
        }
        options.token = std::env::var(ENV_TOKEN)
            .map_err(|_| Error::Config(format!("{} is not set", ENV_TOKEN)))?;
        Ok(options)
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the write defaults
    #[must_use]
    pub fn with_write_options(mut self, write: WriteOptions) -> Self {
        self.write = write;
        self
    }

    /// Check option values before any client is built.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config("url is empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }
        self.write.validate()
    }
}

/// Buffering options for a [`WriteClient`](crate::WriteClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Number of buffered lines that triggers a flush.
    /// Default: 1 (every point is sent immediately)
    pub batch_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { batch_size: 1 }
    }
}

impl WriteOptions {
    /// Set the batch size
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Batch size must be at least one.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}
