//! Platform client.
//!
//! [`PlatformClient`] owns the single authentication context of a session and
//! lends [`WriteClient`] and [`QueryClient`] handles that share it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tracing::debug;

use crate::config::{ClientOptions, WriteOptions};
use crate::error::{Error, Result};
use crate::query::QueryClient;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::write::WriteClient;

/// How requests on a connection authenticate.
#[derive(Clone)]
pub(crate) enum Credential {
    /// `Authorization: Token <token>`.
    Token(String),
    /// Session cookie obtained from `/api/v2/signin`.
    Session(String),
    /// No authentication (setup endpoints, sign-in itself).
    Anonymous,
}

/// Transport plus authentication, shared by every handle of one client.
pub(crate) struct Connection {
    transport: Arc<dyn Transport>,
    credential: Credential,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(transport: Arc<dyn Transport>, credential: Credential) -> Self {
        Self {
            transport,
            credential,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Authenticate and send a request, turning non-2xx statuses into errors.
    pub(crate) async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let request = match &self.credential {
            Credential::Token(token) => request.header("Authorization", format!("Token {}", token)),
            Credential::Session(cookie) => request.header("Cookie", cookie.clone()),
            Credential::Anonymous => request,
        };
        let method = request.method.clone();
        let path = request.path.clone();

        let response = self.transport.send(request).await?;
        debug!(%method, %path, status = response.status, "InfluxDB request");

        if response.is_success() {
            Ok(response)
        } else {
            Err(status_error(response).await)
        }
    }
}

/// Error body returned by the v2 API.
#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Map a non-success response to an [`Error`].
async fn status_error(response: ApiResponse) -> Error {
    let status = response.status;
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return e,
    };

    let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => (parsed.code, parsed.message.unwrap_or(body)),
        Err(_) => (None, body),
    };

    match status {
        401 | 403 => Error::Auth { message },
        _ => Error::Server {
            status,
            code,
            message,
        },
    }
}

/// Result of `GET /health`.
#[derive(Clone, Debug, Deserialize)]
pub struct Health {
    /// Service name, e.g. "influxdb".
    #[serde(default)]
    pub name: String,
    /// "pass" or "fail".
    pub status: String,
    /// Human readable status.
    #[serde(default)]
    pub message: Option<String>,
    /// Server version.
    #[serde(default)]
    pub version: Option<String>,
}

impl Health {
    /// Whether the server reports itself healthy.
    pub fn is_pass(&self) -> bool {
        self.status == "pass"
    }
}

/// InfluxDB 2.x platform client.
///
/// Authenticates every request with one token and hands out lightweight
/// write and query handles that reuse this client's connection. Creating a
/// client does no network I/O.
///
/// # Example
///
/// ```ignore
/// use influxdb_platform::PlatformClient;
///
/// let platform = PlatformClient::create("http://localhost:8086", token)?;
///
/// let writer = platform.write_client();
/// writer.write_point(&bucket_id, &org_id, &point).await?;
/// writer.close().await?;
///
/// let tables = platform.query_client().query(flux, &org_id).await?;
/// platform.close();
/// ```
#[derive(Clone)]
pub struct PlatformClient {
    connection: Arc<Connection>,
    write_options: WriteOptions,
}

impl PlatformClient {
    /// Create a client for `url` authenticated with `token`.
    pub fn create(url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::new(ClientOptions::new(url, token))
    }

    /// Create a client from options.
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let transport = HttpTransport::from_options(&options)?;
        debug!(%options, "Creating platform client");
        Ok(Self::with_transport(Arc::new(transport), options.token)
            .with_write_options(options.write))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(transport: Arc<dyn Transport>, token: impl Into<String>) -> Self {
        Self {
            connection: Arc::new(Connection::new(transport, Credential::Token(token.into()))),
            write_options: WriteOptions::default(),
        }
    }

    /// Defaults used by [`write_client`](Self::write_client).
    #[must_use]
    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = options;
        self
    }

    /// Query the server's health endpoint.
    pub async fn health(&self) -> Result<Health> {
        self.connection
            .execute(ApiRequest::get("/health"))
            .await?
            .json()
            .await
    }

    /// A write handle using the client's default write options.
    pub fn write_client(&self) -> WriteClient {
        WriteClient::new(self.connection.clone(), self.write_options)
    }

    /// A write handle with specific options.
    pub fn write_client_with(&self, options: WriteOptions) -> Result<WriteClient> {
        options.validate()?;
        Ok(WriteClient::new(self.connection.clone(), options))
    }

    /// A query handle.
    pub fn query_client(&self) -> QueryClient {
        QueryClient::new(self.connection.clone())
    }

    /// Close the client.
    ///
    /// Every handle lent by this client fails with [`Error::Closed`]
    /// afterwards. Flush write handles before closing. Calling it again does
    /// nothing.
    pub fn close(&self) {
        if self.connection.close() {
            debug!("Platform client closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}
