//! Request/response contract between the clients and the network.
//!
//! Clients build [`ApiRequest`]s and hand them to a [`Transport`]. The default
//! implementation is [`HttpTransport`], backed by reqwest. Anything else that
//! can answer requests (a proxy, an in-process fake) can be plugged into
//! [`PlatformClient::with_transport`](crate::PlatformClient::with_transport).

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

pub use reqwest::Method;

use crate::config::ClientOptions;
use crate::error::{Error, Result};

/// Streaming response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Sends API requests and returns the raw responses.
///
/// Implementations must not interpret status codes; mapping non-success
/// statuses to errors is done by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// A request relative to the server's base URL.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute path, e.g. `/api/v2/write`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Bytes>,
}

impl ApiRequest {
    /// Create a request without parameters, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Add a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body and content type.
    pub fn json<T: serde::Serialize>(self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        Ok(self.body("application/json", Bytes::from(bytes)))
    }

    /// Set a body with the given content type.
    #[must_use]
    pub fn body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = Some(body.into());
        self
    }

    /// First value of a header, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// First value of a query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response with a streaming body.
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Body chunks.
    pub body: BodyStream,
}

impl std::fmt::Debug for ApiResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl ApiResponse {
    /// Response with a body held in memory.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let chunk: Bytes = body.into();
        Self {
            status,
            headers: Vec::new(),
            body: Box::pin(futures::stream::once(async move {
                Ok::<_, std::io::Error>(chunk)
            })),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Read the whole body.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read the whole body as UTF-8 (lossy).
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read and deserialize a JSON body.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Body as an async reader.
    pub fn into_reader(self) -> impl AsyncRead + Unpin + Send {
        StreamReader::new(self.body)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// [`Transport`] over HTTP(S) using reqwest.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport for the given base URL with default settings.
    pub fn new(url: &str) -> Result<Self> {
        Self::from_options(&ClientOptions::new(url, ""))
    }

    /// Create a transport from client options (URL, timeouts, user agent).
    pub fn from_options(options: &ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .connect_timeout(Duration::from_secs(options.connect_timeout_secs))
            .user_agent(options.user_agent.clone())
            .build()?;
        Self::with_http_client(http, &options.url)
    }

    /// Create a transport with a custom reqwest client.
    ///
    /// This allows you to configure proxies, TLS settings, etc.
    pub fn with_http_client(http: reqwest::Client, url: &str) -> Result<Self> {
        let base_url = Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid InfluxDB URL '{}': {}", url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid InfluxDB URL '{}'", url)));
        }
        Ok(Self { http, base_url })
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        &self.base_url
    }

    /// Build the full URL for an API endpoint.
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", prefix, path));
        url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .http
            .request(request.method, self.endpoint(&request.path))
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes_stream().map_err(std::io::Error::other);

        Ok(ApiResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}
