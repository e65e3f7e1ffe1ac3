//! Tenant bootstrap: onboarding a fresh instance or discovering the tenant of
//! an instance that is already set up.
//!
//! ```ignore
//! use influxdb_platform::onboarding::{self, OnboardingRequest};
//!
//! let request = OnboardingRequest::new("admin", "11111111", "Testing", "my-bucket");
//! let credentials = onboarding::onboard_or_discover("http://localhost:8086", &request).await?;
//! let platform = PlatformClient::create("http://localhost:8086", credentials.token())?;
//! ```

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{Connection, Credential};
use crate::error::{Error, Result};
use crate::transport::{ApiRequest, HttpTransport, Transport};

/// Identifiers issued to a tenant.
///
/// The crate never stores these; persisting them is up to the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    bucket_id: String,
    org_id: String,
    token: String,
}

impl Credentials {
    /// Wrap identifiers obtained elsewhere.
    pub fn new(
        bucket_id: impl Into<String>,
        org_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            org_id: org_id.into(),
            token: token.into(),
        }
    }

    /// Bucket ID.
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    /// Organization ID.
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// API token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bucket_id", &self.bucket_id)
            .field("org_id", &self.org_id)
            .field("token", &"***")
            .finish()
    }
}

/// Initial user, organization and bucket for `POST /api/v2/setup`.
#[derive(Clone, Serialize)]
pub struct OnboardingRequest {
    username: String,
    password: String,
    org: String,
    bucket: String,
    #[serde(rename = "retentionPeriodSeconds", skip_serializing_if = "Option::is_none")]
    retention_period_secs: Option<u64>,
}

impl OnboardingRequest {
    /// Request with infinite retention.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            org: org.into(),
            bucket: bucket.into(),
            retention_period_secs: None,
        }
    }

    /// Set the bucket retention period
    #[must_use]
    pub fn with_retention_period_secs(mut self, secs: u64) -> Self {
        self.retention_period_secs = Some(secs);
        self
    }

    /// Initial user name.
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for OnboardingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardingRequest")
            .field("username", &self.username)
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("retention_period_secs", &self.retention_period_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct Id {
    id: String,
}

#[derive(Deserialize)]
struct SetupResponse {
    bucket: Id,
    #[serde(alias = "organization")]
    org: Id,
    #[serde(alias = "authorization")]
    auth: TokenRef,
}

#[derive(Deserialize)]
struct TokenRef {
    token: String,
}

#[derive(Deserialize)]
struct SetupStatus {
    allowed: bool,
}

#[derive(Deserialize)]
struct Buckets {
    #[serde(default)]
    buckets: Vec<Named>,
}

#[derive(Deserialize)]
struct Orgs {
    #[serde(default)]
    orgs: Vec<Named>,
}

#[derive(Deserialize)]
struct Named {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct Authorizations {
    #[serde(default)]
    authorizations: Vec<Authorization>,
}

#[derive(Deserialize)]
struct Authorization {
    token: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn http(url: &str) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(HttpTransport::new(url)?))
}

/// Onboard the instance at `url`.
///
/// Fails with [`Error::AlreadyOnboarded`] when the instance is already set
/// up; use [`discover`] (or [`onboard_or_discover`]) in that case.
pub async fn onboard(url: &str, request: &OnboardingRequest) -> Result<Credentials> {
    onboard_with(http(url)?, request).await
}

/// [`onboard`] over a custom transport.
pub async fn onboard_with(
    transport: Arc<dyn Transport>,
    request: &OnboardingRequest,
) -> Result<Credentials> {
    let connection = Connection::new(transport, Credential::Anonymous);
    let response = match connection
        .execute(ApiRequest::post("/api/v2/setup").json(request)?)
        .await
    {
        Ok(response) => response,
        Err(Error::Server { status: 422, .. }) => return Err(Error::AlreadyOnboarded),
        Err(e) => return Err(e),
    };

    let setup: SetupResponse = response.json().await?;
    debug!(
        org_id = %setup.org.id,
        bucket_id = %setup.bucket.id,
        "Onboarding complete"
    );
    Ok(Credentials {
        bucket_id: setup.bucket.id,
        org_id: setup.org.id,
        token: setup.auth.token,
    })
}

/// Whether the instance at `url` still accepts onboarding.
pub async fn is_onboarding_allowed(url: &str) -> Result<bool> {
    is_onboarding_allowed_with(http(url)?).await
}

/// [`is_onboarding_allowed`] over a custom transport.
pub async fn is_onboarding_allowed_with(transport: Arc<dyn Transport>) -> Result<bool> {
    let connection = Connection::new(transport, Credential::Anonymous);
    let status: SetupStatus = connection
        .execute(ApiRequest::get("/api/v2/setup"))
        .await?
        .json()
        .await?;
    Ok(status.allowed)
}

/// Find the tenant of an onboarded instance.
///
/// Signs in as `username`, then picks the first user bucket (system buckets,
/// whose names start with `_`, only if there is nothing else), the first
/// organization and the first active token. The session is always signed
/// out again.
pub async fn discover(url: &str, username: &str, password: &str) -> Result<Credentials> {
    discover_with(http(url)?, username, password).await
}

/// [`discover`] over a custom transport.
pub async fn discover_with(
    transport: Arc<dyn Transport>,
    username: &str,
    password: &str,
) -> Result<Credentials> {
    let anonymous = Connection::new(transport.clone(), Credential::Anonymous);
    let basic = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    let response = anonymous
        .execute(ApiRequest::post("/api/v2/signin").header("Authorization", format!("Basic {}", basic)))
        .await?;

    let cookie = response
        .header("Set-Cookie")
        .and_then(|c| c.split(';').next())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Auth {
            message: "sign-in returned no session cookie".to_string(),
        })?;
    debug!(username, "Signed in for discovery");

    let session = Connection::new(transport, Credential::Session(cookie));
    let found = lookup(&session).await;
    let signed_out = session.execute(ApiRequest::post("/api/v2/signout")).await;

    match (found, signed_out) {
        (Ok(credentials), Ok(_)) => Ok(credentials),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(signout)) => {
            warn!(error = %signout, "Sign-out failed after discovery error");
            Err(e)
        }
    }
}

async fn lookup(session: &Connection) -> Result<Credentials> {
    let buckets: Buckets = session
        .execute(ApiRequest::get("/api/v2/buckets"))
        .await?
        .json()
        .await?;
    let bucket = buckets
        .buckets
        .iter()
        .find(|b| !b.name.starts_with('_'))
        .or_else(|| buckets.buckets.first())
        .ok_or_else(|| Error::NotFound("no bucket visible to user".to_string()))?;

    let orgs: Orgs = session
        .execute(ApiRequest::get("/api/v2/orgs"))
        .await?
        .json()
        .await?;
    let org = orgs
        .orgs
        .first()
        .ok_or_else(|| Error::NotFound("no organization visible to user".to_string()))?;

    let authorizations: Authorizations = session
        .execute(ApiRequest::get("/api/v2/authorizations"))
        .await?
        .json()
        .await?;
    let token = authorizations
        .authorizations
        .into_iter()
        .filter(|a| a.status.as_deref() != Some("inactive"))
        .find_map(|a| a.token)
        .ok_or_else(|| Error::NotFound("no active token visible to user".to_string()))?;

    debug!(org = %org.name, bucket = %bucket.name, "Discovered tenant");
    Ok(Credentials {
        bucket_id: bucket.id.clone(),
        org_id: org.id.clone(),
        token,
    })
}

/// Onboard, falling back to discovery if the instance is already set up.
///
/// Onboarding is attempted exactly once.
pub async fn onboard_or_discover(url: &str, request: &OnboardingRequest) -> Result<Credentials> {
    onboard_or_discover_with(http(url)?, request).await
}

/// [`onboard_or_discover`] over a custom transport.
pub async fn onboard_or_discover_with(
    transport: Arc<dyn Transport>,
    request: &OnboardingRequest,
) -> Result<Credentials> {
    match onboard_with(transport.clone(), request).await {
        Err(Error::AlreadyOnboarded) => {
            debug!("Instance already onboarded, discovering tenant");
            discover_with(transport, &request.username, &request.password).await
        }
        other => other,
    }
}
