//! Connected Apple Developer Portal account data.
//!
//! A CI build can have a developer account connected to it centrally. The
//! connection data is served by the build's API as a flat JSON object that
//! may carry an App Store Connect API key, an Apple ID session, both, or
//! neither.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lanestep_proto::ApiKeyCredentials;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Path of the connection data relative to the build URL.
pub const PORTAL_DATA_PATH: &str = "apple_developer_portal_data.json";

/// Header carrying the build API token.
pub const BUILD_API_TOKEN_HEADER: &str = "BUILD_API_TOKEN";

/// Cookie jar key holding the Apple ID login session.
pub const SESSION_COOKIE_DOMAIN: &str = "https://idmsa.apple.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors reaching or decoding the connection endpoint.
#[derive(Debug, Error)]
pub enum DevPortalError {
    #[error("response {status} {body}")]
    Network { status: u16, body: String },

    #[error("failed to perform request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("failed to decode connection data: {0}")]
    Decode(#[source] serde_json::Error),
}

impl DevPortalError {
    /// HTTP status of a non-success response.
    pub fn status(&self) -> Option<u16> {
        match self {
            DevPortalError::Network { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A cookie as stored by the connection service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Cookie {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub max_age: Option<i64>,
    #[serde(default)]
    pub httponly: bool,
    #[serde(default)]
    pub for_domain: Option<bool>,
}

/// A cookie that cannot be rendered into a fastlane session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cookie {name:?} contains a line break in field {field}")]
pub struct SessionError {
    pub name: String,
    pub field: &'static str,
}

/// Apple ID with a two-factor session, as connected to the build.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AppleIdConnection {
    pub apple_id: String,
    pub password: String,
    pub connection_expiry_date: String,
    pub session_cookies: HashMap<String, Vec<Cookie>>,
}

impl AppleIdConnection {
    /// When the two-factor session expires, if the service reported it.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        if self.connection_expiry_date.is_empty() {
            return None;
        }
        match DateTime::parse_from_rfc3339(&self.connection_expiry_date) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                warn!(
                    "Could not parse session expiry date ({}): {}",
                    self.connection_expiry_date, e
                );
                None
            }
        }
    }

    /// True when the session expired before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_some_and(|expiry| expiry < now)
    }

    /// Renders the login cookies as the Ruby YAML document fastlane reads
    /// from `FASTLANE_SESSION`.
    pub fn fastlane_login_session(&self) -> Result<String, SessionError> {
        let Some(cookies) = self.session_cookies.get(SESSION_COOKIE_DOMAIN) else {
            return Ok(String::new());
        };

        let mut session = String::new();
        for cookie in cookies {
            if session.is_empty() {
                session.push_str("---\n");
            }
            for (field, value) in [
                ("name", &cookie.name),
                ("value", &cookie.value),
                ("domain", &cookie.domain),
                ("path", &cookie.path),
            ] {
                if value.contains(['\n', '\r']) {
                    return Err(SessionError {
                        name: cookie.name.clone(),
                        field,
                    });
                }
            }

            session.push_str(&format!(
                "- !ruby/object:HTTP::Cookie\n  name: {}\n  value: {}\n  domain: {}\n  for_domain: {}\n  path: \"{}\"\n\n",
                cookie.name,
                cookie.value,
                cookie.domain,
                cookie.for_domain.unwrap_or(true),
                cookie.path,
            ));
        }
        Ok(session)
    }
}

impl fmt::Debug for AppleIdConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppleIdConnection")
            .field("apple_id", &self.apple_id)
            .field("password", &"<redacted>")
            .field("connection_expiry_date", &self.connection_expiry_date)
            .field("session_cookie_domains", &self.session_cookies.keys())
            .finish()
    }
}

/// Connection data for one build. Each record is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppleDeveloperConnection {
    pub apple_id: Option<AppleIdConnection>,
    pub api_key: Option<ApiKeyCredentials>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConnection {
    #[serde(default)]
    apple_id: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    connection_expiry_date: Option<String>,
    #[serde(default)]
    session_cookies: Option<HashMap<String, Vec<Cookie>>>,
    #[serde(default)]
    key_id: Option<String>,
    #[serde(default)]
    issuer_id: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
}

impl AppleDeveloperConnection {
    /// Parses the connection endpoint's JSON body.
    pub fn from_json(body: &str) -> Result<Self, DevPortalError> {
        let raw: RawConnection = serde_json::from_str(body).map_err(DevPortalError::Decode)?;
        Ok(Self::from(raw))
    }

    /// True when neither an API key nor an Apple ID is connected.
    pub fn is_empty(&self) -> bool {
        self.apple_id.is_none() && self.api_key.is_none()
    }
}

impl From<RawConnection> for AppleDeveloperConnection {
    fn from(raw: RawConnection) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

        let apple_id = non_empty(raw.apple_id).map(|apple_id| AppleIdConnection {
            apple_id,
            password: raw.password.unwrap_or_default(),
            connection_expiry_date: raw.connection_expiry_date.unwrap_or_default(),
            session_cookies: raw.session_cookies.unwrap_or_default(),
        });

        let api_key = match (
            non_empty(raw.issuer_id),
            non_empty(raw.key_id),
            non_empty(raw.private_key),
        ) {
            (Some(issuer_id), Some(key_id), Some(private_key)) => Some(ApiKeyCredentials {
                issuer_id,
                key_id,
                private_key,
            }),
            _ => None,
        };

        Self { apple_id, api_key }
    }
}

/// Fetches the connection data for a build.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn apple_developer_connection(
        &self,
        build_url: &str,
        build_api_token: &str,
    ) -> Result<AppleDeveloperConnection, DevPortalError>;
}

/// HTTP client for the build API.
///
/// Requests time out after 30 seconds; transport failures and 5xx responses
/// are retried once.
#[derive(Debug, Clone)]
pub struct BitriseClient {
    http: reqwest::Client,
    retry_delay: Duration,
}

impl BitriseClient {
    pub fn new() -> Result<Self, DevPortalError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(DevPortalError::Request)?;
        Ok(Self {
            http,
            retry_delay: RETRY_DELAY,
        })
    }

    /// Overrides the pause before the retry.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn get_once(&self, url: &str, token: &str) -> Result<String, DevPortalError> {
        let response = self
            .http
            .get(url)
            .header(BUILD_API_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(DevPortalError::Request)?;

        let status = response.status();
        let body = response.text().await.map_err(DevPortalError::Request)?;
        if status != reqwest::StatusCode::OK {
            return Err(DevPortalError::Network {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn is_transient(err: &DevPortalError) -> bool {
    match err {
        DevPortalError::Request(e) => e.is_timeout() || e.is_connect(),
        DevPortalError::Network { status, .. } => *status >= 500,
        DevPortalError::Decode(_) => false,
    }
}

#[async_trait]
impl ConnectionProvider for BitriseClient {
    async fn apple_developer_connection(
        &self,
        build_url: &str,
        build_api_token: &str,
    ) -> Result<AppleDeveloperConnection, DevPortalError> {
        let url = format!("{}/{}", build_url.trim_end_matches('/'), PORTAL_DATA_PATH);
        debug!("GET {}", url);

        let body = match self.get_once(&url, build_api_token).await {
            Err(err) if is_transient(&err) => {
                warn!("Fetching connection data failed ({}), retrying once", err);
                tokio::time::sleep(self.retry_delay).await;
                self.get_once(&url, build_api_token).await?
            }
            other => other?,
        };

        AppleDeveloperConnection::from_json(&body)
    }
}
