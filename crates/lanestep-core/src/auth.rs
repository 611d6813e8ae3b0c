//! Apple authentication source selection.
//!
//! Credentials can come from a developer account connected to the build
//! (API key or Apple ID session) or from step inputs (API key or Apple ID).
//! The connection policy fixes which of these sources are tried and in what
//! order; the first source that yields credentials wins.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use lanestep_proto::{
    ApiKeyCredentials, ConnectionPolicy, Credentials, Environment, LegacyCredentials,
    ManualInputs,
};
use tracing::{debug, error, info, warn};

use crate::devportal::{AppleDeveloperConnection, ConnectionProvider, DevPortalError};
use crate::error::AuthError;
use crate::key_material::{self, fetch_private_key};

/// Build URL of the running build.
pub const BUILD_URL_ENV: &str = "BITRISE_BUILD_URL";
/// Token authorising requests against the build API.
pub const BUILD_API_TOKEN_ENV: &str = "BITRISE_BUILD_API_TOKEN";
/// Connection JSON used instead of the network, for local debugging.
pub const PORTAL_DATA_JSON_ENV: &str = "BITRISE_PORTAL_DATA_JSON";

const READ_MORE: &str = "Read more: https://devcenter.bitrise.io/getting-started/configuring-bitrise-steps-that-require-apple-developer-account-data/";

/// One place credentials may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthSource {
    /// API key of the connected account.
    ConnectionApiKey,
    /// Apple ID session of the connected account.
    ConnectionLegacy,
    /// API key given as input.
    InputApiKey,
    /// Apple ID given as input.
    InputLegacy,
}

impl AuthSource {
    /// The ordered sources eligible under `policy`.
    pub fn for_policy(policy: ConnectionPolicy) -> &'static [AuthSource] {
        match policy {
            ConnectionPolicy::Automatic => &[
                AuthSource::ConnectionApiKey,
                AuthSource::ConnectionLegacy,
                AuthSource::InputApiKey,
                AuthSource::InputLegacy,
            ],
            ConnectionPolicy::ApiKeyOnly => &[AuthSource::ConnectionApiKey],
            ConnectionPolicy::LegacyOnly => &[AuthSource::ConnectionLegacy],
            ConnectionPolicy::Disabled => &[AuthSource::InputApiKey, AuthSource::InputLegacy],
        }
    }

    /// Human readable provenance, logged when the source wins.
    pub fn description(self) -> &'static str {
        match self {
            AuthSource::ConnectionApiKey => {
                "Connected Apple Developer Portal Account for App Store Connect API found"
            }
            AuthSource::ConnectionLegacy => {
                "Connected session-based Apple Developer Portal Account found. It is recommended to use an API Key (App Store Connect API) instead."
            }
            AuthSource::InputApiKey => "Authenticating using Step inputs (App Store Connect API)",
            AuthSource::InputLegacy => {
                "Authenticating using Step inputs (session-based). This method does not support 2FA. It is recommended to use an API Key (App Store Connect API) instead."
            }
        }
    }

    pub fn requires_connection(self) -> bool {
        matches!(
            self,
            AuthSource::ConnectionApiKey | AuthSource::ConnectionLegacy
        )
    }

    /// `Ok(None)` means the source is not configured.
    async fn fetch(
        self,
        conn: Option<&AppleDeveloperConnection>,
        inputs: &ManualInputs,
        ctx: &FetchContext,
    ) -> Result<Option<Credentials>, AuthError> {
        match self {
            AuthSource::ConnectionApiKey => Ok(conn
                .and_then(|c| c.api_key.clone())
                .map(Credentials::ApiKey)),

            AuthSource::ConnectionLegacy => {
                let Some(session_conn) = conn.and_then(|c| c.apple_id.as_ref()) else {
                    return Ok(None);
                };
                if session_conn.is_expired_at(ctx.now) {
                    if let Some(expiry) = session_conn.expiry() {
                        warn!("TFA session expired on {}.", expiry);
                    }
                    return Ok(None);
                }
                let session = match session_conn.fastlane_login_session() {
                    Ok(session) => session,
                    Err(e) => {
                        warn!("Failed to convert the connected Apple ID session: {}", e);
                        return Ok(None);
                    }
                };

                Ok(Some(Credentials::Legacy(LegacyCredentials {
                    username: session_conn.apple_id.clone(),
                    password: session_conn.password.clone(),
                    session,
                    app_specific_password: inputs.app_specific_password.clone(),
                    team_id: inputs.team_id.clone(),
                    team_name: inputs.team_name.clone(),
                })))
            }

            AuthSource::InputApiKey => {
                if inputs.api_key_path.is_empty() {
                    return Ok(None);
                }
                let key = fetch_private_key(&inputs.api_key_path, ctx.home.as_deref())
                    .await
                    .map_err(|source| AuthError::KeyIo {
                        path: inputs.api_key_path.clone(),
                        source,
                    })?;
                if key.contents.trim().is_empty() {
                    return Err(AuthError::CredentialFormat {
                        path: inputs.api_key_path.clone(),
                    });
                }

                Ok(Some(Credentials::ApiKey(ApiKeyCredentials {
                    issuer_id: inputs.api_issuer.clone(),
                    key_id: key.key_id,
                    private_key: key.contents,
                })))
            }

            AuthSource::InputLegacy => {
                if inputs.username.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Credentials::Legacy(LegacyCredentials {
                    username: inputs.username.clone(),
                    password: inputs.password.clone(),
                    session: String::new(),
                    app_specific_password: inputs.app_specific_password.clone(),
                    team_id: inputs.team_id.clone(),
                    team_name: inputs.team_name.clone(),
                })))
            }
        }
    }
}

struct FetchContext {
    now: DateTime<Utc>,
    home: Option<PathBuf>,
}

/// Credentials together with the source that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub credentials: Credentials,
    pub source: AuthSource,
}

/// Tries credential sources in order.
pub struct AuthSelector<'a> {
    env: &'a dyn Environment,
    provider: &'a dyn ConnectionProvider,
    now: DateTime<Utc>,
}

impl<'a> AuthSelector<'a> {
    pub fn new(env: &'a dyn Environment, provider: &'a dyn ConnectionProvider) -> Self {
        Self {
            env,
            provider,
            now: Utc::now(),
        }
    }

    /// Fixes the time session expiry is checked against.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Returns the credentials of the first configured source.
    ///
    /// Inputs are validated before anything else. The connection is fetched
    /// at most once, and only when an eligible source needs it.
    pub async fn select(
        &self,
        sources: &[AuthSource],
        inputs: &ManualInputs,
    ) -> Result<Selection, AuthError> {
        inputs.validate()?;

        if !inputs.api_key_path.is_empty() && key_material::is_local_key_empty(&inputs.api_key_path)
        {
            return Err(AuthError::CredentialFormat {
                path: inputs.api_key_path.clone(),
            });
        }

        let conn = if sources.iter().any(|s| s.requires_connection()) {
            self.fetch_connection().await
        } else {
            None
        };

        let ctx = FetchContext {
            now: self.now,
            home: self.env.get_non_empty("HOME").map(PathBuf::from),
        };

        for &source in sources {
            if let Some(credentials) = source.fetch(conn.as_ref(), inputs, &ctx).await? {
                info!("{}", source.description());
                return Ok(Selection {
                    credentials,
                    source,
                });
            }
            debug!("{:?} not configured", source);
        }

        Err(AuthError::MissingAuthConfig {
            connection_empty: conn.as_ref().is_some_and(AppleDeveloperConnection::is_empty),
        })
    }

    async fn fetch_connection(&self) -> Option<AppleDeveloperConnection> {
        if let Some(json) = self.env.get_non_empty(PORTAL_DATA_JSON_ENV) {
            debug!("Using connection data from {}", PORTAL_DATA_JSON_ENV);
            return match AppleDeveloperConnection::from_json(&json) {
                Ok(conn) => Some(conn),
                Err(e) => {
                    handle_connection_error(&e);
                    None
                }
            };
        }

        let (Some(build_url), Some(token)) = (
            self.env.get_non_empty(BUILD_URL_ENV),
            self.env.get_non_empty(BUILD_API_TOKEN_ENV),
        ) else {
            warn!(
                "Connected Apple Developer Portal Account not found. Step is not running on bitrise.io: {} and {} envs are not set",
                BUILD_URL_ENV, BUILD_API_TOKEN_ENV
            );
            return None;
        };

        match self
            .provider
            .apple_developer_connection(&build_url, &token)
            .await
        {
            Ok(conn) => Some(conn),
            Err(e) => {
                handle_connection_error(&e);
                None
            }
        }
    }
}

fn handle_connection_error(err: &DevPortalError) {
    match err.status() {
        Some(404) => {
            debug!("Connected Apple Developer Portal Account not found");
            debug!(
                "Most likely because there is no Apple Developer Portal Account connected to the build, or the build is running locally."
            );
            debug!("{}", READ_MORE);
        }
        Some(401) => {
            info!(
                "Unauthorized to query Connected Apple Developer Portal Account. This happens by design, with a public app's PR build, to protect secrets."
            );
        }
        _ => {
            error!("Failed to activate Bitrise Apple Developer Portal connection: {}", err);
            warn!("{}", READ_MORE);
        }
    }
}
