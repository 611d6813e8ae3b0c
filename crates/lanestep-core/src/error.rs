//! Authentication resolution errors.

use lanestep_proto::InputError;
use thiserror::Error;

use crate::key_material::KeyMaterialError;

/// Outcome of a failed credential resolution.
///
/// Every variant except `MissingAuthConfig` aborts the resolution.
/// `MissingAuthConfig` means no source had credentials; callers decide
/// whether running without authentication is acceptable.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("input configuration is invalid: {0}")]
    Configuration(#[from] InputError),

    #[error("could not fetch private key ({path}) specified as input: {source}")]
    KeyIo {
        path: String,
        #[source]
        source: KeyMaterialError,
    },

    #[error("private key ({path}) is empty")]
    CredentialFormat { path: String },

    #[error("Apple Service authentication not configured")]
    MissingAuthConfig {
        /// A connection was fetched but it held neither an API key nor an Apple ID.
        connection_empty: bool,
    },
}

impl AuthError {
    pub fn is_missing_config(&self) -> bool {
        matches!(self, AuthError::MissingAuthConfig { .. })
    }
}
