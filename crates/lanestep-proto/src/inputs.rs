//! Authentication inputs supplied directly by the user.

use std::fmt;

use crate::error::InputError;

/// Credentials given as step inputs rather than through a connection.
///
/// Empty strings are treated as "not provided".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ManualInputs {
    pub username: String,
    pub password: String,
    pub app_specific_password: String,
    pub api_key_path: String,
    pub api_issuer: String,
    pub team_id: String,
    pub team_name: String,
}

impl ManualInputs {
    fn uses_apple_id(&self) -> bool {
        !self.username.is_empty()
            || !self.password.is_empty()
            || !self.app_specific_password.is_empty()
    }

    fn uses_api_key(&self) -> bool {
        !self.api_key_path.is_empty() || !self.api_issuer.is_empty()
    }

    /// Checks that the inputs describe at most one complete method.
    ///
    /// No inputs at all is valid: connection sources may still succeed.
    pub fn validate(&self) -> Result<(), InputError> {
        let apple_id = self.uses_apple_id();
        let api_key = self.uses_api_key();

        if apple_id && api_key {
            return Err(InputError::AmbiguousMethod);
        }
        if api_key && (self.api_key_path.is_empty() || self.api_issuer.is_empty()) {
            return Err(InputError::IncompleteApiKey);
        }
        if apple_id && (self.username.is_empty() || self.password.is_empty()) {
            return Err(InputError::IncompleteAppleId);
        }
        Ok(())
    }
}

impl fmt::Debug for ManualInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = |v: &str| if v.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("ManualInputs")
            .field("username", &self.username)
            .field("password", &secret(&self.password))
            .field("app_specific_password", &secret(&self.app_specific_password))
            .field("api_key_path", &secret(&self.api_key_path))
            .field("api_issuer", &self.api_issuer)
            .field("team_id", &self.team_id)
            .field("team_name", &self.team_name)
            .finish()
    }
}
