//! Hand-off of resolved credentials to fastlane.
//!
//! fastlane reads authentication from environment variables. API keys are
//! passed as a JSON file whose path goes into the environment.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use lanestep_proto::{ApiKeyCredentials, Credentials, Environment, LegacyCredentials};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// File name of the API key JSON handed to fastlane.
pub const API_KEY_FILE: &str = "api_key.json";

#[derive(Debug, Error)]
pub enum FastlaneEnvError {
    #[error("failed to create temporary directory for API key: {0}")]
    TempDir(#[source] io::Error),

    #[error("failed to encode API key: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write API key to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Serialize)]
struct ApiKeyFile<'a> {
    key_id: &'a str,
    issuer_id: &'a str,
    key: &'a str,
}

/// Environment variables that make fastlane use `credentials`.
///
/// For an API key this writes the key file into a new temporary directory
/// that outlives the process, since fastlane reads it after we exit.
pub fn fastlane_auth_envs(
    credentials: &Credentials,
) -> Result<BTreeMap<String, String>, FastlaneEnvError> {
    match credentials {
        Credentials::Legacy(legacy) => Ok(legacy_envs(legacy)),
        Credentials::ApiKey(key) => {
            let dir = tempfile::Builder::new()
                .prefix("apiKey")
                .tempdir()
                .map_err(FastlaneEnvError::TempDir)?
                .keep();
            let path = write_api_key_file(key, &dir)?;
            Ok(api_key_envs(&path))
        }
    }
}

fn legacy_envs(creds: &LegacyCredentials) -> BTreeMap<String, String> {
    let mut envs = BTreeMap::new();
    let mut set = |keys: &[&str], value: &str| {
        if value.is_empty() {
            return;
        }
        for key in keys {
            envs.insert((*key).to_string(), value.to_string());
        }
    };

    set(&["SPACESHIP_SKIP_2FA_UPGRADE"], "1");
    set(
        &["FASTLANE_USER", "DELIVER_USERNAME", "PILOT_USERNAME"],
        &creds.username,
    );
    set(
        &["FASTLANE_PASSWORD", "DELIVER_PASSWORD", "PILOT_PASSWORD"],
        &creds.password,
    );
    set(&["FASTLANE_SESSION"], &creds.session);
    set(
        &["FASTLANE_APPLE_APPLICATION_SPECIFIC_PASSWORD"],
        &creds.app_specific_password,
    );
    set(&["FASTLANE_TEAM_ID"], &creds.team_id);
    set(&["FASTLANE_TEAM_NAME"], &creds.team_name);

    envs
}

fn write_api_key_file(key: &ApiKeyCredentials, dir: &Path) -> Result<PathBuf, FastlaneEnvError> {
    let json = serde_json::to_string(&ApiKeyFile {
        key_id: &key.key_id,
        issuer_id: &key.issuer_id,
        key: &key.private_key,
    })?;
    let path = dir.join(API_KEY_FILE);
    std::fs::write(&path, json).map_err(|source| FastlaneEnvError::Write {
        path: path.clone(),
        source,
    })?;
    debug!("API key written to {}", path.display());
    Ok(path)
}

fn api_key_envs(path: &Path) -> BTreeMap<String, String> {
    let path = path.to_string_lossy().into_owned();
    let mut envs = BTreeMap::new();
    for key in [
        "APP_STORE_CONNECT_API_KEY_PATH",
        "DELIVER_API_KEY_PATH",
        "PILOT_API_KEY_PATH",
    ] {
        envs.insert(key.to_string(), path.clone());
    }
    // Precheck fails on in-app purchases when authenticating with an API key.
    envs.insert(
        "PRECHECK_INCLUDE_IN_APP_PURCHASES".to_string(),
        "false".to_string(),
    );
    envs
}

/// Keys of `envs` that are already present in `env`.
pub fn overridden_auth_envs(envs: &BTreeMap<String, String>, env: &dyn Environment) -> Vec<String> {
    envs.keys().filter(|key| env.is_set(key)).cloned().collect()
}
