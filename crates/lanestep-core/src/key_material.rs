//! Loading App Store Connect private keys given as inputs.
//!
//! The key input may be a local path, a `file://` URL or an `http(s)://` URL.
//! The key is placed under `~/.appstoreconnect/private_keys`, which is where
//! altool looks for keys, and read back from there.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Key ID used when the file name does not follow `AuthKey_<ID>.p8`.
pub const DEFAULT_KEY_ID: &str = "Bitrise";

/// Directory under `$HOME` searched by altool.
pub const PRIVATE_KEYS_DIR: &str = ".appstoreconnect/private_keys";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

static KEY_FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AuthKey_(.+)\.p8").expect("static regex is valid"));

#[derive(Debug, Error)]
pub enum KeyMaterialError {
    #[error("invalid key URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("key URL is not a local file path: {0}")]
    NotAFilePath(Url),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to download key: {0}")]
    Download(#[source] reqwest::Error),
}

/// Where a key input points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLocation {
    Local(PathBuf),
    Remote(Url),
}

impl KeyLocation {
    pub fn parse(input: &str) -> Result<Self, KeyMaterialError> {
        if input.starts_with("file://") {
            let url = Url::parse(input)?;
            let path = url
                .to_file_path()
                .map_err(|()| KeyMaterialError::NotAFilePath(url.clone()))?;
            return Ok(KeyLocation::Local(path));
        }
        if input.starts_with("http://") || input.starts_with("https://") {
            return Ok(KeyLocation::Remote(Url::parse(input)?));
        }
        Ok(KeyLocation::Local(PathBuf::from(input)))
    }

    /// Key ID taken from an `AuthKey_<ID>.p8` file name.
    pub fn key_id(&self) -> String {
        let file_name = match self {
            KeyLocation::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            KeyLocation::Remote(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default()
                .to_string(),
        };

        KEY_FILE_NAME
            .captures(&file_name)
            .map_or_else(|| DEFAULT_KEY_ID.to_string(), |caps| caps[1].to_string())
    }
}

/// A loaded private key.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub key_id: String,
    pub contents: String,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key_id", &self.key_id)
            .field("len", &self.contents.len())
            .finish()
    }
}

/// Loads the key at `input`.
///
/// With a `home` directory the key is stored as
/// `<home>/.appstoreconnect/private_keys/AuthKey_<ID>.p8` first.
pub async fn fetch_private_key(
    input: &str,
    home: Option<&Path>,
) -> Result<PrivateKey, KeyMaterialError> {
    let location = KeyLocation::parse(input)?;
    let key_id = location.key_id();

    let bytes = match &location {
        KeyLocation::Local(path) => std::fs::read(path).map_err(|source| KeyMaterialError::Read {
            path: path.clone(),
            source,
        })?,
        KeyLocation::Remote(url) => download(url).await?,
    };

    let contents = match home {
        Some(home) => {
            let dir = home.join(PRIVATE_KEYS_DIR);
            let key_file = dir.join(format!("AuthKey_{key_id}.p8"));
            std::fs::create_dir_all(&dir).map_err(|source| KeyMaterialError::Write {
                path: dir.clone(),
                source,
            })?;
            std::fs::write(&key_file, &bytes).map_err(|source| KeyMaterialError::Write {
                path: key_file.clone(),
                source,
            })?;
            debug!("Private key stored at {}", key_file.display());
            std::fs::read(&key_file).map_err(|source| KeyMaterialError::Read {
                path: key_file.clone(),
                source,
            })?
        }
        None => bytes,
    };

    Ok(PrivateKey {
        key_id,
        contents: String::from_utf8_lossy(&contents).into_owned(),
    })
}

/// True when `input` names a local file that exists and holds no key data.
///
/// Remote keys and unreadable files are not checked here.
pub fn is_local_key_empty(input: &str) -> bool {
    match KeyLocation::parse(input) {
        Ok(KeyLocation::Local(path)) => std::fs::read(&path)
            .is_ok_and(|bytes| String::from_utf8_lossy(&bytes).trim().is_empty()),
        _ => false,
    }
}

async fn download(url: &Url) -> Result<Vec<u8>, KeyMaterialError> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(KeyMaterialError::Download)?;
    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(KeyMaterialError::Download)?;
    let bytes = response.bytes().await.map_err(KeyMaterialError::Download)?;
    Ok(bytes.to_vec())
}
