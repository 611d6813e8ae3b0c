//! # lanestep-core
//!
//! Decision logic for running fastlane on CI.
//!
//! This crate provides:
//! - Gemfile.lock parsing for the pinned fastlane and bundler versions
//! - Apple authentication source selection under a connection policy
//! - The client for the build's connected developer account
//! - Conversion of credentials into fastlane environment variables

mod auth;
mod devportal;
mod error;
mod fastlane;
mod key_material;
mod lockfile;

pub use auth::{
    AuthSelector, AuthSource, BUILD_API_TOKEN_ENV, BUILD_URL_ENV, PORTAL_DATA_JSON_ENV, Selection,
};
pub use devportal::{
    AppleDeveloperConnection, AppleIdConnection, BitriseClient, ConnectionProvider, Cookie,
    DevPortalError, SessionError,
};
pub use error::AuthError;
pub use fastlane::{API_KEY_FILE, FastlaneEnvError, fastlane_auth_envs, overridden_auth_envs};
pub use key_material::{KeyLocation, KeyMaterialError, PrivateKey, fetch_private_key};
pub use lockfile::{
    GEMFILE_LOCK, LockfileError, bundler_version_from_content, gem_version_from_content,
    parse_gemfile_lock,
};
