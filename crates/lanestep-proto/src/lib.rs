//! # lanestep-proto
//!
//! Shared types for the Lanestep CI step.
//!
//! This crate provides:
//! - Resolved lockfile versions (`LockedVersion`, `GemVersions`)
//! - The connection policy that decides which credential sources are eligible
//! - Credential shapes handed to fastlane
//! - Manually supplied authentication inputs and their validation
//! - The `Environment` capability used instead of ambient env reads

mod credentials;
mod environment;
mod error;
mod inputs;
mod policy;
mod version;

pub use credentials::{ApiKeyCredentials, Credentials, LegacyCredentials};
pub use environment::{Environment, MapEnvironment, ProcessEnvironment};
pub use error::InputError;
pub use inputs::ManualInputs;
pub use policy::{ConnectionPolicy, ParsePolicyError};
pub use version::{GemVersions, LockedVersion};
