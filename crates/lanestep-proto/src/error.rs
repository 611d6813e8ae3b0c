//! Error types shared across crates.

use thiserror::Error;

/// Contradictory or incomplete manual authentication inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error(
        "both Apple ID and API key related inputs provided, provide either an App Store Connect API key or Apple ID and password"
    )]
    AmbiguousMethod,

    #[error("one of App Store Connect API key path or issuer ID not provided, provide both")]
    IncompleteApiKey,

    #[error("one of Apple ID and password not provided, provide both")]
    IncompleteAppleId,
}
