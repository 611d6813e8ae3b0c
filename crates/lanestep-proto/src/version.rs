//! Versions pinned by a dependency lockfile.

use std::fmt;

/// Whether a gem has a pinned version in the lockfile.
///
/// A not-found value always carries an empty version string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedVersion {
    version: String,
    found: bool,
}

impl LockedVersion {
    /// Creates a found version.
    pub fn found(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            found: true,
        }
    }

    /// Creates a not-found value.
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    /// The pinned version, or `""` when not found.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The pinned version as an option.
    pub fn as_option(&self) -> Option<&str> {
        self.found.then_some(self.version.as_str())
    }
}

impl fmt::Display for LockedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.found {
            write!(f, "{}", self.version)
        } else {
            write!(f, "not pinned")
        }
    }
}

/// The fastlane and bundler versions resolved from one lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GemVersions {
    pub fastlane: LockedVersion,
    pub bundler: LockedVersion,
}

impl GemVersions {
    /// Fastlane runs through bundler only when the lockfile pins it.
    pub fn use_bundler(&self) -> bool {
        self.fastlane.is_found()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_has_empty_version() {
        let version = LockedVersion::not_found();
        assert!(!version.is_found());
        assert_eq!(version.version(), "");
        assert_eq!(version.as_option(), None);
    }

    #[test]
    fn test_found_exposes_version() {
        let version = LockedVersion::found("2.220.0");
        assert!(version.is_found());
        assert_eq!(version.as_option(), Some("2.220.0"));
        assert_eq!(version.to_string(), "2.220.0");
    }

    #[test]
    fn test_use_bundler_follows_fastlane_pin() {
        let mut versions = GemVersions::default();
        assert!(!versions.use_bundler());

        versions.bundler = LockedVersion::found("2.4.10");
        assert!(!versions.use_bundler());

        versions.fastlane = LockedVersion::found("2.220.0");
        assert!(versions.use_bundler());
    }
}
