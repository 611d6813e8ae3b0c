//! Gemfile.lock version resolution.
//!
//! The parse is textual and best effort: anything it cannot recognise yields
//! a not-found version instead of an error.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use lanestep_proto::{GemVersions, LockedVersion};
use regex::Regex;
use thiserror::Error;
use tracing::info;

/// File name of the bundler lockfile.
pub const GEMFILE_LOCK: &str = "Gemfile.lock";

const SPECS_MARKER: &str = "specs:";
const BUNDLED_WITH_MARKER: &str = "BUNDLED WITH";

static BUNDLED_WITH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^BUNDLED WITH\r?\n[ \t]+(\S+)").expect("static regex is valid")
});

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolves the fastlane and bundler versions pinned in `<search_dir>/Gemfile.lock`.
///
/// A missing lockfile is not an error: both versions are reported as not found.
pub fn parse_gemfile_lock(search_dir: &Path) -> Result<GemVersions, LockfileError> {
    let path = search_dir.join(GEMFILE_LOCK);
    info!("Checking Gemfile.lock ({}) for fastlane and bundler gem", path.display());

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Gemfile.lock does not exist");
            return Ok(GemVersions::default());
        }
        Err(source) => return Err(LockfileError::Read { path, source }),
    };

    let versions = GemVersions {
        fastlane: gem_version_from_content("fastlane", &content),
        bundler: bundler_version_from_content(&content),
    };

    match versions.fastlane.as_option() {
        Some(version) => info!("Gemfile.lock defined fastlane version: {}", version),
        None => info!("No fastlane version defined in Gemfile.lock"),
    }
    match versions.bundler.as_option() {
        Some(version) => info!("Gemfile.lock defined bundler version: {}", version),
        None => info!("No bundler version defined in Gemfile.lock"),
    }

    Ok(versions)
}

/// Finds `<gem> (<version>)` inside a `specs:` block.
///
/// A block starts at a line containing `specs:` and ends at the next blank
/// line, so a blank line in the middle of a block hides the specs after it.
pub fn gem_version_from_content(gem: &str, content: &str) -> LockedVersion {
    let pattern = format!(r"^{} \((.+)\)", regex::escape(gem));
    let Ok(exp) = Regex::new(&pattern) else {
        return LockedVersion::not_found();
    };

    let mut in_specs = false;
    for line in content.split('\n') {
        if line.contains(SPECS_MARKER) {
            in_specs = true;
        }
        if line.trim_matches(' ').is_empty() {
            in_specs = false;
        }
        if !in_specs {
            continue;
        }

        //     fastlane (2.220.0)
        if let Some(caps) = exp.captures(line.trim()) {
            return LockedVersion::found(&caps[1]);
        }
    }

    LockedVersion::not_found()
}

/// Reads the version under the `BUNDLED WITH` marker.
pub fn bundler_version_from_content(content: &str) -> LockedVersion {
    if !content.contains(BUNDLED_WITH_MARKER) {
        return LockedVersion::not_found();
    }
    BUNDLED_WITH
        .captures(content)
        .map_or_else(LockedVersion::not_found, |caps| {
            LockedVersion::found(&caps[1])
        })
}
