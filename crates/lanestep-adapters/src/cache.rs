//! Dependency cache path collection.
//!
//! Collectors report directories worth caching between builds. The paths are
//! handed to the CI cache steps through `envman`; uploading is not done here.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use lanestep_proto::Environment;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::command::{CommandError, CommandExecutor, CommandSpec};

/// Paths the cache step should include.
pub const CACHE_INCLUDE_PATHS_ENV: &str = "BITRISE_CACHE_INCLUDE_PATHS";
/// Paths the cache step should skip.
pub const CACHE_EXCLUDE_PATHS_ENV: &str = "BITRISE_CACHE_EXCLUDE_PATHS";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to search for files in ({}): {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to write cache indicator {}: {source}", path.display())]
    Indicator {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheItems {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Finds cacheable dependency paths under a project directory.
pub trait CacheItemCollector: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self, dir: &Path) -> Result<CacheItems, CacheError>;
}

/// Caches a build directory that sits next to a dependency lockfile.
///
/// Items use the `<dir> -> <lockfile>` form, so the cache is invalidated
/// when the lockfile changes.
#[derive(Debug, Clone)]
pub struct LockfileCacheCollector {
    name: &'static str,
    build_dir_name: &'static str,
    lockfile_name: &'static str,
}

impl LockfileCacheCollector {
    pub fn cocoapods() -> Self {
        Self {
            name: "cocoapods",
            build_dir_name: "Pods",
            lockfile_name: "Podfile.lock",
        }
    }

    pub fn carthage() -> Self {
        Self {
            name: "carthage",
            build_dir_name: "Carthage",
            lockfile_name: "Cartfile.resolved",
        }
    }
}

impl CacheItemCollector for LockfileCacheCollector {
    fn name(&self) -> &str {
        self.name
    }

    fn collect(&self, dir: &Path) -> Result<CacheItems, CacheError> {
        let mut build_dir_to_lockfile = BTreeMap::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|source| CacheError::Scan {
                path: dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() || entry.file_name() != self.lockfile_name {
                continue;
            }
            let lockfile = entry.into_path();
            let Some(parent) = lockfile.parent() else {
                continue;
            };
            let build_dir = parent.join(self.build_dir_name);
            if build_dir.exists() {
                build_dir_to_lockfile.insert(build_dir, lockfile);
            }
        }

        if build_dir_to_lockfile.len() > 1 {
            let locks: Vec<String> = build_dir_to_lockfile
                .values()
                .map(|p| p.display().to_string())
                .collect();
            debug!("Multiple {} found: {}", self.lockfile_name, locks.join(", "));
        }

        Ok(CacheItems {
            include: build_dir_to_lockfile
                .iter()
                .map(|(build_dir, lockfile)| {
                    format!("{} -> {}", build_dir.display(), lockfile.display())
                })
                .collect(),
            exclude: Vec::new(),
        })
    }
}

/// Written into each Gradle project root; its content changes whenever a
/// build script or the wrapper version changes.
pub const GRADLE_INDICATOR: &str = "gradle.deps";

const GRADLE_SKIP_DIRS: [&str; 3] = [".git", "CordovaLib", "node_modules"];

const GRADLE_EXCLUDES: [&str; 14] = [
    "!~/.gradle/daemon/*/daemon-*.out.log",
    "~/.android/build-cache/**",
    "*.lock",
    "*.bin",
    "*/build/*.json",
    "*/build/*.html",
    "*/build/*.xml",
    "*/build/*.properties",
    "*/build/*/zip-cache/*",
    "*.log",
    "*.txt",
    "*.rawproto",
    "!*.ap_",
    "!*.apk",
];

static WRAPPER_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^distributionUrl=.*gradle-([^-/]+)-(?:bin|all)\.zip")
        .expect("static regex is valid")
});

static VERSION_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(\.\d+)*([-+][0-9A-Za-z.+-]*)?$").expect("static regex is valid")
});

/// Caches the Gradle, Kotlin and Maven user directories of Gradle projects.
///
/// A project root holds both a build script and a settings script
/// (Groovy or Kotlin DSL). Dependency caches of other Gradle versions than
/// the project's wrapper are excluded.
#[derive(Debug, Clone)]
pub struct GradleCacheCollector {
    home: PathBuf,
}

impl GradleCacheCollector {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    fn project_roots(dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
        let mut roots = Vec::new();
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_skipped_dir(entry));
        for entry in walker {
            let entry = entry.map_err(|source| CacheError::Scan {
                path: dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let has = |names: [&str; 2]| names.iter().any(|name| entry.path().join(name).is_file());
            if has(["build.gradle", "build.gradle.kts"])
                && has(["settings.gradle", "settings.gradle.kts"])
            {
                roots.push(entry.into_path());
            }
        }
        Ok(roots)
    }

    /// Writes `gradle.deps` into `root` from the hashes of the build scripts.
    fn write_indicator(root: &Path) -> Result<PathBuf, CacheError> {
        let mut content = String::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_skipped_dir(entry));
        for entry in walker {
            let entry = entry.map_err(|source| CacheError::Scan {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() || !is_gradle_script(entry.file_name()) {
                continue;
            }
            match std::fs::read(entry.path()) {
                Ok(bytes) => content.push_str(&format!("{:x}", Sha256::digest(bytes))),
                Err(e) => warn!("Failed to hash {}: {}", entry.path().display(), e),
            }
        }

        let indicator = root.join(GRADLE_INDICATOR);
        std::fs::write(&indicator, content).map_err(|source| CacheError::Indicator {
            path: indicator.clone(),
            source,
        })?;
        Ok(indicator)
    }

    fn version_excludes(&self, root: &Path, version: &str) -> Vec<String> {
        let gradle_home = self.home.join(".gradle");
        let mut excludes = Vec::new();

        // Old wrapper distributions, like ~/.gradle/wrapper/dists/gradle-7.6-all.
        let dists = gradle_home.join("wrapper").join("dists");
        for name in dir_names(&dists) {
            if !name.starts_with(&format!("gradle-{version}")) {
                excludes.push(format!("!{}", dists.join(name).display()));
            }
        }

        // Per-version caches, like ~/.gradle/caches/7.6 or <project>/.gradle/7.6.
        for dir in [
            gradle_home.join("caches"),
            gradle_home.join("daemon"),
            root.join(".gradle"),
        ] {
            for name in dir_names(&dir) {
                if VERSION_DIR.is_match(&name) && name != version {
                    excludes.push(format!("!{}", dir.join(name).display()));
                }
            }
        }
        excludes
    }
}

impl CacheItemCollector for GradleCacheCollector {
    fn name(&self) -> &str {
        "gradle"
    }

    fn collect(&self, dir: &Path) -> Result<CacheItems, CacheError> {
        let roots = Self::project_roots(dir)?;
        debug!("Gradle projects found: {}", roots.len());

        let mut items = CacheItems::default();
        for root in roots {
            let indicator = Self::write_indicator(&root)?;
            for user_dir in [".gradle", ".kotlin", ".m2"] {
                items.include.push(format!(
                    "{} -> {}",
                    self.home.join(user_dir).display(),
                    indicator.display()
                ));
            }

            items.exclude.extend(GRADLE_EXCLUDES.iter().map(ToString::to_string));
            match wrapper_version(&root) {
                Some(version) => items.exclude.extend(self.version_excludes(&root, &version)),
                None => warn!(
                    "Failed to get project gradle version: no distributionUrl in {}",
                    root.join("gradle/wrapper/gradle-wrapper.properties").display()
                ),
            }
        }
        Ok(items)
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| GRADLE_SKIP_DIRS.contains(&name))
}

fn is_gradle_script(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.ends_with(".gradle") || name.ends_with(".gradle.kts") || name == "gradle-wrapper.properties"
}

/// Gradle version of the project's wrapper distribution.
fn wrapper_version(root: &Path) -> Option<String> {
    let properties =
        std::fs::read_to_string(root.join("gradle/wrapper/gradle-wrapper.properties")).ok()?;
    WRAPPER_VERSION
        .captures(&properties)
        .map(|caps| caps[1].to_string())
}

/// Sorted entry names of `dir`; empty when it cannot be read.
fn dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// The built-in collectors. Gradle caches live under `HOME`, so the Gradle
/// collector is only added when it is set.
pub fn default_collectors(env: &dyn Environment) -> Vec<Box<dyn CacheItemCollector>> {
    let mut collectors: Vec<Box<dyn CacheItemCollector>> = vec![
        Box::new(LockfileCacheCollector::cocoapods()),
        Box::new(LockfileCacheCollector::carthage()),
    ];
    if let Some(home) = env.get_non_empty("HOME") {
        collectors.push(Box::new(GradleCacheCollector::new(home)));
    }
    collectors
}

/// Accumulated cache paths, exported on commit.
#[derive(Debug, Clone, Default)]
pub struct CachePaths {
    items: CacheItems,
}

impl CachePaths {
    pub fn extend(&mut self, items: CacheItems) {
        self.items.include.extend(items.include);
        self.items.exclude.extend(items.exclude);
    }

    pub fn items(&self) -> &CacheItems {
        &self.items
    }

    /// Appends the paths to the ones already exported by earlier steps.
    pub async fn commit(
        &self,
        env: &dyn Environment,
        executor: &dyn CommandExecutor,
    ) -> Result<(), CommandError> {
        for (key, paths) in [
            (CACHE_INCLUDE_PATHS_ENV, &self.items.include),
            (CACHE_EXCLUDE_PATHS_ENV, &self.items.exclude),
        ] {
            if paths.is_empty() {
                continue;
            }
            let value = merge_paths(env.get(key).as_deref().unwrap_or_default(), paths);
            let cmd = CommandSpec::new("envman", ["add", "--key", key, "--value", value.as_str()]);
            executor.output(&cmd).await?;
        }
        Ok(())
    }
}

fn merge_paths(existing: &str, new: &[String]) -> String {
    let mut merged: Vec<&str> = Vec::new();
    let lines = existing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .chain(new.iter().map(String::as_str));
    for line in lines {
        if !merged.contains(&line) {
            merged.push(line);
        }
    }
    merged.join("\n")
}

/// Runs every collector on `dir` and commits what they found.
///
/// Failures are logged and never fail the build.
pub async fn collect_cache(
    dir: &Path,
    collectors: &[Box<dyn CacheItemCollector>],
    env: &dyn Environment,
    executor: &dyn CommandExecutor,
) {
    info!("Collecting cache");

    let mut paths = CachePaths::default();
    for collector in collectors {
        match collector.collect(dir) {
            Ok(items) => {
                debug!(
                    "{} found include paths:\n{}\nexclude paths:\n{}",
                    collector.name(),
                    items.include.join("\n"),
                    items.exclude.join("\n")
                );
                paths.extend(items);
            }
            Err(e) => warn!("failed to collect dependencies: {}", e),
        }
    }

    if let Err(e) = paths.commit(env, executor).await {
        warn!("failed to commit paths to cache: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingExecutor;
    use lanestep_proto::MapEnvironment;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_pods_next_to_podfile_lock_are_cached() {
        let dir = TempDir::new().unwrap();
        let ios = dir.path().join("ios");
        touch(&ios.join("Podfile.lock"));
        std::fs::create_dir_all(ios.join("Pods")).unwrap();
        // Lockfile without installed pods is skipped.
        touch(&dir.path().join("other/Podfile.lock"));

        let items = LockfileCacheCollector::cocoapods().collect(dir.path()).unwrap();

        assert_eq!(
            items.include,
            [format!(
                "{} -> {}",
                ios.join("Pods").display(),
                ios.join("Podfile.lock").display()
            )]
        );
        assert!(items.exclude.is_empty());
    }

    #[test]
    fn test_carthage_collector_finds_nothing_in_empty_dir() {
        let dir = TempDir::new().unwrap();
        let items = LockfileCacheCollector::carthage().collect(dir.path()).unwrap();
        assert_eq!(items, CacheItems::default());
    }

    #[test]
    fn test_missing_dir_is_a_scan_error() {
        let dir = TempDir::new().unwrap();
        let err = LockfileCacheCollector::carthage()
            .collect(&dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, CacheError::Scan { .. }));
    }

    fn gradle_project(root: &Path, version: &str) {
        touch(&root.join("settings.gradle.kts"));
        std::fs::write(root.join("build.gradle.kts"), "plugins {}").unwrap();
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(root.join("app/build.gradle"), "android {}").unwrap();
        std::fs::create_dir_all(root.join("gradle/wrapper")).unwrap();
        std::fs::write(
            root.join("gradle/wrapper/gradle-wrapper.properties"),
            format!(
                "distributionBase=GRADLE_USER_HOME\ndistributionUrl=https\\://services.gradle.org/distributions/gradle-{version}-bin.zip\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_gradle_project_caches_user_dirs() {
        let dir = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let android = dir.path().join("android");
        gradle_project(&android, "8.5");
        let gradle_home = home.path().join(".gradle");
        std::fs::create_dir_all(gradle_home.join("wrapper/dists/gradle-8.5-bin")).unwrap();
        std::fs::create_dir_all(gradle_home.join("wrapper/dists/gradle-7.6-all")).unwrap();
        std::fs::create_dir_all(gradle_home.join("caches/8.5")).unwrap();
        std::fs::create_dir_all(gradle_home.join("caches/7.6")).unwrap();
        std::fs::create_dir_all(gradle_home.join("caches/modules-2")).unwrap();

        let items = GradleCacheCollector::new(home.path())
            .collect(dir.path())
            .unwrap();

        let indicator = android.join(GRADLE_INDICATOR);
        assert_eq!(
            items.include,
            [".gradle", ".kotlin", ".m2"].map(|name| format!(
                "{} -> {}",
                home.path().join(name).display(),
                indicator.display()
            ))
        );
        // Settings, root and module build scripts plus the wrapper properties.
        assert_eq!(std::fs::read_to_string(&indicator).unwrap().len(), 4 * 64);

        assert!(items.exclude.contains(&"*.lock".to_string()));
        assert!(items.exclude.contains(&"*.bin".to_string()));
        let old_dist = format!("!{}", gradle_home.join("wrapper/dists/gradle-7.6-all").display());
        let old_cache = format!("!{}", gradle_home.join("caches/7.6").display());
        assert!(items.exclude.contains(&old_dist));
        assert!(items.exclude.contains(&old_cache));
        assert!(!items.exclude.iter().any(|e| e.ends_with("8.5") || e.ends_with("modules-2")));
    }

    #[test]
    fn test_gradle_indicator_follows_build_scripts() {
        let dir = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        gradle_project(dir.path(), "8.5");
        let collector = GradleCacheCollector::new(home.path());
        let indicator = dir.path().join(GRADLE_INDICATOR);

        collector.collect(dir.path()).unwrap();
        let before = std::fs::read_to_string(&indicator).unwrap();
        collector.collect(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&indicator).unwrap(), before);

        std::fs::write(dir.path().join("app/build.gradle"), "android { compileSdk 34 }").unwrap();
        collector.collect(dir.path()).unwrap();
        assert_ne!(std::fs::read_to_string(&indicator).unwrap(), before);
    }

    #[test]
    fn test_gradle_skips_non_projects_and_node_modules() {
        let dir = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        // A module build script alone is not a project root.
        touch(&dir.path().join("lib/build.gradle"));
        gradle_project(&dir.path().join("node_modules/some-package/android"), "8.5");

        let items = GradleCacheCollector::new(home.path())
            .collect(dir.path())
            .unwrap();

        assert_eq!(items, CacheItems::default());
    }

    #[test]
    fn test_gradle_collector_needs_home() {
        let names = |env: &MapEnvironment| {
            default_collectors(env)
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&MapEnvironment::new()), ["cocoapods", "carthage"]);
        assert_eq!(
            names(&MapEnvironment::new().with("HOME", "/home/ci")),
            ["cocoapods", "carthage", "gradle"]
        );
    }

    #[test]
    fn test_merge_keeps_existing_paths_first() {
        let merged = merge_paths(
            "/a -> /a.lock\n\n/b\n",
            &["/b".to_string(), "/c -> /c.lock".to_string()],
        );
        assert_eq!(merged, "/a -> /a.lock\n/b\n/c -> /c.lock");
    }

    #[tokio::test]
    async fn test_commit_exports_through_envman() {
        let executor = RecordingExecutor::default();
        let env = MapEnvironment::new().with(CACHE_INCLUDE_PATHS_ENV, "/existing");
        let mut paths = CachePaths::default();
        paths.extend(CacheItems {
            include: vec!["/p/Pods -> /p/Podfile.lock".to_string()],
            exclude: Vec::new(),
        });

        paths.commit(&env, &executor).await.unwrap();

        let commands = executor.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].program, "envman");
        assert_eq!(
            commands[0].args,
            [
                "add",
                "--key",
                CACHE_INCLUDE_PATHS_ENV,
                "--value",
                "/existing\n/p/Pods -> /p/Podfile.lock"
            ]
        );
    }

    #[tokio::test]
    async fn test_commit_failure_only_warns() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Podfile.lock"));
        std::fs::create_dir_all(dir.path().join("Pods")).unwrap();
        let executor = RecordingExecutor::failing_on("envman");

        collect_cache(
            dir.path(),
            &default_collectors(&MapEnvironment::new()),
            &MapEnvironment::new(),
            &executor,
        )
        .await;

        assert_eq!(executor.commands().len(), 1);
    }
}
