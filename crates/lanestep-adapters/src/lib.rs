//! # lanestep-adapters
//!
//! Process adapters for the Ruby toolchain.
//!
//! This crate provides:
//! - Command execution on `tokio::process`
//! - Ruby install detection and `gem`/`bundle` command construction
//! - Installing the fastlane version pinned by Gemfile.lock
//! - Running the lane, with diagnostics on failure
//! - Dependency cache path collection (CocoaPods, Carthage, Gradle)

mod cache;
mod command;
mod installer;
mod ruby;
mod runner;

#[cfg(test)]
mod testing;

pub use cache::{
    CACHE_EXCLUDE_PATHS_ENV, CACHE_INCLUDE_PATHS_ENV, CacheError, CacheItemCollector, CacheItems,
    CachePaths, GRADLE_INDICATOR, GradleCacheCollector, LockfileCacheCollector, collect_cache,
    default_collectors,
};
pub use command::{CommandError, CommandExecutor, CommandSpec, SystemExecutor};
pub use installer::{InstallOptions, install_dependencies};
pub use ruby::{RubyCommandFactory, RubyInstallType};
pub use runner::{
    BUILDLOG_PATH_ENV, DEPLOY_DIR_ENV, FASTLANE_ENV_LOG, FastlaneRunner, RunError, RunOptions,
    move_build_logs,
};
