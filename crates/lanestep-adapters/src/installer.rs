//! Installing the fastlane version the project asks for.

use std::path::Path;

use lanestep_proto::GemVersions;
use tracing::info;

use crate::command::{CommandError, CommandExecutor, CommandSpec};
use crate::ruby::RubyCommandFactory;

#[derive(Debug, Clone, Copy)]
pub struct InstallOptions<'a> {
    pub versions: &'a GemVersions,
    pub work_dir: &'a Path,
    pub update_fastlane: bool,
}

/// Installs fastlane and prints its version.
///
/// With a fastlane version pinned in Gemfile.lock, bundler and the bundle
/// are installed. Otherwise the system fastlane is used, updated first if
/// requested.
pub async fn install_dependencies(
    executor: &dyn CommandExecutor,
    factory: &RubyCommandFactory,
    opts: InstallOptions<'_>,
) -> Result<(), CommandError> {
    let bundler_version = opts.versions.bundler.as_option();

    if opts.versions.use_bundler() {
        info!("Install bundler");
        // `bundle _<version>_` can fail with "command not found" until that
        // bundler version is installed.
        for cmd in factory.gem_install("bundler", bundler_version, false, true) {
            run_logged(executor, cmd.dir(opts.work_dir)).await?;
        }

        info!("Install Fastlane with bundler");
        run_logged(executor, factory.bundle_install(bundler_version).dir(opts.work_dir)).await?;
    } else if opts.update_fastlane {
        info!("Update system installed Fastlane");
        for cmd in factory.gem_install("fastlane", None, false, false) {
            run_logged(executor, cmd.dir(opts.work_dir)).await?;
        }
    } else {
        info!("Using system installed Fastlane");
    }

    info!("Fastlane version");
    let args = ["--version".to_string()];
    let cmd = if opts.versions.use_bundler() {
        factory.bundle_exec("fastlane", &args, bundler_version)
    } else {
        factory.create("fastlane", args)
    };
    run_logged(executor, cmd.dir(opts.work_dir)).await
}

pub(crate) async fn run_logged(
    executor: &dyn CommandExecutor,
    cmd: CommandSpec,
) -> Result<(), CommandError> {
    info!("$ {}", cmd.printable());
    executor.run(&cmd).await
}
