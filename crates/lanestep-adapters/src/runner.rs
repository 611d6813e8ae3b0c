//! Running the fastlane lane.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use lanestep_core::{FastlaneEnvError, fastlane_auth_envs, overridden_auth_envs};
use lanestep_proto::{Credentials, Environment, GemVersions};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::{CacheItemCollector, collect_cache, default_collectors};
use crate::command::{CommandError, CommandExecutor, CommandSpec};
use crate::installer::run_logged;
use crate::ruby::RubyCommandFactory;

/// Directory collecting build artifacts.
pub const DEPLOY_DIR_ENV: &str = "BITRISE_DEPLOY_DIR";
/// Where fastlane writes its build logs.
pub const BUILDLOG_PATH_ENV: &str = "FL_BUILDLOG_PATH";
/// File in the deploy dir receiving `fastlane env` output after a failure.
pub const FASTLANE_ENV_LOG: &str = "fastlane_env.log";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to set up Fastlane authentication parameters: {0}")]
    Auth(#[from] FastlaneEnvError),

    #[error("running Fastlane failed: {0}")]
    Fastlane(#[source] CommandError),
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions<'a> {
    pub work_dir: &'a Path,
    /// `None` runs fastlane without authentication.
    pub credentials: Option<&'a Credentials>,
    pub lane: &'a [String],
    pub versions: &'a GemVersions,
    pub enable_cache: bool,
}

pub struct FastlaneRunner<'a> {
    executor: &'a dyn CommandExecutor,
    factory: RubyCommandFactory,
    env: &'a dyn Environment,
    collectors: Vec<Box<dyn CacheItemCollector>>,
}

impl<'a> FastlaneRunner<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        factory: RubyCommandFactory,
        env: &'a dyn Environment,
    ) -> Self {
        Self {
            executor,
            factory,
            env,
            collectors: default_collectors(env),
        }
    }

    #[must_use]
    pub fn with_collectors(mut self, collectors: Vec<Box<dyn CacheItemCollector>>) -> Self {
        self.collectors = collectors;
        self
    }

    /// Runs the lane.
    ///
    /// On failure, `fastlane env` output and fastlane's build logs are saved
    /// to the deploy dir before the error is returned.
    pub async fn run(&self, opts: RunOptions<'_>) -> Result<(), RunError> {
        info!("Run Fastlane");

        let mut envs = match opts.credentials {
            Some(credentials) => fastlane_auth_envs(credentials)?,
            None => BTreeMap::new(),
        };
        let overridden = overridden_auth_envs(&envs, self.env);
        if !overridden.is_empty() {
            warn!(
                "Fastlane authentication-related environment variable(s) ({}) are set, overriding.",
                overridden.join(", ")
            );
            info!(
                "To stop overriding authentication-related environment variables, please set Bitrise Apple Developer Connection input to 'off' and leave authentication-related inputs empty."
            );
        }

        let buildlog_dir = match tempfile::Builder::new().prefix("fastlane_logs").tempdir() {
            Ok(dir) => {
                let dir = dir.keep();
                envs.insert(
                    BUILDLOG_PATH_ENV.to_string(),
                    dir.to_string_lossy().into_owned(),
                );
                Some(dir)
            }
            Err(e) => {
                warn!("Failed to create temp dir for fastlane logs, error: {}", e);
                None
            }
        };

        let cmd = self
            .fastlane_command(&opts, opts.lane)
            .dir(opts.work_dir)
            .envs(envs);

        let deploy_dir = self.env.get_non_empty(DEPLOY_DIR_ENV).map(PathBuf::from);
        if deploy_dir.is_none() {
            warn!("No {} found", DEPLOY_DIR_ENV);
        }
        let deploy_dir = deploy_dir.unwrap_or_default();

        if let Err(fastlane_err) = run_logged(self.executor, cmd).await {
            self.save_diagnostics(&opts, &deploy_dir, buildlog_dir.as_deref())
                .await;
            return Err(RunError::Fastlane(fastlane_err));
        }

        if opts.enable_cache {
            collect_cache(opts.work_dir, &self.collectors, self.env, self.executor).await;
        }
        Ok(())
    }

    fn fastlane_command(&self, opts: &RunOptions<'_>, args: &[String]) -> CommandSpec {
        if opts.versions.use_bundler() {
            self.factory
                .bundle_exec("fastlane", args, opts.versions.bundler.as_option())
        } else {
            self.factory.create("fastlane", args.iter().cloned())
        }
    }

    async fn save_diagnostics(
        &self,
        opts: &RunOptions<'_>,
        deploy_dir: &Path,
        buildlog_dir: Option<&Path>,
    ) {
        let env_log = deploy_dir.join(FASTLANE_ENV_LOG);
        warn!(
            "Running Fastlane failed. If you want to send an issue report to Fastlane (https://github.com/fastlane/fastlane/issues/new), you can find the output of fastlane env in the following log file: {}",
            env_log.display()
        );

        // `fastlane env` asks whether to open a GitHub issue.
        let env_cmd = self
            .fastlane_command(opts, &["env".to_string()])
            .dir(opts.work_dir)
            .stdin("n");
        debug!("$ {}", env_cmd.printable());
        match self.executor.output(&env_cmd).await {
            Ok(output) if !output.is_empty() => {
                if let Err(e) = std::fs::write(&env_log, output) {
                    warn!("Failed to write fastlane env log file, error: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Fastlane command failed: {}", e),
        }

        if let Some(buildlog_dir) = buildlog_dir
            && let Err(e) = move_build_logs(buildlog_dir, deploy_dir)
        {
            warn!("Failed to walk directory, error: {}", e);
        }
    }
}

/// Moves every file under `src` into `dest`, flattening the relative path
/// with `_` in place of `/`.
pub fn move_build_logs(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?
            .to_string_lossy()
            .replace('/', "_");
        let target = dest.join(rel);
        if std::fs::rename(entry.path(), &target).is_err() {
            // Temp and deploy dirs may be on different filesystems.
            std::fs::copy(entry.path(), &target)?;
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CACHE_INCLUDE_PATHS_ENV;
    use crate::ruby::RubyInstallType;
    use crate::testing::RecordingExecutor;
    use lanestep_proto::{LegacyCredentials, LockedVersion, MapEnvironment};
    use tempfile::TempDir;

    fn lane() -> Vec<String> {
        vec!["ios".to_string(), "beta".to_string()]
    }

    #[tokio::test]
    async fn test_runs_lane_with_auth_envs() {
        let work_dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::default();
        let env = MapEnvironment::new().with("FASTLANE_USER", "someone-else");
        let runner = FastlaneRunner::new(
            &executor,
            RubyCommandFactory::new(RubyInstallType::Brew),
            &env,
        );
        let credentials = Credentials::Legacy(LegacyCredentials {
            username: "dev@example.com".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        });
        let lane = lane();

        runner
            .run(RunOptions {
                work_dir: work_dir.path(),
                credentials: Some(&credentials),
                lane: &lane,
                versions: &GemVersions::default(),
                enable_cache: false,
            })
            .await
            .unwrap();

        let commands = executor.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].printable(), "fastlane ios beta");
        assert_eq!(commands[0].dir.as_deref(), Some(work_dir.path()));
        assert_eq!(commands[0].envs["FASTLANE_USER"], "dev@example.com");
        assert!(commands[0].envs.contains_key(BUILDLOG_PATH_ENV));
    }

    #[tokio::test]
    async fn test_pinned_fastlane_runs_through_bundle_exec() {
        let work_dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::default();
        let env = MapEnvironment::new();
        let runner = FastlaneRunner::new(
            &executor,
            RubyCommandFactory::new(RubyInstallType::Brew),
            &env,
        );
        let versions = GemVersions {
            fastlane: LockedVersion::found("2.220.0"),
            bundler: LockedVersion::found("2.4.10"),
        };
        let lane = lane();

        runner
            .run(RunOptions {
                work_dir: work_dir.path(),
                credentials: None,
                lane: &lane,
                versions: &versions,
                enable_cache: false,
            })
            .await
            .unwrap();

        assert_eq!(
            executor.command_lines(),
            ["bundle _2.4.10_ exec fastlane ios beta"]
        );
    }

    #[tokio::test]
    async fn test_failure_saves_fastlane_env_output() {
        let work_dir = TempDir::new().unwrap();
        let deploy_dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::failing_on("fastlane ios").with_output("fastlane env report");
        let env = MapEnvironment::new().with(DEPLOY_DIR_ENV, deploy_dir.path().to_str().unwrap());
        let runner = FastlaneRunner::new(
            &executor,
            RubyCommandFactory::new(RubyInstallType::Brew),
            &env,
        );
        let lane = lane();

        let err = runner
            .run(RunOptions {
                work_dir: work_dir.path(),
                credentials: None,
                lane: &lane,
                versions: &GemVersions::default(),
                enable_cache: true,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Fastlane(CommandError::Exit { code: 1, .. })));
        assert!(err.to_string().starts_with("running Fastlane failed: "));
        assert_eq!(
            executor.command_lines(),
            ["fastlane ios beta", "fastlane env"]
        );
        assert_eq!(executor.commands()[1].stdin.as_deref(), Some("n"));
        assert_eq!(
            std::fs::read_to_string(deploy_dir.path().join(FASTLANE_ENV_LOG)).unwrap(),
            "fastlane env report"
        );
    }

    #[tokio::test]
    async fn test_success_collects_cache_when_enabled() {
        let work_dir = TempDir::new().unwrap();
        std::fs::write(work_dir.path().join("Podfile.lock"), "").unwrap();
        std::fs::create_dir(work_dir.path().join("Pods")).unwrap();
        let executor = RecordingExecutor::default();
        let env = MapEnvironment::new();
        let runner = FastlaneRunner::new(
            &executor,
            RubyCommandFactory::new(RubyInstallType::Brew),
            &env,
        );
        let lane = lane();

        runner
            .run(RunOptions {
                work_dir: work_dir.path(),
                credentials: None,
                lane: &lane,
                versions: &GemVersions::default(),
                enable_cache: true,
            })
            .await
            .unwrap();

        let commands = executor.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].program, "envman");
        assert_eq!(commands[1].args[2], CACHE_INCLUDE_PATHS_ENV);
    }

    #[test]
    fn test_build_logs_are_flattened_into_deploy_dir() {
        let logs = TempDir::new().unwrap();
        let deploy = TempDir::new().unwrap();
        std::fs::create_dir_all(logs.path().join("gym")).unwrap();
        std::fs::write(logs.path().join("gym/App-App.log"), "gym").unwrap();
        std::fs::write(logs.path().join("scan.log"), "scan").unwrap();

        move_build_logs(logs.path(), deploy.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(deploy.path().join("gym_App-App.log")).unwrap(),
            "gym"
        );
        assert_eq!(
            std::fs::read_to_string(deploy.path().join("scan.log")).unwrap(),
            "scan"
        );
        assert!(!logs.path().join("scan.log").exists());
    }
}
