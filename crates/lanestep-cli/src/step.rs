//! The step pipeline: select credentials, install fastlane, run the lane.

use anyhow::{Context, Result};
use lanestep_adapters::{
    CommandExecutor, FastlaneRunner, InstallOptions, RubyCommandFactory, RunOptions,
    install_dependencies,
};
use lanestep_core::{AuthError, AuthSelector, AuthSource, ConnectionProvider, parse_gemfile_lock};
use lanestep_proto::{Credentials, Environment};
use tracing::{info, warn};

use crate::config::StepConfig;

const NOT_CONNECTED: &str = "Connected Apple Developer Portal Account not found.
Most likely because there is no Apple Developer Portal Account connected to the build.
Read more: https://devcenter.bitrise.io/getting-started/configuring-bitrise-steps-that-require-apple-developer-account-data/";

/// Collaborators of one step run.
pub struct Step<'a> {
    pub env: &'a dyn Environment,
    pub provider: &'a dyn ConnectionProvider,
    pub executor: &'a dyn CommandExecutor,
    pub factory: RubyCommandFactory,
    /// Whether `rbenv` is on `PATH`.
    pub has_rbenv: bool,
}

impl Step<'_> {
    pub async fn run(&self, config: &StepConfig) -> Result<()> {
        self.warn_custom_gem_home();
        self.print_rbenv_versions(config).await;

        let credentials = self.select_credentials(config).await?;

        info!("Determine desired Fastlane version");
        let versions = parse_gemfile_lock(&config.work_dir)?;

        install_dependencies(
            self.executor,
            &self.factory,
            InstallOptions {
                versions: &versions,
                work_dir: &config.work_dir,
                update_fastlane: config.update_fastlane,
            },
        )
        .await
        .context("Failed to install Step dependencies")?;

        FastlaneRunner::new(self.executor, self.factory, self.env)
            .run(RunOptions {
                work_dir: &config.work_dir,
                credentials: credentials.as_ref(),
                lane: &config.lane,
                versions: &versions,
                enable_cache: config.enable_cache,
            })
            .await?;
        Ok(())
    }

    fn warn_custom_gem_home(&self) {
        if let Some(gem_home) = self.env.get_non_empty("GEM_HOME") {
            warn!(
                "Custom value ({}) is set for GEM_HOME environment variable. This can lead to errors as gem lookup path may not contain GEM_HOME.",
                gem_home
            );
        }
    }

    async fn print_rbenv_versions(&self, config: &StepConfig) {
        if !self.has_rbenv {
            return;
        }
        let cmd = self
            .factory
            .create("rbenv", ["versions"])
            .dir(&config.work_dir);
        info!("$ {}", cmd.printable());
        if let Err(e) = self.executor.run(&cmd).await {
            warn!("{}", e);
        }
    }

    /// Returns `None` when no source had credentials; fastlane then runs
    /// unauthenticated.
    async fn select_credentials(&self, config: &StepConfig) -> Result<Option<Credentials>> {
        let selector = AuthSelector::new(self.env, self.provider);
        match selector
            .select(AuthSource::for_policy(config.connection), &config.inputs)
            .await
        {
            Ok(selection) => Ok(Some(selection.credentials)),
            Err(AuthError::MissingAuthConfig { connection_empty }) => {
                warn!(
                    "No authentication data found matching the selected Apple Service authentication method ({}).",
                    config.connection
                );
                if connection_empty {
                    warn!("{}", NOT_CONNECTED);
                }
                Ok(None)
            }
            Err(e @ AuthError::Configuration(_)) => {
                Err(e).context("Issue with authentication related inputs")
            }
            Err(e) => Err(e).context("Could not configure Apple Service authentication"),
        }
    }
}
