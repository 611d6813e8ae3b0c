//! Step inputs.
//!
//! Every input can be given as a flag or through the environment variable
//! the CI platform sets for the step.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use lanestep_proto::{ConnectionPolicy, ManualInputs};
use tracing::info;

/// Which Apple authentication sources to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConnectionArg {
    /// Connected account first, then step inputs
    #[default]
    Automatic,
    /// Connected App Store Connect API key only
    #[value(name = "api_key")]
    ApiKey,
    /// Connected Apple ID session only
    #[value(name = "apple_id")]
    AppleId,
    /// Step inputs only
    Off,
}

impl From<ConnectionArg> for ConnectionPolicy {
    fn from(arg: ConnectionArg) -> Self {
        match arg {
            ConnectionArg::Automatic => ConnectionPolicy::Automatic,
            ConnectionArg::ApiKey => ConnectionPolicy::ApiKeyOnly,
            ConnectionArg::AppleId => ConnectionPolicy::LegacyOnly,
            ConnectionArg::Off => ConnectionPolicy::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum YesNo {
    Yes,
    No,
}

impl From<YesNo> for bool {
    fn from(value: YesNo) -> Self {
        value == YesNo::Yes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TrueFalse {
    True,
    False,
}

impl From<TrueFalse> for bool {
    fn from(value: TrueFalse) -> Self {
        value == TrueFalse::True
    }
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Directory of the fastlane project (default: current directory)
    #[arg(long, env = "work_dir", value_name = "DIR")]
    pub work_dir: Option<String>,

    /// Lane to run, with its options (for example: "ios beta")
    #[arg(long, env = "lane")]
    pub lane: Option<String>,

    /// Apple authentication sources to use
    #[arg(long, env = "connection", value_enum, default_value_t = ConnectionArg::Automatic)]
    pub connection: ConnectionArg,

    /// Apple ID email
    #[arg(long, env = "apple_id")]
    pub apple_id: Option<String>,

    /// Apple ID password
    #[arg(long, env = "password", hide_env_values = true)]
    pub password: Option<String>,

    /// Application-specific password for Apple ID accounts with 2FA
    #[arg(long, env = "app_password", hide_env_values = true)]
    pub app_password: Option<String>,

    /// Path or URL of the App Store Connect API private key (.p8)
    #[arg(long, env = "api_key_path", hide_env_values = true)]
    pub api_key_path: Option<String>,

    /// App Store Connect API issuer ID
    #[arg(long, env = "api_issuer")]
    pub api_issuer: Option<String>,

    /// Developer Portal team ID
    #[arg(long, env = "team_id")]
    pub team_id: Option<String>,

    /// Developer Portal team name
    #[arg(long, env = "team_name")]
    pub team_name: Option<String>,

    /// Update the system fastlane when Gemfile.lock does not pin it
    #[arg(long, env = "update_fastlane", value_enum, default_value_t = TrueFalse::True)]
    pub update_fastlane: TrueFalse,

    /// Enable debug logging
    #[arg(long, env = "verbose_log", value_enum, default_value_t = YesNo::No)]
    pub verbose_log: YesNo,

    /// Export dependency paths for the cache steps
    #[arg(long, env = "enable_cache", value_enum, default_value_t = YesNo::Yes)]
    pub enable_cache: YesNo,
}

/// Validated step configuration.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub work_dir: PathBuf,
    pub lane: Vec<String>,
    pub connection: ConnectionPolicy,
    pub inputs: ManualInputs,
    pub update_fastlane: bool,
    pub enable_cache: bool,
}

impl RunArgs {
    /// Logs the inputs with secrets masked.
    pub fn print(&self) {
        let plain = |v: &Option<String>| v.clone().unwrap_or_default();
        let secret = |v: &Option<String>| mask(v.as_deref().unwrap_or_default());

        info!("Configs:");
        info!(
            "- WorkDir: {}",
            self.work_dir.as_deref().unwrap_or_default()
        );
        info!("- Lane: {}", plain(&self.lane));
        info!("- BitriseConnection: {}", ConnectionPolicy::from(self.connection));
        info!("- AppleID: {}", plain(&self.apple_id));
        info!("- Password: {}", secret(&self.password));
        info!("- AppSpecificPassword: {}", secret(&self.app_password));
        info!("- APIKeyPath: {}", secret(&self.api_key_path));
        info!("- APIIssuer: {}", plain(&self.api_issuer));
        info!("- TeamID: {}", plain(&self.team_id));
        info!("- TeamName: {}", plain(&self.team_name));
        info!("- UpdateFastlane: {}", bool::from(self.update_fastlane));
        info!("- VerboseLog: {}", bool::from(self.verbose_log));
        info!("- EnableCache: {}", bool::from(self.enable_cache));
    }

    pub fn manual_inputs(&self) -> ManualInputs {
        let value = |v: &Option<String>| v.clone().unwrap_or_default();
        ManualInputs {
            username: value(&self.apple_id),
            password: value(&self.password),
            app_specific_password: value(&self.app_password),
            api_key_path: value(&self.api_key_path),
            api_issuer: value(&self.api_issuer),
            team_id: value(&self.team_id),
            team_name: value(&self.team_name),
        }
    }

    /// Validates the inputs, resolving the work dir against `cwd`.
    pub fn into_config(self, cwd: &Path) -> Result<StepConfig> {
        let Some(lane) = self.lane.as_deref().filter(|l| !l.trim().is_empty()) else {
            bail!("no Lane parameter specified");
        };
        let lane_options = shlex::split(lane)
            .with_context(|| format!("Failed to parse lane ({lane})"))?;

        // The step runner exports unset inputs as empty variables.
        let work_dir = self
            .work_dir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .map(Path::new);
        let work_dir = expand_work_dir(work_dir, cwd)?;

        Ok(StepConfig {
            work_dir,
            lane: lane_options,
            connection: self.connection.into(),
            inputs: self.manual_inputs(),
            update_fastlane: self.update_fastlane.into(),
            enable_cache: self.enable_cache.into(),
        })
    }
}

fn expand_work_dir(work_dir: Option<&Path>, cwd: &Path) -> Result<PathBuf> {
    info!("Expand WorkDir");
    let expanded = match work_dir {
        None => {
            info!("WorkDir not set, using CurrentWorkingDirectory...");
            cwd.to_path_buf()
        }
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => cwd.join(dir),
    };
    if !expanded.is_dir() {
        bail!("WorkDir not exist at: {}", expanded.display());
    }
    info!("Expanded WorkDir: {}", expanded.display());
    Ok(expanded)
}

fn mask(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "*****" }
}
