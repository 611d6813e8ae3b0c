//! Ruby toolchain command construction.

use std::path::Path;

use tracing::debug;

use crate::command::CommandSpec;

const SYSTEM_RUBY: &str = "/usr/bin/ruby";
const BREW_RUBY: &str = "/usr/local/bin/ruby";

/// How Ruby is installed on the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RubyInstallType {
    System,
    Brew,
    Rvm,
    Rbenv,
    Unknown,
}

impl RubyInstallType {
    /// Detects the install type from `PATH`.
    pub fn detect() -> Self {
        let ruby = which::which("ruby").ok();
        let install_type = Self::classify(
            ruby.as_deref(),
            which::which("rvm").is_ok(),
            which::which("rbenv").is_ok(),
        );
        debug!("Ruby install type: {:?} ({:?})", install_type, ruby);
        install_type
    }

    pub fn classify(ruby: Option<&Path>, has_rvm: bool, has_rbenv: bool) -> Self {
        match ruby {
            Some(path) if path == Path::new(SYSTEM_RUBY) => RubyInstallType::System,
            Some(path) if path == Path::new(BREW_RUBY) => RubyInstallType::Brew,
            _ if has_rvm => RubyInstallType::Rvm,
            _ if has_rbenv => RubyInstallType::Rbenv,
            _ => RubyInstallType::Unknown,
        }
    }
}

/// Builds `gem`, `bundle` and gem executable commands for one Ruby install.
#[derive(Debug, Clone, Copy)]
pub struct RubyCommandFactory {
    install_type: RubyInstallType,
}

impl RubyCommandFactory {
    pub fn new(install_type: RubyInstallType) -> Self {
        Self { install_type }
    }

    pub fn install_type(&self) -> RubyInstallType {
        self.install_type
    }

    /// `name args`, behind `sudo` when it modifies system Ruby gems.
    pub fn create<I, S>(&self, name: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if self.sudo_needed(name, &args) {
            let mut sudo_args = vec![name.to_string()];
            sudo_args.extend(args);
            return CommandSpec::new("sudo", sudo_args);
        }
        CommandSpec::new(name, args)
    }

    fn sudo_needed(&self, name: &str, args: &[String]) -> bool {
        if self.install_type != RubyInstallType::System {
            return false;
        }
        let manages_gems = name == "gem" || name == "bundle";
        let installs = args
            .first()
            .is_some_and(|sub| sub == "install" || sub == "uninstall");
        manages_gems && installs
    }

    /// `gem install`, followed by `rbenv rehash` under rbenv.
    pub fn gem_install(
        &self,
        gem: &str,
        version: Option<&str>,
        prerelease: bool,
        force: bool,
    ) -> Vec<CommandSpec> {
        let mut args = vec!["install".to_string(), gem.to_string(), "--no-document".to_string()];
        if prerelease {
            args.push("--prerelease".to_string());
        }
        if let Some(version) = version {
            args.push("-v".to_string());
            args.push(version.to_string());
        }
        if force {
            args.push("--force".to_string());
        }

        let mut cmds = vec![self.create("gem", args)];
        if self.install_type == RubyInstallType::Rbenv {
            cmds.push(self.create("rbenv", ["rehash"]));
        }
        cmds
    }

    pub fn bundle_install(&self, bundler_version: Option<&str>) -> CommandSpec {
        let mut args = bundler_version_arg(bundler_version);
        args.extend(["install", "--jobs", "20", "--retry", "5"].map(String::from));
        self.create("bundle", args)
    }

    pub fn bundle_exec(&self, name: &str, args: &[String], bundler_version: Option<&str>) -> CommandSpec {
        let mut bundle_args = bundler_version_arg(bundler_version);
        bundle_args.push("exec".to_string());
        bundle_args.push(name.to_string());
        bundle_args.extend(args.iter().cloned());
        self.create("bundle", bundle_args)
    }
}

// bundle _2.4.10_ install
fn bundler_version_arg(version: Option<&str>) -> Vec<String> {
    version.map(|v| vec![format!("_{v}_")]).unwrap_or_default()
}
