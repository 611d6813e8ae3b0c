//! # lanestep-cli
//!
//! Binary entry point for Lanestep.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`, with the step's environment
//!   variables as fallbacks
//! - Logging initialization
//! - The step pipeline via `lanestep run` (the default)
//! - Shell completions via `lanestep completions`

mod completions;
mod config;
mod error_format;
mod step;

use std::io::{IsTerminal, stdout};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand, ValueEnum};
use completions::{CompletionsArgs, generate_completions};
use config::RunArgs;
use lanestep_adapters::{RubyCommandFactory, RubyInstallType, SystemExecutor};
use lanestep_core::BitriseClient;
use lanestep_proto::ProcessEnvironment;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::error_format::formatted_error;
use crate::step::Step;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// Lanestep - installs fastlane and runs a lane on CI
#[derive(Parser, Debug)]
#[command(name = "lanestep", version, about)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install fastlane and run the lane (default if no subcommand given)
    Run(RunArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

fn init_logging(verbose: bool, color: ColorMode) {
    let filter = if verbose { "debug" } else { "info" };
    // RUST_LOG takes precedence over the verbosity inputs.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color.should_use_colors())
        .with_target(false)
        .init();
}

async fn run_command(args: RunArgs) -> Result<()> {
    args.print();

    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let config = args.into_config(&cwd).context("Issue with input")?;
    debug!("{:?}", config);

    let env = ProcessEnvironment;
    let provider = BitriseClient::new().context("Failed to create HTTP client")?;
    let step = Step {
        env: &env,
        provider: &provider,
        executor: &SystemExecutor,
        factory: RubyCommandFactory::new(RubyInstallType::detect()),
        has_rbenv: which::which("rbenv").is_ok(),
    };
    step.run(&config).await
}

fn parse_cli() -> Result<(Cli, Commands), clap::Error> {
    let mut cli = Cli::try_parse()?;
    let command = match cli.command.take() {
        Some(command) => command,
        // Inputs come from the environment when no subcommand is given.
        None => Commands::Run(RunArgs::try_parse_from([env!("CARGO_BIN_NAME")])?),
    };
    Ok((cli, command))
}

/// `--help` and `--version` are reported through clap errors too.
fn is_informational(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

fn report_parse_error(err: clap::Error) -> ExitCode {
    if is_informational(err.kind()) {
        if let Err(e) = err.print() {
            eprintln!("{e}");
        }
        return ExitCode::SUCCESS;
    }

    init_logging(false, ColorMode::Auto);
    let err = anyhow::Error::new(err).context("Issue with input");
    error!("{}", formatted_error(&err));
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let (cli, command) = match parse_cli() {
        Ok(parsed) => parsed,
        Err(err) => return report_parse_error(err),
    };

    let verbose_log = matches!(&command, Commands::Run(args) if bool::from(args.verbose_log));
    init_logging(cli.verbose || verbose_log, cli.color);

    let result = match command {
        Commands::Run(args) => run_command(args).await,
        Commands::Completions(args) => generate_completions(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", formatted_error(&err));
            ExitCode::FAILURE
        }
    }
}
