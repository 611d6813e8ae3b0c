//! `lanestep completions <shell>`: completion scripts for running the step
//! by hand outside the CI runner.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory};
use clap_complete::{Shell, generate};

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate the script for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

fn write_script(shell: Shell, out: &mut dyn Write) {
    let mut cmd = crate::Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, out);
}

pub fn generate_completions(args: &CompletionsArgs) -> Result<()> {
    match &args.output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_script(args.shell, &mut file);
            file.flush()
                .with_context(|| format!("Failed to write {}", path.display()))
        }
        None => {
            write_script(args.shell, &mut io::stdout());
            Ok(())
        }
    }
}
