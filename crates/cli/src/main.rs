//! `grove` command-line tool.

mod checks;
mod cli;
mod commands;
#[cfg(test)]
mod tests;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	let mut stdout = std::io::stdout();
	let ok = match &cli.command {
		Command::Check(args) => !commands::check(args, &mut stdout).await?,
		Command::Dump { file, cst } => {
			commands::dump(file, *cst, &mut stdout)?;
			true
		}
		Command::Transfer { file } => commands::transfer(file, &mut stdout)?,
	};
	stdout.flush()?;
	Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("grove_cli=debug,grove_workspace=debug,grove_worker=debug,info")
		} else {
			EnvFilter::new("warn")
		}
	});
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(true).init();
}
