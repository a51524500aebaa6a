use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(about = "Build, inspect and validate domain-model workspaces")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Log debug output (overridden by RUST_LOG)
	#[arg(short, long, global = true)]
	pub verbose: bool,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Build every document below a folder and print its diagnostics
	Check(CheckArgs),
	/// Print the syntax tree of a single file
	Dump {
		file: PathBuf,
		/// Print the concrete syntax tree instead
		#[arg(long)]
		cst: bool,
	},
	/// Send a file's parse result through the transfer encoding and back
	Transfer { file: PathBuf },
}

#[derive(Args, Debug)]
pub struct CheckArgs {
	/// Workspace folder
	pub folder: PathBuf,

	/// Configuration file (defaults to grove.toml in the folder)
	#[arg(long, value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// Parse on the current thread instead of the worker pool
	#[arg(long)]
	pub in_process: bool,
}
