//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io {
		path: PathBuf,
		#[source]
		error: std::io::Error,
	},

	/// The file is not valid TOML or does not match the schema.
	#[error("invalid configuration in {path}: {error}")]
	Parse {
		path: PathBuf,
		#[source]
		error: toml::de::Error,
	},
}

pub type Result<T> = std::result::Result<T, ConfigError>;
