//! Workspace configuration.
//!
//! Grove reads an optional `grove.toml` from the workspace root:
//!
//! ```toml
//! [parser]
//! mode = "worker"          # or "in-process"
//! threads = 4
//! termination_delay_ms = 200
//!
//! [build]
//! validation = "all"       # or "none"
//! interruption_period_ms = 10
//!
//! [workspace]
//! extensions = [".dmodel"]
//! exclude = ["node_modules", "out", "target"]
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Unknown keys are rejected to catch typos early.

pub mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use error::{ConfigError, Result};

/// File name looked up by [`GroveConfig::discover`].
pub const CONFIG_FILE: &str = "grove.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroveConfig {
	pub parser: ParserConfig,
	pub build: BuildConfig,
	pub workspace: WorkspaceConfig,
}

/// Where documents are parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserMode {
	/// A pool of worker threads; parse results cross back as encoded
	/// transfer buffers.
	#[default]
	Worker,
	InProcess,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
	pub mode: ParserMode,
	pub threads: usize,
	/// Grace period before a worker ignoring cancellation is discarded.
	pub termination_delay_ms: u64,
}

impl Default for ParserConfig {
	fn default() -> Self {
		Self {
			mode: ParserMode::default(),
			threads: 8,
			termination_delay_ms: 200,
		}
	}
}

impl ParserConfig {
	pub fn termination_delay(&self) -> Duration {
		Duration::from_millis(self.termination_delay_ms)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
	#[default]
	All,
	None,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
	pub validation: ValidationMode,
	/// How long a build may run before yielding to other tasks.
	pub interruption_period_ms: u64,
}

impl Default for BuildConfig {
	fn default() -> Self {
		Self {
			validation: ValidationMode::default(),
			interruption_period_ms: 10,
		}
	}
}

impl BuildConfig {
	pub fn interruption_period(&self) -> Duration {
		Duration::from_millis(self.interruption_period_ms)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
	/// File extensions, with leading dot, loaded as documents.
	pub extensions: Vec<String>,
	/// Directory names skipped while loading workspace folders.
	pub exclude: Vec<String>,
}

impl Default for WorkspaceConfig {
	fn default() -> Self {
		Self {
			extensions: vec![".dmodel".to_string()],
			exclude: ["node_modules", "out", "target"].map(String::from).into(),
		}
	}
}

impl GroveConfig {
	/// Parses TOML text. `path` only labels errors.
	pub fn parse(input: &str, path: &Path) -> Result<Self> {
		toml::from_str(input).map_err(|error| ConfigError::Parse {
			path: path.to_path_buf(),
			error,
		})
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::parse(&content, path)
	}

	/// Loads `grove.toml` from `root`, falling back to the defaults when the
	/// file does not exist. Also returns the path that was loaded.
	pub fn discover(root: impl AsRef<Path>) -> Result<(Self, Option<PathBuf>)> {
		let path = root.as_ref().join(CONFIG_FILE);
		if !path.is_file() {
			return Ok((Self::default(), None));
		}
		let config = Self::load(&path)?;
		Ok((config, Some(path)))
	}
}
