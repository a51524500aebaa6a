use std::io;

use grove_primitives::OperationCancelled;
use grove_worker::ParseError;
use thiserror::Error;
use url::Url;

/// Failures that abort a workspace operation.
///
/// Problems inside a single document (syntax errors, unresolved references,
/// failing validation checks) are never reported here; they end up as
/// diagnostics on the document.
#[derive(Debug, Error)]
pub enum WorkspaceError {
	#[error("workspace build cancelled")]
	Cancelled(#[from] OperationCancelled),

	/// The parser itself failed, e.g. a worker crashed.
	#[error("parsing {uri} failed: {source}")]
	Parse {
		uri: Url,
		#[source]
		source: ParseError,
	},

	#[error("failed to read {uri}: {source}")]
	Read {
		uri: Url,
		#[source]
		source: io::Error,
	},

	#[error("a document with uri {0} is already present")]
	DuplicateDocument(Url),
}

impl WorkspaceError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled(_))
	}

	pub(crate) fn parse(uri: &Url, source: ParseError) -> Self {
		if source.is_cancelled() {
			Self::Cancelled(OperationCancelled)
		} else {
			Self::Parse { uri: uri.clone(), source }
		}
	}
}

pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
