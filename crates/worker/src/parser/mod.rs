//! Async parser strategies.
//!
//! Lexer and parser errors are part of a successful [`ParseResult`]. A parse
//! request is only rejected when it is cancelled or when the machinery
//! around the parser fails (a worker crash, a broken transfer stream).

use std::sync::Arc;

use async_trait::async_trait;
use grove_primitives::{CancelToken, Interrupt, OperationCancelled};
use grove_syntax::{Grammar, ParseAbort, ParseResult, Parser};
use grove_transfer::{ReassembleError, TransferError};
use thiserror::Error;

mod pool;

pub use pool::{WorkerPoolOptions, WorkerPoolParser};

#[derive(Debug, Error)]
pub enum ParseError {
	#[error(transparent)]
	Cancelled(#[from] OperationCancelled),

	#[error("parser worker {worker} crashed: {message}")]
	WorkerCrashed { worker: String, message: String },

	#[error("parser worker pool is shut down")]
	Disconnected,

	#[error("failed to spawn parser worker: {0}")]
	Spawn(#[source] std::io::Error),

	#[error(transparent)]
	Transfer(#[from] TransferError),

	#[error(transparent)]
	Reassemble(#[from] ReassembleError),

	#[error("'{0}' is not a node-producing rule of this grammar")]
	InvalidEntry(String),
}

impl ParseError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled(_))
	}
}

impl From<ParseAbort> for ParseError {
	fn from(abort: ParseAbort) -> Self {
		match abort {
			ParseAbort::Cancelled(cancelled) => Self::Cancelled(cancelled),
			ParseAbort::InvalidEntry(name) => Self::InvalidEntry(name),
		}
	}
}

/// Synchronous parse entry point run on the caller's task or on a worker
/// thread.
pub trait ParseService: Send + Sync + 'static {
	fn grammar(&self) -> &Arc<Grammar>;

	fn parse(&self, text: &str, entry: Option<&str>, interrupt: &dyn Interrupt) -> Result<ParseResult, ParseAbort>;
}

impl ParseService for Parser {
	fn grammar(&self) -> &Arc<Grammar> {
		Parser::grammar(self)
	}

	fn parse(&self, text: &str, entry: Option<&str>, interrupt: &dyn Interrupt) -> Result<ParseResult, ParseAbort> {
		self.parse_rule(text, entry, interrupt)
	}
}

#[async_trait]
pub trait AsyncParser: Send + Sync {
	/// Parses `text` from `entry`, or from the grammar's entry rule.
	async fn parse_with(&self, text: &str, entry: Option<&str>, token: &CancelToken) -> Result<ParseResult, ParseError>;

	async fn parse(&self, text: &str, token: &CancelToken) -> Result<ParseResult, ParseError> {
		self.parse_with(text, None, token).await
	}
}

/// Parses on the calling task, polling the token while it works.
#[derive(Clone)]
pub struct InProcessParser {
	service: Arc<dyn ParseService>,
}

impl InProcessParser {
	pub fn new(service: Arc<dyn ParseService>) -> Self {
		Self { service }
	}
}

#[async_trait]
impl AsyncParser for InProcessParser {
	async fn parse_with(&self, text: &str, entry: Option<&str>, token: &CancelToken) -> Result<ParseResult, ParseError> {
		token.interrupt_and_check().await?;
		Ok(self.service.parse(text, entry, token)?)
	}
}

#[cfg(test)]
mod tests;
