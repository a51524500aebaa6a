//! Concurrency core of the workbench: task classes and spawn helpers, the
//! workspace read/write lock, and the async parser strategies (in-process
//! and a pool of parser worker threads).

use std::any::Any;

mod class;
mod join_set;
/// Workspace-wide read/write lock.
pub mod lock;
/// Async parser strategies.
pub mod parser;
mod registry;
mod spawn;
mod token;

pub use class::TaskClass;
pub use join_set::WorkerJoinSet;
pub use lock::{LockError, LockTicket, WorkspaceLock};
pub use parser::{AsyncParser, InProcessParser, ParseError, ParseService, WorkerPoolOptions, WorkerPoolParser};
pub use registry::{WorkerRecord, WorkerRegistry};
pub use spawn::{spawn, spawn_named_thread};

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

/// Panic message of a failed task, or `None` when the task was cancelled.
pub fn join_error_panic_message(err: tokio::task::JoinError) -> Option<String> {
	err.try_into_panic().ok().map(|payload| panic_message(&*payload))
}
