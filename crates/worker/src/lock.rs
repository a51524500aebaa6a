//! Workspace-wide read/write lock.
//!
//! Writes run one at a time in submission order. Queuing a write cancels
//! the token of the previously queued or running write, so only the newest
//! write is expected to finish its work. Reads wait for every write queued
//! before them; all pending reads are then released together and run in
//! parallel. Writes take priority over reads that are still waiting.
//!
//! A failing or panicking action only affects its own caller; the queue
//! keeps draining.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use grove_primitives::{BoxFutureStatic, CancelToken, is_operation_cancelled};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::join_set::WorkerJoinSet;
use crate::{TaskClass, join_error_panic_message, spawn};

/// Failure of a locked action, as seen by its caller.
#[derive(Debug, Error)]
pub enum LockError<E> {
	/// The action returned an error.
	#[error(transparent)]
	Failed(E),

	#[error("locked action panicked: {0}")]
	Panicked(String),

	/// The runtime dropped the action before it finished.
	#[error("locked action was dropped before completing")]
	Dropped,
}

impl<E: std::error::Error + 'static> LockError<E> {
	/// True when the action failed because it was cancelled.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Failed(err) if is_operation_cancelled(err))
	}
}

type Job = Box<dyn FnOnce() -> BoxFutureStatic<()> + Send>;

#[derive(Default)]
struct State {
	writes: VecDeque<Job>,
	reads: VecDeque<Job>,
	/// Whether a driver task is draining the queues.
	running: bool,
	/// Token handed to the newest write.
	current_write: Option<CancelToken>,
}

/// Serializes workspace mutations against readers.
#[derive(Clone, Default)]
pub struct WorkspaceLock {
	state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for WorkspaceLock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("WorkspaceLock")
			.field("writes", &state.writes.len())
			.field("reads", &state.reads.len())
			.field("running", &state.running)
			.finish()
	}
}

impl WorkspaceLock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues a write and cancels the previous one.
	///
	/// The action receives a fresh token that is cancelled as soon as another
	/// write is queued or [`WorkspaceLock::cancel_write`] is called.
	pub fn write<F, Fut, T, E>(&self, action: F) -> LockTicket<T, E>
	where
		F: FnOnce(CancelToken) -> Fut + Send + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		T: Send + 'static,
		E: Send + 'static,
	{
		let token = CancelToken::new();
		let (ticket, job) = job(TaskClass::Interactive, {
			let token = token.clone();
			move || action(token)
		});
		let mut state = self.state.lock();
		if let Some(previous) = state.current_write.replace(token) {
			previous.cancel();
		}
		state.writes.push_back(job);
		tracing::trace!(writes = state.writes.len(), reads = state.reads.len(), "lock.write.queued");
		self.ensure_driver(&mut state);
		ticket
	}

	/// Queues a read behind every write queued so far.
	pub fn read<F, Fut, T, E>(&self, action: F) -> LockTicket<T, E>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		T: Send + 'static,
		E: Send + 'static,
	{
		let (ticket, job) = job(TaskClass::Interactive, action);
		let mut state = self.state.lock();
		state.reads.push_back(job);
		tracing::trace!(writes = state.writes.len(), reads = state.reads.len(), "lock.read.queued");
		self.ensure_driver(&mut state);
		ticket
	}

	/// Runs a read right away, ahead of everything queued.
	///
	/// Only for actions that already awaited the writes they depend on.
	pub fn read_immediate<F, Fut, T, E>(&self, action: F) -> LockTicket<T, E>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		T: Send + 'static,
		E: Send + 'static,
	{
		let (ticket, job) = job(TaskClass::Interactive, action);
		spawn(TaskClass::Interactive, job());
		ticket
	}

	/// Cancels the token of the newest write, if any.
	pub fn cancel_write(&self) {
		if let Some(token) = &self.state.lock().current_write {
			token.cancel();
		}
	}

	fn ensure_driver(&self, state: &mut State) {
		if state.running {
			return;
		}
		state.running = true;
		spawn(TaskClass::Background, drive(Arc::clone(&self.state)));
	}
}

enum Turn {
	Write(Job),
	Reads(Vec<Job>),
}

async fn drive(state: Arc<Mutex<State>>) {
	loop {
		let turn = {
			let mut state = state.lock();
			if let Some(write) = state.writes.pop_front() {
				Turn::Write(write)
			} else if !state.reads.is_empty() {
				Turn::Reads(state.reads.drain(..).collect())
			} else {
				state.running = false;
				return;
			}
		};
		match turn {
			Turn::Write(job) => job().await,
			Turn::Reads(jobs) => {
				let count = jobs.len();
				let mut set = WorkerJoinSet::new(TaskClass::Interactive);
				for job in jobs {
					set.spawn(job());
				}
				set.join_all().await;
				tracing::trace!(count, "lock.reads.done");
			}
		}
	}
}

/// Wraps `action` so its outcome, panics included, reaches the returned
/// ticket. The wrapped job itself never panics.
fn job<F, Fut, T, E>(class: TaskClass, action: F) -> (LockTicket<T, E>, Job)
where
	F: FnOnce() -> Fut + Send + 'static,
	Fut: Future<Output = Result<T, E>> + Send + 'static,
	T: Send + 'static,
	E: Send + 'static,
{
	let (tx, rx) = oneshot::channel();
	let job: Job = Box::new(move || {
		Box::pin(async move {
			let outcome = match spawn(class, action()).await {
				Ok(Ok(value)) => Ok(value),
				Ok(Err(err)) => Err(LockError::Failed(err)),
				Err(join) => match join_error_panic_message(join) {
					Some(message) => {
						tracing::error!(%message, "lock.action.panicked");
						Err(LockError::Panicked(message))
					}
					None => Err(LockError::Dropped),
				},
			};
			let _ = tx.send(outcome);
		})
	});
	(LockTicket { rx }, job)
}

/// Completion of a queued action. The action runs whether or not the ticket
/// is awaited.
#[must_use = "the ticket resolves to the action's outcome"]
pub struct LockTicket<T, E> {
	rx: oneshot::Receiver<Result<T, LockError<E>>>,
}

impl<T, E> Future for LockTicket<T, E> {
	type Output = Result<T, LockError<E>>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx).poll(cx).map(|received| received.unwrap_or(Err(LockError::Dropped)))
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use grove_primitives::OperationCancelled;

	use super::*;

	type Log = Arc<Mutex<Vec<&'static str>>>;

	fn push(log: &Log, entry: &'static str) {
		log.lock().push(entry);
	}

	#[tokio::test]
	async fn writes_run_before_later_reads() {
		let lock = WorkspaceLock::new();
		let log = Log::default();

		let w1 = lock.write({
			let log = log.clone();
			move |_| async move {
				tokio::time::sleep(Duration::from_millis(20)).await;
				push(&log, "w1");
				Ok::<_, OperationCancelled>(())
			}
		});
		let rd = lock.read({
			let log = log.clone();
			move || async move {
				push(&log, "rd");
				Ok::<_, OperationCancelled>(())
			}
		});
		let w2 = lock.write({
			let log = log.clone();
			move |_| async move {
				push(&log, "w2");
				Ok::<_, OperationCancelled>(())
			}
		});

		w1.await.unwrap();
		w2.await.unwrap();
		rd.await.unwrap();
		assert_eq!(*log.lock(), ["w1", "w2", "rd"]);
	}

	#[tokio::test]
	async fn a_new_write_cancels_the_previous_one() {
		let lock = WorkspaceLock::new();
		let first = lock.write(|token: CancelToken| async move {
			token.cancelled().await;
			token.check()
		});
		let second = lock.write(|token: CancelToken| async move { token.check() });

		let err = first.await.unwrap_err();
		assert!(err.is_cancelled(), "{err}");
		second.await.unwrap();
	}

	#[tokio::test]
	async fn failures_do_not_poison_the_queue() {
		let lock = WorkspaceLock::new();
		let failing = lock.write(|_| async { Err::<(), _>(std::io::Error::other("disk on fire")) });
		let ok = lock.write(|_| async { Ok::<_, std::io::Error>(7) });

		let err = failing.await.unwrap_err();
		assert!(matches!(err, LockError::Failed(_)));
		assert!(!err.is_cancelled());
		assert_eq!(ok.await.unwrap(), 7);
	}

	#[tokio::test]
	async fn panics_are_reported_to_the_caller_only() {
		let lock = WorkspaceLock::new();
		let panicking = lock.write(|_| async {
			if true {
				panic!("write exploded");
			}
			Ok::<(), OperationCancelled>(())
		});
		let read = lock.read(|| async { Ok::<_, OperationCancelled>("still here") });

		match panicking.await {
			Err(LockError::Panicked(message)) => assert!(message.contains("write exploded")),
			other => panic!("unexpected outcome: {other:?}"),
		}
		assert_eq!(read.await.unwrap(), "still here");
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn queued_reads_run_in_parallel() {
		let lock = WorkspaceLock::new();
		let barrier = Arc::new(tokio::sync::Barrier::new(2));
		let reads: Vec<_> = (0..2)
			.map(|_| {
				let barrier = barrier.clone();
				lock.read(move || async move {
					barrier.wait().await;
					Ok::<_, OperationCancelled>(())
				})
			})
			.collect();
		for read in reads {
			tokio::time::timeout(Duration::from_secs(5), read).await.unwrap().unwrap();
		}
	}

	#[tokio::test]
	async fn read_immediate_skips_the_queue() {
		let lock = WorkspaceLock::new();
		let (release, wait) = oneshot::channel::<()>();
		let blocking = lock.write(move |_| async move {
			let _ = wait.await;
			Ok::<_, OperationCancelled>(())
		});

		let immediate = lock.read_immediate(|| async { Ok::<_, OperationCancelled>(1) });
		assert_eq!(tokio::time::timeout(Duration::from_secs(5), immediate).await.unwrap().unwrap(), 1);

		release.send(()).unwrap();
		blocking.await.unwrap();
	}

	#[tokio::test]
	async fn cancel_write_fires_the_current_token() {
		let lock = WorkspaceLock::new();
		let write = lock.write(|token: CancelToken| async move {
			token.cancelled().await;
			token.check()
		});
		tokio::task::yield_now().await;
		lock.cancel_write();
		assert!(write.await.unwrap_err().is_cancelled());
	}
}
