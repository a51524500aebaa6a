//! Pool of long-lived parser worker threads.
//!
//! Each worker owns two unidirectional channels: jobs flow in over a std
//! channel, replies flow back over a Tokio channel. Replies carry an encoded
//! transfer stream that the caller reassembles against its own grammar.
//!
//! On cancellation the worker's cancel flag is raised. A worker that does
//! not answer within the termination delay is discarded: its channels are
//! dropped, the slot is freed and a new worker is created on demand. The
//! stray thread exits on its own once the parser notices the flag.
//!
//! A worker dropped without being handed back, for example because the
//! request future was dropped mid-parse, raises its job's cancel flag and
//! frees its slot, so the pool never loses capacity.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use grove_primitives::{CancelToken, OperationCancelled};
use grove_syntax::{GrammarElementIds, ParseAbort, ParseResult};
use grove_transfer::{decode, disassemble, encode, reassemble};
use parking_lot::Mutex;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};

use super::{AsyncParser, ParseError, ParseService};
use crate::registry::{WorkerRecord, WorkerRegistry};
use crate::token::GenerationClock;
use crate::{TaskClass, panic_message, spawn_named_thread};

/// Default number of worker threads.
pub const DEFAULT_THREADS: usize = 8;
/// Default grace period between cancelling a request and discarding its
/// worker.
pub const DEFAULT_TERMINATION_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolOptions {
	pub threads: usize,
	pub termination_delay: Duration,
}

impl Default for WorkerPoolOptions {
	fn default() -> Self {
		Self {
			threads: DEFAULT_THREADS,
			termination_delay: DEFAULT_TERMINATION_DELAY,
		}
	}
}

struct Job {
	text: String,
	entry: Option<String>,
	cancel: Arc<AtomicBool>,
	span: tracing::Span,
}

enum Reply {
	Parsed(Vec<u8>),
	Cancelled,
	InvalidEntry(String),
	Crashed(String),
}

struct Worker {
	slot: usize,
	name: String,
	jobs: mpsc::Sender<Job>,
	replies: tokio_mpsc::UnboundedReceiver<Reply>,
	/// Cancel flag of the job in flight, if any.
	in_flight: Option<Arc<AtomicBool>>,
	pool: Weak<PoolInner>,
}

impl Drop for Worker {
	fn drop(&mut self) {
		let pool = self.pool.upgrade();
		if let Some(cancel) = self.in_flight.take() {
			cancel.store(true, Ordering::Release);
			tracing::warn!(worker = %self.name, "parser.worker.abandoned");
			if let Some(pool) = &pool {
				pool.registry.update(&self.name, |record| {
					record.pending = 0;
					record.last_exit = Some("request dropped mid-parse".to_string());
				});
			}
		}
		// Never reached with the state lock held: workers leave the pool
		// state before they are dropped.
		if let Some(pool) = pool {
			pool.free_slot(self.slot);
		}
	}
}

struct PoolState {
	idle: Vec<Worker>,
	free_slots: Vec<usize>,
	waiters: VecDeque<oneshot::Sender<Worker>>,
}

struct PoolInner {
	service: Arc<dyn ParseService>,
	options: WorkerPoolOptions,
	state: Mutex<PoolState>,
	registry: WorkerRegistry,
	generations: GenerationClock,
	me: Weak<PoolInner>,
}

/// Parses on a bounded pool of worker threads.
#[derive(Clone)]
pub struct WorkerPoolParser {
	inner: Arc<PoolInner>,
}

impl WorkerPoolParser {
	pub fn new(service: Arc<dyn ParseService>, options: WorkerPoolOptions) -> Self {
		let threads = options.threads.max(1);
		Self {
			inner: Arc::new_cyclic(|me| PoolInner {
				service,
				options: WorkerPoolOptions { threads, ..options },
				state: Mutex::new(PoolState {
					idle: Vec::new(),
					free_slots: (0..threads).rev().collect(),
					waiters: VecDeque::new(),
				}),
				registry: WorkerRegistry::new(),
				generations: GenerationClock::new(),
				me: me.clone(),
			}),
		}
	}

	pub fn options(&self) -> WorkerPoolOptions {
		self.inner.options
	}

	/// Status of every worker slot that has been used so far.
	pub fn registry(&self) -> &WorkerRegistry {
		&self.inner.registry
	}

	async fn acquire(&self, token: &CancelToken) -> Result<Worker, ParseError> {
		let mut rx = {
			let mut state = self.inner.state.lock();
			if let Some(worker) = state.idle.pop() {
				return Ok(worker);
			}
			if let Some(slot) = state.free_slots.pop() {
				drop(state);
				return self.inner.start_worker(slot).inspect_err(|_| self.inner.state.lock().free_slots.push(slot));
			}
			let (tx, rx) = oneshot::channel();
			state.waiters.push_back(tx);
			rx
		};

		tokio::select! {
			biased;
			_ = token.cancelled() => {
				rx.close();
				if let Ok(worker) = rx.try_recv() {
					self.inner.release(worker);
				}
				Err(ParseError::Cancelled(OperationCancelled))
			}
			worker = &mut rx => worker.map_err(|_| ParseError::Disconnected),
		}
	}
}

impl PoolInner {
	fn worker_name(slot: usize) -> String {
		format!("grove-parser-{slot}")
	}

	fn start_worker(&self, slot: usize) -> Result<Worker, ParseError> {
		let name = Self::worker_name(slot);
		let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
		let (replies_tx, replies_rx) = tokio_mpsc::unbounded_channel();
		let service = Arc::clone(&self.service);
		spawn_named_thread(TaskClass::CpuBlocking, name.clone(), move || run_worker(service, jobs_rx, replies_tx)).map_err(ParseError::Spawn)?;

		let generation = self.generations.next();
		match self.registry.get(&name) {
			Some(_) => self.registry.update(&name, |record| {
				record.generation = generation;
				record.restarts += 1;
			}),
			None => self.registry.upsert(WorkerRecord {
				name: name.clone(),
				class: TaskClass::CpuBlocking,
				generation,
				restarts: 0,
				pending: 0,
				last_exit: None,
			}),
		}
		tracing::debug!(worker = %name, generation, "parser.worker.start");
		Ok(Worker {
			slot,
			name,
			jobs: jobs_tx,
			replies: replies_rx,
			in_flight: None,
			pool: self.me.clone(),
		})
	}

	/// Hands a healthy worker to the oldest live waiter, or parks it.
	fn release(&self, mut worker: Worker) {
		worker.in_flight = None;
		self.registry.update(&worker.name, |record| record.pending = 0);
		let mut state = self.state.lock();
		while let Some(waiter) = state.waiters.pop_front() {
			match waiter.send(worker) {
				Ok(()) => return,
				Err(returned) => worker = returned,
			}
		}
		state.idle.push(worker);
	}

	/// Drops a worker; its slot is freed for a replacement.
	fn discard(&self, mut worker: Worker, reason: &str) {
		tracing::warn!(worker = %worker.name, reason, "parser.worker.discard");
		self.registry.update(&worker.name, |record| {
			record.pending = 0;
			record.last_exit = Some(reason.to_string());
		});
		worker.in_flight = None;
		drop(worker);
	}

	/// Returns the slot of a dropped worker. Must not be called with the
	/// state lock held.
	fn free_slot(&self, slot: usize) {
		// Callers parked while every slot was busy get a fresh worker right
		// away instead of waiting for some other release.
		let mut state = self.state.lock();
		if !state.waiters.iter().any(|waiter| !waiter.is_closed()) {
			state.free_slots.push(slot);
			return;
		}
		drop(state);
		match self.start_worker(slot) {
			Ok(worker) => self.release(worker),
			Err(err) => {
				tracing::error!(error = %err, "parser.worker.restart_failed");
				self.state.lock().free_slots.push(slot);
			}
		}
	}
}

#[async_trait]
impl AsyncParser for WorkerPoolParser {
	async fn parse_with(&self, text: &str, entry: Option<&str>, token: &CancelToken) -> Result<ParseResult, ParseError> {
		token.check()?;
		let mut worker = self.acquire(token).await?;
		let inner = &self.inner;
		let cancel = Arc::new(AtomicBool::new(false));
		let job = Job {
			text: text.to_string(),
			entry: entry.map(str::to_string),
			cancel: Arc::clone(&cancel),
			span: tracing::Span::current(),
		};
		worker.in_flight = Some(Arc::clone(&cancel));
		if worker.jobs.send(job).is_err() {
			let name = worker.name.clone();
			inner.discard(worker, "worker thread exited");
			return Err(ParseError::WorkerCrashed {
				worker: name,
				message: "worker thread exited".to_string(),
			});
		}
		inner.registry.update(&worker.name, |record| record.pending = 1);

		let reply = tokio::select! {
			biased;
			reply = worker.replies.recv() => reply,
			_ = token.cancelled() => {
				cancel.store(true, Ordering::Release);
				match tokio::time::timeout(inner.options.termination_delay, worker.replies.recv()).await {
					Ok(Some(Reply::Crashed(message))) => inner.discard(worker, &message),
					Ok(Some(_)) => inner.release(worker),
					Ok(None) => inner.discard(worker, "worker thread exited"),
					Err(_) => inner.discard(worker, "terminated after cancellation"),
				}
				return Err(ParseError::Cancelled(OperationCancelled));
			}
		};

		match reply {
			Some(Reply::Parsed(bytes)) => {
				inner.release(worker);
				let grammar = inner.service.grammar();
				let instructions = decode(grammar.element_ids(), &bytes)?;
				Ok(reassemble(instructions, grammar)?)
			}
			Some(Reply::Cancelled) => {
				inner.release(worker);
				Err(ParseError::Cancelled(OperationCancelled))
			}
			Some(Reply::InvalidEntry(name)) => {
				inner.release(worker);
				Err(ParseError::InvalidEntry(name))
			}
			Some(Reply::Crashed(message)) => {
				let name = worker.name.clone();
				inner.discard(worker, &message);
				Err(ParseError::WorkerCrashed { worker: name, message })
			}
			None => {
				let name = worker.name.clone();
				inner.discard(worker, "worker thread exited");
				Err(ParseError::WorkerCrashed {
					worker: name,
					message: "worker thread exited".to_string(),
				})
			}
		}
	}
}

fn run_worker(service: Arc<dyn ParseService>, jobs: mpsc::Receiver<Job>, replies: tokio_mpsc::UnboundedSender<Reply>) {
	let ids: Arc<GrammarElementIds> = Arc::clone(service.grammar().element_ids());
	while let Ok(job) = jobs.recv() {
		let _guard = job.span.enter();
		let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| service.parse(&job.text, job.entry.as_deref(), &*job.cancel)));
		let reply = match outcome {
			Ok(Ok(result)) => match encode(&ids, disassemble(&result, &ids)) {
				Ok(bytes) => Reply::Parsed(bytes),
				Err(err) => Reply::Crashed(err.to_string()),
			},
			Ok(Err(ParseAbort::Cancelled(_))) => Reply::Cancelled,
			Ok(Err(ParseAbort::InvalidEntry(name))) => Reply::InvalidEntry(name),
			Err(payload) => {
				let _ = replies.send(Reply::Crashed(panic_message(&*payload)));
				break;
			}
		};
		if replies.send(reply).is_err() {
			break;
		}
	}
	tracing::trace!("parser.worker.exit");
}
