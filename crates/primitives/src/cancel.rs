//! Cooperative cancellation.
//!
//! A [`CancelToken`] is advisory: long-running code polls it through
//! [`CancelToken::check`] or [`CancelToken::interrupt_and_check`] and bails
//! out with [`OperationCancelled`]. Nothing is ever pre-empted by a token.

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

static INTERRUPTION_PERIOD_MS: AtomicU64 = AtomicU64::new(10);

/// Sets how long cancellable work may run before
/// [`CancelToken::interrupt_and_check`] yields back to the scheduler.
pub fn set_interruption_period(period: Duration) {
	INTERRUPTION_PERIOD_MS.store(period.as_millis() as u64, Ordering::Relaxed);
}

/// Returns the current interruption period.
pub fn interruption_period() -> Duration {
	Duration::from_millis(INTERRUPTION_PERIOD_MS.load(Ordering::Relaxed))
}

fn epoch() -> Instant {
	static EPOCH: OnceLock<Instant> = OnceLock::new();
	*EPOCH.get_or_init(Instant::now)
}

fn now_ms() -> u64 {
	epoch().elapsed().as_millis() as u64
}

/// Sentinel error returned by every cancellable operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct OperationCancelled;

/// Returns true when `err` or any error in its source chain is
/// [`OperationCancelled`].
pub fn is_operation_cancelled(err: &(dyn Error + 'static)) -> bool {
	let mut current = Some(err);
	while let Some(err) = current {
		if err.is::<OperationCancelled>() {
			return true;
		}
		current = err.source();
	}
	false
}

/// Shared cancellation token threaded explicitly through long-running work.
#[derive(Debug, Clone)]
pub struct CancelToken {
	cancel: CancellationToken,
	last_yield: Arc<AtomicU64>,
}

impl Default for CancelToken {
	fn default() -> Self {
		Self::new()
	}
}

impl CancelToken {
	/// Creates a token that is not cancelled.
	pub fn new() -> Self {
		Self {
			cancel: CancellationToken::new(),
			last_yield: Arc::new(AtomicU64::new(now_ms())),
		}
	}

	/// Creates a token that is already cancelled.
	pub fn already_cancelled() -> Self {
		let token = Self::new();
		token.cancel();
		token
	}

	/// Creates a child token, cancelled whenever `self` is.
	pub fn child(&self) -> Self {
		Self {
			cancel: self.cancel.child_token(),
			last_yield: Arc::new(AtomicU64::new(now_ms())),
		}
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Fails with [`OperationCancelled`] when cancellation is requested.
	pub fn check(&self) -> Result<(), OperationCancelled> {
		if self.is_cancelled() { Err(OperationCancelled) } else { Ok(()) }
	}

	/// Yields to the scheduler once per interruption period, then checks for
	/// cancellation.
	///
	/// Awaiting this between documents keeps a long build responsive to other
	/// tasks queued on the same runtime.
	pub async fn interrupt_and_check(&self) -> Result<(), OperationCancelled> {
		let now = now_ms();
		let last = self.last_yield.load(Ordering::Relaxed);
		if now.saturating_sub(last) >= interruption_period().as_millis() as u64 {
			self.last_yield.store(now, Ordering::Relaxed);
			tokio::task::yield_now().await;
		}
		self.check()
	}
}

/// Synchronous cancellation probe for tight loops that cannot await.
pub trait Interrupt {
	fn check(&self) -> Result<(), OperationCancelled>;
}

impl Interrupt for CancelToken {
	fn check(&self) -> Result<(), OperationCancelled> {
		CancelToken::check(self)
	}
}

impl Interrupt for AtomicBool {
	fn check(&self) -> Result<(), OperationCancelled> {
		if self.load(Ordering::Acquire) { Err(OperationCancelled) } else { Ok(()) }
	}
}

/// An [`Interrupt`] that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Interrupt for Never {
	fn check(&self) -> Result<(), OperationCancelled> {
		Ok(())
	}
}
