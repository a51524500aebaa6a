use std::future::Future;

use tokio::task::{JoinError, JoinSet};

use crate::TaskClass;

/// A Tokio [`JoinSet`] whose tasks land on the worker runtime.
#[derive(Debug)]
pub struct WorkerJoinSet<T> {
	class: TaskClass,
	inner: JoinSet<T>,
}

impl<T> WorkerJoinSet<T>
where
	T: Send + 'static,
{
	pub fn new(class: TaskClass) -> Self {
		Self { class, inner: JoinSet::new() }
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn spawn<F>(&mut self, fut: F)
	where
		F: Future<Output = T> + Send + 'static,
	{
		tracing::trace!(worker_class = self.class.as_str(), pending = self.inner.len(), "worker.join_set.spawn");
		self.inner.spawn_on(fut, &crate::spawn::runtime_handle());
	}

	/// Waits for the next completed task.
	pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
		self.inner.join_next().await
	}

	/// Waits for every task, returning how many panicked.
	pub async fn join_all(&mut self) -> usize {
		let mut panicked = 0;
		while let Some(result) = self.join_next().await {
			if result.is_err() {
				panicked += 1;
			}
		}
		panicked
	}
}
