use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::TaskClass;

/// Snapshot of one worker slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
	pub name: String,
	pub class: TaskClass,
	/// Generation of the worker currently occupying the slot.
	pub generation: u64,
	/// Times the slot's worker was discarded and recreated.
	pub restarts: usize,
	/// Requests in flight on the slot.
	pub pending: usize,
	/// Why the previous worker of the slot went away.
	pub last_exit: Option<String>,
}

/// In-memory worker registry for status snapshots.
#[derive(Debug, Default, Clone)]
pub struct WorkerRegistry {
	inner: Arc<RwLock<HashMap<String, WorkerRecord>>>,
}

impl WorkerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces the record with the same name.
	pub fn upsert(&self, record: WorkerRecord) {
		self.inner.write().insert(record.name.clone(), record);
	}

	/// Applies `f` to the named record, if present.
	pub fn update(&self, name: &str, f: impl FnOnce(&mut WorkerRecord)) {
		if let Some(record) = self.inner.write().get_mut(name) {
			f(record);
		}
	}

	pub fn get(&self, name: &str) -> Option<WorkerRecord> {
		self.inner.read().get(name).cloned()
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<WorkerRecord> {
		let mut records: Vec<_> = self.inner.read().values().cloned().collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}
}
