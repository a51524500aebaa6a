use std::future::Future;
use std::io;
use std::sync::Arc;

use grove_worker::{LockTicket, WorkspaceLock};
use url::Url;

use crate::builder::{BuildOptions, DocumentBuilder};
use crate::error::WorkspaceError;
use crate::fs::FileSystemProvider;
use crate::services::Services;

/// Directory names never traversed by [`WorkspaceManager::initialize`].
pub const DEFAULT_EXCLUDES: [&str; 3] = ["node_modules", "out", "target"];

/// Entry point for editors and tools: loads workspace folders and routes
/// every mutation through one [`WorkspaceLock`].
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
	builder: Arc<DocumentBuilder>,
	lock: WorkspaceLock,
	exclude: Arc<[String]>,
	initial_build: BuildOptions,
}

impl WorkspaceManager {
	pub fn new(builder: DocumentBuilder) -> Self {
		Self {
			builder: Arc::new(builder),
			lock: WorkspaceLock::new(),
			exclude: DEFAULT_EXCLUDES.iter().map(|name| name.to_string()).collect(),
			initial_build: BuildOptions::default(),
		}
	}

	/// Directory names to skip while loading folders. Hidden directories are
	/// always skipped.
	pub fn with_exclude(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.exclude = names.into_iter().map(Into::into).collect();
		self
	}

	/// Options of the build run by [`WorkspaceManager::initialize`].
	pub fn with_initial_build(mut self, options: BuildOptions) -> Self {
		self.initial_build = options;
		self
	}

	pub fn services(&self) -> &Arc<Services> {
		self.builder.services()
	}

	pub fn builder(&self) -> &Arc<DocumentBuilder> {
		&self.builder
	}

	pub fn lock(&self) -> &WorkspaceLock {
		&self.lock
	}

	/// Loads every language file below `folders` and builds them all.
	/// Resolves to the uris that were loaded.
	pub fn initialize(&self, folders: Vec<Url>) -> LockTicket<Vec<Url>, WorkspaceError> {
		let manager = self.clone();
		self.lock.write(move |token| async move {
			let services = manager.services();
			let mut uris = Vec::new();
			for folder in &folders {
				manager.traverse(services.documents.file_system().as_ref(), folder, &mut uris);
			}
			let mut documents = Vec::with_capacity(uris.len());
			for uri in &uris {
				documents.push(services.documents.get_or_create(uri)?);
			}
			tracing::info!(folders = folders.len(), documents = documents.len(), "workspace.initialize");
			manager.builder.build(documents, manager.initial_build, &token).await?;
			Ok::<_, WorkspaceError>(uris)
		})
	}

	/// Queues an update; cancels the update or initialization running before
	/// it.
	pub fn update(&self, changed: Vec<Url>, deleted: Vec<Url>) -> LockTicket<(), WorkspaceError> {
		let builder = Arc::clone(&self.builder);
		self.lock.write(move |token| async move { builder.update(&changed, &deleted, &token).await })
	}

	/// Runs `action` once every write queued before it has finished.
	pub fn read<F, Fut, T, E>(&self, action: F) -> LockTicket<T, E>
	where
		F: FnOnce(Arc<Services>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		T: Send + 'static,
		E: Send + 'static,
	{
		let services = Arc::clone(self.services());
		self.lock.read(move || action(services))
	}

	pub fn cancel_write(&self) {
		self.lock.cancel_write();
	}

	fn traverse(&self, fs: &dyn FileSystemProvider, folder: &Url, out: &mut Vec<Url>) {
		let entries = match fs.read_directory(folder) {
			Ok(entries) => entries,
			Err(err) if err.kind() == io::ErrorKind::NotFound => {
				tracing::error!(%folder, "workspace.folder_missing");
				return;
			}
			Err(err) => {
				tracing::error!(%folder, error = %err, "workspace.folder_unreadable");
				return;
			}
		};
		for entry in entries {
			let name = entry.name();
			if entry.is_directory {
				if !name.starts_with('.') && !self.exclude.iter().any(|excluded| excluded == name) {
					self.traverse(fs, &entry.uri, out);
				}
			} else if entry.is_file && self.services().accepts(name) {
				out.push(entry.uri);
			}
		}
	}
}
