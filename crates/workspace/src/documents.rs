use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use url::Url;

use crate::document::{Document, SharedDocument};
use crate::error::{Result, WorkspaceError};
use crate::fs::FileSystemProvider;

/// All documents of the workspace, in the order they were added.
///
/// The collection is only mutated inside workspace write actions; readers
/// may observe it at any point between two write actions.
pub struct Documents {
	fs: Arc<dyn FileSystemProvider>,
	docs: RwLock<IndexMap<Url, SharedDocument>>,
}

impl std::fmt::Debug for Documents {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Documents").field("len", &self.docs.read().len()).finish()
	}
}

impl Documents {
	pub fn new(fs: Arc<dyn FileSystemProvider>) -> Self {
		Self {
			fs,
			docs: RwLock::new(IndexMap::new()),
		}
	}

	pub fn file_system(&self) -> &Arc<dyn FileSystemProvider> {
		&self.fs
	}

	pub fn get(&self, uri: &Url) -> Option<SharedDocument> {
		self.docs.read().get(uri).cloned()
	}

	pub fn has(&self, uri: &Url) -> bool {
		self.docs.read().contains_key(uri)
	}

	pub fn add(&self, document: Document) -> Result<SharedDocument> {
		let mut docs = self.docs.write();
		if docs.contains_key(document.uri()) {
			return Err(WorkspaceError::DuplicateDocument(document.uri().clone()));
		}
		let uri = document.uri().clone();
		let shared = document.into_shared();
		docs.insert(uri, Arc::clone(&shared));
		Ok(shared)
	}

	/// Returns the document for `uri`, loading it through the file system if
	/// it is not tracked yet.
	pub fn get_or_create(&self, uri: &Url) -> Result<SharedDocument> {
		if let Some(doc) = self.get(uri) {
			return Ok(doc);
		}
		let text = self.read(uri)?;
		let mut docs = self.docs.write();
		let doc = docs.entry(uri.clone()).or_insert_with(|| Document::new(uri.clone(), text).into_shared());
		Ok(Arc::clone(doc))
	}

	/// Reloads the text of a tracked document and marks it
	/// [`DocumentState::Changed`](crate::DocumentState::Changed).
	///
	/// Returns `Ok(None)` when the document is not tracked.
	pub fn invalidate(&self, uri: &Url) -> Result<Option<SharedDocument>> {
		let Some(doc) = self.get(uri) else {
			return Ok(None);
		};
		let text = self.read(uri)?;
		doc.write().set_text(text);
		Ok(Some(doc))
	}

	pub fn delete(&self, uri: &Url) -> Option<SharedDocument> {
		self.docs.write().shift_remove(uri)
	}

	pub fn all(&self) -> Vec<SharedDocument> {
		self.docs.read().values().cloned().collect()
	}

	pub fn uris(&self) -> Vec<Url> {
		self.docs.read().keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.docs.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.read().is_empty()
	}

	fn read(&self, uri: &Url) -> Result<String> {
		self.fs.read_file(uri).map_err(|source| WorkspaceError::Read { uri: uri.clone(), source })
	}
}
