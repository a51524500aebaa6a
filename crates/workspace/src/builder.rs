//! Incremental document builder.
//!
//! Every build moves a set of documents through the [`DocumentState`]
//! lattice one phase at a time: all documents are parsed before any is
//! indexed, all are indexed before any scope is computed, and so on. When a
//! document links, every symbol it could refer to is therefore already in
//! the index.
//!
//! Builds are cancellable between documents. A cancelled build leaves each
//! document in the last state it fully reached and marks it, so the next
//! update resumes it.
//!
//! A scope computation that panics costs only its own document: the panic
//! becomes an error diagnostic on that document and the build goes on with
//! empty exports or scopes for it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use grove_primitives::CancelToken;
use grove_worker::AsyncParser;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::Instrument;
use url::Url;

use crate::document::{Document, DocumentState, SharedDocument};
use crate::error::{Result, WorkspaceError};
use crate::services::Services;
use crate::validation::{Diagnostic, Severity, codes};

/// Whether a build runs the validation phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Validation {
	#[default]
	All,
	None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BuildOptions {
	pub validation: Validation,
}

impl BuildOptions {
	pub fn without_validation() -> Self {
		Self {
			validation: Validation::None,
		}
	}
}

/// Called with the changed and deleted uris before an update rebuilds
/// anything.
pub type UpdateListener = Arc<dyn Fn(&[Url], &[Url]) + Send + Sync>;

/// Called with the documents that just reached a build phase.
pub type BuildPhaseListener = Arc<dyn Fn(&[SharedDocument], &CancelToken) + Send + Sync>;

/// Handle for removing a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
	update: Vec<(ListenerId, UpdateListener)>,
	phase: Vec<(ListenerId, DocumentState, BuildPhaseListener)>,
}

pub struct DocumentBuilder {
	services: Arc<Services>,
	update_options: BuildOptions,
	listeners: Mutex<Listeners>,
	next_listener: AtomicU64,
}

impl std::fmt::Debug for DocumentBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DocumentBuilder").field("update_options", &self.update_options).finish_non_exhaustive()
	}
}

impl DocumentBuilder {
	pub fn new(services: Arc<Services>) -> Self {
		Self {
			services,
			update_options: BuildOptions::default(),
			listeners: Mutex::default(),
			next_listener: AtomicU64::new(0),
		}
	}

	/// Options used by [`DocumentBuilder::update`].
	pub fn with_update_options(mut self, options: BuildOptions) -> Self {
		self.update_options = options;
		self
	}

	pub fn services(&self) -> &Arc<Services> {
		&self.services
	}

	pub fn on_update(&self, listener: impl Fn(&[Url], &[Url]) + Send + Sync + 'static) -> ListenerId {
		let id = self.listener_id();
		self.listeners.lock().update.push((id, Arc::new(listener)));
		id
	}

	pub fn on_build_phase(&self, state: DocumentState, listener: impl Fn(&[SharedDocument], &CancelToken) + Send + Sync + 'static) -> ListenerId {
		let id = self.listener_id();
		self.listeners.lock().phase.push((id, state, Arc::new(listener)));
		id
	}

	pub fn remove_listener(&self, id: ListenerId) {
		let mut listeners = self.listeners.lock();
		listeners.update.retain(|(lid, _)| *lid != id);
		listeners.phase.retain(|(lid, ..)| *lid != id);
	}

	fn listener_id(&self) -> ListenerId {
		ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
	}

	/// Builds `documents` up to [`DocumentState::Linked`], or
	/// [`DocumentState::Validated`] when `options` ask for validation.
	pub async fn build(&self, documents: Vec<SharedDocument>, options: BuildOptions, token: &CancelToken) -> Result<()> {
		self.build_documents(documents, options, token).await
	}

	/// Applies a batch of file changes and rebuilds what they affect.
	///
	/// Changed documents are reloaded and fully rebuilt. Documents that
	/// referenced a changed or deleted document, or that have unresolved
	/// references, are re-linked. All state resets happen before the first
	/// cancellation point.
	pub async fn update(&self, changed: &[Url], deleted: &[Url], token: &CancelToken) -> Result<()> {
		let services = &self.services;
		for uri in deleted {
			services.documents.delete(uri);
			services.index.remove(uri);
		}
		for uri in changed {
			match services.documents.invalidate(uri)? {
				Some(doc) => self.reset_to_state(&mut doc.write(), DocumentState::Changed),
				None => {
					services.documents.get_or_create(uri)?;
				}
			}
		}

		if !changed.is_empty() || !deleted.is_empty() {
			let all_changed: FxHashSet<Url> = changed.iter().chain(deleted).cloned().collect();
			for doc in services.documents.all() {
				let mut guard = doc.write();
				if all_changed.contains(guard.uri()) {
					continue;
				}
				if guard.has_linking_errors() || services.index.is_affected(&guard, &all_changed) {
					tracing::debug!(uri = %guard.uri(), "build.relink");
					self.reset_to_state(&mut guard, DocumentState::ComputedScopes);
				}
			}
		}

		let listeners: Vec<UpdateListener> = self.listeners.lock().update.iter().map(|(_, l)| Arc::clone(l)).collect();
		for listener in listeners {
			listener(changed, deleted);
		}
		token.interrupt_and_check().await?;

		let rebuild: Vec<SharedDocument> = services
			.documents
			.all()
			.into_iter()
			.filter(|doc| {
				let doc = doc.read();
				doc.state() < DocumentState::Linked || doc.has_pending_build()
			})
			.collect();
		tracing::debug!(changed = changed.len(), deleted = deleted.len(), rebuild = rebuild.len(), "build.update");
		self.build_documents(rebuild, self.update_options, token).await
	}

	/// Moves `document` back to `state`, undoing the work of every later
	/// phase.
	pub fn reset_to_state(&self, document: &mut Document, state: DocumentState) {
		let services = &self.services;
		document.scope_failures.retain(|(phase, _)| *phase <= state);
		if state <= DocumentState::Parsed {
			services.index.remove_content(document.uri());
		}
		if state <= DocumentState::IndexedContent {
			document.local_scopes = None;
		}
		if state <= DocumentState::ComputedScopes {
			services.linker.unlink(document);
			services.index.remove_references(document.uri());
		}
		if state <= DocumentState::Linked {
			document.diagnostics.clear();
		}
		document.state = document.state.min(state);
	}

	async fn build_documents(&self, documents: Vec<SharedDocument>, options: BuildOptions, token: &CancelToken) -> Result<()> {
		for doc in &documents {
			doc.write().build.get_or_insert(options);
		}
		for state in [DocumentState::Parsed, DocumentState::IndexedContent, DocumentState::ComputedScopes, DocumentState::Linked] {
			self.run_phase(&documents, state, token).await?;
		}
		let validate: Vec<SharedDocument> = documents
			.iter()
			.filter(|doc| doc.read().build.is_some_and(|options| options.validation == Validation::All))
			.cloned()
			.collect();
		self.run_phase(&validate, DocumentState::Validated, token).await?;

		for doc in &documents {
			doc.write().build = None;
		}
		Ok(())
	}

	async fn run_phase(&self, documents: &[SharedDocument], target: DocumentState, token: &CancelToken) -> Result<()> {
		let pending: Vec<SharedDocument> = documents.iter().filter(|doc| doc.read().state() < target).cloned().collect();
		if pending.is_empty() {
			return Ok(());
		}
		let span = tracing::info_span!("build.phase", state = %target, count = pending.len());
		async {
			for doc in &pending {
				token.interrupt_and_check().await?;
				self.advance(doc, target, token).await?;
			}
			self.notify_build_phase(&pending, target, token).await
		}
		.instrument(span)
		.await
	}

	async fn advance(&self, doc: &SharedDocument, target: DocumentState, token: &CancelToken) -> Result<()> {
		let services = &self.services;
		match target {
			DocumentState::Changed => {}
			DocumentState::Parsed => {
				let (uri, text) = {
					let doc = doc.read();
					(doc.uri().clone(), Arc::clone(doc.text()))
				};
				let result = services.parser.parse(&text, token).await.map_err(|err| WorkspaceError::parse(&uri, err))?;
				tracing::trace!(%uri, errors = result.lexer_errors.len() + result.parser_errors.len(), "build.parsed");
				doc.write().set_parse_result(result);
			}
			DocumentState::IndexedContent => {
				let failure = {
					let doc = doc.read();
					let (exports, failure) =
						match std::panic::catch_unwind(AssertUnwindSafe(|| services.scope_computation.compute_exports(&doc, token))) {
							Ok(exports) => (exports?, None),
							Err(payload) => (Vec::new(), Some(scope_failure(&doc, target, &*payload))),
						};
					services.index.update_content(doc.uri(), exports);
					failure
				};
				let mut doc = doc.write();
				doc.record_scope_failure(target, failure);
				doc.state = DocumentState::IndexedContent;
			}
			DocumentState::ComputedScopes => {
				let (scopes, failure) = {
					let doc = doc.read();
					match std::panic::catch_unwind(AssertUnwindSafe(|| services.scope_computation.compute_local_scopes(&doc, token))) {
						Ok(scopes) => (scopes?, None),
						Err(payload) => (Default::default(), Some(scope_failure(&doc, target, &*payload))),
					}
				};
				let mut doc = doc.write();
				doc.record_scope_failure(target, failure);
				doc.local_scopes = Some(scopes);
				doc.state = DocumentState::ComputedScopes;
			}
			DocumentState::Linked => {
				{
					let doc = doc.read();
					services.linker.link(&doc, token)?;
					services.index.update_references(&doc);
				}
				doc.write().state = DocumentState::Linked;
			}
			DocumentState::Validated => {
				let diagnostics = services.validator.validate(&doc.read(), &services.linker, token)?;
				let mut doc = doc.write();
				doc.diagnostics = doc.scope_failures.iter().map(|(_, diagnostic)| diagnostic.clone()).chain(diagnostics).collect();
				doc.state = DocumentState::Validated;
			}
		}
		Ok(())
	}

	async fn notify_build_phase(&self, documents: &[SharedDocument], state: DocumentState, token: &CancelToken) -> Result<()> {
		let listeners: Vec<BuildPhaseListener> = self
			.listeners
			.lock()
			.phase
			.iter()
			.filter(|(_, s, _)| *s == state)
			.map(|(_, _, l)| Arc::clone(l))
			.collect();
		for listener in listeners {
			token.interrupt_and_check().await?;
			listener(documents, token);
		}
		Ok(())
	}
}

fn scope_failure(doc: &Document, phase: DocumentState, payload: &(dyn Any + Send)) -> Diagnostic {
	let message = grove_worker::panic_message(payload);
	tracing::error!(uri = %doc.uri(), phase = %phase, error = %message, "build.scope_computation_failed");
	let range = doc.tree().and_then(|tree| tree.node_range(tree.root())).unwrap_or_default();
	Diagnostic::new(Severity::Error, format!("An error occurred during scope computation: {message}"), range).with_code(codes::CHECK_FAILED)
}
