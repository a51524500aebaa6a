//! Reference resolution.
//!
//! Resolution is lazy and memoized on the reference itself. The builder's
//! link phase forces every reference of a document; anything else (scope
//! providers following a reference, validation checks, readers) may
//! resolve single references on demand.

use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use grove_primitives::{Interrupt, OperationCancelled};
use grove_syntax::{AstReflection, LinkingError, RefId, Reference, Resolution, SyntaxTree};
use rustc_hash::FxHashSet;
use thiserror::Error;
use url::Url;

use crate::document::{Document, DocumentState};
use crate::index::{AstNodeDescription, IndexManager};
use crate::scope::{ReferenceContext, ScopeError, ScopeProvider};

/// A reference was asked to resolve itself while it was already resolving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cyclic reference resolution detected: {path}/{property} (symbol '{ref_text}')")]
pub struct CyclicResolution {
	/// Path of the node holding the reference.
	pub path: String,
	pub property: String,
	pub ref_text: String,
}

type ResolvingKey = (Url, u64, RefId);

thread_local! {
	static RESOLVING: RefCell<FxHashSet<ResolvingKey>> = RefCell::new(FxHashSet::default());
}

/// Marks a reference as in flight on this thread until dropped.
struct Resolving(Option<ResolvingKey>);

impl Resolving {
	fn enter(key: ResolvingKey) -> Option<Self> {
		RESOLVING.with(|set| set.borrow_mut().insert(key.clone())).then(|| Self(Some(key)))
	}
}

impl Drop for Resolving {
	fn drop(&mut self) {
		if let Some(key) = self.0.take() {
			RESOLVING.with(|set| set.borrow_mut().remove(&key));
		}
	}
}

pub struct Linker {
	index: Arc<IndexManager>,
	reflection: Arc<AstReflection>,
	scope_provider: Arc<dyn ScopeProvider>,
}

impl std::fmt::Debug for Linker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Linker").finish_non_exhaustive()
	}
}

impl Linker {
	pub fn new(index: Arc<IndexManager>, reflection: Arc<AstReflection>, scope_provider: Arc<dyn ScopeProvider>) -> Self {
		Self {
			index,
			reflection,
			scope_provider,
		}
	}

	pub fn index(&self) -> &IndexManager {
		&self.index
	}

	pub fn reflection(&self) -> &AstReflection {
		&self.reflection
	}

	/// Resolves every reference of `document` that is not resolved yet.
	///
	/// On cancellation the document is unlinked again, so it is never left
	/// partially linked.
	pub fn link(&self, document: &Document, interrupt: &dyn Interrupt) -> Result<(), OperationCancelled> {
		let Some(tree) = document.tree() else {
			return Ok(());
		};
		for (id, reference) in tree.references() {
			if let Err(cancelled) = interrupt.check() {
				self.unlink(document);
				return Err(cancelled);
			}
			if reference.is_resolved() {
				continue;
			}
			if let Err(cyclic) = self.resolve(document, id) {
				tracing::error!(uri = %document.uri(), error = %cyclic, "linker.cyclic");
				reference.set_resolution(Resolution::Error(LinkingError::new(cyclic.to_string())));
			}
		}
		tracing::trace!(uri = %document.uri(), version = document.version(), "linker.linked");
		Ok(())
	}

	/// Forgets every resolution of `document`.
	pub fn unlink(&self, document: &Document) {
		if let Some(tree) = document.tree() {
			tree.clear_resolutions();
		}
	}

	/// Resolves reference `id` of `document`, or returns its memoized
	/// resolution.
	///
	/// Failed resolutions attempted before the document reached
	/// [`DocumentState::ComputedScopes`] are not memoized, so the link phase
	/// retries them.
	pub fn resolve(&self, document: &Document, id: RefId) -> Result<Resolution, CyclicResolution> {
		let Some(tree) = document.tree() else {
			return Ok(Resolution::Error(LinkingError::new(format!("{} has not been parsed", document.uri()))));
		};
		let reference = tree.reference(id);
		if let Some(resolution) = reference.resolution() {
			return Ok(resolution);
		}
		let Some(_resolving) = Resolving::enter((document.uri().clone(), document.version(), id)) else {
			return Err(CyclicResolution {
				path: tree.path_of(reference.container),
				property: reference.property.clone(),
				ref_text: reference.ref_text.clone(),
			});
		};

		let resolution = self.compute(document, tree, id);
		if resolution.error().is_some() && document.state() < DocumentState::ComputedScopes {
			return Ok(resolution);
		}
		reference.set_resolution(resolution.clone());
		Ok(resolution)
	}

	fn compute(&self, document: &Document, tree: &SyntaxTree, id: RefId) -> Resolution {
		let reference = tree.reference(id);
		let context = ReferenceContext {
			linker: self,
			document,
			tree,
			id,
		};
		let scope = match std::panic::catch_unwind(AssertUnwindSafe(|| self.scope_provider.scope(&context))) {
			Ok(Ok(scope)) => scope,
			Ok(Err(err)) => return self.scope_failure(document, reference, &err),
			Err(payload) => return self.scope_failure(document, reference, &ScopeError::other(grove_worker::panic_message(&*payload))),
		};

		if reference.multi {
			let found = scope.elements(&reference.ref_text);
			if found.is_empty() {
				return self.not_found(document, reference);
			}
			Resolution::Multi(found.into_iter().map(AstNodeDescription::handle).collect())
		} else {
			match scope.element(&reference.ref_text) {
				Some(desc) => Resolution::Single(desc.handle()),
				None => self.not_found(document, reference),
			}
		}
	}

	fn scope_failure(&self, document: &Document, reference: &Reference, err: &ScopeError) -> Resolution {
		tracing::error!(uri = %document.uri(), symbol = %reference.ref_text, error = %err, "linker.scope_failed");
		Resolution::Error(LinkingError::new(format!(
			"An error occurred while resolving reference to '{}': {err}",
			reference.ref_text
		)))
	}

	fn not_found(&self, document: &Document, reference: &Reference) -> Resolution {
		if document.state() < DocumentState::ComputedScopes {
			tracing::warn!(uri = %document.uri(), state = %document.state(), "linker.resolved_before_scopes");
		}
		Resolution::Error(LinkingError::new(format!(
			"Could not resolve reference to {} named '{}'.",
			reference.target_type, reference.ref_text
		)))
	}
}
