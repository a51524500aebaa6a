//! Scope computation and scope lookup.
//!
//! Scoping runs in two steps. While indexing, [`ScopeComputation`] collects
//! the symbols a document exports and the symbols visible locally inside
//! each container node. While linking, a [`ScopeProvider`] assembles the
//! scope of one reference from those precomputed tables.

use std::sync::Arc;

use grove_primitives::{Interrupt, OperationCancelled};
use grove_syntax::{AstId, AstReflection, Reference, RefId, SyntaxTree};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::document::Document;
use crate::index::{AstNodeDescription, IndexManager};
use crate::linker::{CyclicResolution, Linker};

/// Named nodes registered on the container they are visible in.
pub type LocalSymbols = FxHashMap<AstId, Vec<AstNodeDescription>>;

/// Collects exported and local symbols of a parsed document.
pub trait ScopeComputation: Send + Sync {
	fn compute_exports(&self, document: &Document, interrupt: &dyn Interrupt) -> Result<Vec<AstNodeDescription>, OperationCancelled>;

	fn compute_local_scopes(&self, document: &Document, interrupt: &dyn Interrupt) -> Result<LocalSymbols, OperationCancelled>;
}

/// Exports the root and its direct children; registers every other named
/// node on its container. Names come from the `name` property.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScopeComputation;

impl ScopeComputation for DefaultScopeComputation {
	fn compute_exports(&self, document: &Document, interrupt: &dyn Interrupt) -> Result<Vec<AstNodeDescription>, OperationCancelled> {
		let Some(tree) = document.tree() else {
			return Ok(Vec::new());
		};
		let root = tree.root();
		let mut exports = Vec::new();
		for id in std::iter::once(root).chain(tree.ast(root).children()) {
			interrupt.check()?;
			if let Some(desc) = tree.name_of(id).and_then(|name| AstNodeDescription::new(document, id, name)) {
				exports.push(desc);
			}
		}
		Ok(exports)
	}

	fn compute_local_scopes(&self, document: &Document, interrupt: &dyn Interrupt) -> Result<LocalSymbols, OperationCancelled> {
		let mut symbols = LocalSymbols::default();
		let Some(tree) = document.tree() else {
			return Ok(symbols);
		};
		for id in tree.preorder() {
			interrupt.check()?;
			let Some(container) = tree.ast(id).container else {
				continue;
			};
			if let Some(desc) = tree.name_of(id).and_then(|name| AstNodeDescription::new(document, id, name)) {
				symbols.entry(container).or_default().push(desc);
			}
		}
		Ok(symbols)
	}
}

/// Layered symbol table. Inner layers shadow outer ones.
#[derive(Debug, Clone, Default)]
pub struct Scope {
	layers: Vec<Arc<[AstNodeDescription]>>,
}

impl Scope {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn new(elements: impl Into<Arc<[AstNodeDescription]>>) -> Self {
		Self { layers: vec![elements.into()] }
	}

	/// Adds a layer behind every existing one.
	pub fn with_outer(mut self, elements: impl Into<Arc<[AstNodeDescription]>>) -> Self {
		self.layers.push(elements.into());
		self
	}

	/// First element named `name`, searching inner layers first.
	pub fn element(&self, name: &str) -> Option<&AstNodeDescription> {
		self.all_elements().find(|desc| desc.name == name)
	}

	/// Every distinct element named `name`.
	pub fn elements(&self, name: &str) -> Vec<&AstNodeDescription> {
		let mut seen = FxHashSet::default();
		self.all_elements()
			.filter(|desc| desc.name == name && seen.insert((&desc.uri, &desc.path)))
			.collect()
	}

	pub fn all_elements(&self) -> impl Iterator<Item = &AstNodeDescription> {
		self.layers.iter().flat_map(|layer| layer.iter())
	}
}

/// Why a scope could not be built.
#[derive(Debug, Error)]
pub enum ScopeError {
	#[error(transparent)]
	Cyclic(#[from] CyclicResolution),

	#[error(transparent)]
	Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ScopeError {
	pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self::Other(err.into())
	}
}

/// The reference a scope is requested for, plus access to the services a
/// scope provider may need.
#[derive(Clone, Copy)]
pub struct ReferenceContext<'a> {
	pub linker: &'a Linker,
	pub document: &'a Document,
	pub tree: &'a SyntaxTree,
	pub id: RefId,
}

impl<'a> ReferenceContext<'a> {
	pub fn reference(&self) -> &'a Reference {
		self.tree.reference(self.id)
	}

	pub fn index(&self) -> &'a IndexManager {
		self.linker.index()
	}

	pub fn reflection(&self) -> &'a AstReflection {
		self.linker.reflection()
	}
}

/// Builds the scope a reference is resolved in.
pub trait ScopeProvider: Send + Sync {
	fn scope(&self, context: &ReferenceContext<'_>) -> Result<Scope, ScopeError>;
}

/// Local symbols of the reference's container chain, innermost first, then
/// the global index. Every layer only holds subtypes of the reference's
/// target type.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScopeProvider;

impl ScopeProvider for DefaultScopeProvider {
	fn scope(&self, context: &ReferenceContext<'_>) -> Result<Scope, ScopeError> {
		let reference = context.reference();
		let target_type = reference.target_type.as_str();
		let reflection = context.reflection();
		let mut scope = Scope::empty();

		if let Some(local) = context.document.local_scopes() {
			let mut current = Some(reference.container);
			while let Some(node) = current {
				if let Some(symbols) = local.get(&node) {
					let visible: Vec<_> = symbols.iter().filter(|desc| reflection.is_subtype(&desc.type_name, target_type)).cloned().collect();
					if !visible.is_empty() {
						scope = scope.with_outer(visible);
					}
				}
				current = context.tree.ast(node).container;
			}
		}
		Ok(scope.with_outer(context.index().all_elements(Some(target_type))))
	}
}

#[cfg(test)]
mod tests {
	use url::Url;

	use super::*;

	fn desc(name: &str, path: &str) -> AstNodeDescription {
		AstNodeDescription {
			name: name.into(),
			type_name: "Entity".into(),
			uri: Url::parse("memory:///a.dmodel").unwrap(),
			version: 1,
			node: AstId(0),
			path: path.into(),
			range: None,
		}
	}

	#[test]
	fn inner_layers_shadow_outer_ones() {
		let scope = Scope::new(vec![desc("A", "/elements@0/elements@1")]).with_outer(vec![desc("A", "/elements@3"), desc("B", "/elements@4")]);
		assert_eq!(scope.element("A").unwrap().path, "/elements@0/elements@1");
		assert_eq!(scope.element("B").unwrap().path, "/elements@4");
		assert!(scope.element("C").is_none());
		assert_eq!(scope.elements("A").len(), 2);
		assert_eq!(scope.all_elements().count(), 3);
	}

	#[test]
	fn elements_are_distinct_by_location() {
		let scope = Scope::new(vec![desc("A", "/elements@0")]).with_outer(vec![desc("A", "/elements@0")]);
		assert_eq!(scope.elements("A").len(), 1);
		assert!(Scope::empty().elements("A").is_empty());
	}
}
