//! Global symbol index.
//!
//! Holds the symbols each document exports and the references each document
//! resolved. The export table backs the global scope; the reference table
//! answers which documents depend on which.

use std::sync::Arc;

use grove_primitives::Range;
use grove_syntax::{AstId, AstReflection, NodeHandle, Resolution};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use url::Url;

use crate::document::Document;

/// A named AST node as seen from outside its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNodeDescription {
	pub name: String,
	pub type_name: String,
	pub uri: Url,
	/// Content version of the document the node belongs to.
	pub version: u64,
	pub node: AstId,
	/// Node path inside its document.
	pub path: String,
	pub range: Option<Range>,
}

impl AstNodeDescription {
	/// Describes node `id` of `document` under `name`.
	pub fn new(document: &Document, id: AstId, name: impl Into<String>) -> Option<Self> {
		let tree = document.tree()?;
		Some(Self {
			name: name.into(),
			type_name: tree.ast(id).type_name.clone(),
			uri: document.uri().clone(),
			version: document.version(),
			node: id,
			path: tree.path_of(id),
			range: tree.node_range(id),
		})
	}

	pub fn handle(&self) -> NodeHandle {
		NodeHandle {
			uri: self.uri.clone(),
			version: self.version,
			node: self.node,
		}
	}
}

/// A resolved reference, recorded for dependency tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescription {
	pub source_uri: Url,
	/// Path of the node holding the reference.
	pub source_path: String,
	pub property: String,
	pub range: Option<Range>,
	pub target: NodeHandle,
	/// True when source and target live in the same document.
	pub local: bool,
}

#[derive(Debug, Default)]
struct IndexState {
	exports: IndexMap<Url, Vec<AstNodeDescription>>,
	references: FxHashMap<Url, Vec<ReferenceDescription>>,
	/// `all_elements` results per type; `None` keys the unfiltered list.
	global_cache: FxHashMap<Option<String>, Arc<[AstNodeDescription]>>,
}

#[derive(Debug)]
pub struct IndexManager {
	reflection: Arc<AstReflection>,
	state: RwLock<IndexState>,
}

impl IndexManager {
	pub fn new(reflection: Arc<AstReflection>) -> Self {
		Self {
			reflection,
			state: RwLock::default(),
		}
	}

	/// Replaces the exported symbols of `uri`.
	pub fn update_content(&self, uri: &Url, exports: Vec<AstNodeDescription>) {
		let mut state = self.state.write();
		state.global_cache.clear();
		state.exports.insert(uri.clone(), exports);
	}

	/// Records the references `document` resolved to some target.
	pub fn update_references(&self, document: &Document) {
		let Some(tree) = document.tree() else {
			return;
		};
		let mut descriptions = Vec::new();
		for (_, reference) in tree.references() {
			let Some(resolution) = reference.resolution() else {
				continue;
			};
			let targets = match &resolution {
				Resolution::Error(_) => continue,
				resolution => resolution.targets(),
			};
			let source_path = tree.path_of(reference.container);
			let range = reference.ref_node.and_then(|leaf| tree.cst_range(leaf));
			for target in targets {
				descriptions.push(ReferenceDescription {
					source_uri: document.uri().clone(),
					source_path: source_path.clone(),
					property: reference.property.clone(),
					range,
					target: target.clone(),
					local: target.uri == *document.uri(),
				});
			}
		}
		tracing::trace!(uri = %document.uri(), count = descriptions.len(), "index.references");
		self.state.write().references.insert(document.uri().clone(), descriptions);
	}

	/// Drops the exported symbols of `uri`.
	pub fn remove_content(&self, uri: &Url) {
		let mut state = self.state.write();
		if state.exports.shift_remove(uri).is_some() {
			state.global_cache.clear();
		}
	}

	pub fn remove_references(&self, uri: &Url) {
		self.state.write().references.remove(uri);
	}

	/// Drops everything known about `uri`.
	pub fn remove(&self, uri: &Url) {
		self.remove_content(uri);
		self.remove_references(uri);
	}

	/// Exported symbols of every document, optionally restricted to
	/// subtypes of `type_name`.
	pub fn all_elements(&self, type_name: Option<&str>) -> Arc<[AstNodeDescription]> {
		let key = type_name.map(str::to_string);
		if let Some(cached) = self.state.read().global_cache.get(&key) {
			return Arc::clone(cached);
		}
		let mut state = self.state.write();
		let elements: Arc<[AstNodeDescription]> = state
			.exports
			.values()
			.flatten()
			.filter(|desc| type_name.is_none_or(|ty| self.reflection.is_subtype(&desc.type_name, ty)))
			.cloned()
			.collect();
		state.global_cache.insert(key, Arc::clone(&elements));
		elements
	}

	pub fn exports(&self, uri: &Url) -> Vec<AstNodeDescription> {
		self.state.read().exports.get(uri).cloned().unwrap_or_default()
	}

	/// True when `document` holds a reference into one of the `changed`
	/// documents.
	pub fn is_affected(&self, document: &Document, changed: &FxHashSet<Url>) -> bool {
		self.state
			.read()
			.references
			.get(document.uri())
			.is_some_and(|refs| refs.iter().any(|r| !r.local && changed.contains(&r.target.uri)))
	}

	/// Every recorded reference to `target`.
	pub fn find_all_references(&self, target: &NodeHandle) -> Vec<ReferenceDescription> {
		let state = self.state.read();
		let mut found: Vec<_> = state.references.values().flatten().filter(|r| r.target == *target).cloned().collect();
		found.sort_by(|a, b| (a.source_uri.as_str(), &a.source_path).cmp(&(b.source_uri.as_str(), &b.source_path)));
		found
	}
}
