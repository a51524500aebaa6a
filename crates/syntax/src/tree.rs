use std::sync::Arc;

use grove_primitives::Range;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ids::{AstId, CstId, GrammarElementId, RefId};
use crate::reflection::ReferenceTarget;

/// Scalar property value of an AST node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scalar {
	Bool(bool),
	Int(i64),
	Str(String),
}

impl Scalar {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}
}

impl std::fmt::Display for Scalar {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Bool(b) => write!(f, "{b}"),
			Self::Int(i) => write!(f, "{i}"),
			Self::Str(s) => write!(f, "{s:?}"),
		}
	}
}

/// Value held under one property name of an AST node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
	Scalar(Scalar),
	Scalars(Vec<Scalar>),
	/// Owned child.
	Node(AstId),
	/// Owned children, in source order.
	Nodes(Vec<AstId>),
	Reference(RefId),
	References(Vec<RefId>),
	/// Array-valued property without items.
	Empty,
}

/// A typed AST node. Owned children are reachable only through
/// [`Property::Node`] and [`Property::Nodes`]; every other link is a
/// non-owning handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
	/// Discriminant tag (`$type`).
	pub type_name: String,
	pub container: Option<AstId>,
	pub container_property: Option<String>,
	pub container_index: Option<usize>,
	pub cst_node: Option<CstId>,
	pub properties: IndexMap<String, Property>,
}

impl AstNode {
	pub fn new(type_name: impl Into<String>) -> Self {
		Self {
			type_name: type_name.into(),
			container: None,
			container_property: None,
			container_index: None,
			cst_node: None,
			properties: IndexMap::new(),
		}
	}

	pub fn property(&self, name: &str) -> Option<&Property> {
		self.properties.get(name)
	}

	/// String scalar under `name`.
	pub fn str(&self, name: &str) -> Option<&str> {
		match self.properties.get(name) {
			Some(Property::Scalar(scalar)) => scalar.as_str(),
			_ => None,
		}
	}

	pub fn bool(&self, name: &str) -> Option<bool> {
		match self.properties.get(name) {
			Some(Property::Scalar(Scalar::Bool(b))) => Some(*b),
			_ => None,
		}
	}

	/// Owned children under `name`, whether single or list valued.
	pub fn nodes(&self, name: &str) -> &[AstId] {
		match self.properties.get(name) {
			Some(Property::Node(id)) => std::slice::from_ref(id),
			Some(Property::Nodes(ids)) => ids,
			_ => &[],
		}
	}

	/// References under `name`, whether single or list valued.
	pub fn references(&self, name: &str) -> &[RefId] {
		match self.properties.get(name) {
			Some(Property::Reference(id)) => std::slice::from_ref(id),
			Some(Property::References(ids)) => ids,
			_ => &[],
		}
	}

	/// Owned children in property order.
	pub fn children(&self) -> impl Iterator<Item = AstId> + '_ {
		self.properties.values().flat_map(|prop| {
			let ids: &[AstId] = match prop {
				Property::Node(id) => std::slice::from_ref(id),
				Property::Nodes(ids) => ids,
				_ => &[],
			};
			ids.iter().copied()
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CstKind {
	Leaf { token_type: String, offset: usize, length: usize, range: Range },
	Composite { children: Vec<CstId> },
	/// Root composite; owns the full source text.
	Root { text: Arc<str>, children: Vec<CstId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CstNode {
	pub kind: CstKind,
	pub container: Option<CstId>,
	pub root: CstId,
	pub ast_node: Option<AstId>,
	/// `None` for hidden nodes and skipped tokens.
	pub grammar_source: Option<GrammarElementId>,
	pub hidden: bool,
}

impl CstNode {
	pub fn children(&self) -> &[CstId] {
		match &self.kind {
			CstKind::Leaf { .. } => &[],
			CstKind::Composite { children } | CstKind::Root { children, .. } => children,
		}
	}

	pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<CstId>> {
		match &mut self.kind {
			CstKind::Leaf { .. } => None,
			CstKind::Composite { children } | CstKind::Root { children, .. } => Some(children),
		}
	}

	pub fn is_leaf(&self) -> bool {
		matches!(self.kind, CstKind::Leaf { .. })
	}
}

/// Stable address of an AST node across documents.
///
/// The version pins the parse the id belongs to; a handle whose version no
/// longer matches its document is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle {
	pub uri: Url,
	pub version: u64,
	pub node: AstId,
}

/// Recoverable failure to resolve a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingError {
	pub message: String,
}

impl LinkingError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}
}

/// Memoized outcome of resolving a [`Reference`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	Single(NodeHandle),
	/// Every candidate of a multi-reference.
	Multi(Vec<NodeHandle>),
	Error(LinkingError),
}

impl Resolution {
	pub fn error(&self) -> Option<&LinkingError> {
		match self {
			Self::Error(err) => Some(err),
			_ => None,
		}
	}

	pub fn targets(&self) -> &[NodeHandle] {
		match self {
			Self::Single(handle) => std::slice::from_ref(handle),
			Self::Multi(handles) => handles,
			Self::Error(_) => &[],
		}
	}
}

/// A named link from one AST node to zero, one or many others.
#[derive(Debug)]
pub struct Reference {
	pub container: AstId,
	pub property: String,
	pub index: Option<usize>,
	pub ref_text: String,
	pub ref_node: Option<CstId>,
	pub target_type: String,
	pub multi: bool,
	resolution: Mutex<Option<Resolution>>,
}

impl Reference {
	pub fn new(container: AstId, property: impl Into<String>, index: Option<usize>, ref_text: impl Into<String>, ref_node: Option<CstId>, target: &ReferenceTarget) -> Self {
		Self {
			container,
			property: property.into(),
			index,
			ref_text: ref_text.into(),
			ref_node,
			target_type: target.type_name.clone(),
			multi: target.multi,
			resolution: Mutex::new(None),
		}
	}

	/// Cached resolution, if any.
	pub fn resolution(&self) -> Option<Resolution> {
		self.resolution.lock().clone()
	}

	pub fn set_resolution(&self, resolution: Resolution) {
		*self.resolution.lock() = Some(resolution);
	}

	pub fn clear_resolution(&self) {
		*self.resolution.lock() = None;
	}

	pub fn is_resolved(&self) -> bool {
		self.resolution.lock().is_some()
	}
}

/// Lexer or parser error, kept as data on a [`ParseResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
	pub message: String,
	pub offset: usize,
	pub length: usize,
	pub range: Range,
}

/// Per-document AST, CST and reference arenas.
#[derive(Debug)]
pub struct SyntaxTree {
	ast: Vec<AstNode>,
	cst: Vec<CstNode>,
	references: Vec<Reference>,
	root: AstId,
	cst_root: CstId,
}

impl SyntaxTree {
	/// Assembles a tree from filled arenas. Callers guarantee every handle
	/// stored in the arenas is in range.
	pub fn from_parts(ast: Vec<AstNode>, cst: Vec<CstNode>, references: Vec<Reference>, root: AstId, cst_root: CstId) -> Self {
		Self {
			ast,
			cst,
			references,
			root,
			cst_root,
		}
	}

	pub fn root(&self) -> AstId {
		self.root
	}

	pub fn cst_root(&self) -> CstId {
		self.cst_root
	}

	pub fn ast(&self, id: AstId) -> &AstNode {
		&self.ast[id.index()]
	}

	pub fn cst(&self, id: CstId) -> &CstNode {
		&self.cst[id.index()]
	}

	pub fn reference(&self, id: RefId) -> &Reference {
		&self.references[id.index()]
	}

	pub fn ast_len(&self) -> usize {
		self.ast.len()
	}

	pub fn cst_len(&self) -> usize {
		self.cst.len()
	}

	pub fn references(&self) -> impl Iterator<Item = (RefId, &Reference)> {
		self.references.iter().enumerate().map(|(idx, r)| (RefId::from_index(idx), r))
	}

	/// Full source text owned by the root CST node.
	pub fn text(&self) -> &str {
		match &self.cst(self.cst_root).kind {
			CstKind::Root { text, .. } => text,
			_ => "",
		}
	}

	/// AST nodes reachable from the root through owned edges, in preorder.
	pub fn preorder(&self) -> Vec<AstId> {
		self.preorder_from(self.root)
	}

	pub fn preorder_from(&self, start: AstId) -> Vec<AstId> {
		let mut out = Vec::new();
		let mut stack = vec![start];
		while let Some(id) = stack.pop() {
			out.push(id);
			let children: Vec<_> = self.ast(id).children().collect();
			stack.extend(children.into_iter().rev());
		}
		out
	}

	/// CST nodes reachable from the root, in preorder.
	pub fn cst_preorder(&self) -> Vec<CstId> {
		let mut out = Vec::new();
		let mut stack = vec![self.cst_root];
		while let Some(id) = stack.pop() {
			out.push(id);
			stack.extend(self.cst(id).children().iter().rev().copied());
		}
		out
	}

	/// Path of a node relative to the root, e.g. `/elements@1/features@0`.
	/// The root's path is empty.
	pub fn path_of(&self, id: AstId) -> String {
		let mut segments = Vec::new();
		let mut current = id;
		while let Some(container) = self.ast(current).container {
			let node = self.ast(current);
			let property = node.container_property.as_deref().unwrap_or_default();
			match node.container_index {
				Some(index) => segments.push(format!("/{property}@{index}")),
				None => segments.push(format!("/{property}")),
			}
			current = container;
		}
		segments.reverse();
		segments.concat()
	}

	/// Inverse of [`SyntaxTree::path_of`].
	pub fn node_at_path(&self, path: &str) -> Option<AstId> {
		let mut current = self.root;
		for segment in path.split('/').filter(|s| !s.is_empty()) {
			let (property, index) = match segment.split_once('@') {
				Some((property, index)) => (property, Some(index.parse::<usize>().ok()?)),
				None => (segment, None),
			};
			let node = self.ast(current);
			current = match (node.property(property)?, index) {
				(Property::Node(id), None) => *id,
				(Property::Nodes(ids), Some(index)) => *ids.get(index)?,
				_ => return None,
			};
		}
		Some(current)
	}

	/// `name` property of a node, the default naming convention.
	pub fn name_of(&self, id: AstId) -> Option<&str> {
		self.ast(id).str("name")
	}

	/// Byte span `(offset, end)` covered by a CST node. Composites without
	/// leaves have no span.
	pub fn cst_span(&self, id: CstId) -> Option<(usize, usize)> {
		match &self.cst(id).kind {
			CstKind::Leaf { offset, length, .. } => Some((*offset, offset + length)),
			_ => {
				let children = self.cst(id).children();
				let start = children.iter().find_map(|&child| self.cst_span(child))?;
				let end = children.iter().rev().find_map(|&child| self.cst_span(child))?;
				Some((start.0, end.1))
			}
		}
	}

	pub fn cst_range(&self, id: CstId) -> Option<Range> {
		match &self.cst(id).kind {
			CstKind::Leaf { range, .. } => Some(*range),
			_ => {
				let children = self.cst(id).children();
				let start = children.iter().find_map(|&child| self.cst_range(child))?;
				let end = children.iter().rev().find_map(|&child| self.cst_range(child))?;
				Some(start.cover(end))
			}
		}
	}

	/// Source text covered by a CST node.
	pub fn cst_text(&self, id: CstId) -> &str {
		self.cst_span(id).and_then(|(start, end)| self.text().get(start..end)).unwrap_or_default()
	}

	/// Range of an AST node's CST node.
	pub fn node_range(&self, id: AstId) -> Option<Range> {
		self.ast(id).cst_node.and_then(|cst| self.cst_range(cst))
	}

	/// Deepest non-hidden leaf containing `offset`.
	pub fn leaf_at(&self, offset: usize) -> Option<CstId> {
		let mut current = self.cst_root;
		'descend: loop {
			for &child in self.cst(current).children() {
				let Some((start, end)) = self.cst_span(child) else { continue };
				if start <= offset && offset < end && !self.cst(child).hidden {
					if self.cst(child).is_leaf() {
						return Some(child);
					}
					current = child;
					continue 'descend;
				}
			}
			return None;
		}
	}

	/// Unlinks every reference of this tree.
	pub fn clear_resolutions(&self) {
		for reference in &self.references {
			reference.clear_resolution();
		}
	}
}

/// Outcome of parsing one text. Lexer and parser errors are data.
#[derive(Debug)]
pub struct ParseResult {
	pub tree: SyntaxTree,
	pub lexer_errors: Vec<SyntaxError>,
	pub parser_errors: Vec<SyntaxError>,
}

impl ParseResult {
	pub fn has_errors(&self) -> bool {
		!self.lexer_errors.is_empty() || !self.parser_errors.is_empty()
	}
}
