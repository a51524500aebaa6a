//! Handle-independent textual rendering of trees.
//!
//! Two trees with the same structure render identically even when their
//! arenas are ordered differently; broken back links are flagged inline.

use std::fmt::Write;

use crate::ids::{AstId, CstId, RefId};
use crate::tree::{CstKind, Property, SyntaxTree};

impl SyntaxTree {
	/// Renders the AST, one node or property per line.
	pub fn dump(&self) -> String {
		let mut out = String::new();
		self.dump_ast(self.root(), None, 0, &mut out);
		out
	}

	/// Renders the CST, one node per line.
	pub fn dump_cst(&self) -> String {
		let mut out = String::new();
		self.dump_cst_node(self.cst_root(), None, 0, &mut out);
		out
	}

	fn span(&self, cst: Option<CstId>) -> String {
		match cst.and_then(|id| self.cst_span(id)) {
			Some((start, end)) => format!(" @{start}..{end}"),
			None => String::new(),
		}
	}

	fn dump_ast(&self, id: AstId, parent: Option<AstId>, depth: usize, out: &mut String) {
		let node = self.ast(id);
		let indent = "  ".repeat(depth);
		let label = match (&node.container_property, node.container_index) {
			(Some(property), Some(index)) => format!("{property}[{index}]: "),
			(Some(property), None) => format!("{property}: "),
			_ => String::new(),
		};
		let broken = if node.container != parent { " (!container)" } else { "" };
		let _ = writeln!(out, "{indent}{label}{}{}{broken}", node.type_name, self.span(node.cst_node));

		for (name, property) in &node.properties {
			match property {
				Property::Scalar(scalar) => {
					let _ = writeln!(out, "{indent}  {name} = {scalar}");
				}
				Property::Scalars(items) => {
					let items: Vec<_> = items.iter().map(ToString::to_string).collect();
					let _ = writeln!(out, "{indent}  {name} = [{}]", items.join(", "));
				}
				Property::Empty => {
					let _ = writeln!(out, "{indent}  {name} = []");
				}
				Property::Node(child) => self.dump_ast(*child, Some(id), depth + 1, out),
				Property::Nodes(children) => {
					for child in children {
						self.dump_ast(*child, Some(id), depth + 1, out);
					}
				}
				Property::Reference(reference) => self.dump_reference(*reference, name, None, depth + 1, out),
				Property::References(references) => {
					for (index, reference) in references.iter().enumerate() {
						self.dump_reference(*reference, name, Some(index), depth + 1, out);
					}
				}
			}
		}
	}

	fn dump_reference(&self, id: RefId, name: &str, index: Option<usize>, depth: usize, out: &mut String) {
		let reference = self.reference(id);
		let indent = "  ".repeat(depth);
		let label = match index {
			Some(index) => format!("{name}[{index}]"),
			None => name.to_string(),
		};
		let arrow = if reference.multi { "->>" } else { "->" };
		let _ = writeln!(
			out,
			"{indent}{label} {arrow} {}:'{}'{}",
			reference.target_type,
			reference.ref_text,
			self.span(reference.ref_node)
		);
	}

	fn dump_cst_node(&self, id: CstId, parent: Option<CstId>, depth: usize, out: &mut String) {
		let node = self.cst(id);
		let indent = "  ".repeat(depth);
		let source = node.grammar_source.map_or_else(|| "-".to_string(), |g| g.to_string());
		let ast = node.ast_node.map(|a| format!(" ast={}", self.path_of(a))).unwrap_or_default();
		let mut flags = String::new();
		if node.container != parent {
			flags.push_str(" (!container)");
		}
		if node.root != self.cst_root() {
			flags.push_str(" (!root)");
		}
		let hidden = if node.hidden { "hidden " } else { "" };
		match &node.kind {
			CstKind::Leaf {
				token_type, offset, length, ..
			} => {
				let _ = writeln!(
					out,
					"{indent}{hidden}leaf {token_type} {source} @{offset}..{}{ast}{flags}",
					offset + length
				);
			}
			CstKind::Composite { children } | CstKind::Root { children, .. } => {
				let kind = if matches!(node.kind, CstKind::Root { .. }) { "root" } else { "composite" };
				let _ = writeln!(out, "{indent}{hidden}{kind} {source}{}{ast}{flags}", self.span(Some(id)));
				for child in children {
					self.dump_cst_node(*child, Some(id), depth + 1, out);
				}
			}
		}
	}
}
