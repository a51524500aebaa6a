use grove_syntax::{AstId, CstId, CstKind, GrammarElementIds, ParseResult, Property, Scalar, SyntaxTree};

use crate::instruction::{
	AST_NODE, CONTAINER_INDEX, CONTAINER_PROPERTY, CST_NODE, ErrorKind, GRAMMAR_SOURCE, HIDDEN, Instruction, TYPE, Target, WireReference,
};

/// Flattens a parse result into an instruction stream.
///
/// Only nodes reachable from the roots are emitted. Container and root back
/// links are not transmitted: they follow from the ownership links and the
/// CST nesting, so cycles never have to be broken on the wire.
pub fn disassemble(result: &ParseResult, ids: &GrammarElementIds) -> Vec<Instruction> {
	let tree = &result.tree;
	let ast_order = tree.preorder();
	let cst_order = tree.cst_preorder();
	let mut out = Disassembler {
		tree,
		ids,
		ast_ids: numbering(tree.ast_len(), ast_order.iter().map(|id| id.index())),
		cst_ids: numbering(tree.cst_len(), cst_order.iter().map(|id| id.index())),
		out: Vec::with_capacity(ast_order.len() * 4 + cst_order.len() * 4 + 2),
	};

	out.out.push(Instruction::Allocate {
		cst: cst_order.len() as u32,
		ast: ast_order.len() as u32,
	});
	out.cst_node(tree.cst_root());
	for &id in &ast_order {
		out.ast_node(id);
	}
	for error in &result.lexer_errors {
		out.out.push(Instruction::Error {
			kind: ErrorKind::Lexer,
			error: error.clone(),
		});
	}
	for error in &result.parser_errors {
		out.out.push(Instruction::Error {
			kind: ErrorKind::Parser,
			error: error.clone(),
		});
	}
	out.out.push(Instruction::Return { root: 0 });

	tracing::trace!(instructions = out.out.len(), ast = ast_order.len(), cst = cst_order.len(), "transfer.disassemble");
	out.out
}

/// Wire id of each arena slot reachable in `order`, `None` otherwise.
fn numbering(len: usize, order: impl Iterator<Item = usize>) -> Vec<Option<u32>> {
	let mut ids = vec![None; len];
	for (wire, slot) in order.enumerate() {
		ids[slot] = Some(wire as u32);
	}
	ids
}

struct Disassembler<'a> {
	tree: &'a SyntaxTree,
	ids: &'a GrammarElementIds,
	ast_ids: Vec<Option<u32>>,
	cst_ids: Vec<Option<u32>>,
	out: Vec<Instruction>,
}

impl Disassembler<'_> {
	fn ast(&self, id: AstId) -> Option<u32> {
		self.ast_ids.get(id.index()).copied().flatten()
	}

	fn cst(&self, id: CstId) -> Option<u32> {
		self.cst_ids.get(id.index()).copied().flatten()
	}

	fn cst_node(&mut self, id: CstId) {
		let Some(wire) = self.cst(id) else { return };
		let node = self.tree.cst(id);
		match &node.kind {
			CstKind::Root { text, .. } => self.out.push(Instruction::RootCstNode {
				id: wire,
				text: text.to_string(),
			}),
			CstKind::Composite { .. } => self.out.push(Instruction::CompositeCstNode { id: wire }),
			CstKind::Leaf {
				token_type,
				offset,
				length,
				range,
			} => self.out.push(Instruction::LeafCstNode {
				id: wire,
				token_type: token_type.clone(),
				offset: *offset,
				length: *length,
				range: *range,
			}),
		}

		let target = Target::Cst(wire);
		self.out.push(Instruction::Property {
			target,
			property: HIDDEN.into(),
			value: Scalar::Bool(node.hidden),
		});
		self.out.push(Instruction::Property {
			target,
			property: GRAMMAR_SOURCE.into(),
			value: Scalar::Int(self.ids.encode(node.grammar_source)),
		});
		if let Some(ast) = node.ast_node.and_then(|ast| self.ast(ast)) {
			self.out.push(Instruction::LinkNode {
				from: target,
				property: AST_NODE.into(),
				to: Target::Ast(ast),
			});
		}

		if !node.is_leaf() {
			for &child in node.children() {
				self.cst_node(child);
			}
			self.out.push(Instruction::PopCstNode);
		}
	}

	fn ast_node(&mut self, id: AstId) {
		let Some(wire) = self.ast(id) else { return };
		let node = self.tree.ast(id);
		let target = Target::Ast(wire);

		self.out.push(Instruction::Property {
			target,
			property: TYPE.into(),
			value: Scalar::Str(node.type_name.clone()),
		});
		if let Some(property) = &node.container_property {
			self.out.push(Instruction::Property {
				target,
				property: CONTAINER_PROPERTY.into(),
				value: Scalar::Str(property.clone()),
			});
		}
		if let Some(index) = node.container_index {
			self.out.push(Instruction::Property {
				target,
				property: CONTAINER_INDEX.into(),
				value: Scalar::Int(index as i64),
			});
		}
		if let Some(cst) = node.cst_node.and_then(|cst| self.cst(cst)) {
			self.out.push(Instruction::LinkNode {
				from: target,
				property: CST_NODE.into(),
				to: Target::Cst(cst),
			});
		}

		for (name, property) in &node.properties {
			let property_name = name.clone();
			let instruction = match property {
				Property::Scalar(value) => Instruction::Property {
					target,
					property: property_name,
					value: value.clone(),
				},
				Property::Scalars(values) => Instruction::PropertyArray {
					node: wire,
					property: property_name,
					values: values.clone(),
				},
				Property::Node(child) => {
					let Some(child) = self.ast(*child) else { continue };
					Instruction::LinkNode {
						from: target,
						property: property_name,
						to: Target::Ast(child),
					}
				}
				Property::Nodes(children) => Instruction::LinkNodeArray {
					node: wire,
					property: property_name,
					children: children.iter().filter_map(|&child| self.ast(child)).collect(),
				},
				Property::Reference(reference) => {
					let reference = self.tree.reference(*reference);
					Instruction::Reference {
						node: wire,
						property: property_name,
						ref_text: reference.ref_text.clone(),
						ref_node: reference.ref_node.and_then(|cst| self.cst(cst)),
					}
				}
				Property::References(references) => Instruction::ReferenceArray {
					node: wire,
					property: property_name,
					references: references
						.iter()
						.map(|&reference| {
							let reference = self.tree.reference(reference);
							WireReference {
								ref_text: reference.ref_text.clone(),
								ref_node: reference.ref_node.and_then(|cst| self.cst(cst)),
							}
						})
						.collect(),
				},
				Property::Empty => Instruction::Empty {
					node: wire,
					property: property_name,
				},
			};
			self.out.push(instruction);
		}
	}
}
