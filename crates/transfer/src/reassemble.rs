use std::sync::Arc;

use grove_syntax::{
	AstId, AstNode, CstId, CstKind, CstNode, Grammar, ParseResult, Property, RefId, Reference, Scalar, SyntaxError, SyntaxTree, UnknownGrammarElement,
};
use thiserror::Error;

use crate::instruction::{
	AST_NODE, CONTAINER_INDEX, CONTAINER_PROPERTY, CST_NODE, ErrorKind, GRAMMAR_SOURCE, HIDDEN, Instruction, TYPE, Target, WireReference,
};

/// Structural defects of an instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassembleError {
	#[error("instruction stream does not start with Allocate")]
	MissingAllocate,

	#[error("Allocate appears more than once")]
	DuplicateAllocate,

	#[error("instruction stream ends without Return")]
	MissingReturn,

	#[error("{0} after Return")]
	TrailingInstruction(&'static str),

	#[error("{target} is out of range")]
	OutOfRange { target: Target },

	#[error(transparent)]
	UnknownGrammarElement(#[from] UnknownGrammarElement),

	#[error("unbalanced CST nesting at {0}")]
	UnbalancedCst(&'static str),

	#[error("{0} is defined twice")]
	Redefined(Target),

	#[error("{0} is allocated but never defined")]
	Undefined(Target),

	#[error("{0} has no $type")]
	MissingType(Target),

	#[error("{target} is contained more than once")]
	MultipleContainers { target: Target },

	#[error("unknown property '{property}' on {target}")]
	UnknownProperty { target: Target, property: String },

	#[error("property '{property}' on {target} has the wrong value kind")]
	InvalidValue { target: Target, property: String },

	#[error("'{property}' is not a cross-reference feature of {type_name}")]
	UnknownReferenceProperty { type_name: String, property: String },

	#[error("cannot link {from} to {to} through '{property}'")]
	InvalidLink { from: Target, to: Target, property: String },
}

type Result<T> = std::result::Result<T, ReassembleError>;

struct PendingReference {
	container: u32,
	property: String,
	index: Option<usize>,
	ref_text: String,
	ref_node: Option<u32>,
}

/// Rebuilds a parse result from an instruction stream.
///
/// Both node arrays are allocated up front so instructions may refer to
/// nodes defined later in the stream. Grammar sources are resolved against
/// `grammar`'s own element table, and reference target types against its
/// reflection once every node's type is known.
pub fn reassemble(instructions: impl IntoIterator<Item = Instruction>, grammar: &Grammar) -> Result<ParseResult> {
	let mut instructions = instructions.into_iter();
	let (cst, ast) = match instructions.next() {
		Some(Instruction::Allocate { cst, ast }) => (cst, ast),
		_ => return Err(ReassembleError::MissingAllocate),
	};
	let mut state = Reassembler {
		grammar,
		cst: (0..cst).map(|_| None).collect(),
		ast: (0..ast).map(|_| AstNode::new(String::new())).collect(),
		typed: vec![false; ast as usize],
		contained: vec![false; ast as usize],
		references: Vec::new(),
		stack: Vec::new(),
		root_cst: None,
		lexer_errors: Vec::new(),
		parser_errors: Vec::new(),
	};

	let mut root = None;
	for instruction in instructions.by_ref() {
		if let Instruction::Return { root: id } = instruction {
			root = Some(id);
			break;
		}
		state.apply(instruction)?;
	}
	let Some(root) = root else {
		return Err(ReassembleError::MissingReturn);
	};
	if let Some(trailing) = instructions.next() {
		return Err(ReassembleError::TrailingInstruction(trailing.name()));
	}
	state.finish(root)
}

struct Reassembler<'g> {
	grammar: &'g Grammar,
	cst: Vec<Option<CstNode>>,
	ast: Vec<AstNode>,
	typed: Vec<bool>,
	contained: Vec<bool>,
	references: Vec<PendingReference>,
	/// Open CST composites, innermost last.
	stack: Vec<u32>,
	root_cst: Option<u32>,
	lexer_errors: Vec<SyntaxError>,
	parser_errors: Vec<SyntaxError>,
}

impl Reassembler<'_> {
	fn apply(&mut self, instruction: Instruction) -> Result<()> {
		match instruction {
			Instruction::Allocate { .. } => Err(ReassembleError::DuplicateAllocate),
			Instruction::Property { target, property, value } => self.property(target, property, value),
			Instruction::PropertyArray { node, property, values } => {
				self.ast_mut(node)?.properties.insert(property, Property::Scalars(values));
				Ok(())
			}
			Instruction::Reference {
				node,
				property,
				ref_text,
				ref_node,
			} => {
				let id = self.reference(node, property.clone(), None, WireReference { ref_text, ref_node })?;
				self.ast_mut(node)?.properties.insert(property, Property::Reference(id));
				Ok(())
			}
			Instruction::ReferenceArray { node, property, references } => {
				let mut ids = Vec::with_capacity(references.len());
				for (index, reference) in references.into_iter().enumerate() {
					ids.push(self.reference(node, property.clone(), Some(index), reference)?);
				}
				self.ast_mut(node)?.properties.insert(property, Property::References(ids));
				Ok(())
			}
			Instruction::LinkNode { from, property, to } => self.link(from, property, to),
			Instruction::LinkNodeArray { node, property, children } => {
				self.ast_mut(node)?;
				let mut ids = Vec::with_capacity(children.len());
				for child in children {
					self.adopt(node, child)?;
					ids.push(AstId(child));
				}
				self.ast[node as usize].properties.insert(property, Property::Nodes(ids));
				Ok(())
			}
			Instruction::Empty { node, property } => {
				self.ast_mut(node)?.properties.insert(property, Property::Empty);
				Ok(())
			}
			Instruction::RootCstNode { id, text } => {
				if self.root_cst.is_some() || !self.stack.is_empty() {
					return Err(ReassembleError::UnbalancedCst("RootCstNode"));
				}
				self.define_cst(
					id,
					CstKind::Root {
						text: Arc::from(text),
						children: Vec::new(),
					},
					None,
				)?;
				self.root_cst = Some(id);
				self.stack.push(id);
				Ok(())
			}
			Instruction::CompositeCstNode { id } => {
				let parent = self.open_parent("CompositeCstNode")?;
				self.define_cst(id, CstKind::Composite { children: Vec::new() }, Some(parent))?;
				self.stack.push(id);
				Ok(())
			}
			Instruction::LeafCstNode {
				id,
				token_type,
				offset,
				length,
				range,
			} => {
				let parent = self.open_parent("LeafCstNode")?;
				self.define_cst(
					id,
					CstKind::Leaf {
						token_type,
						offset,
						length,
						range,
					},
					Some(parent),
				)
			}
			Instruction::PopCstNode => self.stack.pop().map(drop).ok_or(ReassembleError::UnbalancedCst("PopCstNode")),
			Instruction::Error { kind, error } => {
				match kind {
					ErrorKind::Lexer => self.lexer_errors.push(error),
					ErrorKind::Parser => self.parser_errors.push(error),
				}
				Ok(())
			}
			Instruction::Return { .. } => Ok(()),
		}
	}

	fn ast_mut(&mut self, id: u32) -> Result<&mut AstNode> {
		self.ast.get_mut(id as usize).ok_or(ReassembleError::OutOfRange { target: Target::Ast(id) })
	}

	fn cst_mut(&mut self, id: u32) -> Result<&mut CstNode> {
		match self.cst.get_mut(id as usize) {
			Some(Some(node)) => Ok(node),
			Some(None) => Err(ReassembleError::Undefined(Target::Cst(id))),
			None => Err(ReassembleError::OutOfRange { target: Target::Cst(id) }),
		}
	}

	fn check_cst(&self, id: u32) -> Result<()> {
		if (id as usize) < self.cst.len() {
			Ok(())
		} else {
			Err(ReassembleError::OutOfRange { target: Target::Cst(id) })
		}
	}

	fn open_parent(&self, at: &'static str) -> Result<u32> {
		self.stack.last().copied().ok_or(ReassembleError::UnbalancedCst(at))
	}

	fn define_cst(&mut self, id: u32, kind: CstKind, parent: Option<u32>) -> Result<()> {
		let root = self.root_cst.unwrap_or(id);
		let slot = self
			.cst
			.get_mut(id as usize)
			.ok_or(ReassembleError::OutOfRange { target: Target::Cst(id) })?;
		if slot.is_some() {
			return Err(ReassembleError::Redefined(Target::Cst(id)));
		}
		*slot = Some(CstNode {
			kind,
			container: parent.map(CstId),
			root: CstId(root),
			ast_node: None,
			grammar_source: None,
			hidden: false,
		});
		if let Some(parent) = parent {
			let children = match &mut self.cst_mut(parent)?.kind {
				CstKind::Composite { children } | CstKind::Root { children, .. } => children,
				CstKind::Leaf { .. } => return Err(ReassembleError::UnbalancedCst("leaf parent")),
			};
			children.push(CstId(id));
		}
		Ok(())
	}

	fn property(&mut self, target: Target, property: String, value: Scalar) -> Result<()> {
		let invalid = |property: String| ReassembleError::InvalidValue { target, property };
		match target {
			Target::Cst(id) => {
				let grammar = self.grammar;
				let node = self.cst_mut(id)?;
				match property.as_str() {
					HIDDEN => match value {
						Scalar::Bool(hidden) => node.hidden = hidden,
						_ => return Err(invalid(property)),
					},
					GRAMMAR_SOURCE => match value {
						Scalar::Int(raw) => node.grammar_source = grammar.element_ids().decode(raw)?,
						_ => return Err(invalid(property)),
					},
					_ => return Err(ReassembleError::UnknownProperty { target, property }),
				}
			}
			Target::Ast(id) => {
				let node = self.ast.get_mut(id as usize).ok_or(ReassembleError::OutOfRange { target })?;
				match property.as_str() {
					TYPE => match value {
						Scalar::Str(type_name) => {
							node.type_name = type_name;
							self.typed[id as usize] = true;
						}
						_ => return Err(invalid(property)),
					},
					CONTAINER_PROPERTY => match value {
						Scalar::Str(name) => node.container_property = Some(name),
						_ => return Err(invalid(property)),
					},
					CONTAINER_INDEX => match value {
						Scalar::Int(index) if index >= 0 => node.container_index = Some(index as usize),
						_ => return Err(invalid(property)),
					},
					_ => {
						node.properties.insert(property, Property::Scalar(value));
					}
				}
			}
		}
		Ok(())
	}

	fn link(&mut self, from: Target, property: String, to: Target) -> Result<()> {
		match (from, to) {
			(Target::Cst(cst), Target::Ast(ast)) if property == AST_NODE => {
				self.ast_mut(ast)?;
				self.cst_mut(cst)?.ast_node = Some(AstId(ast));
			}
			(Target::Ast(ast), Target::Cst(cst)) if property == CST_NODE => {
				self.check_cst(cst)?;
				self.ast_mut(ast)?.cst_node = Some(CstId(cst));
			}
			(Target::Ast(parent), Target::Ast(child)) if !property.starts_with('$') => {
				self.ast_mut(parent)?;
				self.adopt(parent, child)?;
				self.ast[parent as usize].properties.insert(property, Property::Node(AstId(child)));
			}
			_ => return Err(ReassembleError::InvalidLink { from, to, property }),
		}
		Ok(())
	}

	fn adopt(&mut self, parent: u32, child: u32) -> Result<()> {
		let target = Target::Ast(child);
		let contained = self.contained.get_mut(child as usize).ok_or(ReassembleError::OutOfRange { target })?;
		if *contained {
			return Err(ReassembleError::MultipleContainers { target });
		}
		*contained = true;
		self.ast[child as usize].container = Some(AstId(parent));
		Ok(())
	}

	fn reference(&mut self, node: u32, property: String, index: Option<usize>, wire: WireReference) -> Result<RefId> {
		self.ast_mut(node)?;
		if let Some(cst) = wire.ref_node {
			self.check_cst(cst)?;
		}
		let id = RefId(self.references.len() as u32);
		self.references.push(PendingReference {
			container: node,
			property,
			index,
			ref_text: wire.ref_text,
			ref_node: wire.ref_node,
		});
		Ok(id)
	}

	fn finish(self, root: u32) -> Result<ParseResult> {
		if !self.stack.is_empty() {
			return Err(ReassembleError::UnbalancedCst("Return"));
		}
		if root as usize >= self.ast.len() {
			return Err(ReassembleError::OutOfRange { target: Target::Ast(root) });
		}
		if let Some(missing) = self.typed.iter().position(|typed| !typed) {
			return Err(ReassembleError::MissingType(Target::Ast(missing as u32)));
		}
		let Some(root_cst) = self.root_cst else {
			return Err(ReassembleError::Undefined(Target::Cst(0)));
		};
		let cst = self
			.cst
			.into_iter()
			.enumerate()
			.map(|(id, node)| node.ok_or(ReassembleError::Undefined(Target::Cst(id as u32))))
			.collect::<Result<Vec<_>>>()?;

		let reflection = self.grammar.reflection();
		let mut references = Vec::with_capacity(self.references.len());
		for pending in self.references {
			let type_name = &self.ast[pending.container as usize].type_name;
			let target = reflection
				.reference_target(type_name, &pending.property)
				.ok_or_else(|| ReassembleError::UnknownReferenceProperty {
					type_name: type_name.clone(),
					property: pending.property.clone(),
				})?;
			references.push(Reference::new(
				AstId(pending.container),
				pending.property,
				pending.index,
				pending.ref_text,
				pending.ref_node.map(CstId),
				target,
			));
		}

		tracing::trace!(ast = self.ast.len(), cst = cst.len(), references = references.len(), "transfer.reassemble");
		Ok(ParseResult {
			tree: SyntaxTree::from_parts(self.ast, cst, references, AstId(root), CstId(root_cst)),
			lexer_errors: self.lexer_errors,
			parser_errors: self.parser_errors,
		})
	}
}
