//! Wire types of the transfer protocol.
//!
//! A stream addresses nodes by dense integer ids only. CST ids and AST ids
//! are separate spaces, both numbered in preorder from zero. The stream
//! opens with [`Instruction::Allocate`] and closes with
//! [`Instruction::Return`].

use std::fmt;

use grove_primitives::Range;
use grove_syntax::{Scalar, SyntaxError};
use serde::{Deserialize, Serialize};

/// CST property carrying the `hidden` flag.
pub const HIDDEN: &str = "hidden";
/// CST property carrying the encoded grammar source.
pub const GRAMMAR_SOURCE: &str = "grammarSource";
/// CST link to the AST node a CST node belongs to.
pub const AST_NODE: &str = "astNode";
/// AST discriminant.
pub const TYPE: &str = "$type";
/// Name of the property under which a node is contained.
pub const CONTAINER_PROPERTY: &str = "$containerProperty";
/// Position of a node within a list-valued container property.
pub const CONTAINER_INDEX: &str = "$containerIndex";
/// AST link to the node's CST node.
pub const CST_NODE: &str = "$cstNode";

/// Node addressed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
	Cst(u32),
	Ast(u32),
}

impl fmt::Display for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Cst(id) => write!(f, "cst#{id}"),
			Self::Ast(id) => write!(f, "ast#{id}"),
		}
	}
}

/// Origin of a transferred error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
	Lexer,
	Parser,
}

/// One element of a [`ReferenceArray`](Instruction::ReferenceArray).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireReference {
	pub ref_text: String,
	/// CST id of the reference token.
	pub ref_node: Option<u32>,
}

/// A single transfer instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
	/// Sizes of both node arrays. Always first.
	Allocate { cst: u32, ast: u32 },
	/// Sets a scalar property.
	Property { target: Target, property: String, value: Scalar },
	/// Sets a list of scalars.
	PropertyArray { node: u32, property: String, values: Vec<Scalar> },
	/// Creates a single-valued reference on an AST node.
	Reference {
		node: u32,
		property: String,
		ref_text: String,
		ref_node: Option<u32>,
	},
	/// Creates a list of references on an AST node.
	ReferenceArray {
		node: u32,
		property: String,
		references: Vec<WireReference>,
	},
	/// Links one node to another. AST to AST links are ownership edges and
	/// set the child's container.
	LinkNode { from: Target, property: String, to: Target },
	/// Owned list of AST children.
	LinkNodeArray { node: u32, property: String, children: Vec<u32> },
	/// Array-valued AST property without items.
	Empty { node: u32, property: String },
	/// Opens the root CST node, which owns the source text.
	RootCstNode { id: u32, text: String },
	/// Opens a composite CST node inside the innermost open one.
	CompositeCstNode { id: u32 },
	/// Adds a leaf to the innermost open CST node.
	LeafCstNode {
		id: u32,
		token_type: String,
		offset: usize,
		length: usize,
		range: Range,
	},
	/// Closes the innermost open CST node.
	PopCstNode,
	/// A lexer or parser error.
	Error { kind: ErrorKind, error: SyntaxError },
	/// Names the root AST node. Always last.
	Return { root: u32 },
}

impl Instruction {
	/// Variant name, for summaries and logs.
	pub fn name(&self) -> &'static str {
		match self {
			Self::Allocate { .. } => "Allocate",
			Self::Property { .. } => "Property",
			Self::PropertyArray { .. } => "PropertyArray",
			Self::Reference { .. } => "Reference",
			Self::ReferenceArray { .. } => "ReferenceArray",
			Self::LinkNode { .. } => "LinkNode",
			Self::LinkNodeArray { .. } => "LinkNodeArray",
			Self::Empty { .. } => "Empty",
			Self::RootCstNode { .. } => "RootCstNode",
			Self::CompositeCstNode { .. } => "CompositeCstNode",
			Self::LeafCstNode { .. } => "LeafCstNode",
			Self::PopCstNode => "PopCstNode",
			Self::Error { .. } => "Error",
			Self::Return { .. } => "Return",
		}
	}
}
