//! Syntax layer: per-document AST/CST arenas, the grammar model with its
//! stable element numbering, and an interpreting parser driven directly by
//! a [`Grammar`].
//!
//! Trees are arenas addressed by small integer handles. Containment, back
//! links and cross-references are all plain indices, so a tree has no
//! reference-counting cycles and can be flattened into an instruction stream
//! without losing identity.

mod dump;
/// Grammar model, builder DSL and element numbering.
pub mod grammar;
mod ids;
/// Built-in languages.
pub mod languages;
mod lexer;
mod parser;
/// Type hierarchy and cross-reference metadata derived from a grammar.
pub mod reflection;
mod tree;

pub use grammar::{
	AssignOp, Cardinality, Element, ElementKind, ElementTag, Expr, Grammar, GrammarBuilder, GrammarElementIds, GrammarError, Rule, RuleKind, Terminal,
	TerminalKind, TerminalValue, UNKNOWN_SOURCE, UnknownGrammarElement,
};
pub use ids::{AstId, CstId, GrammarElementId, RefId};
pub use parser::{ParseAbort, Parser};
pub use reflection::{AstReflection, ReferenceTarget};
pub use tree::{
	AstNode, CstKind, CstNode, LinkingError, NodeHandle, ParseResult, Property, Reference, Resolution, Scalar, SyntaxError, SyntaxTree,
};
