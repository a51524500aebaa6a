//! Backtracking recursive-descent interpreter over a [`Grammar`].
//!
//! Alternatives are ordered: the first one that matches wins. Every
//! speculative attempt takes a [`Mark`] and rolls the arenas back on failure,
//! so a finished tree contains only what the successful path built. The
//! furthest position at which any attempt failed, and what was expected
//! there, drives error messages. Recovery happens at the entry rule only:
//! unparseable input is skipped up to and including the furthest failure and
//! the entry body is resumed.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use grove_primitives::{Interrupt, LineIndex, OperationCancelled};
use indexmap::IndexMap;
use thiserror::Error;

use crate::grammar::{AssignOp, Cardinality, Element, ElementKind, Grammar, RuleKind, TerminalValue};
use crate::ids::{AstId, CstId, GrammarElementId, RefId};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::reflection::ReferenceTarget;
use crate::tree::{AstNode, CstKind, CstNode, ParseResult, Property, Reference, Scalar, SyntaxError, SyntaxTree};

/// Elements interpreted between two cancellation polls.
const INTERRUPT_INTERVAL: usize = 64;

/// Reasons a parse produced no result at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAbort {
	#[error(transparent)]
	Cancelled(#[from] OperationCancelled),

	#[error("'{0}' is not a node-producing rule of this grammar")]
	InvalidEntry(String),
}

/// Parser for one grammar. Cheap to clone and safe to share across threads.
#[derive(Debug, Clone)]
pub struct Parser {
	grammar: Arc<Grammar>,
}

impl Parser {
	pub fn new(grammar: Arc<Grammar>) -> Self {
		Self { grammar }
	}

	pub fn grammar(&self) -> &Arc<Grammar> {
		&self.grammar
	}

	/// Parses `text` from the grammar's entry rule.
	pub fn parse(&self, text: &str, interrupt: &dyn Interrupt) -> Result<ParseResult, OperationCancelled> {
		self.run(self.grammar.entry(), text, interrupt)
	}

	/// Parses `text` from `entry`, or from the grammar's entry rule.
	pub fn parse_rule(&self, text: &str, entry: Option<&str>, interrupt: &dyn Interrupt) -> Result<ParseResult, ParseAbort> {
		let rule = match entry {
			None => self.grammar.entry(),
			Some(name) => match self.grammar.rule_index(name) {
				Some(idx) if matches!(self.grammar.rule(idx).kind, RuleKind::Node { .. }) => idx,
				_ => return Err(ParseAbort::InvalidEntry(name.to_string())),
			},
		};
		Ok(self.run(rule, text, interrupt)?)
	}

	fn run(&self, rule: usize, text: &str, interrupt: &dyn Interrupt) -> Result<ParseResult, OperationCancelled> {
		interrupt.check()?;
		let lines = LineIndex::new(text);
		let (tokens, lexer_errors) = tokenize(&self.grammar, text, &lines);
		let mut state = State {
			grammar: &self.grammar,
			text,
			lines,
			tokens,
			pos: 0,
			ast: Vec::new(),
			cst: Vec::new(),
			references: Vec::new(),
			composite: CstId(0),
			node: None,
			produced: None,
			furthest: Furthest::default(),
			steps: 0,
			interrupt,
			errors: Vec::new(),
		};
		let (root, cst_root) = state.entry(rule)?;
		tracing::trace!(
			grammar = self.grammar.name(),
			tokens = state.tokens.len(),
			ast = state.ast.len(),
			cst = state.cst.len(),
			errors = state.errors.len(),
			"parser.done"
		);
		Ok(ParseResult {
			tree: SyntaxTree::from_parts(state.ast, state.cst, state.references, root, cst_root),
			lexer_errors,
			parser_errors: state.errors,
		})
	}
}

type Step<T = bool> = Result<T, OperationCancelled>;

#[derive(Debug, Default)]
struct Furthest {
	/// Token index of the furthest failure.
	pos: usize,
	expected: Vec<String>,
}

/// Rollback point for speculative parsing.
struct Mark {
	pos: usize,
	ast: usize,
	cst: usize,
	references: usize,
	composite: CstId,
	children: usize,
	node: Option<(AstId, IndexMap<String, Property>)>,
	produced: Option<AstId>,
}

enum Assigned {
	Scalar(Scalar),
	Node(AstId),
	Reference { text: String, leaf: CstId, target: ReferenceTarget },
}

struct State<'a> {
	grammar: &'a Grammar,
	text: &'a str,
	lines: LineIndex,
	tokens: Vec<Token>,
	/// Next unconsumed token, hidden or not.
	pos: usize,
	ast: Vec<AstNode>,
	cst: Vec<CstNode>,
	references: Vec<Reference>,
	/// Composite receiving new CST children.
	composite: CstId,
	/// Node receiving assignments.
	node: Option<AstId>,
	/// Node produced by an unassigned call inside a union rule.
	produced: Option<AstId>,
	furthest: Furthest,
	steps: usize,
	interrupt: &'a dyn Interrupt,
	errors: Vec<SyntaxError>,
}

impl<'a> State<'a> {
	fn entry(&mut self, rule_index: usize) -> Step<(AstId, CstId)> {
		let grammar = self.grammar;
		let rule = grammar.rule(rule_index);
		let root = CstId::from_index(self.cst.len());
		self.cst.push(CstNode {
			kind: CstKind::Root {
				text: Arc::from(self.text),
				children: Vec::new(),
			},
			container: None,
			root,
			ast_node: None,
			grammar_source: Some(rule.id),
			hidden: false,
		});
		self.composite = root;

		let type_name = match &rule.kind {
			RuleKind::Node { type_name } => type_name.as_str(),
			RuleKind::Union => rule.name.as_str(),
		};
		let node = self.new_node(type_name, root, rule_index);
		self.cst[root.index()].ast_node = Some(node);
		self.node = Some(node);

		loop {
			let mark = self.mark();
			let matched = self.element(&rule.body)?;
			if !matched {
				self.restore(mark);
			}
			let next = self.next_significant();
			if matched && next.is_none() {
				break;
			}
			self.interrupt.check()?;
			self.report_furthest();
			let Some(next) = next else { break };
			let until = self.furthest.pos.max(next).min(self.tokens.len() - 1);
			self.skip_through(until);
			self.furthest = Furthest {
				pos: self.pos,
				expected: Vec::new(),
			};
		}
		self.attach_hidden(self.tokens.len());
		Ok((node, root))
	}

	fn tick(&mut self) -> Step<()> {
		self.steps += 1;
		if self.steps % INTERRUPT_INTERVAL == 0 {
			self.interrupt.check()?;
		}
		Ok(())
	}

	fn element(&mut self, element: &'a Element) -> Step {
		self.tick()?;
		match &element.kind {
			ElementKind::Keyword(keyword) => Ok(self.keyword(element.id, keyword).is_some()),
			ElementKind::Terminal(terminal) => Ok(self.terminal(element.id, *terminal).is_some()),
			ElementKind::RuleCall(rule) => match self.call(element.id, *rule)? {
				Some(node) => {
					self.produced = Some(node);
					Ok(true)
				}
				None => Ok(false),
			},
			// Compilation only admits cross-references inside assignments.
			ElementKind::CrossRef { .. } => Ok(false),
			ElementKind::Assign { feature, op, value } => self.assignment(feature, *op, value),
			ElementKind::Seq(items) => {
				for item in items {
					if !self.element(item)? {
						return Ok(false);
					}
				}
				Ok(true)
			}
			ElementKind::Alt(items) => {
				for item in items {
					let mark = self.mark();
					if self.element(item)? {
						return Ok(true);
					}
					self.restore(mark);
				}
				Ok(false)
			}
			ElementKind::Repeat { cardinality, body } => {
				let mut count = 0usize;
				loop {
					let mark = self.mark();
					let start = self.pos;
					if !self.element(body)? {
						self.restore(mark);
						break;
					}
					count += 1;
					if self.pos == start || *cardinality == Cardinality::Optional {
						break;
					}
				}
				Ok(count > 0 || *cardinality != Cardinality::AtLeastOne)
			}
		}
	}

	fn assignment(&mut self, feature: &str, op: AssignOp, value: &'a Element) -> Step {
		let Some(node) = self.node else { return Ok(false) };
		let Some(assigned) = self.assigned_value(value)? else {
			return Ok(false);
		};
		self.store(node, feature, op, assigned);
		Ok(true)
	}

	fn assigned_value(&mut self, element: &'a Element) -> Step<Option<Assigned>> {
		self.tick()?;
		Ok(match &element.kind {
			ElementKind::Keyword(keyword) => self.keyword(element.id, keyword).map(|_| Assigned::Scalar(Scalar::Str(keyword.clone()))),
			ElementKind::Terminal(terminal) => self.terminal(element.id, *terminal).map(|leaf| Assigned::Scalar(self.convert(*terminal, leaf))),
			ElementKind::RuleCall(rule) => self.call(element.id, *rule)?.map(Assigned::Node),
			ElementKind::CrossRef { target_type, terminal, multi } => self.terminal(element.id, *terminal).map(|leaf| Assigned::Reference {
				text: self.leaf_text(leaf).to_string(),
				leaf,
				target: ReferenceTarget {
					type_name: target_type.clone(),
					multi: *multi,
				},
			}),
			ElementKind::Alt(items) => {
				for item in items {
					let mark = self.mark();
					if let Some(value) = self.assigned_value(item)? {
						return Ok(Some(value));
					}
					self.restore(mark);
				}
				None
			}
			_ => None,
		})
	}

	fn store(&mut self, node: AstId, feature: &str, op: AssignOp, assigned: Assigned) {
		let existing_len = match self.ast[node.index()].properties.get(feature) {
			Some(Property::Scalars(items)) => items.len(),
			Some(Property::Nodes(items)) => items.len(),
			Some(Property::References(items)) => items.len(),
			_ => 0,
		};
		let index = (op == AssignOp::Append).then_some(existing_len);

		let value = match assigned {
			Assigned::Scalar(_) if op == AssignOp::Flag => Property::Scalar(Scalar::Bool(true)),
			Assigned::Scalar(scalar) => Property::Scalar(scalar),
			Assigned::Node(child) => {
				let child_node = &mut self.ast[child.index()];
				child_node.container = Some(node);
				child_node.container_property = Some(feature.to_string());
				child_node.container_index = index;
				Property::Node(child)
			}
			Assigned::Reference { text, leaf, target } => {
				let id = RefId::from_index(self.references.len());
				self.references.push(Reference::new(node, feature, index, text, Some(leaf), &target));
				Property::Reference(id)
			}
		};

		let properties = &mut self.ast[node.index()].properties;
		if op != AssignOp::Append {
			properties.insert(feature.to_string(), value);
			return;
		}
		let slot = properties.entry(feature.to_string()).or_insert(Property::Empty);
		match (slot, value) {
			(Property::Scalars(items), Property::Scalar(s)) => items.push(s),
			(Property::Nodes(items), Property::Node(n)) => items.push(n),
			(Property::References(items), Property::Reference(r)) => items.push(r),
			(slot, Property::Scalar(s)) => *slot = Property::Scalars(vec![s]),
			(slot, Property::Node(n)) => *slot = Property::Nodes(vec![n]),
			(slot, Property::Reference(r)) => *slot = Property::References(vec![r]),
			(slot, other) => *slot = other,
		}
	}

	/// Runs a rule under a fresh composite. Returns the produced node, or
	/// `None` with all effects rolled back.
	fn call(&mut self, source: GrammarElementId, rule_index: usize) -> Step<Option<AstId>> {
		let grammar = self.grammar;
		let rule = grammar.rule(rule_index);
		let mark = self.mark();
		let parent_composite = self.composite;
		let parent_node = self.node;
		let parent_produced = self.produced.take();

		let composite = self.push_cst(CstKind::Composite { children: Vec::new() }, Some(source), false);
		self.composite = composite;
		let node = match &rule.kind {
			RuleKind::Node { type_name } => Some(self.new_node(type_name, composite, rule_index)),
			RuleKind::Union => None,
		};
		self.cst[composite.index()].ast_node = node;
		self.node = node;

		let matched = self.element(&rule.body);
		let produced = node.or(self.produced);

		self.composite = parent_composite;
		self.node = parent_node;
		self.produced = parent_produced;

		match (matched?, produced) {
			(true, Some(produced)) => {
				self.cst[composite.index()].ast_node = Some(produced);
				Ok(Some(produced))
			}
			_ => {
				self.restore(mark);
				Ok(None)
			}
		}
	}

	fn new_node(&mut self, type_name: &str, cst: CstId, rule_index: usize) -> AstId {
		let mut node = AstNode::new(type_name);
		node.cst_node = Some(cst);
		for (feature, op) in &self.grammar.rule(rule_index).defaults {
			let initial = match op {
				AssignOp::Flag => Property::Scalar(Scalar::Bool(false)),
				_ => Property::Empty,
			};
			node.properties.insert(feature.clone(), initial);
		}
		let id = AstId::from_index(self.ast.len());
		self.ast.push(node);
		id
	}

	fn keyword(&mut self, source: GrammarElementId, keyword: &str) -> Option<CstId> {
		if let Some(idx) = self.next_significant()
			&& let TokenKind::Keyword(k) = self.tokens[idx].kind
			&& self.grammar.keywords()[k] == keyword
		{
			return Some(self.consume(idx, keyword.to_string(), Some(source)));
		}
		self.expect(format!("'{keyword}'"));
		None
	}

	fn terminal(&mut self, source: GrammarElementId, terminal: usize) -> Option<CstId> {
		if let Some(idx) = self.next_significant()
			&& self.tokens[idx].kind == TokenKind::Terminal(terminal)
		{
			let name = self.grammar.terminals()[terminal].name.clone();
			return Some(self.consume(idx, name, Some(source)));
		}
		self.expect(self.grammar.terminals()[terminal].name.clone());
		None
	}

	fn convert(&self, terminal: usize, leaf: CstId) -> Scalar {
		let text = self.leaf_text(leaf);
		match self.grammar.terminals()[terminal].value {
			TerminalValue::Text => Scalar::Str(text.to_string()),
			TerminalValue::Int => text.parse().map_or_else(|_| Scalar::Str(text.to_string()), Scalar::Int),
			TerminalValue::Quoted => {
				let mut chars = text.chars();
				chars.next();
				chars.next_back();
				Scalar::Str(chars.as_str().to_string())
			}
		}
	}

	fn leaf_text(&self, leaf: CstId) -> &'a str {
		match &self.cst[leaf.index()].kind {
			CstKind::Leaf { offset, length, .. } => &self.text[*offset..offset + length],
			_ => "",
		}
	}

	fn next_significant(&self) -> Option<usize> {
		(self.pos..self.tokens.len()).find(|&idx| !self.tokens[idx].hidden)
	}

	fn expect(&mut self, what: String) {
		let at = self.next_significant().unwrap_or(self.tokens.len());
		if at > self.furthest.pos {
			self.furthest = Furthest { pos: at, expected: vec![what] };
		} else if at == self.furthest.pos && !self.furthest.expected.contains(&what) {
			self.furthest.expected.push(what);
		}
	}

	/// Consumes the significant token at `idx`, attaching any hidden tokens
	/// before it to the current composite.
	fn consume(&mut self, idx: usize, token_type: String, source: Option<GrammarElementId>) -> CstId {
		self.attach_hidden(idx);
		let leaf = self.push_leaf(idx, token_type, source);
		self.pos = idx + 1;
		leaf
	}

	fn attach_hidden(&mut self, until: usize) {
		while self.pos < until {
			let token = self.tokens[self.pos];
			if token.hidden {
				let name = self.token_type(self.pos);
				self.push_leaf(self.pos, name, None);
			}
			self.pos += 1;
		}
	}

	fn push_leaf(&mut self, idx: usize, token_type: String, source: Option<GrammarElementId>) -> CstId {
		let token = self.tokens[idx];
		let range = self.lines.range(self.text, token.offset, token.length);
		self.push_cst(
			CstKind::Leaf {
				token_type,
				offset: token.offset,
				length: token.length,
				range,
			},
			source,
			token.hidden,
		)
	}

	fn push_cst(&mut self, kind: CstKind, source: Option<GrammarElementId>, hidden: bool) -> CstId {
		let id = CstId::from_index(self.cst.len());
		self.cst.push(CstNode {
			kind,
			container: Some(self.composite),
			root: CstId(0),
			ast_node: self.node,
			grammar_source: source,
			hidden,
		});
		if let Some(children) = self.cst[self.composite.index()].children_mut() {
			children.push(id);
		}
		id
	}

	/// Skips significant tokens up to and including `until` as leaves
	/// without a grammar source.
	fn skip_through(&mut self, until: usize) {
		while self.pos <= until && self.pos < self.tokens.len() {
			let idx = self.pos;
			if self.tokens[idx].hidden {
				self.attach_hidden(idx + 1);
				continue;
			}
			let name = self.token_type(idx);
			self.consume(idx, name, None);
		}
	}

	fn token_type(&self, idx: usize) -> String {
		match self.tokens[idx].kind {
			TokenKind::Keyword(k) => self.grammar.keywords()[k].clone(),
			TokenKind::Terminal(t) => self.grammar.terminals()[t].name.clone(),
		}
	}

	fn report_furthest(&mut self) {
		let found = match self.tokens.get(self.furthest.pos) {
			Some(token) => format!("`{}`", &self.text[token.offset..token.end()]),
			None => "end of input".to_string(),
		};
		let message = match self.furthest.expected.as_slice() {
			[] => format!("Unexpected token {found}."),
			[one] => format!("Expecting {one} but found {found}."),
			many => format!("Expecting one of these: {} but found {found}.", many.join(", ")),
		};
		let (offset, length) = match self.tokens.get(self.furthest.pos) {
			Some(token) => (token.offset, token.length),
			None => (self.text.len(), 0),
		};
		self.errors.push(SyntaxError {
			message,
			offset,
			length,
			range: self.lines.range(self.text, offset, length),
		});
	}

	fn mark(&self) -> Mark {
		Mark {
			pos: self.pos,
			ast: self.ast.len(),
			cst: self.cst.len(),
			references: self.references.len(),
			composite: self.composite,
			children: self.cst[self.composite.index()].children().len(),
			node: self.node.map(|id| (id, self.ast[id.index()].properties.clone())),
			produced: self.produced,
		}
	}

	fn restore(&mut self, mark: Mark) {
		self.pos = mark.pos;
		self.ast.truncate(mark.ast);
		self.cst.truncate(mark.cst);
		self.references.truncate(mark.references);
		if let Some(children) = self.cst[mark.composite.index()].children_mut() {
			children.truncate(mark.children);
		}
		if let Some((id, properties)) = mark.node {
			self.ast[id.index()].properties = properties;
		}
		self.produced = mark.produced;
	}
}
