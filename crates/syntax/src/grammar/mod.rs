//! Declarative grammar model.
//!
//! Grammars are assembled with [`GrammarBuilder`] from [`Expr`] trees and
//! compiled into [`Grammar`]: rule and terminal names are resolved to
//! indices, every rule and element receives a [`GrammarElementId`] in
//! preorder, and the [`AstReflection`] and [`GrammarElementIds`] tables are
//! derived once and shared.

mod element_ids;

use std::sync::Arc;

pub use element_ids::{ElementTag, GrammarElementIds, UNKNOWN_SOURCE, UnknownGrammarElement};
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::ids::GrammarElementId;
use crate::reflection::AstReflection;

/// Errors raised while compiling a grammar.
#[derive(Debug, Error)]
pub enum GrammarError {
	#[error("duplicate definition of '{0}'")]
	Duplicate(String),

	#[error("rule '{rule}' refers to unknown rule '{name}'")]
	UnknownRule { rule: String, name: String },

	#[error("rule '{rule}' refers to unknown terminal '{name}'")]
	UnknownTerminal { rule: String, name: String },

	#[error("rule '{rule}' cross-references unknown type '{name}'")]
	UnknownType { rule: String, name: String },

	#[error("invalid pattern for terminal '{terminal}': {source}")]
	Regex {
		terminal: String,
		#[source]
		source: regex::Error,
	},

	#[error("terminal '{0}' matches the empty string")]
	EmptyMatch(String),

	#[error("rule '{rule}' calls '{callee}' without assigning it; only union rules may do that")]
	UnassignedCall { rule: String, callee: String },

	#[error("rule '{rule}' contains an assignment; union rules cannot assign features")]
	AssignmentInUnion { rule: String },

	#[error("rule '{rule}' uses {what} outside of an assignment")]
	Misplaced { rule: String, what: &'static str },

	#[error("rule '{rule}' assigns '{feature}' from an unsupported element")]
	InvalidAssignment { rule: String, feature: String },

	#[error("entry rule '{0}' must produce a node")]
	InvalidEntry(String),

	#[error("grammar has no rules")]
	Empty,
}

/// Assignment operator: `=`, `+=` or `?=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
	Set,
	Append,
	Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
	/// `?`
	Optional,
	/// `*`
	Many,
	/// `+`
	AtLeastOne,
}

/// Uncompiled grammar expression, the input to [`GrammarBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
	Keyword(String),
	Terminal(String),
	Call(String),
	CrossRef { target_type: String, terminal: String, multi: bool },
	Assign { feature: String, op: AssignOp, value: Box<Expr> },
	Seq(Vec<Expr>),
	Alt(Vec<Expr>),
	Repeat(Cardinality, Box<Expr>),
}

pub fn kw(keyword: impl Into<String>) -> Expr {
	Expr::Keyword(keyword.into())
}

pub fn term(terminal: impl Into<String>) -> Expr {
	Expr::Terminal(terminal.into())
}

pub fn call(rule: impl Into<String>) -> Expr {
	Expr::Call(rule.into())
}

/// `[Type:TERMINAL]`
pub fn cross_ref(target_type: impl Into<String>, terminal: impl Into<String>) -> Expr {
	Expr::CrossRef {
		target_type: target_type.into(),
		terminal: terminal.into(),
		multi: false,
	}
}

/// `[+Type:TERMINAL]`, resolving to every candidate in scope.
pub fn multi_ref(target_type: impl Into<String>, terminal: impl Into<String>) -> Expr {
	Expr::CrossRef {
		target_type: target_type.into(),
		terminal: terminal.into(),
		multi: true,
	}
}

pub fn assign(feature: impl Into<String>, value: Expr) -> Expr {
	Expr::Assign {
		feature: feature.into(),
		op: AssignOp::Set,
		value: Box::new(value),
	}
}

pub fn append(feature: impl Into<String>, value: Expr) -> Expr {
	Expr::Assign {
		feature: feature.into(),
		op: AssignOp::Append,
		value: Box::new(value),
	}
}

pub fn flag(feature: impl Into<String>, value: Expr) -> Expr {
	Expr::Assign {
		feature: feature.into(),
		op: AssignOp::Flag,
		value: Box::new(value),
	}
}

pub fn seq(items: impl IntoIterator<Item = Expr>) -> Expr {
	Expr::Seq(items.into_iter().collect())
}

pub fn alt(items: impl IntoIterator<Item = Expr>) -> Expr {
	Expr::Alt(items.into_iter().collect())
}

pub fn opt(expr: Expr) -> Expr {
	Expr::Repeat(Cardinality::Optional, Box::new(expr))
}

pub fn many(expr: Expr) -> Expr {
	Expr::Repeat(Cardinality::Many, Box::new(expr))
}

pub fn some(expr: Expr) -> Expr {
	Expr::Repeat(Cardinality::AtLeastOne, Box::new(expr))
}

/// How a terminal participates in parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
	Token,
	/// Kept in the CST as hidden leaves (comments).
	Hidden,
	/// Dropped by the lexer (whitespace).
	Skip,
}

/// Value conversion applied when a terminal is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalValue {
	Text,
	Int,
	/// Strips the surrounding quote characters.
	Quoted,
}

#[derive(Debug, Clone)]
pub struct Terminal {
	pub name: String,
	pub pattern: String,
	pub kind: TerminalKind,
	pub value: TerminalValue,
	pub(crate) regex: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
	/// Produces a node of the given type.
	Node { type_name: String },
	/// Passes through the node produced by one of its unassigned calls.
	Union,
}

#[derive(Debug, Clone)]
pub struct Rule {
	pub id: GrammarElementId,
	pub name: String,
	pub kind: RuleKind,
	pub body: Element,
	/// Features initialised before the body runs: `+=` features start as
	/// empty arrays, `?=` features as `false`.
	pub(crate) defaults: Vec<(String, AssignOp)>,
}

/// Compiled grammar element.
#[derive(Debug, Clone)]
pub struct Element {
	pub id: GrammarElementId,
	pub kind: ElementKind,
}

#[derive(Debug, Clone)]
pub enum ElementKind {
	Keyword(String),
	Terminal(usize),
	RuleCall(usize),
	CrossRef { target_type: String, terminal: usize, multi: bool },
	Assign { feature: String, op: AssignOp, value: Box<Element> },
	Seq(Vec<Element>),
	Alt(Vec<Element>),
	Repeat { cardinality: Cardinality, body: Box<Element> },
}

struct TerminalDef {
	name: String,
	pattern: String,
	kind: TerminalKind,
	value: TerminalValue,
}

struct RuleDef {
	name: String,
	type_name: Option<String>,
	body: Expr,
}

/// Builder for [`Grammar`].
pub struct GrammarBuilder {
	name: String,
	terminals: Vec<TerminalDef>,
	rules: Vec<RuleDef>,
	entry: Option<String>,
}

impl GrammarBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			terminals: Vec::new(),
			rules: Vec::new(),
			entry: None,
		}
	}

	fn add_terminal(mut self, name: impl Into<String>, pattern: impl Into<String>, kind: TerminalKind, value: TerminalValue) -> Self {
		self.terminals.push(TerminalDef {
			name: name.into(),
			pattern: pattern.into(),
			kind,
			value,
		});
		self
	}

	pub fn terminal(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
		self.add_terminal(name, pattern, TerminalKind::Token, TerminalValue::Text)
	}

	pub fn int_terminal(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
		self.add_terminal(name, pattern, TerminalKind::Token, TerminalValue::Int)
	}

	pub fn string_terminal(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
		self.add_terminal(name, pattern, TerminalKind::Token, TerminalValue::Quoted)
	}

	pub fn hidden(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
		self.add_terminal(name, pattern, TerminalKind::Hidden, TerminalValue::Text)
	}

	pub fn skip(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
		self.add_terminal(name, pattern, TerminalKind::Skip, TerminalValue::Text)
	}

	/// Adds a rule producing nodes typed after the rule name.
	pub fn rule(mut self, name: impl Into<String>, body: Expr) -> Self {
		let name = name.into();
		self.rules.push(RuleDef {
			type_name: Some(name.clone()),
			name,
			body,
		});
		self
	}

	/// Adds a rule producing nodes of an explicit type.
	pub fn typed_rule(mut self, name: impl Into<String>, type_name: impl Into<String>, body: Expr) -> Self {
		self.rules.push(RuleDef {
			name: name.into(),
			type_name: Some(type_name.into()),
			body,
		});
		self
	}

	/// Adds a union rule. The rule name becomes a supertype of everything
	/// its alternatives produce.
	pub fn union(mut self, name: impl Into<String>, body: Expr) -> Self {
		self.rules.push(RuleDef {
			name: name.into(),
			type_name: None,
			body,
		});
		self
	}

	/// Selects the entry rule. Defaults to the first rule.
	pub fn entry(mut self, name: impl Into<String>) -> Self {
		self.entry = Some(name.into());
		self
	}

	pub fn build(self) -> Result<Grammar, GrammarError> {
		if self.rules.is_empty() {
			return Err(GrammarError::Empty);
		}

		let mut seen = FxHashSet::default();
		for name in self.terminals.iter().map(|t| &t.name).chain(self.rules.iter().map(|r| &r.name)) {
			if !seen.insert(name.clone()) {
				return Err(GrammarError::Duplicate(name.clone()));
			}
		}

		let mut terminals = Vec::with_capacity(self.terminals.len());
		for def in self.terminals {
			let regex = Regex::new(&format!("^(?:{})", def.pattern)).map_err(|source| GrammarError::Regex {
				terminal: def.name.clone(),
				source,
			})?;
			if regex.is_match("") {
				return Err(GrammarError::EmptyMatch(def.name));
			}
			terminals.push(Terminal {
				name: def.name,
				pattern: def.pattern,
				kind: def.kind,
				value: def.value,
				regex,
			});
		}

		let terminal_index: FxHashMap<&str, usize> = terminals.iter().enumerate().map(|(idx, t)| (t.name.as_str(), idx)).collect();
		let rule_index: FxHashMap<&str, usize> = self.rules.iter().enumerate().map(|(idx, r)| (r.name.as_str(), idx)).collect();
		let mut known_types: FxHashSet<&str> = self.rules.iter().filter_map(|r| r.type_name.as_deref()).collect();
		known_types.extend(self.rules.iter().filter(|r| r.type_name.is_none()).map(|r| r.name.as_str()));

		let mut compiler = Compiler {
			next_id: 0,
			terminals: &terminals,
			terminal_index: &terminal_index,
			rule_index: &rule_index,
			known_types: &known_types,
		};

		let mut rules = Vec::with_capacity(self.rules.len());
		for def in &self.rules {
			rules.push(compiler.rule(def)?);
		}

		let entry = match &self.entry {
			Some(name) => *rule_index.get(name.as_str()).ok_or_else(|| GrammarError::UnknownRule {
				rule: "<entry>".into(),
				name: name.clone(),
			})?,
			None => 0,
		};
		if rules[entry].kind == RuleKind::Union {
			return Err(GrammarError::InvalidEntry(rules[entry].name.clone()));
		}

		let mut keywords = Vec::new();
		for rule in &rules {
			collect_keywords(&rule.body, &mut keywords);
		}
		keywords.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
		keywords.dedup();

		let mut grammar = Grammar {
			name: self.name,
			terminals,
			rules,
			entry,
			keywords,
			element_ids: Arc::new(GrammarElementIds::default()),
			reflection: Arc::new(AstReflection::default()),
		};
		grammar.element_ids = Arc::new(GrammarElementIds::from_grammar(&grammar));
		grammar.reflection = Arc::new(AstReflection::from_grammar(&grammar));
		tracing::debug!(
			grammar = %grammar.name,
			rules = grammar.rules.len(),
			elements = grammar.element_ids.len(),
			"grammar.compiled"
		);
		Ok(grammar)
	}
}

fn collect_keywords(element: &Element, out: &mut Vec<String>) {
	match &element.kind {
		ElementKind::Keyword(kw) => out.push(kw.clone()),
		ElementKind::Assign { value, .. } => collect_keywords(value, out),
		ElementKind::Repeat { body, .. } => collect_keywords(body, out),
		ElementKind::Seq(items) | ElementKind::Alt(items) => items.iter().for_each(|item| collect_keywords(item, out)),
		ElementKind::Terminal(_) | ElementKind::RuleCall(_) | ElementKind::CrossRef { .. } => {}
	}
}

struct Compiler<'a> {
	next_id: u32,
	terminals: &'a [Terminal],
	terminal_index: &'a FxHashMap<&'a str, usize>,
	rule_index: &'a FxHashMap<&'a str, usize>,
	known_types: &'a FxHashSet<&'a str>,
}

impl Compiler<'_> {
	fn next_id(&mut self) -> GrammarElementId {
		let id = GrammarElementId(self.next_id);
		self.next_id += 1;
		id
	}

	fn rule(&mut self, def: &RuleDef) -> Result<Rule, GrammarError> {
		let id = self.next_id();
		let kind = match &def.type_name {
			Some(type_name) => RuleKind::Node { type_name: type_name.clone() },
			None => RuleKind::Union,
		};
		let body = self.element(def, &def.body, false)?;
		let mut defaults = Vec::new();
		collect_defaults(&body, &mut defaults);
		Ok(Rule {
			id,
			name: def.name.clone(),
			kind,
			body,
			defaults,
		})
	}

	fn terminal(&self, rule: &RuleDef, name: &str) -> Result<usize, GrammarError> {
		match self.terminal_index.get(name) {
			Some(&idx) if self.terminals[idx].kind == TerminalKind::Token => Ok(idx),
			_ => Err(GrammarError::UnknownTerminal {
				rule: rule.name.clone(),
				name: name.to_string(),
			}),
		}
	}

	fn element(&mut self, rule: &RuleDef, expr: &Expr, assigned: bool) -> Result<Element, GrammarError> {
		let id = self.next_id();
		let kind = match expr {
			Expr::Keyword(kw) => ElementKind::Keyword(kw.clone()),
			Expr::Terminal(name) => ElementKind::Terminal(self.terminal(rule, name)?),
			Expr::Call(name) => {
				let Some(&idx) = self.rule_index.get(name.as_str()) else {
					return Err(GrammarError::UnknownRule {
						rule: rule.name.clone(),
						name: name.clone(),
					});
				};
				if !assigned && rule.type_name.is_some() {
					return Err(GrammarError::UnassignedCall {
						rule: rule.name.clone(),
						callee: name.clone(),
					});
				}
				ElementKind::RuleCall(idx)
			}
			Expr::CrossRef { target_type, terminal, multi } => {
				if !assigned {
					return Err(GrammarError::Misplaced {
						rule: rule.name.clone(),
						what: "a cross-reference",
					});
				}
				if !self.known_types.contains(target_type.as_str()) {
					return Err(GrammarError::UnknownType {
						rule: rule.name.clone(),
						name: target_type.clone(),
					});
				}
				ElementKind::CrossRef {
					target_type: target_type.clone(),
					terminal: self.terminal(rule, terminal)?,
					multi: *multi,
				}
			}
			Expr::Assign { feature, op, value } => {
				if assigned {
					return Err(GrammarError::Misplaced {
						rule: rule.name.clone(),
						what: "a nested assignment",
					});
				}
				if rule.type_name.is_none() {
					return Err(GrammarError::AssignmentInUnion { rule: rule.name.clone() });
				}
				if !is_assignable(value) {
					return Err(GrammarError::InvalidAssignment {
						rule: rule.name.clone(),
						feature: feature.clone(),
					});
				}
				ElementKind::Assign {
					feature: feature.clone(),
					op: *op,
					value: Box::new(self.element(rule, value, true)?),
				}
			}
			Expr::Seq(items) => ElementKind::Seq(items.iter().map(|item| self.element(rule, item, assigned)).collect::<Result<_, _>>()?),
			Expr::Alt(items) => ElementKind::Alt(items.iter().map(|item| self.element(rule, item, assigned)).collect::<Result<_, _>>()?),
			Expr::Repeat(cardinality, body) => ElementKind::Repeat {
				cardinality: *cardinality,
				body: Box::new(self.element(rule, body, assigned)?),
			},
		};
		Ok(Element { id, kind })
	}
}

fn is_assignable(expr: &Expr) -> bool {
	match expr {
		Expr::Keyword(_) | Expr::Terminal(_) | Expr::Call(_) | Expr::CrossRef { .. } => true,
		Expr::Alt(items) => !items.is_empty() && items.iter().all(is_assignable),
		_ => false,
	}
}

fn collect_defaults(element: &Element, out: &mut Vec<(String, AssignOp)>) {
	match &element.kind {
		ElementKind::Assign { feature, op, .. } => {
			if matches!(op, AssignOp::Append | AssignOp::Flag) && !out.iter().any(|(f, _)| f == feature) {
				out.push((feature.clone(), *op));
			}
		}
		ElementKind::Repeat { body, .. } => collect_defaults(body, out),
		ElementKind::Seq(items) | ElementKind::Alt(items) => items.iter().for_each(|item| collect_defaults(item, out)),
		_ => {}
	}
}

/// A compiled grammar. Immutable once built; share it behind an [`Arc`].
#[derive(Debug, Clone)]
pub struct Grammar {
	name: String,
	terminals: Vec<Terminal>,
	rules: Vec<Rule>,
	entry: usize,
	keywords: Vec<String>,
	element_ids: Arc<GrammarElementIds>,
	reflection: Arc<AstReflection>,
}

impl Grammar {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn terminals(&self) -> &[Terminal] {
		&self.terminals
	}

	pub fn rules(&self) -> &[Rule] {
		&self.rules
	}

	pub fn rule(&self, index: usize) -> &Rule {
		&self.rules[index]
	}

	pub fn rule_index(&self, name: &str) -> Option<usize> {
		self.rules.iter().position(|r| r.name == name)
	}

	pub fn entry(&self) -> usize {
		self.entry
	}

	/// Keywords, longest first.
	pub fn keywords(&self) -> &[String] {
		&self.keywords
	}

	/// Stable element numbering shared by every party parsing with this
	/// grammar.
	pub fn element_ids(&self) -> &Arc<GrammarElementIds> {
		&self.element_ids
	}

	pub fn reflection(&self) -> &Arc<AstReflection> {
		&self.reflection
	}
}
