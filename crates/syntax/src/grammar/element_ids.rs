use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::{Cardinality, Element, ElementKind, Grammar};
use crate::ids::GrammarElementId;

/// Wire value standing for "no grammar source" (hidden nodes, skipped
/// tokens).
pub const UNKNOWN_SOURCE: i64 = -1;

/// A transmitted grammar element number that the local grammar does not
/// define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid grammar element id: {0}")]
pub struct UnknownGrammarElement(pub i64);

/// Shape of a numbered grammar element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementTag {
	Rule(String),
	Keyword(String),
	Terminal(String),
	RuleCall(String),
	CrossRef(String),
	Assignment(String),
	Group,
	Alternatives,
	Repeat(Cardinality),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Entry {
	tag: ElementTag,
	rule: usize,
	/// Feature of the enclosing assignment, if any.
	feature: Option<String>,
}

/// Stable preorder numbering of every rule and element of a grammar.
///
/// Both sides of a transfer derive this table from the same grammar, so a
/// grammar source travels as a plain integer and is resolved against the
/// receiver's own table.
#[derive(Debug, Clone, Default)]
pub struct GrammarElementIds {
	entries: Vec<Entry>,
	fingerprint: u64,
}

impl GrammarElementIds {
	pub fn from_grammar(grammar: &Grammar) -> Self {
		let mut entries = Vec::new();
		for (rule_index, rule) in grammar.rules().iter().enumerate() {
			debug_assert_eq!(rule.id.index(), entries.len());
			entries.push(Entry {
				tag: ElementTag::Rule(rule.name.clone()),
				rule: rule_index,
				feature: None,
			});
			walk(grammar, &rule.body, rule_index, None, &mut entries);
		}
		let mut hasher = FxHasher::default();
		entries.hash(&mut hasher);
		Self {
			fingerprint: hasher.finish(),
			entries,
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Digest of the whole table; equal tables have equal fingerprints.
	pub fn fingerprint(&self) -> u64 {
		self.fingerprint
	}

	pub fn tag(&self, id: GrammarElementId) -> Option<&ElementTag> {
		self.entries.get(id.index()).map(|e| &e.tag)
	}

	/// Index of the rule an element belongs to.
	pub fn rule_of(&self, id: GrammarElementId) -> Option<usize> {
		self.entries.get(id.index()).map(|e| e.rule)
	}

	/// Feature assigned by the element or its enclosing assignment.
	pub fn feature(&self, id: GrammarElementId) -> Option<&str> {
		self.entries.get(id.index()).and_then(|e| e.feature.as_deref())
	}

	/// Wire form of an optional grammar source.
	pub fn encode(&self, source: Option<GrammarElementId>) -> i64 {
		source.map_or(UNKNOWN_SOURCE, |id| i64::from(id.0))
	}

	/// Resolves a wire grammar source against this table.
	pub fn decode(&self, raw: i64) -> Result<Option<GrammarElementId>, UnknownGrammarElement> {
		if raw == UNKNOWN_SOURCE {
			return Ok(None);
		}
		match usize::try_from(raw) {
			Ok(index) if index < self.entries.len() => Ok(Some(GrammarElementId(index as u32))),
			_ => Err(UnknownGrammarElement(raw)),
		}
	}
}

fn walk(grammar: &Grammar, element: &Element, rule: usize, feature: Option<&str>, entries: &mut Vec<Entry>) {
	debug_assert_eq!(element.id.index(), entries.len());
	let tag = match &element.kind {
		ElementKind::Keyword(kw) => ElementTag::Keyword(kw.clone()),
		ElementKind::Terminal(idx) => ElementTag::Terminal(grammar.terminals()[*idx].name.clone()),
		ElementKind::RuleCall(idx) => ElementTag::RuleCall(grammar.rule(*idx).name.clone()),
		ElementKind::CrossRef { target_type, .. } => ElementTag::CrossRef(target_type.clone()),
		ElementKind::Assign { feature, .. } => ElementTag::Assignment(feature.clone()),
		ElementKind::Seq(_) => ElementTag::Group,
		ElementKind::Alt(_) => ElementTag::Alternatives,
		ElementKind::Repeat { cardinality, .. } => ElementTag::Repeat(*cardinality),
	};
	let own_feature = match &element.kind {
		ElementKind::Assign { feature, .. } => Some(feature.as_str()),
		_ => feature,
	};
	entries.push(Entry {
		tag,
		rule,
		feature: own_feature.map(str::to_string),
	});
	match &element.kind {
		ElementKind::Assign { value, .. } => walk(grammar, value, rule, own_feature, entries),
		ElementKind::Repeat { body, .. } => walk(grammar, body, rule, own_feature, entries),
		ElementKind::Seq(items) | ElementKind::Alt(items) => {
			for item in items {
				walk(grammar, item, rule, own_feature, entries);
			}
		}
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::grammar::{GrammarBuilder, assign, kw, seq, term};

	fn grammar() -> Grammar {
		GrammarBuilder::new("t")
			.terminal("ID", "[a-z]+")
			.rule("Model", seq([kw("model"), assign("name", term("ID"))]))
			.build()
			.unwrap()
	}

	#[test]
	fn tables_built_twice_agree() {
		let g = grammar();
		let again = GrammarElementIds::from_grammar(&g);
		assert_eq!(again.fingerprint(), g.element_ids().fingerprint());
		assert_eq!(again.len(), 5);
		assert_eq!(again.tag(GrammarElementId(4)), Some(&ElementTag::Terminal("ID".into())));
		assert_eq!(again.feature(GrammarElementId(4)), Some("name"));
		assert_eq!(again.feature(GrammarElementId(2)), None);
	}

	#[test]
	fn decodes_sentinel_and_rejects_out_of_range() {
		let g = grammar();
		let ids = g.element_ids();
		assert_eq!(ids.decode(UNKNOWN_SOURCE), Ok(None));
		assert_eq!(ids.decode(3), Ok(Some(GrammarElementId(3))));
		assert_eq!(ids.decode(5), Err(UnknownGrammarElement(5)));
		assert_eq!(ids.decode(-7), Err(UnknownGrammarElement(-7)));
		assert_eq!(ids.encode(None), UNKNOWN_SOURCE);
	}
}
