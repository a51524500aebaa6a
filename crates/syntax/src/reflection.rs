use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::grammar::{Element, ElementKind, Grammar, RuleKind};

/// Target of a cross-reference feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
	pub type_name: String,
	pub multi: bool,
}

/// Type hierarchy and reference metadata derived from a grammar.
///
/// A union rule is a supertype of every type its alternatives can produce,
/// transitively through nested unions.
#[derive(Debug, Clone, Default)]
pub struct AstReflection {
	types: BTreeSet<String>,
	/// Transitive supertypes of each type, excluding the type itself.
	supertypes: FxHashMap<String, BTreeSet<String>>,
	references: FxHashMap<(String, String), ReferenceTarget>,
}

impl AstReflection {
	pub fn from_grammar(grammar: &Grammar) -> Self {
		let mut reflection = Self::default();

		for rule in grammar.rules() {
			match &rule.kind {
				RuleKind::Node { type_name } => {
					reflection.types.insert(type_name.clone());
					let mut refs = Vec::new();
					collect_references(&rule.body, &mut refs);
					for (feature, target) in refs {
						reflection.references.insert((type_name.clone(), feature), target);
					}
				}
				RuleKind::Union => {
					reflection.types.insert(rule.name.clone());
				}
			}
		}

		// Direct subtypes of every union, then close transitively.
		let mut direct: FxHashMap<String, Vec<String>> = FxHashMap::default();
		for rule in grammar.rules() {
			if rule.kind != RuleKind::Union {
				continue;
			}
			let mut callees = Vec::new();
			collect_calls(&rule.body, &mut callees);
			for callee in callees {
				let produced = match &grammar.rule(callee).kind {
					RuleKind::Node { type_name } => type_name.clone(),
					RuleKind::Union => grammar.rule(callee).name.clone(),
				};
				direct.entry(produced).or_default().push(rule.name.clone());
			}
		}
		for ty in &reflection.types {
			let mut closure = BTreeSet::new();
			let mut stack: Vec<String> = direct.get(ty).cloned().unwrap_or_default();
			while let Some(sup) = stack.pop() {
				if sup != *ty && closure.insert(sup.clone()) {
					stack.extend(direct.get(&sup).cloned().unwrap_or_default());
				}
			}
			reflection.supertypes.insert(ty.clone(), closure);
		}
		reflection
	}

	pub fn all_types(&self) -> impl Iterator<Item = &str> {
		self.types.iter().map(String::as_str)
	}

	pub fn is_known(&self, ty: &str) -> bool {
		self.types.contains(ty)
	}

	/// True when `sub` equals `sup` or `sup` is one of its supertypes.
	pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
		sub == sup || self.supertypes.get(sub).is_some_and(|s| s.contains(sup))
	}

	/// Supertypes of `ty`, excluding `ty`.
	pub fn supertypes(&self, ty: &str) -> impl Iterator<Item = &str> {
		self.supertypes.get(ty).into_iter().flatten().map(String::as_str)
	}

	/// Target of the cross-reference feature `property` on nodes of type `ty`.
	pub fn reference_target(&self, ty: &str, property: &str) -> Option<&ReferenceTarget> {
		self.references.get(&(ty.to_string(), property.to_string()))
	}
}

fn collect_references(element: &Element, out: &mut Vec<(String, ReferenceTarget)>) {
	match &element.kind {
		ElementKind::Assign { feature, value, .. } => {
			let mut targets = Vec::new();
			cross_refs(value, &mut targets);
			out.extend(targets.into_iter().map(|t| (feature.clone(), t)));
		}
		ElementKind::Repeat { body, .. } => collect_references(body, out),
		ElementKind::Seq(items) | ElementKind::Alt(items) => items.iter().for_each(|item| collect_references(item, out)),
		_ => {}
	}
}

fn cross_refs(element: &Element, out: &mut Vec<ReferenceTarget>) {
	match &element.kind {
		ElementKind::CrossRef { target_type, multi, .. } => out.push(ReferenceTarget {
			type_name: target_type.clone(),
			multi: *multi,
		}),
		ElementKind::Alt(items) => items.iter().for_each(|item| cross_refs(item, out)),
		_ => {}
	}
}

fn collect_calls(element: &Element, out: &mut Vec<usize>) {
	match &element.kind {
		ElementKind::RuleCall(idx) => out.push(*idx),
		ElementKind::Repeat { body, .. } => collect_calls(body, out),
		ElementKind::Seq(items) | ElementKind::Alt(items) => items.iter().for_each(|item| collect_calls(item, out)),
		_ => {}
	}
}
