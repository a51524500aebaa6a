//! Validation checks of the domain-model language.

use grove_syntax::{AstId, Resolution};
use grove_workspace::{ValidationAcceptor, ValidationContext, ValidationRegistry};
use rustc_hash::FxHashSet;

pub fn registry() -> ValidationRegistry {
	let mut registry = ValidationRegistry::new();
	registry
		.register("Type", type_starts_with_capital)
		.register("Entity", unique_feature_names)
		.register("Entity", acyclic_inheritance);
	registry
}

fn type_starts_with_capital(cx: &ValidationContext<'_>, accept: &mut ValidationAcceptor<'_>) -> anyhow::Result<()> {
	if let Some(name) = cx.tree.name_of(cx.node)
		&& name.starts_with(|c: char| c.is_lowercase())
	{
		accept.warning(cx.node, "Type name should start with a capital.").code = Some("type-capital".to_string());
	}
	Ok(())
}

fn unique_feature_names(cx: &ValidationContext<'_>, accept: &mut ValidationAcceptor<'_>) -> anyhow::Result<()> {
	let mut seen = FxHashSet::default();
	for &feature in cx.tree.ast(cx.node).nodes("features") {
		if let Some(name) = cx.tree.name_of(feature)
			&& !seen.insert(name)
		{
			accept.error(feature, format!("Duplicate feature name '{name}'."));
		}
	}
	Ok(())
}

/// Follows `extends` inside the document; supertypes in other documents end
/// the walk.
fn acyclic_inheritance(cx: &ValidationContext<'_>, accept: &mut ValidationAcceptor<'_>) -> anyhow::Result<()> {
	let mut visited: FxHashSet<AstId> = FxHashSet::from_iter([cx.node]);
	let mut current = cx.node;
	while let Some(&id) = cx.tree.ast(current).references("superType").first() {
		let Resolution::Single(target) = cx.linker.resolve(cx.document, id)? else {
			break;
		};
		if target.uri != *cx.document.uri() {
			break;
		}
		if target.node == cx.node {
			let name = cx.tree.name_of(cx.node).unwrap_or_default();
			accept.error(cx.node, format!("Cycle in the inheritance hierarchy of '{name}'."));
			break;
		}
		if !visited.insert(target.node) {
			break;
		}
		current = target.node;
	}
	Ok(())
}
