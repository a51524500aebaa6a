use std::cell::Cell;

use grove_primitives::{Interrupt, Never, OperationCancelled};
use pretty_assertions::assert_eq;

use super::*;
use crate::grammar::ElementTag;
use crate::languages::domain_model;

fn parse(text: &str) -> ParseResult {
	Parser::new(domain_model::grammar()).parse(text, &Never).unwrap()
}

#[test]
fn builds_typed_nodes_with_features() {
	let result = parse("datatype String\nentity Person {\n  name: String\n  many friends: Person\n}\n");
	assert!(!result.has_errors(), "{:?}", result.parser_errors);

	let tree = &result.tree;
	let root = tree.ast(tree.root());
	assert_eq!(root.type_name, "Domainmodel");
	let elements = root.nodes("elements");
	assert_eq!(elements.len(), 2);
	assert_eq!(tree.ast(elements[0]).type_name, "DataType");
	assert_eq!(tree.name_of(elements[0]), Some("String"));

	let person = tree.ast(elements[1]);
	assert_eq!(person.type_name, "Entity");
	assert_eq!(person.bool("abstract"), Some(false));
	let features = person.nodes("features");
	assert_eq!(features.len(), 2);
	assert_eq!(tree.ast(features[0]).bool("many"), Some(false));
	assert_eq!(tree.ast(features[1]).bool("many"), Some(true));

	let type_ref = tree.reference(tree.ast(features[1]).references("type")[0]);
	assert_eq!(type_ref.ref_text, "Person");
	assert_eq!(type_ref.target_type, "Type");
	assert_eq!(type_ref.container, features[1]);
	assert!(!type_ref.multi);
	assert_eq!(tree.cst_text(type_ref.ref_node.unwrap()), "Person");

	assert_eq!(tree.path_of(features[1]), "/elements@1/features@1");
	assert_eq!(tree.node_at_path("/elements@1/features@1"), Some(features[1]));
	assert_eq!(tree.node_at_path(""), Some(tree.root()));
	assert_eq!(tree.node_at_path("/elements@7"), None);
}

#[test]
fn dump_renders_small_document() {
	let result = parse("datatype A");
	assert_eq!(result.tree.dump(), "Domainmodel @0..10\n  elements[0]: DataType @0..10\n    name = \"A\"\n");
}

#[test]
fn backtracking_leaves_no_orphans() {
	let result = parse("package p { entity A extends B { x: A } alias T for A datatype D }");
	assert!(!result.has_errors(), "{:?}", result.parser_errors);
	let tree = &result.tree;
	assert_eq!(tree.ast_len(), tree.preorder().len());
	assert_eq!(tree.cst_len(), tree.cst_preorder().len());
	for id in tree.preorder().into_iter().skip(1) {
		assert!(tree.ast(id).container.is_some());
		assert_eq!(tree.node_at_path(&tree.path_of(id)), Some(id));
	}
	assert!(!tree.dump().contains("(!container)"));
	assert!(!tree.dump_cst().contains('!'));
}

#[test]
fn leaves_carry_grammar_sources() {
	let grammar = domain_model::grammar();
	let result = parse("datatype A");
	let tree = &result.tree;
	let leaves: Vec<_> = tree.cst_preorder().into_iter().filter(|&id| tree.cst(id).is_leaf()).collect();
	assert_eq!(leaves.len(), 2);

	let ids = grammar.element_ids();
	let keyword = tree.cst(leaves[0]).grammar_source.unwrap();
	assert_eq!(ids.tag(keyword), Some(&ElementTag::Keyword("datatype".into())));
	let name = tree.cst(leaves[1]).grammar_source.unwrap();
	assert_eq!(ids.tag(name), Some(&ElementTag::Terminal("ID".into())));
	assert_eq!(ids.feature(name), Some("name"));

	let datatype = tree.ast(tree.root()).nodes("elements")[0];
	assert_eq!(tree.cst(leaves[1]).ast_node, Some(datatype));
}

#[test]
fn comments_become_hidden_leaves() {
	let result = parse("/* c */ datatype A // t");
	assert!(!result.has_errors());
	let tree = &result.tree;
	let hidden: Vec<_> = tree.cst_preorder().into_iter().filter(|&id| tree.cst(id).hidden).collect();
	assert_eq!(hidden.len(), 2);
	assert_eq!(tree.cst_text(hidden[0]), "/* c */");
	assert_eq!(tree.cst_text(hidden[1]), "// t");
	assert!(hidden.iter().all(|&id| tree.cst(id).grammar_source.is_none()));
	assert_eq!(tree.cst(hidden[1]).container, Some(tree.cst_root()));
	assert_eq!(tree.leaf_at(1), None);
	assert_eq!(tree.leaf_at(9).map(|id| tree.cst_text(id)), Some("datatype"));
}

#[test]
fn recovers_after_broken_element() {
	let result = parse("entity A { x: }\ndatatype B");
	assert_eq!(result.parser_errors.len(), 1);
	let error = &result.parser_errors[0];
	assert_eq!(error.message, "Expecting ID but found `}`.");
	assert_eq!(error.offset, 14);
	assert_eq!(error.range.start.line, 0);

	let tree = &result.tree;
	let elements = tree.ast(tree.root()).nodes("elements");
	assert_eq!(elements.len(), 1);
	assert_eq!(tree.name_of(elements[0]), Some("B"));
	assert_eq!(tree.ast(elements[0]).container_index, Some(0));
}

#[test]
fn reports_end_of_input() {
	let result = parse("entity A {");
	assert_eq!(result.parser_errors.len(), 1);
	assert_eq!(
		result.parser_errors[0].message,
		"Expecting one of these: 'many', ID, '}' but found end of input."
	);
	assert_eq!(result.parser_errors[0].offset, 10);
	assert_eq!(result.parser_errors[0].length, 0);
}

#[test]
fn lexer_errors_do_not_stop_parsing() {
	let result = parse("datatype A $ datatype B");
	assert_eq!(result.lexer_errors.len(), 1);
	assert!(result.parser_errors.is_empty());
	assert_eq!(result.tree.ast(result.tree.root()).nodes("elements").len(), 2);
}

#[test]
fn converts_terminal_values() {
	let result = parse("datatype S as 'iso' entity E { s: S [8] }");
	assert!(!result.has_errors());
	let tree = &result.tree;
	let elements = tree.ast(tree.root()).nodes("elements");
	assert_eq!(tree.ast(elements[0]).str("format"), Some("iso"));
	let feature = tree.ast(elements[1]).nodes("features")[0];
	assert_eq!(tree.ast(feature).property("size"), Some(&Property::Scalar(Scalar::Int(8))));
}

#[test]
fn multi_references_are_flagged() {
	let result = parse("alias T for X");
	let tree = &result.tree;
	let alias = tree.ast(tree.root()).nodes("elements")[0];
	let reference = tree.reference(tree.ast(alias).references("targets")[0]);
	assert!(reference.multi);
	assert_eq!(reference.ref_text, "X");
}

#[test]
fn empty_arrays_are_initialised() {
	let result = parse("entity E {}");
	let tree = &result.tree;
	let entity = tree.ast(tree.root()).nodes("elements")[0];
	assert_eq!(tree.ast(entity).property("features"), Some(&Property::Empty));
	let empty = parse("");
	assert_eq!(empty.tree.ast(empty.tree.root()).property("elements"), Some(&Property::Empty));
}

#[test]
fn entry_override() {
	let parser = Parser::new(domain_model::grammar());
	let result = parser.parse_rule("entity A {}", Some("Entity"), &Never).unwrap();
	assert_eq!(result.tree.ast(result.tree.root()).type_name, "Entity");
	assert!(!result.has_errors());

	assert_eq!(
		parser.parse_rule("entity A {}", Some("Type"), &Never).unwrap_err(),
		ParseAbort::InvalidEntry("Type".into())
	);
	assert!(matches!(parser.parse_rule("", Some("Nope"), &Never), Err(ParseAbort::InvalidEntry(_))));
}

struct CancelAfter(Cell<usize>);

impl Interrupt for CancelAfter {
	fn check(&self) -> Result<(), OperationCancelled> {
		let left = self.0.get();
		if left == 0 {
			return Err(OperationCancelled);
		}
		self.0.set(left - 1);
		Ok(())
	}
}

#[test]
fn polls_for_cancellation_while_parsing() {
	let text = "datatype A\n".repeat(2_000);
	let parser = Parser::new(domain_model::grammar());
	assert_eq!(parser.parse(&text, &CancelAfter(Cell::new(0))).unwrap_err(), OperationCancelled);
	assert_eq!(parser.parse(&text, &CancelAfter(Cell::new(3))).unwrap_err(), OperationCancelled);
	assert!(parser.parse(&text, &Never).is_ok());
}
