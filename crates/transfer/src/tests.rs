use grove_primitives::Never;
use grove_syntax::grammar::{assign, term};
use grove_syntax::languages::domain_model;
use grove_syntax::{GrammarBuilder, ParseResult, Parser, Scalar, UnknownGrammarElement};
use pretty_assertions::assert_eq;

use super::*;

const SOURCE: &str = "\
// shop model
package shop {
	datatype String as 'utf8'
	/* items */ entity Item { name: String  tags: String [8] }
	abstract entity Base {}
	entity Order extends Base { many items: Item }
	alias Thing for Item
}
entity broken { x: }
";

fn parse(text: &str) -> ParseResult {
	Parser::new(domain_model::grammar()).parse(text, &Never).unwrap()
}

fn round_trip(result: &ParseResult) -> ParseResult {
	let grammar = domain_model::grammar();
	let ids = grammar.element_ids();
	let bytes = encode(ids, disassemble(result, ids)).unwrap();
	reassemble(decode(ids, &bytes).unwrap(), &grammar).unwrap()
}

#[test]
fn round_trip_preserves_structure_and_errors() {
	let original = parse(SOURCE);
	assert_eq!(original.parser_errors.len(), 1);
	let copy = round_trip(&original);

	assert_eq!(copy.tree.dump(), original.tree.dump());
	assert_eq!(copy.tree.dump_cst(), original.tree.dump_cst());
	assert_eq!(copy.tree.text(), SOURCE);
	assert_eq!(copy.lexer_errors, original.lexer_errors);
	assert_eq!(copy.parser_errors, original.parser_errors);
}

#[test]
fn round_trip_preserves_identity() {
	let copy = round_trip(&parse(SOURCE));
	let tree = &copy.tree;

	for id in tree.preorder() {
		let node = tree.ast(id);
		let cst = node.cst_node.unwrap();
		assert_eq!(tree.cst(cst).ast_node, Some(id), "{}", tree.path_of(id));
		for child in node.children() {
			assert_eq!(tree.ast(child).container, Some(id));
		}
	}
	for id in tree.cst_preorder() {
		assert_eq!(tree.cst(id).root, tree.cst_root());
		for &child in tree.cst(id).children() {
			assert_eq!(tree.cst(child).container, Some(id));
		}
	}
	for (_, reference) in tree.references() {
		let leaf = reference.ref_node.unwrap();
		assert_eq!(tree.cst_text(leaf), reference.ref_text);
		assert_eq!(tree.cst(leaf).ast_node, Some(reference.container));
		assert!(!reference.is_resolved());
	}
	let alias = tree.node_at_path("/elements@0/elements@4").unwrap();
	let targets = tree.reference(tree.ast(alias).references("targets")[0]);
	assert!(targets.multi);
	assert_eq!(targets.target_type, "Type");
}

#[test]
fn stream_is_framed_by_allocate_and_return() {
	let result = parse("/* c */ datatype A");
	let ids = domain_model::grammar().element_ids().clone();
	let stream = disassemble(&result, &ids);

	assert_eq!(
		stream.first(),
		Some(&Instruction::Allocate {
			cst: result.tree.cst_len() as u32,
			ast: result.tree.ast_len() as u32,
		})
	);
	assert_eq!(stream.last(), Some(&Instruction::Return { root: 0 }));

	let hidden_sources: Vec<_> = stream
		.windows(3)
		.filter_map(|w| match w {
			[
				Instruction::LeafCstNode { id, .. },
				Instruction::Property {
					value: Scalar::Bool(true), ..
				},
				Instruction::Property { value, .. },
			] => Some((*id, value.clone())),
			_ => None,
		})
		.collect();
	assert_eq!(hidden_sources.len(), 1);
	assert_eq!(hidden_sources[0].1, Scalar::Int(grove_syntax::UNKNOWN_SOURCE));
}

fn stream(text: &str) -> Vec<Instruction> {
	let grammar = domain_model::grammar();
	disassemble(&parse(text), grammar.element_ids())
}

fn reassemble_err(stream: Vec<Instruction>) -> ReassembleError {
	reassemble(stream, &domain_model::grammar()).unwrap_err()
}

#[test]
fn rejects_streams_without_frame() {
	let mut body = stream("datatype A");
	body.remove(0);
	assert_eq!(reassemble_err(body), ReassembleError::MissingAllocate);

	let mut open = stream("datatype A");
	open.pop();
	assert_eq!(reassemble_err(open), ReassembleError::MissingReturn);

	let mut trailing = stream("datatype A");
	trailing.push(Instruction::PopCstNode);
	assert_eq!(reassemble_err(trailing), ReassembleError::TrailingInstruction("PopCstNode"));
}

#[test]
fn rejects_out_of_range_ids() {
	let mut stream = stream("datatype A");
	let at = stream.len() - 1;
	stream.insert(
		at,
		Instruction::Property {
			target: Target::Ast(99),
			property: "name".into(),
			value: Scalar::Str("x".into()),
		},
	);
	assert_eq!(reassemble_err(stream), ReassembleError::OutOfRange { target: Target::Ast(99) });
}

#[test]
fn rejects_unbalanced_cst() {
	let mut stream = stream("datatype A");
	let pop = stream.iter().position(|i| matches!(i, Instruction::PopCstNode)).unwrap();
	stream.remove(pop);
	assert_eq!(reassemble_err(stream), ReassembleError::UnbalancedCst("Return"));
}

#[test]
fn rejects_unknown_grammar_elements() {
	let mut stream = stream("datatype A");
	for instruction in &mut stream {
		if let Instruction::Property { property, value, .. } = instruction
			&& *property == "grammarSource"
			&& *value != Scalar::Int(-1)
		{
			*value = Scalar::Int(100_000);
			break;
		}
	}
	assert_eq!(reassemble_err(stream), ReassembleError::UnknownGrammarElement(UnknownGrammarElement(100_000)));
}

#[test]
fn rejects_nodes_with_two_containers() {
	let mut stream = stream("datatype A datatype B");
	for instruction in &mut stream {
		if let Instruction::LinkNodeArray { children, .. } = instruction {
			children[1] = children[0];
		}
	}
	assert!(matches!(reassemble_err(stream), ReassembleError::MultipleContainers { .. }));
}

#[test]
fn rejects_streams_of_another_grammar() {
	let tiny = GrammarBuilder::new("Tiny").terminal("ID", "[a-z]+").rule("Model", assign("name", term("ID"))).build().unwrap();
	let grammar = domain_model::grammar();
	let bytes = encode(grammar.element_ids(), stream("datatype A")).unwrap();
	let err = decode(tiny.element_ids(), &bytes).unwrap_err();
	assert!(matches!(err, TransferError::GrammarMismatch { .. }), "{err}");
	assert!(matches!(decode(grammar.element_ids(), &bytes[..3]), Err(TransferError::Decode(_))));
}
