//! A small domain-modelling language.
//!
//! ```text
//! package shop {
//!     datatype String
//!     entity Item { name: String  tags: String [8] }
//!     abstract entity Base {}
//!     entity Order extends Base { many items: Item }
//!     alias Thing for Item
//! }
//! ```
//!
//! `alias` targets are multi-references: they resolve to every type of that
//! name in scope.

use std::sync::{Arc, OnceLock};

use crate::grammar::{Grammar, GrammarBuilder, alt, append, assign, call, cross_ref, flag, kw, many, multi_ref, opt, seq, term};

/// File extension of domain-model documents.
pub const FILE_EXTENSION: &str = ".dmodel";

/// Compiled domain-model grammar, built once per process.
pub fn grammar() -> Arc<Grammar> {
	static GRAMMAR: OnceLock<Arc<Grammar>> = OnceLock::new();
	GRAMMAR.get_or_init(|| Arc::new(build())).clone()
}

fn build() -> Grammar {
	GrammarBuilder::new("DomainModel")
		.skip("WS", r"\s+")
		.hidden("ML_COMMENT", r"/\*[\s\S]*?\*/")
		.hidden("SL_COMMENT", r"//[^\n\r]*")
		.terminal("ID", r"[_a-zA-Z][\w]*")
		.int_terminal("INT", r"[0-9]+")
		.string_terminal("STRING", r#""[^"]*"|'[^']*'"#)
		.rule("Domainmodel", many(append("elements", call("AbstractElement"))))
		.union("AbstractElement", alt([call("PackageDeclaration"), call("Type"), call("Alias")]))
		.rule(
			"PackageDeclaration",
			seq([kw("package"), assign("name", term("ID")), kw("{"), many(append("elements", call("AbstractElement"))), kw("}")]),
		)
		.union("Type", alt([call("DataType"), call("Entity")]))
		.rule(
			"DataType",
			seq([kw("datatype"), assign("name", term("ID")), opt(seq([kw("as"), assign("format", term("STRING"))]))]),
		)
		.rule(
			"Entity",
			seq([
				opt(flag("abstract", kw("abstract"))),
				kw("entity"),
				assign("name", term("ID")),
				opt(seq([kw("extends"), assign("superType", cross_ref("Entity", "ID"))])),
				kw("{"),
				many(append("features", call("Feature"))),
				kw("}"),
			]),
		)
		.rule(
			"Feature",
			seq([
				opt(flag("many", kw("many"))),
				assign("name", term("ID")),
				kw(":"),
				assign("type", cross_ref("Type", "ID")),
				opt(seq([kw("["), assign("size", term("INT")), kw("]")])),
			]),
		)
		.rule("Alias", seq([kw("alias"), assign("name", term("ID")), kw("for"), assign("targets", multi_ref("Type", "ID"))]))
		.entry("Domainmodel")
		.build()
		.expect("domain-model grammar is well formed")
}
