//! Diagnostics and document validation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use grove_primitives::{Interrupt, OperationCancelled, Range};
use grove_syntax::{AstId, AstReflection, Resolution, SyntaxError, SyntaxTree};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::linker::Linker;

/// Diagnostic codes attached by the document validator.
pub mod codes {
	pub const LEXING_ERROR: &str = "lexing-error";
	pub const PARSING_ERROR: &str = "parsing-error";
	pub const LINKING_ERROR: &str = "linking-error";
	pub const CHECK_FAILED: &str = "check-failed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	Error,
	Warning,
	Information,
	Hint,
}

impl std::fmt::Display for Severity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Error => "error",
			Self::Warning => "warning",
			Self::Information => "info",
			Self::Hint => "hint",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
	pub severity: Severity,
	pub message: String,
	pub range: Range,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	/// Free-form payload for consumers such as quick fixes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
}

impl Diagnostic {
	pub fn new(severity: Severity, message: impl Into<String>, range: Range) -> Self {
		Self {
			severity,
			message: message.into(),
			range,
			code: None,
			data: None,
		}
	}

	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());
		self
	}

	pub fn with_data(mut self, data: serde_json::Value) -> Self {
		self.data = Some(data);
		self
	}

	fn syntax(err: &SyntaxError, code: &str) -> Self {
		Self::new(Severity::Error, err.message.clone(), err.range).with_code(code)
	}
}

/// What a validation check is looking at.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
	pub document: &'a Document,
	pub tree: &'a SyntaxTree,
	pub node: AstId,
	/// For checks that need to follow references.
	pub linker: &'a Linker,
}

/// Collects the diagnostics reported by validation checks.
pub struct ValidationAcceptor<'a> {
	tree: &'a SyntaxTree,
	diagnostics: Vec<Diagnostic>,
}

impl<'a> ValidationAcceptor<'a> {
	fn new(tree: &'a SyntaxTree) -> Self {
		Self {
			tree,
			diagnostics: Vec::new(),
		}
	}

	pub fn accept(&mut self, diagnostic: Diagnostic) {
		self.diagnostics.push(diagnostic);
	}

	/// Reports `message` on the source range of `node`.
	pub fn report(&mut self, severity: Severity, node: AstId, message: impl Into<String>) -> &mut Diagnostic {
		let range = self.tree.node_range(node).unwrap_or_default();
		self.diagnostics.push(Diagnostic::new(severity, message, range));
		let last = self.diagnostics.len() - 1;
		&mut self.diagnostics[last]
	}

	pub fn error(&mut self, node: AstId, message: impl Into<String>) -> &mut Diagnostic {
		self.report(Severity::Error, node, message)
	}

	pub fn warning(&mut self, node: AstId, message: impl Into<String>) -> &mut Diagnostic {
		self.report(Severity::Warning, node, message)
	}
}

pub type ValidationCheck = Arc<dyn Fn(&ValidationContext<'_>, &mut ValidationAcceptor<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Validation checks keyed by AST node type.
#[derive(Default, Clone)]
pub struct ValidationRegistry {
	checks: FxHashMap<String, Vec<ValidationCheck>>,
}

impl std::fmt::Debug for ValidationRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_map().entries(self.checks.iter().map(|(ty, checks)| (ty, checks.len()))).finish()
	}
}

impl ValidationRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `check` for nodes of `type_name` and all of its subtypes.
	pub fn register<F>(&mut self, type_name: impl Into<String>, check: F) -> &mut Self
	where
		F: Fn(&ValidationContext<'_>, &mut ValidationAcceptor<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.checks.entry(type_name.into()).or_default().push(Arc::new(check));
		self
	}

	/// Checks that apply to a node of `type_name`: its own, then those of
	/// its supertypes.
	pub fn checks_for<'a>(&'a self, type_name: &'a str, reflection: &'a AstReflection) -> impl Iterator<Item = &'a ValidationCheck> + 'a {
		std::iter::once(type_name)
			.chain(reflection.supertypes(type_name))
			.filter_map(|ty| self.checks.get(ty))
			.flatten()
	}

	pub fn is_empty(&self) -> bool {
		self.checks.is_empty()
	}
}

/// Produces the diagnostics of a linked document.
#[derive(Debug)]
pub struct DocumentValidator {
	registry: ValidationRegistry,
	reflection: Arc<AstReflection>,
}

impl DocumentValidator {
	pub fn new(registry: ValidationRegistry, reflection: Arc<AstReflection>) -> Self {
		Self { registry, reflection }
	}

	pub fn registry(&self) -> &ValidationRegistry {
		&self.registry
	}

	/// Lexer errors, parser errors and linking errors, followed by whatever
	/// the registered checks report. A check that fails or panics yields an
	/// error diagnostic on the node it was checking.
	pub fn validate(&self, document: &Document, linker: &Linker, interrupt: &dyn Interrupt) -> Result<Vec<Diagnostic>, OperationCancelled> {
		let Some(parse) = document.parse_result() else {
			return Ok(Vec::new());
		};
		let tree = &parse.tree;
		let mut diagnostics: Vec<Diagnostic> = parse.lexer_errors.iter().map(|err| Diagnostic::syntax(err, codes::LEXING_ERROR)).collect();
		diagnostics.extend(parse.parser_errors.iter().map(|err| Diagnostic::syntax(err, codes::PARSING_ERROR)));

		for (_, reference) in tree.references() {
			if let Some(Resolution::Error(err)) = reference.resolution() {
				let range = reference
					.ref_node
					.and_then(|leaf| tree.cst_range(leaf))
					.or_else(|| tree.node_range(reference.container))
					.unwrap_or_default();
				diagnostics.push(
					Diagnostic::new(Severity::Error, err.message, range)
						.with_code(codes::LINKING_ERROR)
						.with_data(serde_json::json!({ "property": reference.property, "refText": reference.ref_text })),
				);
			}
		}
		interrupt.check()?;

		if self.registry.is_empty() {
			return Ok(diagnostics);
		}
		let mut acceptor = ValidationAcceptor::new(tree);
		for node in tree.preorder() {
			interrupt.check()?;
			let context = ValidationContext {
				document,
				tree,
				node,
				linker,
			};
			let type_name = tree.ast(node).type_name.as_str();
			for check in self.registry.checks_for(type_name, &self.reflection) {
				let message = match std::panic::catch_unwind(AssertUnwindSafe(|| check(&context, &mut acceptor))) {
					Ok(Ok(())) => continue,
					Ok(Err(err)) => format!("{err:#}"),
					Err(payload) => grove_worker::panic_message(&*payload),
				};
				tracing::error!(uri = %document.uri(), node = %node, type_name, error = %message, "validation.check_failed");
				acceptor.error(node, format!("An error occurred during validation: {message}")).code = Some(codes::CHECK_FAILED.to_string());
			}
		}
		diagnostics.extend(acceptor.diagnostics);
		Ok(diagnostics)
	}
}
