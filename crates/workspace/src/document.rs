use std::fmt;
use std::sync::Arc;

use grove_syntax::{ParseResult, Resolution, SyntaxTree};
use parking_lot::RwLock;
use url::Url;

use crate::builder::BuildOptions;
use crate::scope::LocalSymbols;
use crate::validation::Diagnostic;

/// Build progress of a document. States are ordered; the builder only ever
/// moves a document forward, and resets move it back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentState {
	/// Text changed since the last parse.
	#[default]
	Changed,
	Parsed,
	/// Exported symbols are in the index.
	IndexedContent,
	/// Local scopes are precomputed.
	ComputedScopes,
	Linked,
	Validated,
}

impl DocumentState {
	pub const ALL: [Self; 6] = [Self::Changed, Self::Parsed, Self::IndexedContent, Self::ComputedScopes, Self::Linked, Self::Validated];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Changed => "changed",
			Self::Parsed => "parsed",
			Self::IndexedContent => "indexed-content",
			Self::ComputedScopes => "computed-scopes",
			Self::Linked => "linked",
			Self::Validated => "validated",
		}
	}
}

impl fmt::Display for DocumentState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A source file tracked by the workspace.
#[derive(Debug)]
pub struct Document {
	uri: Url,
	text: Arc<str>,
	/// Bumped on every parse; node handles into this document carry it.
	version: u64,
	pub(crate) state: DocumentState,
	parse: Option<ParseResult>,
	pub(crate) local_scopes: Option<LocalSymbols>,
	pub(crate) diagnostics: Vec<Diagnostic>,
	/// Errors of scope computations that panicked, keyed by phase.
	pub(crate) scope_failures: Vec<(DocumentState, Diagnostic)>,
	/// Options of a build that has not finished yet.
	pub(crate) build: Option<BuildOptions>,
}

/// Documents are shared between the collection and in-flight builds.
pub type SharedDocument = Arc<RwLock<Document>>;

impl Document {
	pub fn new(uri: Url, text: impl Into<Arc<str>>) -> Self {
		Self {
			uri,
			text: text.into(),
			version: 0,
			state: DocumentState::Changed,
			parse: None,
			local_scopes: None,
			diagnostics: Vec::new(),
			scope_failures: Vec::new(),
			build: None,
		}
	}

	pub fn uri(&self) -> &Url {
		&self.uri
	}

	pub fn text(&self) -> &Arc<str> {
		&self.text
	}

	pub fn version(&self) -> u64 {
		self.version
	}

	pub fn state(&self) -> DocumentState {
		self.state
	}

	/// Latest parse result; `None` until the document was parsed once.
	pub fn parse_result(&self) -> Option<&ParseResult> {
		self.parse.as_ref()
	}

	pub fn tree(&self) -> Option<&SyntaxTree> {
		self.parse.as_ref().map(|parse| &parse.tree)
	}

	pub fn local_scopes(&self) -> Option<&LocalSymbols> {
		self.local_scopes.as_ref()
	}

	pub fn diagnostics(&self) -> &[Diagnostic] {
		&self.diagnostics
	}

	/// True while a build that included this document has not completed.
	pub fn has_pending_build(&self) -> bool {
		self.build.is_some()
	}

	/// True when some reference was resolved to an error.
	pub fn has_linking_errors(&self) -> bool {
		self.tree()
			.is_some_and(|tree| tree.references().any(|(_, reference)| matches!(reference.resolution(), Some(Resolution::Error(_)))))
	}

	/// Replaces the text and resets the document to [`DocumentState::Changed`].
	pub(crate) fn set_text(&mut self, text: impl Into<Arc<str>>) {
		self.text = text.into();
		self.state = DocumentState::Changed;
	}

	pub(crate) fn set_parse_result(&mut self, parse: ParseResult) {
		self.version += 1;
		self.parse = Some(parse);
		self.local_scopes = None;
		self.diagnostics.clear();
		self.scope_failures.clear();
		self.state = DocumentState::Parsed;
	}

	/// Replaces the failure of `phase`; the diagnostic shows up right away
	/// and again after every validation.
	pub(crate) fn record_scope_failure(&mut self, phase: DocumentState, failure: Option<Diagnostic>) {
		self.scope_failures.retain(|(p, _)| *p != phase);
		if let Some(diagnostic) = failure {
			self.diagnostics.push(diagnostic.clone());
			self.scope_failures.push((phase, diagnostic));
		}
	}

	pub(crate) fn into_shared(self) -> SharedDocument {
		Arc::new(RwLock::new(self))
	}
}
