use std::sync::Arc;

use grove_syntax::{Grammar, Parser};
use grove_worker::{AsyncParser, InProcessParser};

use crate::documents::Documents;
use crate::fs::{DiskFileSystem, FileSystemProvider};
use crate::index::IndexManager;
use crate::linker::Linker;
use crate::scope::{DefaultScopeComputation, DefaultScopeProvider, ScopeComputation, ScopeProvider};
use crate::validation::{DocumentValidator, ValidationRegistry};

/// Everything the builder needs to process documents of one language.
pub struct Services {
	pub grammar: Arc<Grammar>,
	pub parser: Arc<dyn AsyncParser>,
	pub documents: Arc<Documents>,
	pub index: Arc<IndexManager>,
	pub scope_computation: Arc<dyn ScopeComputation>,
	pub linker: Arc<Linker>,
	pub validator: Arc<DocumentValidator>,
	/// Extensions (with leading dot) of files that belong to the language.
	pub file_extensions: Vec<String>,
}

impl std::fmt::Debug for Services {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Services")
			.field("grammar", &self.grammar.name())
			.field("documents", &self.documents)
			.field("file_extensions", &self.file_extensions)
			.finish_non_exhaustive()
	}
}

impl Services {
	pub fn builder(grammar: Arc<Grammar>) -> ServicesBuilder {
		ServicesBuilder {
			grammar,
			parser: None,
			file_system: None,
			scope_computation: None,
			scope_provider: None,
			validation: ValidationRegistry::new(),
			file_extensions: Vec::new(),
		}
	}

	/// True when `name` ends with one of the language's file extensions.
	pub fn accepts(&self, name: &str) -> bool {
		self.file_extensions.iter().any(|ext| name.ends_with(ext.as_str()))
	}
}

/// Assembles [`Services`]; every part not given explicitly gets its default
/// implementation.
pub struct ServicesBuilder {
	grammar: Arc<Grammar>,
	parser: Option<Arc<dyn AsyncParser>>,
	file_system: Option<Arc<dyn FileSystemProvider>>,
	scope_computation: Option<Arc<dyn ScopeComputation>>,
	scope_provider: Option<Arc<dyn ScopeProvider>>,
	validation: ValidationRegistry,
	file_extensions: Vec<String>,
}

impl ServicesBuilder {
	/// Defaults to parsing in process.
	pub fn parser(mut self, parser: Arc<dyn AsyncParser>) -> Self {
		self.parser = Some(parser);
		self
	}

	/// Defaults to [`DiskFileSystem`].
	pub fn file_system(mut self, file_system: Arc<dyn FileSystemProvider>) -> Self {
		self.file_system = Some(file_system);
		self
	}

	pub fn scope_computation(mut self, scope_computation: Arc<dyn ScopeComputation>) -> Self {
		self.scope_computation = Some(scope_computation);
		self
	}

	pub fn scope_provider(mut self, scope_provider: Arc<dyn ScopeProvider>) -> Self {
		self.scope_provider = Some(scope_provider);
		self
	}

	pub fn validation(mut self, registry: ValidationRegistry) -> Self {
		self.validation = registry;
		self
	}

	pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
		self.file_extensions.push(extension.into());
		self
	}

	pub fn build(self) -> Arc<Services> {
		let reflection = Arc::clone(self.grammar.reflection());
		let index = Arc::new(IndexManager::new(Arc::clone(&reflection)));
		let parser = self
			.parser
			.unwrap_or_else(|| Arc::new(InProcessParser::new(Arc::new(Parser::new(Arc::clone(&self.grammar))))));
		let file_system = self.file_system.unwrap_or_else(|| Arc::new(DiskFileSystem));
		let scope_provider = self.scope_provider.unwrap_or_else(|| Arc::new(DefaultScopeProvider));
		Arc::new(Services {
			parser,
			documents: Arc::new(Documents::new(file_system)),
			linker: Arc::new(Linker::new(Arc::clone(&index), Arc::clone(&reflection), scope_provider)),
			index,
			scope_computation: self.scope_computation.unwrap_or_else(|| Arc::new(DefaultScopeComputation)),
			validator: Arc::new(DocumentValidator::new(self.validation, reflection)),
			file_extensions: self.file_extensions,
			grammar: self.grammar,
		})
	}
}
