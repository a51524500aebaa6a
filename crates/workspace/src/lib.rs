//! Multi-document workspace: documents, symbol index, scoping, linking,
//! validation, and the builder that keeps all of it consistent as files
//! change.
//!
//! Every mutation goes through [`WorkspaceManager`], which runs it as a
//! write action of the workspace lock. Readers run as read actions and see
//! the workspace between two builds.

/// Incremental, phase-by-phase document builds.
pub mod builder;
mod document;
mod documents;
mod error;
/// File-system providers.
pub mod fs;
/// Exported symbols and resolved references of all documents.
pub mod index;
/// Reference resolution.
pub mod linker;
mod manager;
/// Scope computation and lookup.
pub mod scope;
mod services;
/// Diagnostics and validation checks.
pub mod validation;

pub use builder::{BuildOptions, DocumentBuilder, ListenerId, Validation};
pub use document::{Document, DocumentState, SharedDocument};
pub use documents::Documents;
pub use error::{Result, WorkspaceError};
pub use fs::{DiskFileSystem, FileSystemProvider, InMemoryFileSystem};
pub use index::{AstNodeDescription, IndexManager, ReferenceDescription};
pub use linker::{CyclicResolution, Linker};
pub use manager::{DEFAULT_EXCLUDES, WorkspaceManager};
pub use scope::{DefaultScopeComputation, DefaultScopeProvider, LocalSymbols, ReferenceContext, Scope, ScopeComputation, ScopeError, ScopeProvider};
pub use services::{Services, ServicesBuilder};
pub use validation::{Diagnostic, DocumentValidator, Severity, ValidationAcceptor, ValidationContext, ValidationRegistry};
