#![allow(unused_crate_dependencies)]

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use grove_primitives::{CancelToken, Interrupt, OperationCancelled};
use grove_syntax::languages::domain_model;
use grove_syntax::{Parser, Resolution};
use grove_worker::{LockError, WorkerPoolOptions, WorkerPoolParser};
use grove_workspace::{
	AstNodeDescription, BuildOptions, DefaultScopeComputation, DefaultScopeProvider, Document, DocumentBuilder, DocumentState, InMemoryFileSystem,
	LocalSymbols, ReferenceContext, Scope, ScopeComputation, ScopeError, ScopeProvider, Services, ServicesBuilder, Severity, SharedDocument,
	ValidationRegistry, WorkspaceError, WorkspaceManager,
};
use pretty_assertions::assert_eq;
use url::Url;

fn uri(name: &str) -> Url {
	Url::parse(&format!("file:///ws/{name}")).unwrap()
}

fn folder() -> Url {
	Url::parse("file:///ws").unwrap()
}

struct Fixture {
	fs: Arc<InMemoryFileSystem>,
	manager: WorkspaceManager,
}

impl Fixture {
	fn new(files: &[(&str, &str)]) -> Self {
		Self::with(files, |services| services)
	}

	fn with(files: &[(&str, &str)], configure: impl FnOnce(ServicesBuilder) -> ServicesBuilder) -> Self {
		let fs = Arc::new(InMemoryFileSystem::new());
		for (name, text) in files {
			fs.insert(uri(name), *text);
		}
		let services = configure(Services::builder(domain_model::grammar()).file_system(fs.clone()).file_extension(domain_model::FILE_EXTENSION)).build();
		Self {
			fs,
			manager: WorkspaceManager::new(DocumentBuilder::new(services)),
		}
	}

	async fn initialize(&self) -> Vec<Url> {
		self.manager.initialize(vec![folder()]).await.unwrap()
	}

	fn doc(&self, name: &str) -> SharedDocument {
		self.manager.services().documents.get(&uri(name)).unwrap()
	}

	fn messages(&self, name: &str) -> Vec<String> {
		self.doc(name).read().diagnostics().iter().map(|d| d.message.clone()).collect()
	}

	fn state(&self, name: &str) -> DocumentState {
		self.doc(name).read().state()
	}
}

#[tokio::test]
async fn initialize_loads_and_links_the_folder() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}"), ("b.dmodel", "entity Bar { x: Foo }"), ("notes.txt", "not a model")]);
	assert_eq!(fixture.initialize().await, [uri("a.dmodel"), uri("b.dmodel")]);

	assert_eq!(fixture.state("a.dmodel"), DocumentState::Validated);
	assert!(fixture.messages("b.dmodel").is_empty());

	let b = fixture.doc("b.dmodel");
	let b = b.read();
	let (_, reference) = b.tree().unwrap().references().next().unwrap();
	match reference.resolution() {
		Some(Resolution::Single(handle)) => assert_eq!(handle.uri, uri("a.dmodel")),
		other => panic!("unexpected resolution: {other:?}"),
	}
}

#[tokio::test]
async fn renaming_an_export_breaks_its_importers() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}"), ("b.dmodel", "entity Bar { x: Foo }")]);
	fixture.initialize().await;
	let b_version = fixture.doc("b.dmodel").read().version();

	fixture.fs.insert(uri("a.dmodel"), "entity Baz {}");
	fixture.manager.update(vec![uri("a.dmodel")], vec![]).await.unwrap();

	assert_eq!(fixture.messages("b.dmodel"), ["Could not resolve reference to Type named 'Foo'."]);
	assert_eq!(fixture.state("b.dmodel"), DocumentState::Validated);
	// Relinked, not reparsed.
	assert_eq!(fixture.doc("b.dmodel").read().version(), b_version);

	fixture.fs.insert(uri("a.dmodel"), "entity Foo {}");
	fixture.manager.update(vec![uri("a.dmodel")], vec![]).await.unwrap();
	assert!(fixture.messages("b.dmodel").is_empty());
}

#[tokio::test]
async fn empty_updates_change_nothing() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}"), ("b.dmodel", "entity Bar { x: Foo y: Nope }")]);
	fixture.initialize().await;

	let phases = Arc::new(AtomicUsize::new(0));
	for state in DocumentState::ALL {
		let phases = phases.clone();
		fixture.manager.builder().on_build_phase(state, move |_, _| {
			phases.fetch_add(1, Ordering::SeqCst);
		});
	}
	let before: Vec<_> = ["a.dmodel", "b.dmodel"].map(|name| (fixture.doc(name).read().version(), fixture.messages(name))).into();

	fixture.manager.update(vec![], vec![]).await.unwrap();

	let after: Vec<_> = ["a.dmodel", "b.dmodel"].map(|name| (fixture.doc(name).read().version(), fixture.messages(name))).into();
	assert_eq!(after, before);
	assert_eq!(phases.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deleting_a_document_unlinks_its_importers() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}"), ("b.dmodel", "entity Bar { x: Foo }")]);
	fixture.initialize().await;

	let a = fixture.doc("a.dmodel");
	let foo = grove_syntax::NodeHandle {
		uri: uri("a.dmodel"),
		version: a.read().version(),
		node: a.read().tree().unwrap().node_at_path("/elements@0").unwrap(),
	};
	let found = fixture.manager.services().index.find_all_references(&foo);
	assert_eq!(found.len(), 1);
	assert_eq!(found[0].source_uri, uri("b.dmodel"));
	assert_eq!(found[0].source_path, "/elements@0/features@0");
	assert!(!found[0].local);

	fixture.fs.remove(&uri("a.dmodel"));
	fixture.manager.update(vec![], vec![uri("a.dmodel")]).await.unwrap();

	assert!(!fixture.manager.services().documents.has(&uri("a.dmodel")));
	assert!(fixture.manager.services().index.all_elements(None).iter().all(|desc| desc.uri != uri("a.dmodel")));
	assert_eq!(fixture.messages("b.dmodel"), ["Could not resolve reference to Type named 'Foo'."]);
	assert!(fixture.manager.services().index.find_all_references(&foo).is_empty());
}

#[tokio::test]
async fn unresolved_references_are_retried_when_anything_changes() {
	let fixture = Fixture::new(&[("b.dmodel", "entity Bar { x: Foo }")]);
	fixture.initialize().await;
	assert_eq!(fixture.messages("b.dmodel").len(), 1);

	fixture.fs.insert(uri("a.dmodel"), "datatype Foo");
	fixture.manager.update(vec![uri("a.dmodel")], vec![]).await.unwrap();
	assert!(fixture.messages("b.dmodel").is_empty());
}

#[tokio::test]
async fn local_symbols_shadow_the_global_scope() {
	let fixture = Fixture::new(&[
		("a.dmodel", "entity Item {}"),
		("b.dmodel", "package shop { entity Item {} entity Order { item: Item } }"),
	]);
	fixture.initialize().await;

	let b = fixture.doc("b.dmodel");
	let b = b.read();
	let tree = b.tree().unwrap();
	let (_, reference) = tree.references().next().unwrap();
	let target = reference.resolution().unwrap().targets()[0].clone();
	assert_eq!(target.uri, uri("b.dmodel"));
	assert_eq!(tree.path_of(target.node), "/elements@0/elements@0");
	assert!(fixture.manager.services().index.exports(&uri("b.dmodel")).iter().all(|desc| desc.name != "Item"));
}

#[tokio::test]
async fn multi_references_collect_every_candidate() {
	let fixture = Fixture::new(&[("a.dmodel", "datatype T entity T {} alias Both for T alias None for Missing")]);
	fixture.initialize().await;

	let a = fixture.doc("a.dmodel");
	let a = a.read();
	let tree = a.tree().unwrap();
	let resolutions: Vec<_> = tree.references().map(|(_, r)| r.resolution().unwrap()).collect();
	match &resolutions[0] {
		Resolution::Multi(targets) => assert_eq!(targets.len(), 2),
		other => panic!("unexpected resolution: {other:?}"),
	}
	assert_eq!(resolutions[1].error().unwrap().message, "Could not resolve reference to Type named 'Missing'.");
}

/// Resolves the reference it is asked about before building its scope.
struct Reentrant;

impl ScopeProvider for Reentrant {
	fn scope(&self, context: &ReferenceContext<'_>) -> Result<Scope, ScopeError> {
		context.linker.resolve(context.document, context.id)?;
		DefaultScopeProvider.scope(context)
	}
}

#[tokio::test]
async fn cyclic_resolution_fails_loudly() {
	let fixture = Fixture::with(&[("a.dmodel", "entity A { self: A }")], |services| services.scope_provider(Arc::new(Reentrant)));
	fixture.initialize().await;

	assert_eq!(
		fixture.messages("a.dmodel"),
		["An error occurred while resolving reference to 'A': Cyclic reference resolution detected: /elements@0/features@0/type (symbol 'A')"]
	);
}

#[tokio::test]
async fn premature_failures_are_not_memoized() {
	let fixture = Fixture::new(&[("a.dmodel", "entity B { x: A } entity A {}")]);
	let services = Arc::clone(fixture.manager.services());
	let premature = Arc::new(parking_lot::Mutex::new(None));
	fixture.manager.builder().on_build_phase(DocumentState::Parsed, {
		let premature = premature.clone();
		move |docs, _| {
			let doc = docs[0].read();
			let (id, reference) = doc.tree().unwrap().references().next().unwrap();
			*premature.lock() = Some((services.linker.resolve(&doc, id).unwrap(), reference.is_resolved()));
		}
	});
	fixture.initialize().await;

	let (resolution, cached) = premature.lock().take().unwrap();
	assert_eq!(resolution.error().unwrap().message, "Could not resolve reference to Type named 'A'.");
	assert!(!cached);
	assert!(fixture.messages("a.dmodel").is_empty());
}

#[tokio::test]
async fn failing_checks_become_diagnostics() {
	let mut registry = ValidationRegistry::new();
	registry
		.register("Type", |cx, accept| {
			if let Some(name) = cx.tree.name_of(cx.node)
				&& name.starts_with(char::is_lowercase)
			{
				accept.warning(cx.node, format!("type '{name}' should start with a capital")).data = Some(serde_json::json!({ "name": name }));
			}
			Ok(())
		})
		.register("DataType", |cx, _| match cx.tree.name_of(cx.node) {
			Some("Broken") => anyhow::bail!("datatype check gave up"),
			_ => Ok(()),
		})
		.register("Entity", |cx, _| {
			if cx.tree.name_of(cx.node) == Some("Explosive") {
				panic!("entity check exploded");
			}
			Ok(())
		});
	let fixture = Fixture::with(&[("a.dmodel", "entity item {} datatype Broken entity Explosive {}")], |services| services.validation(registry));
	fixture.initialize().await;

	let doc = fixture.doc("a.dmodel");
	let doc = doc.read();
	let summary: Vec<_> = doc.diagnostics().iter().map(|d| (d.severity, d.code.clone(), d.message.clone())).collect();
	assert_eq!(
		summary,
		[
			(Severity::Warning, None, "type 'item' should start with a capital".to_string()),
			(
				Severity::Error,
				Some("check-failed".to_string()),
				"An error occurred during validation: datatype check gave up".to_string()
			),
			(
				Severity::Error,
				Some("check-failed".to_string()),
				"An error occurred during validation: entity check exploded".to_string()
			),
		]
	);
	assert_eq!(doc.diagnostics()[0].data, Some(serde_json::json!({ "name": "item" })));
}

/// Panics while exporting the symbols of `bad.dmodel`.
struct PanicsOnBad;

impl ScopeComputation for PanicsOnBad {
	fn compute_exports(&self, document: &Document, interrupt: &dyn Interrupt) -> Result<Vec<AstNodeDescription>, OperationCancelled> {
		if document.uri().path().ends_with("/bad.dmodel") {
			panic!("no exports for you");
		}
		DefaultScopeComputation.compute_exports(document, interrupt)
	}

	fn compute_local_scopes(&self, document: &Document, interrupt: &dyn Interrupt) -> Result<LocalSymbols, OperationCancelled> {
		DefaultScopeComputation.compute_local_scopes(document, interrupt)
	}
}

#[tokio::test]
async fn panicking_scope_computation_spares_the_rest_of_the_batch() {
	let fixture = Fixture::with(&[("bad.dmodel", "entity Bad {}"), ("good.dmodel", "entity Good {}")], |services| {
		services.scope_computation(Arc::new(PanicsOnBad))
	});
	fixture.initialize().await;

	assert_eq!(fixture.state("good.dmodel"), DocumentState::Validated);
	assert!(fixture.messages("good.dmodel").is_empty());
	assert_eq!(fixture.state("bad.dmodel"), DocumentState::Validated);
	let bad = fixture.doc("bad.dmodel");
	let diagnostics = bad.read().diagnostics().to_vec();
	assert_eq!(diagnostics.len(), 1);
	assert_eq!(diagnostics[0].severity, Severity::Error);
	assert_eq!(diagnostics[0].code.as_deref(), Some("check-failed"));
	assert_eq!(diagnostics[0].message, "An error occurred during scope computation: no exports for you");

	fixture.fs.insert(uri("bad.dmodel"), "entity Worse {}");
	fixture.manager.update(vec![uri("bad.dmodel")], vec![]).await.unwrap();
	assert_eq!(fixture.messages("bad.dmodel"), ["An error occurred during scope computation: no exports for you"]);
}

#[tokio::test]
async fn syntax_errors_are_reported_before_checks() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo { x: Bar } ##")]);
	fixture.initialize().await;

	let doc = fixture.doc("a.dmodel");
	let doc = doc.read();
	let codes: Vec<_> = doc.diagnostics().iter().filter_map(|d| d.code.as_deref()).collect();
	assert_eq!(codes.first(), Some(&"lexing-error"));
	assert!(doc.diagnostics().iter().all(|d| d.severity == Severity::Error));
	assert!(doc.diagnostics().iter().any(|d| d.message == "Unexpected character sequence '##'."));
}

#[tokio::test]
async fn a_failed_update_does_not_block_the_next_one() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}")]);
	fixture.initialize().await;

	let failing = fixture.manager.update(vec![uri("missing.dmodel")], vec![]);
	match failing.await {
		Err(LockError::Failed(WorkspaceError::Read { uri: missing, .. })) => assert_eq!(missing, uri("missing.dmodel")),
		other => panic!("unexpected outcome: {other:?}"),
	}

	fixture.fs.insert(uri("b.dmodel"), "entity Bar { x: Foo }");
	fixture.manager.update(vec![uri("b.dmodel")], vec![]).await.unwrap();
	assert!(fixture.messages("b.dmodel").is_empty());
}

#[tokio::test]
async fn cancelled_builds_resume_on_the_next_update() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}"), ("b.dmodel", "entity Bar { x: Foo }")]);
	let builder = fixture.manager.builder();
	let stop = builder.on_build_phase(DocumentState::IndexedContent, |_, token: &CancelToken| token.cancel());

	let err = fixture.manager.initialize(vec![folder()]).await.unwrap_err();
	assert!(err.is_cancelled(), "{err}");
	for name in ["a.dmodel", "b.dmodel"] {
		let doc = fixture.doc(name);
		let doc = doc.read();
		assert_eq!(doc.state(), DocumentState::IndexedContent);
		assert!(doc.has_pending_build());
		assert!(doc.tree().unwrap().references().all(|(_, r)| !r.is_resolved()));
	}

	builder.remove_listener(stop);
	fixture.manager.update(vec![], vec![]).await.unwrap();
	for name in ["a.dmodel", "b.dmodel"] {
		assert_eq!(fixture.state(name), DocumentState::Validated);
		assert!(!fixture.doc(name).read().has_pending_build());
	}
	assert!(fixture.messages("b.dmodel").is_empty());
}

#[tokio::test]
async fn update_listeners_see_the_batch() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}")]);
	fixture.initialize().await;
	let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
	fixture.manager.builder().on_update({
		let seen = seen.clone();
		move |changed, deleted| seen.lock().push((changed.to_vec(), deleted.to_vec()))
	});

	fixture.manager.update(vec![uri("a.dmodel")], vec![]).await.unwrap();
	assert_eq!(*seen.lock(), [(vec![uri("a.dmodel")], vec![])]);
}

#[tokio::test]
async fn readers_wait_for_queued_writes() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo {}")]);
	let init = fixture.manager.initialize(vec![folder()]);
	let states = fixture.manager.read(|services| async move {
		let states: Vec<_> = services.documents.all().iter().map(|doc| doc.read().state()).collect();
		Ok::<_, Infallible>(states)
	});
	assert_eq!(states.await.unwrap(), [DocumentState::Validated]);
	init.await.unwrap();
}

#[tokio::test]
async fn builds_without_validation_stop_at_linked() {
	let fixture = Fixture::new(&[("a.dmodel", "entity Foo { x: Missing }")]);
	let manager = fixture.manager.clone().with_initial_build(BuildOptions::without_validation());
	manager.initialize(vec![folder()]).await.unwrap();

	assert_eq!(fixture.state("a.dmodel"), DocumentState::Linked);
	assert!(fixture.messages("a.dmodel").is_empty());
	assert!(fixture.doc("a.dmodel").read().has_linking_errors());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_pool_parsing_builds_the_same_workspace() {
	let files = [("a.dmodel", "entity Foo {}"), ("b.dmodel", "entity Bar { x: Foo y: Nope }")];
	let local = Fixture::new(&files);
	local.initialize().await;
	let pooled = Fixture::with(&files, |services| {
		let parser = Arc::new(Parser::new(domain_model::grammar()));
		services.parser(Arc::new(WorkerPoolParser::new(parser, WorkerPoolOptions::default())))
	});
	pooled.initialize().await;

	for name in ["a.dmodel", "b.dmodel"] {
		assert_eq!(pooled.messages(name), local.messages(name));
		assert_eq!(pooled.doc(name).read().tree().unwrap().dump(), local.doc(name).read().tree().unwrap().dump());
	}
}
