use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use grove_config::{GroveConfig, ParserMode, ValidationMode};
use grove_primitives::Never;
use grove_syntax::languages::domain_model;
use grove_syntax::{ParseResult, Parser};
use grove_transfer::{decode, disassemble, encode, reassemble};
use grove_worker::{AsyncParser, InProcessParser, WorkerPoolOptions, WorkerPoolParser};
use grove_workspace::{BuildOptions, Diagnostic, DocumentBuilder, Services, Severity, WorkspaceManager};
use url::Url;

use crate::checks;
use crate::cli::CheckArgs;

/// Builds the workspace below `args.folder` and prints every diagnostic.
/// Returns whether any of them is an error.
pub async fn check(args: &CheckArgs, out: &mut impl Write) -> anyhow::Result<bool> {
	let folder = args
		.folder
		.canonicalize()
		.with_context(|| format!("cannot open workspace folder {}", args.folder.display()))?;
	let config = match &args.config {
		Some(path) => GroveConfig::load(path)?,
		None => {
			let (config, path) = GroveConfig::discover(&folder)?;
			if let Some(path) = path {
				tracing::debug!(path = %path.display(), "cli.config");
			}
			config
		}
	};
	grove_primitives::cancel::set_interruption_period(config.build.interruption_period());

	let grammar = domain_model::grammar();
	let service = Arc::new(Parser::new(Arc::clone(&grammar)));
	let parser: Arc<dyn AsyncParser> = if args.in_process || config.parser.mode == ParserMode::InProcess {
		Arc::new(InProcessParser::new(service))
	} else {
		Arc::new(WorkerPoolParser::new(
			service,
			WorkerPoolOptions {
				threads: config.parser.threads.max(1),
				termination_delay: config.parser.termination_delay(),
			},
		))
	};
	let services = config
		.workspace
		.extensions
		.iter()
		.fold(Services::builder(grammar).parser(parser).validation(checks::registry()), |builder, ext| {
			builder.file_extension(ext.clone())
		})
		.build();
	let options = match config.build.validation {
		ValidationMode::All => BuildOptions::default(),
		ValidationMode::None => BuildOptions::without_validation(),
	};
	let manager = WorkspaceManager::new(DocumentBuilder::new(services).with_update_options(options))
		.with_exclude(config.workspace.exclude.iter().cloned())
		.with_initial_build(options);

	let root = Url::from_directory_path(&folder).map_err(|()| anyhow!("not an absolute folder path: {}", folder.display()))?;
	let uris = manager.initialize(vec![root]).await?;
	tracing::info!(documents = uris.len(), "cli.check");

	let mut errors = 0usize;
	let mut warnings = 0usize;
	for uri in &uris {
		let Some(doc) = manager.services().documents.get(uri) else {
			continue;
		};
		let diagnostics = doc.read().diagnostics().to_vec();
		let name = display_name(uri, &folder);
		for diagnostic in &diagnostics {
			match diagnostic.severity {
				Severity::Error => errors += 1,
				Severity::Warning => warnings += 1,
				Severity::Information | Severity::Hint => {}
			}
			writeln!(out, "{}", render(&name, diagnostic))?;
		}
	}
	writeln!(out, "{} documents, {errors} errors, {warnings} warnings", uris.len())?;
	Ok(errors > 0)
}

fn display_name(uri: &Url, folder: &Path) -> String {
	uri.to_file_path()
		.ok()
		.and_then(|path| path.strip_prefix(folder).ok().map(Path::to_path_buf))
		.map(|path| path.display().to_string())
		.unwrap_or_else(|| uri.to_string())
}

/// `file:line:column: severity[code]: message`, one-based.
pub fn render(name: &str, diagnostic: &Diagnostic) -> String {
	let start = diagnostic.range.start;
	let code = diagnostic.code.as_deref().map(|code| format!("[{code}]")).unwrap_or_default();
	format!(
		"{name}:{}:{}: {}{code}: {}",
		start.line + 1,
		start.character + 1,
		diagnostic.severity,
		diagnostic.message
	)
}

fn parse_file(path: &PathBuf) -> anyhow::Result<ParseResult> {
	let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
	Ok(Parser::new(domain_model::grammar()).parse(&text, &Never)?)
}

pub fn dump(file: &PathBuf, cst: bool, out: &mut impl Write) -> anyhow::Result<()> {
	let result = parse_file(file)?;
	let tree = if cst { result.tree.dump_cst() } else { result.tree.dump() };
	write!(out, "{tree}")?;
	for err in result.lexer_errors.iter().chain(&result.parser_errors) {
		writeln!(out, "error {}:{}: {}", err.range.start.line + 1, err.range.start.character + 1, err.message)?;
	}
	Ok(())
}

/// Disassembles, encodes, decodes and reassembles `file`, then compares the
/// rebuilt tree with the original.
pub fn transfer(file: &PathBuf, out: &mut impl Write) -> anyhow::Result<bool> {
	let grammar = domain_model::grammar();
	let result = parse_file(file)?;
	let ids = grammar.element_ids();
	let instructions = disassemble(&result, ids);
	let count = instructions.len();
	let bytes = encode(ids, instructions)?;
	let rebuilt = reassemble(decode(ids, &bytes)?, &grammar)?;

	let identical = rebuilt.tree.dump() == result.tree.dump()
		&& rebuilt.tree.dump_cst() == result.tree.dump_cst()
		&& rebuilt.lexer_errors == result.lexer_errors
		&& rebuilt.parser_errors == result.parser_errors;
	writeln!(out, "instructions: {count}")?;
	writeln!(out, "bytes: {}", bytes.len())?;
	writeln!(out, "identical: {}", if identical { "yes" } else { "no" })?;
	Ok(identical)
}
