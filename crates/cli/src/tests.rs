use std::path::Path;

use clap::Parser;
use pretty_assertions::assert_eq;

use crate::cli::{CheckArgs, Cli, Command};
use crate::commands;

fn write(dir: &Path, name: &str, text: &str) {
	let path = dir.join(name);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).unwrap();
	}
	std::fs::write(path, text).unwrap();
}

fn check_args(folder: &Path, in_process: bool) -> CheckArgs {
	CheckArgs {
		folder: folder.to_path_buf(),
		config: None,
		in_process,
	}
}

async fn run_check(args: &CheckArgs) -> (bool, String) {
	let mut out = Vec::new();
	let failed = commands::check(args, &mut out).await.unwrap();
	(failed, String::from_utf8(out).unwrap())
}

#[test]
fn parses_subcommands() {
	let cli = Cli::try_parse_from(["grove", "check", "ws", "--in-process", "-v"]).unwrap();
	assert!(cli.verbose);
	match cli.command {
		Command::Check(args) => {
			assert_eq!(args.folder, Path::new("ws"));
			assert!(args.in_process);
			assert_eq!(args.config, None);
		}
		other => panic!("unexpected command: {other:?}"),
	}
	assert!(Cli::try_parse_from(["grove", "dump"]).is_err());
}

#[tokio::test]
async fn check_reports_cross_document_problems() {
	let dir = tempfile::tempdir().unwrap();
	write(dir.path(), "types.dmodel", "datatype String\nentity item { name: String name: String }\n");
	write(dir.path(), "shop/order.dmodel", "entity Order { item: item\n  customer: Customer }\n");
	write(dir.path(), "target/ignored.dmodel", "entity Broken { x: Nowhere }\n");
	write(dir.path(), "README.md", "not a model");

	let (failed, out) = run_check(&check_args(dir.path(), true)).await;
	assert!(failed);
	let lines: Vec<_> = out.lines().collect();
	assert_eq!(
		lines,
		[
			"shop/order.dmodel:2:13: error[linking-error]: Could not resolve reference to Type named 'Customer'.",
			"types.dmodel:2:28: error: Duplicate feature name 'name'.",
			"types.dmodel:2:1: warning[type-capital]: Type name should start with a capital.",
			"2 documents, 2 errors, 1 warnings",
		]
	);
}

#[tokio::test]
async fn config_can_skip_validation() {
	let dir = tempfile::tempdir().unwrap();
	write(dir.path(), "a.dmodel", "entity a { x: Missing }\n");
	write(dir.path(), "grove.toml", "[build]\nvalidation = \"none\"\n");

	let (failed, out) = run_check(&check_args(dir.path(), true)).await;
	assert!(!failed);
	assert_eq!(out, "1 documents, 0 errors, 0 warnings\n");
}

#[tokio::test]
async fn config_extensions_select_documents() {
	let dir = tempfile::tempdir().unwrap();
	write(dir.path(), "a.dmodel", "entity A {}\n");
	write(dir.path(), "b.dm", "entity B extends A {}\n");
	write(dir.path(), "grove.toml", "[workspace]\nextensions = [\".dm\"]\n");

	let (failed, out) = run_check(&check_args(dir.path(), true)).await;
	assert!(failed);
	assert!(out.contains("b.dm:1:18: error[linking-error]: Could not resolve reference to Entity named 'A'."), "{out}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_pool_and_in_process_agree() {
	let dir = tempfile::tempdir().unwrap();
	write(dir.path(), "a.dmodel", "entity A extends B {}\nentity B extends A {}\nentity C { x: Nope }\n");
	write(dir.path(), "grove.toml", "[parser]\nthreads = 2\n");

	let (pooled_failed, pooled) = run_check(&check_args(dir.path(), false)).await;
	let (local_failed, local) = run_check(&check_args(dir.path(), true)).await;
	assert_eq!(pooled, local);
	assert!(pooled_failed && local_failed);
	assert!(local.contains("Cycle in the inheritance hierarchy of 'A'."), "{local}");
	assert!(local.contains("Cycle in the inheritance hierarchy of 'B'."), "{local}");
}

#[tokio::test]
async fn missing_folder_is_an_error() {
	let dir = tempfile::tempdir().unwrap();
	let args = check_args(&dir.path().join("nope"), true);
	let err = commands::check(&args, &mut Vec::<u8>::new()).await.unwrap_err();
	assert!(err.to_string().starts_with("cannot open workspace folder"), "{err}");
}

#[test]
fn dump_prints_the_tree() {
	let dir = tempfile::tempdir().unwrap();
	write(dir.path(), "a.dmodel", "entity A {}");
	let mut out = Vec::new();
	commands::dump(&dir.path().join("a.dmodel"), false, &mut out).unwrap();
	let out = String::from_utf8(out).unwrap();
	assert!(out.contains("Entity"), "{out}");
	assert!(!out.contains("error"), "{out}");
}

#[test]
fn transfer_round_trips() {
	let dir = tempfile::tempdir().unwrap();
	write(
		dir.path(),
		"a.dmodel",
		"package shop {\n  datatype String\n  entity Item { name: String }\n  alias Thing for Item\n}\n",
	);
	let mut out = Vec::new();
	assert!(commands::transfer(&dir.path().join("a.dmodel"), &mut out).unwrap());
	let out = String::from_utf8(out).unwrap();
	assert!(out.ends_with("identical: yes\n"), "{out}");
}
