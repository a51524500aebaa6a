use std::sync::Arc;
use std::time::{Duration, Instant};

use grove_primitives::{CancelToken, Interrupt};
use grove_syntax::languages::domain_model;
use grove_syntax::{Grammar, ParseAbort, ParseResult, Parser};

use super::*;

const SOURCE: &str = "package p { datatype D entity E { a: D } } entity $ broken";

/// Domain-model parser with test hooks keyed on the input text: `slow`
/// polls its interrupt for a few seconds, `stubborn` ignores it for a
/// second, `boom` panics.
struct Hooked {
	parser: Parser,
}

impl Hooked {
	fn new() -> Arc<dyn ParseService> {
		Arc::new(Self {
			parser: Parser::new(domain_model::grammar()),
		})
	}
}

impl ParseService for Hooked {
	fn grammar(&self) -> &Arc<Grammar> {
		self.parser.grammar()
	}

	fn parse(&self, text: &str, entry: Option<&str>, interrupt: &dyn Interrupt) -> Result<ParseResult, ParseAbort> {
		if text.starts_with("slow") {
			for _ in 0..1_000 {
				interrupt.check()?;
				std::thread::sleep(Duration::from_millis(5));
			}
		}
		if text.starts_with("stubborn") {
			std::thread::sleep(Duration::from_secs(1));
		}
		if text.starts_with("boom") {
			panic!("parser blew up on {text}");
		}
		self.parser.parse_rule(text, entry, interrupt)
	}
}

fn pool(threads: usize, termination_delay: Duration) -> WorkerPoolParser {
	WorkerPoolParser::new(Hooked::new(), WorkerPoolOptions { threads, termination_delay })
}

fn cancel_after(token: &CancelToken, delay: Duration) {
	let token = token.clone();
	tokio::spawn(async move {
		tokio::time::sleep(delay).await;
		token.cancel();
	});
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_matches_in_process_parsing() {
	let token = CancelToken::new();
	let local = InProcessParser::new(Hooked::new()).parse(SOURCE, &token).await.unwrap();
	let remote = pool(2, Duration::from_millis(200)).parse(SOURCE, &token).await.unwrap();

	assert_eq!(remote.tree.dump(), local.tree.dump());
	assert_eq!(remote.tree.dump_cst(), local.tree.dump_cst());
	assert_eq!(remote.lexer_errors, local.lexer_errors);
	assert_eq!(remote.parser_errors, local.parser_errors);
	assert_eq!(remote.lexer_errors.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entry_rule_override_crosses_the_wire() {
	let pool = pool(1, Duration::from_millis(200));
	let token = CancelToken::new();
	let result = pool.parse_with("entity A {}", Some("Entity"), &token).await.unwrap();
	assert_eq!(result.tree.ast(result.tree.root()).type_name, "Entity");

	let err = pool.parse_with("entity A {}", Some("Type"), &token).await.unwrap_err();
	assert!(matches!(err, ParseError::InvalidEntry(ref name) if name == "Type"), "{err}");
}

#[tokio::test]
async fn in_process_parser_honours_cancellation() {
	let parser = InProcessParser::new(Hooked::new());
	let err = parser.parse("datatype A", &CancelToken::already_cancelled()).await.unwrap_err();
	assert!(err.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cooperative_cancellation_keeps_the_worker() {
	let pool = pool(1, Duration::from_millis(500));
	let token = CancelToken::new();
	cancel_after(&token, Duration::from_millis(30));

	let started = Instant::now();
	let err = pool.parse("slow datatype A", &token).await.unwrap_err();
	assert!(err.is_cancelled(), "{err}");
	assert!(started.elapsed() < Duration::from_millis(400), "took {:?}", started.elapsed());

	pool.parse("datatype A", &CancelToken::new()).await.unwrap();
	let records = pool.registry().snapshots();
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].restarts, 0);
	assert_eq!(records[0].last_exit, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unresponsive_workers_are_discarded_after_the_grace_period() {
	let pool = pool(1, Duration::from_millis(50));
	let token = CancelToken::new();
	cancel_after(&token, Duration::from_millis(20));

	let started = Instant::now();
	let err = pool.parse("stubborn", &token).await.unwrap_err();
	assert!(err.is_cancelled(), "{err}");
	assert!(started.elapsed() < Duration::from_millis(800), "took {:?}", started.elapsed());

	let record = pool.registry().get("grove-parser-0").unwrap();
	assert_eq!(record.last_exit.as_deref(), Some("terminated after cancellation"));
	assert_eq!(record.pending, 0);

	let result = pool.parse("datatype A", &CancelToken::new()).await.unwrap();
	assert!(!result.has_errors());
	let record = pool.registry().get("grove-parser-0").unwrap();
	assert_eq!(record.restarts, 1);
	assert_eq!(record.generation, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_workers_are_replaced() {
	let pool = pool(1, Duration::from_millis(200));
	let token = CancelToken::new();

	match pool.parse("boom", &token).await {
		Err(ParseError::WorkerCrashed { worker, message }) => {
			assert_eq!(worker, "grove-parser-0");
			assert!(message.contains("parser blew up on boom"), "{message}");
		}
		other => panic!("unexpected outcome: {:?}", other.map(|r| r.tree.dump())),
	}

	pool.parse("datatype A", &token).await.unwrap();
	assert_eq!(pool.registry().get("grove-parser-0").unwrap().restarts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requests_queue_for_busy_workers() {
	let pool = pool(2, Duration::from_millis(200));
	let mut handles = Vec::new();
	for index in 0..6 {
		let pool = pool.clone();
		handles.push(tokio::spawn(async move {
			let text = format!("datatype T{index}");
			let result = pool.parse(&text, &CancelToken::new()).await.unwrap();
			result.tree.name_of(result.tree.ast(result.tree.root()).nodes("elements")[0]).map(str::to_string)
		}));
	}
	for (index, handle) in handles.into_iter().enumerate() {
		assert_eq!(handle.await.unwrap(), Some(format!("T{index}")));
	}
	assert_eq!(pool.registry().snapshots().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_for_a_worker_is_cancellable() {
	let pool = pool(1, Duration::from_millis(200));
	let busy = CancelToken::new();
	let running = {
		let pool = pool.clone();
		let busy = busy.clone();
		tokio::spawn(async move { pool.parse("slow", &busy).await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;

	let waiting = CancelToken::new();
	cancel_after(&waiting, Duration::from_millis(20));
	let started = Instant::now();
	assert!(pool.parse("datatype A", &waiting).await.unwrap_err().is_cancelled());
	assert!(started.elapsed() < Duration::from_millis(500));

	busy.cancel();
	assert!(running.await.unwrap().unwrap_err().is_cancelled());
	pool.parse("datatype A", &CancelToken::new()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_a_request_frees_its_worker() {
	let pool = pool(1, Duration::from_millis(50));
	let token = CancelToken::new();

	let dropped = tokio::time::timeout(Duration::from_millis(30), pool.parse("slow", &token)).await;
	assert!(dropped.is_err(), "slow parse finished early");
	let record = pool.registry().get("grove-parser-0").unwrap();
	assert_eq!(record.last_exit.as_deref(), Some("request dropped mid-parse"));

	let result = tokio::time::timeout(Duration::from_secs(5), pool.parse("datatype A", &token))
		.await
		.expect("pool lost its only worker")
		.unwrap();
	assert!(!result.has_errors());
	assert_eq!(pool.registry().get("grove-parser-0").unwrap().restarts, 1);
}
