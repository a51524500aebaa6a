use grove_primitives::LineIndex;

use crate::grammar::{Grammar, TerminalKind};
use crate::tree::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
	/// Index into [`Grammar::keywords`].
	Keyword(usize),
	/// Index into [`Grammar::terminals`].
	Terminal(usize),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Token {
	pub kind: TokenKind,
	pub offset: usize,
	pub length: usize,
	pub hidden: bool,
}

impl Token {
	pub fn end(&self) -> usize {
		self.offset + self.length
	}
}

/// Splits `text` into tokens by longest match. A keyword wins a tie with a
/// terminal; among terminals the first declared wins. Skip terminals produce
/// no token, runs of unmatched characters produce one error each.
pub(crate) fn tokenize(grammar: &Grammar, text: &str, lines: &LineIndex) -> (Vec<Token>, Vec<SyntaxError>) {
	let mut tokens = Vec::new();
	let mut errors = Vec::new();
	let mut offset = 0;
	let mut unmatched: Option<usize> = None;

	while offset < text.len() {
		let rest = &text[offset..];
		let mut best: Option<(TokenKind, usize)> = None;

		for (idx, keyword) in grammar.keywords().iter().enumerate() {
			if rest.starts_with(keyword.as_str()) && best.is_none_or(|(_, len)| keyword.len() > len) {
				best = Some((TokenKind::Keyword(idx), keyword.len()));
			}
		}
		for (idx, terminal) in grammar.terminals().iter().enumerate() {
			if let Some(m) = terminal.regex.find(rest)
				&& best.is_none_or(|(_, len)| m.end() > len)
			{
				best = Some((TokenKind::Terminal(idx), m.end()));
			}
		}

		let Some((kind, length)) = best else {
			unmatched.get_or_insert(offset);
			offset += rest.chars().next().map_or(1, char::len_utf8);
			continue;
		};

		if let Some(start) = unmatched.take() {
			errors.push(unexpected(text, lines, start, offset));
		}

		let hidden = match kind {
			TokenKind::Terminal(idx) => grammar.terminals()[idx].kind,
			TokenKind::Keyword(_) => TerminalKind::Token,
		};
		match hidden {
			TerminalKind::Skip => {}
			TerminalKind::Token | TerminalKind::Hidden => tokens.push(Token {
				kind,
				offset,
				length,
				hidden: hidden == TerminalKind::Hidden,
			}),
		}
		offset += length;
	}
	if let Some(start) = unmatched {
		errors.push(unexpected(text, lines, start, text.len()));
	}
	(tokens, errors)
}

fn unexpected(text: &str, lines: &LineIndex, start: usize, end: usize) -> SyntaxError {
	SyntaxError {
		message: format!("Unexpected character sequence '{}'.", &text[start..end]),
		offset: start,
		length: end - start,
		range: lines.range(text, start, end - start),
	}
}
