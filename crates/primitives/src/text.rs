use serde::{Deserialize, Serialize};

/// Position in line/character coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
	/// Zero-based line index.
	pub line: u32,
	/// Zero-based character offset in the line.
	pub character: u32,
}

impl Position {
	/// Creates a new position.
	pub const fn new(line: u32, character: u32) -> Self {
		Self { line, character }
	}
}

/// Range with start and end positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
	/// Start position (inclusive).
	pub start: Position,
	/// End position (exclusive).
	pub end: Position,
}

impl Range {
	/// Creates a new range.
	pub const fn new(start: Position, end: Position) -> Self {
		Self { start, end }
	}

	/// Creates a zero-length range at a position.
	pub const fn point(pos: Position) -> Self {
		Self { start: pos, end: pos }
	}

	/// Returns the smallest range covering both `self` and `other`.
	pub fn cover(self, other: Range) -> Range {
		Range {
			start: self.start.min(other.start),
			end: self.end.max(other.end),
		}
	}
}

impl std::fmt::Display for Range {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}:{}-{}:{}",
			self.start.line + 1,
			self.start.character + 1,
			self.end.line + 1,
			self.end.character + 1
		)
	}
}

/// Byte offset to line/character conversion for one source text.
///
/// Characters are counted in Unicode scalar values.
#[derive(Debug, Clone)]
pub struct LineIndex {
	line_starts: Vec<usize>,
}

impl LineIndex {
	pub fn new(text: &str) -> Self {
		let mut line_starts = vec![0];
		line_starts.extend(text.match_indices('\n').map(|(idx, _)| idx + 1));
		Self { line_starts }
	}

	/// Number of lines, counting a trailing empty line.
	pub fn line_count(&self) -> usize {
		self.line_starts.len()
	}

	/// Converts a byte offset into a position. Offsets past the end clamp to
	/// the end of the text.
	pub fn position(&self, text: &str, offset: usize) -> Position {
		let offset = offset.min(text.len());
		let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
		let start = self.line_starts[line];
		let character = text.get(start..offset).map_or(offset - start, |s| s.chars().count());
		Position::new(line as u32, character as u32)
	}

	/// Converts a byte span into a range.
	pub fn range(&self, text: &str, offset: usize, length: usize) -> Range {
		Range::new(self.position(text, offset), self.position(text, offset + length))
	}
}
