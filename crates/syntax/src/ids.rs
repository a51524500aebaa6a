use std::fmt;

macro_rules! arena_id {
	($(#[$meta:meta])* $name:ident, $prefix:literal) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub struct $name(pub u32);

		impl $name {
			/// Arena slot of this handle.
			pub const fn index(self) -> usize {
				self.0 as usize
			}

			pub(crate) fn from_index(index: usize) -> Self {
				Self(index as u32)
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, concat!($prefix, "{}"), self.0)
			}
		}
	};
}

arena_id!(
	/// Handle of an AST node inside one [`SyntaxTree`](crate::SyntaxTree).
	AstId,
	"ast#"
);
arena_id!(
	/// Handle of a CST node inside one [`SyntaxTree`](crate::SyntaxTree).
	CstId,
	"cst#"
);
arena_id!(
	/// Handle of a reference inside one [`SyntaxTree`](crate::SyntaxTree).
	RefId,
	"ref#"
);
arena_id!(
	/// Dense preorder number of a grammar element.
	GrammarElementId,
	"g#"
);
