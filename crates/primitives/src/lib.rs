//! Core types shared across the grove workspace: text positions, boxed
//! future aliases and the cooperative cancellation primitive.

/// Cooperative cancellation tokens and the cancellation sentinel.
pub mod cancel;
/// Async future aliases.
pub mod future;
/// Line/character positions and ranges over source text.
pub mod text;

pub use cancel::{CancelToken, Interrupt, Never, OperationCancelled, is_operation_cancelled};
pub use future::BoxFutureStatic;
pub use text::{LineIndex, Position, Range};
