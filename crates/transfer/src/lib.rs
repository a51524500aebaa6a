//! Transfer protocol for parse results.
//!
//! A parse result is flattened by [`disassemble`] into a list of
//! [`Instruction`]s that only mention integer ids, framed into bytes by
//! [`encode`], and rebuilt on the other side by [`decode`] and
//! [`reassemble`]. The rebuilt tree has the same structure and the same
//! node identities as the original: every link that pointed at one node
//! still points at one node.

mod disassemble;
/// Wire types.
pub mod instruction;
mod reassemble;
mod wire;

pub use disassemble::disassemble;
pub use instruction::{ErrorKind, Instruction, Target, WireReference};
pub use reassemble::{ReassembleError, reassemble};
pub use wire::{TransferError, decode, encode};

#[cfg(test)]
mod tests;
