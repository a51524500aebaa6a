//! Byte framing of instruction streams for the worker channel.

use grove_syntax::GrammarElementIds;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instruction::Instruction;

#[derive(Debug, Error)]
pub enum TransferError {
	#[error("failed to encode instruction stream: {0}")]
	Encode(#[source] postcard::Error),

	#[error("failed to decode instruction stream: {0}")]
	Decode(#[source] postcard::Error),

	/// Sender and receiver numbered their grammar elements differently.
	#[error("grammar mismatch: stream was produced for grammar {sent:#018x}, receiver has {local:#018x}")]
	GrammarMismatch { sent: u64, local: u64 },
}

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Serialize, Deserialize)]
struct Frame {
	/// Fingerprint of the sender's grammar element table.
	grammar: u64,
	instructions: Vec<Instruction>,
}

/// Encodes a stream together with the fingerprint of the element table its
/// grammar sources refer to.
pub fn encode(ids: &GrammarElementIds, instructions: Vec<Instruction>) -> Result<Vec<u8>> {
	let frame = Frame {
		grammar: ids.fingerprint(),
		instructions,
	};
	postcard::to_allocvec(&frame).map_err(TransferError::Encode)
}

/// Decodes a stream, rejecting it when it was produced against a different
/// element table.
pub fn decode(ids: &GrammarElementIds, bytes: &[u8]) -> Result<Vec<Instruction>> {
	let frame: Frame = postcard::from_bytes(bytes).map_err(TransferError::Decode)?;
	if frame.grammar != ids.fingerprint() {
		return Err(TransferError::GrammarMismatch {
			sent: frame.grammar,
			local: ids.fingerprint(),
		});
	}
	Ok(frame.instructions)
}
