//! AArch64 instruction-word encoders and the JIT emit buffer.
//!
//! Every encoder is a pure function from operands to one 32-bit
//! instruction word. The translator composes these into an [`EmitBuffer`],
//! which hands the finished little-endian stream to the embedder.
//!
//! Registers are plain `u8` indices 0..=30; index 31 is WZR/XZR in data
//! processing operands ([`ZR`]). Encoders default to 32-bit (W-register)
//! operation; 64-bit forms carry a `64` suffix.

pub mod buffer;
pub mod cond;
pub mod insn;

pub use buffer::{EmitBuffer, Offset};
pub use cond::Cond;
pub use insn::{Reg, Shift, ZR};
