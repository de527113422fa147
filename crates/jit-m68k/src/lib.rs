//! m68k to AArch64 dynamic binary translator core.
//!
//! Translates 68000-family machine code into AArch64 one unit at a
//! time: a per-instruction emitter pipeline over a register allocator
//! and a lazy condition-code engine, closing each unit with chainable
//! exit fixups. The dispatcher, translation-unit cache and platform
//! bring-up live with the embedder; the interfaces they program against
//! are [`InstructionCache`], [`GuestState`] and [`TranslationUnit`].

mod alloc;
mod alu;
mod arith;
mod bitfield;
mod bitops;
mod block;
mod branches;
pub mod ccr;
mod ctx;
mod datamove;
pub mod dispatch;
mod ea;
mod exceptions;
pub mod icache;
mod immediates;
mod logic;
mod misc;
mod muldiv;
mod quick;
mod shifts;
pub mod state;
mod supervisor;
mod translate;

pub use block::{Fixup, FixupKind};
pub use ccr::{swap_cv, M68kCond};
pub use ctx::{JitConfig, Size, REG_CC, REG_CTX, REG_PC};
pub use dispatch::{insn_length, sr_mask};
pub use icache::InstructionCache;
pub use state::GuestState;
pub use translate::{translate_block, TranslationUnit};
