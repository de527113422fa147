//! Translation-unit driver.
//!
//! Translates a straight-line run of guest instructions starting at one
//! PC into a closed unit: code, exits and the fixup records the
//! dispatcher uses to chain blocks later. The unit ends at the first
//! unconditional control transfer, supervisor transition or
//! untranslatable opcode, or at the configured horizon.

use asm_aarch64::EmitBuffer;

use crate::block::Fixup;
use crate::ctx::{Ctx, JitConfig};
use crate::dispatch::translate_insn;
use crate::icache::InstructionCache;

/// One finished translation unit.
#[derive(Debug)]
pub struct TranslationUnit {
    /// The emitted host code, trailer included.
    pub code: EmitBuffer,
    /// Deferred patches for the dispatcher.
    pub fixups: Vec<Fixup>,
    /// Guest address of the first translated instruction.
    pub guest_start: u32,
    /// Guest address just past the last consumed word.
    pub guest_end: u32,
    /// Guest instructions consumed.
    pub insn_count: u32,
    /// The unit was cut short by allocator exhaustion and should be
    /// retried with a smaller horizon once the shorter block retires.
    pub aborted: bool,
}

/// Translate one unit starting at `pc`.
#[must_use]
pub fn translate_block(
    icache: &dyn InstructionCache,
    cfg: &JitConfig,
    pc: u32,
) -> TranslationUnit {
    let mut ctx = Ctx::new(icache, cfg, pc);
    let mut insn_count = 0u32;

    while !ctx.block_done && insn_count < cfg.block_horizon {
        let insn_start = ctx.buf.cursor();
        let pc_before = ctx.guest_pc;
        let pc_offset_before = ctx.pc_offset;
        let ra_snapshot = ctx.ra.snapshot();

        insn_count += translate_insn(&mut ctx);

        if ctx.ra.exhausted {
            // Back the instruction out and close what we have.
            ctx.buf.rewind(insn_start);
            ctx.guest_pc = pc_before;
            ctx.pc_offset = pc_offset_before;
            ctx.ra.restore(&ra_snapshot);
            ctx.aborted = true;
            break;
        }
    }

    ctx.close_block();

    TranslationUnit {
        guest_start: pc,
        guest_end: ctx.guest_pc,
        insn_count,
        aborted: ctx.aborted,
        fixups: ctx.fixups,
        code: ctx.buf,
    }
}
