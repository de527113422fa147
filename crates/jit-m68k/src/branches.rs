//! Line 6: BRA, BSR and Bcc.
//!
//! A conditional branch to a not-yet-compiled block goes through a
//! chainable exit stub recorded in the fixup table; the fall-through
//! side keeps translating. BSR can stay inside the unit: the expected
//! return address is pushed on the translate-time return stack and the
//! matching RTS checks the popped guest address against it at runtime,
//! falling through on a hit.

use asm_aarch64::insn;
use asm_aarch64::Cond;

use crate::ccr::M68kCond;
use crate::ctx::Ctx;

/// Decode the branch displacement (8-bit inline, or word/long
/// extension) and return the target address.
fn branch_target(ctx: &mut Ctx, opcode: u16) -> u32 {
    let base = ctx.ext_word_addr();
    let d8 = opcode as u8;
    let disp = match d8 {
        0x00 => i32::from(ctx.fetch_ext16() as i16),
        0xFF => ctx.fetch_ext32() as i32,
        _ => i32::from(d8 as i8),
    };
    base.wrapping_add(disp as u32)
}

pub(crate) fn emit_bra(ctx: &mut Ctx, opcode: u16) -> u32 {
    let target = branch_target(ctx, opcode);
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();
    let site = ctx.emit(insn::nop());
    ctx.defer_bcc(site, Cond::Al, target);
    ctx.block_done = true;
    1
}

pub(crate) fn emit_bsr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let target = branch_target(ctx, opcode);
    let ret_addr = ctx.guest_pc.wrapping_add(2 * u32::from(ctx.ext_words));
    ctx.advance_pc_over_insn();

    // Push the return address on the guest stack.
    let t = ctx.alloc_tmp();
    ctx.load_const(t, ret_addr);
    let a7 = ctx.map_read(15);
    ctx.emit(insn::str_offset_preindex(a7, t, -4));
    ctx.mark_dirty(15);
    ctx.free(t);

    if ctx.cfg.inline_returns && ctx.return_stack.push(ret_addr) {
        // Keep translating straight into the subroutine.
        ctx.advance_pc(target.wrapping_sub(ret_addr) as i32);
        ctx.guest_pc = target;
    } else {
        ctx.flush_all_dirty();
        ctx.flush_pc();
        let site = ctx.emit(insn::nop());
        ctx.defer_bcc(site, Cond::Al, target);
        ctx.block_done = true;
    }
    1
}

pub(crate) fn emit_bcc(ctx: &mut Ctx, opcode: u16) -> u32 {
    let cond = M68kCond::from_bits(((opcode >> 8) & 0xF) as u8);
    let target = branch_target(ctx, opcode);
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();
    let host = ctx.eval_cond(cond);
    let site = ctx.emit(insn::nop());
    ctx.defer_bcc(site, host, target);
    1
}
