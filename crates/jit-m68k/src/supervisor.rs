//! Supervisor-model instructions: SR/CCR moves, the immediate-to-SR
//! group, RTE, STOP, RESET and MOVEC.
//!
//! Any write that can change S or M closes the unit immediately: the
//! active stack may swap between USP/ISP/MSP and a lowered interrupt
//! mask must become visible, so the dispatcher has to regain control.
//! The CCR low byte travels in canonical 68k order whenever the guest
//! observes it; conversion to and from the mirror's alternate C/V
//! encoding happens exactly at these boundaries.

use asm_aarch64::insn::{self, Reg, Shift};
use asm_aarch64::Cond;

use crate::ccr::{swap_cv, SRB_IPL, SRB_M, SRB_S};
use crate::ctx::{Ctx, Size, REG_CC, REG_CTX, REG_PC, SCRATCH};
use crate::dispatch::emit_illegal;
use crate::exceptions::{Frame, VEC_FORMAT};
use crate::state::{
    areg_offset, CAAR_OFFSET, CACR_OFFSET, DFC_OFFSET, DTT0_OFFSET, DTT1_OFFSET, INT_OFFSET,
    ISP_OFFSET, ITT0_OFFSET, ITT1_OFFSET, JIT_CACHE_FREE_OFFSET, JIT_CACHE_MISS_OFFSET,
    JIT_CACHE_TOTAL_OFFSET, JIT_UNIT_COUNT_OFFSET, MMUSR_OFFSET, MSP_OFFSET, SFC_OFFSET,
    SRP_OFFSET, TCR_OFFSET, URP_OFFSET, USP_OFFSET, VBR_OFFSET,
};

/// Convert a canonical immediate CCR/SR value to the mirror encoding at
/// translate time.
const fn to_alt(value: u16) -> u16 {
    (value & !0xFF) | (swap_cv(value as u8) as u16)
}

// === #imm,CCR group (not privileged) ===

pub(crate) fn emit_ori_to_ccr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    let imm = to_alt(ctx.fetch_ext16() & 0x1F) & 0x1F;
    let cc = ctx.modify_cc();
    if imm != 0 {
        let t = ctx.alloc_tmp();
        ctx.emit(insn::movw_immed_u16(t, imm));
        ctx.emit(insn::orr_reg(cc, cc, t, Shift::Lsl, 0));
        ctx.free(t);
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_andi_to_ccr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    let imm = to_alt(ctx.fetch_ext16() & 0x1F) & 0x1F;
    let cc = ctx.modify_cc();
    let t = ctx.alloc_tmp();
    ctx.load_const(t, 0xFFFF_FFE0 | u32::from(imm));
    ctx.emit(insn::and_reg(cc, cc, t, Shift::Lsl, 0));
    ctx.free(t);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_eori_to_ccr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    let imm = to_alt(ctx.fetch_ext16() & 0x1F) & 0x1F;
    let cc = ctx.modify_cc();
    if imm != 0 {
        let t = ctx.alloc_tmp();
        ctx.emit(insn::movw_immed_u16(t, imm));
        ctx.emit(insn::eor_reg(cc, cc, t, Shift::Lsl, 0));
        ctx.free(t);
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_move_to_ccr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let v = ctx.ea_load(Size::Word, (opcode & 0x3F) as u8, false, true);
    let t = ctx.alloc_tmp();
    ctx.emit_swap_cv(t, v);
    let cc = ctx.modify_cc();
    ctx.emit(insn::bfi(cc, t, 0, 5));
    ctx.free(t);
    ctx.free(v);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_move_from_ccr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let cc = ctx.modify_cc();
    let t = ctx.alloc_tmp();
    ctx.emit_swap_cv(t, cc);
    ctx.emit(insn::and_immed(t, t, 8, 0));
    ctx.ea_store(Size::Word, (opcode & 0x3F) as u8, t);
    ctx.free(t);
    ctx.advance_pc_over_insn();
    1
}

// === SR group (privileged) ===

pub(crate) fn emit_move_from_sr(ctx: &mut Ctx, opcode: u16) -> u32 {
    ctx.emit_privilege_check();
    let cc = ctx.modify_cc();
    let t = ctx.alloc_tmp();
    ctx.emit_swap_cv(t, cc);
    ctx.emit(insn::and_immed(t, t, 16, 0));
    ctx.ea_store(Size::Word, (opcode & 0x3F) as u8, t);
    ctx.free(t);
    ctx.advance_pc_over_insn();
    1
}

/// Apply a full 16-bit SR replacement held in `new_alt` (already in the
/// alternate encoding), swapping the active stack and unmasking host
/// interrupts as needed, then leave the unit. `old_alt` is the previous
/// SR; both registers must live in the reserved scratch set and all
/// guest registers must be flushed.
fn emit_sr_commit_and_close(ctx: &mut Ctx, old_alt: Reg, new_alt: Reg) {
    ctx.emit(insn::and_immed(REG_CC, new_alt, 16, 0));

    // Stack swap when S or M changed.
    let chg = SCRATCH[3];
    ctx.emit(insn::eor_reg(chg, old_alt, REG_CC, Shift::Lsl, 0));
    ctx.emit(insn::tst_immed(chg, 2, (32 - SRB_M) & 31));
    let skip = ctx.emit(insn::nop());
    let a7v = SCRATCH[4];
    ctx.emit(insn::ldr_offset(REG_CTX, a7v, areg_offset(7)));
    emit_stack_home(ctx, old_alt, chg);
    ctx.emit(insn::str_offset(chg, a7v, 0));
    emit_stack_home(ctx, REG_CC, chg);
    ctx.emit(insn::ldr_offset(chg, a7v, 0));
    ctx.emit(insn::str_offset(REG_CTX, a7v, areg_offset(7)));
    ctx.patch_fwd_bcc(skip, Cond::Eq);

    // A lowered mask must let pending host interrupts through.
    ctx.emit(insn::ubfx(chg, REG_CC, SRB_IPL, 3));
    ctx.emit(insn::cmp_immed(chg, 6));
    ctx.emit(insn::b_cc(Cond::Ge, 2));
    ctx.emit(insn::msr_daifclr(2));

    ctx.end_block_with_exit();
}

/// Leave the absolute address of the stack home selected by (S, M) of
/// `sr` in `out` (an X register pointing into `GuestState`).
fn emit_stack_home(ctx: &mut Ctx, sr: Reg, out: Reg) {
    ctx.emit(insn::movw_immed_u16(out, USP_OFFSET));
    ctx.emit(insn::tbz(sr, SRB_S, 4));
    ctx.emit(insn::movw_immed_u16(out, ISP_OFFSET));
    ctx.emit(insn::tbz(sr, SRB_M, 2));
    ctx.emit(insn::movw_immed_u16(out, MSP_OFFSET));
    ctx.emit(insn::add64_reg(out, REG_CTX, out));
}

#[derive(Clone, Copy)]
enum SrOp {
    Or,
    And,
    Eor,
}

fn emit_imm_to_sr(ctx: &mut Ctx, op: SrOp) -> u32 {
    let imm = to_alt(ctx.fetch_ext16());
    ctx.emit_privilege_check();
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();
    let old = SCRATCH[0];
    let new = SCRATCH[1];
    ctx.emit(insn::mov_reg(old, REG_CC));
    ctx.emit(insn::movw_immed_u16(new, imm));
    let word = match op {
        SrOp::Or => insn::orr_reg(new, new, old, Shift::Lsl, 0),
        SrOp::And => insn::and_reg(new, new, old, Shift::Lsl, 0),
        SrOp::Eor => insn::eor_reg(new, new, old, Shift::Lsl, 0),
    };
    ctx.emit(word);
    emit_sr_commit_and_close(ctx, old, new);
    1
}

pub(crate) fn emit_ori_to_sr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    emit_imm_to_sr(ctx, SrOp::Or)
}

pub(crate) fn emit_andi_to_sr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    emit_imm_to_sr(ctx, SrOp::And)
}

pub(crate) fn emit_eori_to_sr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    emit_imm_to_sr(ctx, SrOp::Eor)
}

pub(crate) fn emit_move_to_sr(ctx: &mut Ctx, opcode: u16) -> u32 {
    // Privilege first: a user-mode trap must not run the operand load's
    // side effects.
    ctx.emit_privilege_check();
    let v = ctx.ea_load(Size::Word, (opcode & 0x3F) as u8, false, true);
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();
    let old = SCRATCH[0];
    let new = SCRATCH[1];
    ctx.emit(insn::mov_reg(old, REG_CC));
    ctx.emit_swap_cv(new, v);
    ctx.free(v);
    emit_sr_commit_and_close(ctx, old, new);
    1
}

pub(crate) fn emit_rte(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    ctx.emit_privilege_check();
    ctx.flush_all_dirty();
    ctx.flush_pc();

    let sp = SCRATCH[0];
    let sr_can = SCRATCH[1];
    let fmt = SCRATCH[2];
    ctx.emit(insn::ldr_offset(REG_CTX, sp, areg_offset(7)));
    ctx.emit(insn::ldrh_offset(sp, sr_can, 0));
    ctx.emit(insn::ldur_offset(sp, REG_PC, 2));
    ctx.emit(insn::ldrh_offset(sp, fmt, 6));
    ctx.emit(insn::lsr(fmt, fmt, 12));

    // Format 0 pops four words, format 2 six; anything else raises a
    // format error with the RTE's own PC.
    let take0 = ctx.emit(insn::nop());
    ctx.emit(insn::cmp_immed(fmt, 2));
    let take2 = ctx.emit(insn::nop());
    ctx.emit_exception(VEC_FORMAT, Frame::Normal);
    ctx.patch_fwd_bcc(take2, Cond::Eq);
    ctx.emit(insn::add_immed(sp, sp, 12));
    let join = ctx.emit(insn::nop());
    ctx.patch_fwd_cbz(take0, fmt, false);
    ctx.emit(insn::add_immed(sp, sp, 8));
    ctx.patch_fwd_b(join);
    ctx.emit(insn::str_offset(REG_CTX, sp, areg_offset(7)));

    // The frame is popped; sp and fmt are free again, and the commit
    // helper owns the upper scratch registers.
    let old = fmt;
    let new = sp;
    ctx.emit(insn::mov_reg(old, REG_CC));
    ctx.emit_swap_cv(new, sr_can);
    emit_sr_commit_and_close(ctx, old, new);
    1
}

pub(crate) fn emit_stop(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    let imm = to_alt(ctx.fetch_ext16());
    ctx.emit_privilege_check();
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();

    let old = SCRATCH[0];
    let new = SCRATCH[1];
    ctx.emit(insn::mov_reg(old, REG_CC));
    ctx.emit(insn::movw_immed_u16(new, imm));
    ctx.emit(insn::and_immed(REG_CC, new, 16, 0));

    // Wait for the interrupt path to post an event, then hand control
    // back to the dispatcher.
    let t = SCRATCH[2];
    ctx.emit(insn::ldr_offset(REG_CTX, t, INT_OFFSET));
    ctx.emit(insn::cbnz(t, 3));
    ctx.emit(insn::wfe());
    ctx.emit(insn::b(-3));
    emit_sr_commit_and_close(ctx, old, new);
    1
}

pub(crate) fn emit_reset(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    ctx.emit_privilege_check();
    // The bus reset itself belongs to the platform; the unit just ends
    // so the dispatcher can run it.
    ctx.advance_pc_over_insn();
    ctx.end_block_with_exit();
    1
}

/// Control-register homes reachable through MOVEC.
fn movec_offset(code: u16) -> Option<u16> {
    match code {
        0x000 => Some(SFC_OFFSET),
        0x001 => Some(DFC_OFFSET),
        0x002 => Some(CACR_OFFSET),
        0x003 => Some(TCR_OFFSET),
        0x004 => Some(ITT0_OFFSET),
        0x005 => Some(ITT1_OFFSET),
        0x006 => Some(DTT0_OFFSET),
        0x007 => Some(DTT1_OFFSET),
        0x800 => Some(USP_OFFSET),
        0x801 => Some(VBR_OFFSET),
        0x802 => Some(CAAR_OFFSET),
        0x803 => Some(MSP_OFFSET),
        0x804 => Some(ISP_OFFSET),
        0x805 => Some(MMUSR_OFFSET),
        0x806 => Some(URP_OFFSET),
        0x807 => Some(SRP_OFFSET),
        _ => None,
    }
}

/// Read-only translator diagnostics exposed to the guest.
fn movec_diag_offset(code: u16) -> Option<u16> {
    match code {
        0x1E0 => Some(JIT_CACHE_TOTAL_OFFSET),
        0x1E1 => Some(JIT_CACHE_FREE_OFFSET),
        0x1E2 => Some(JIT_UNIT_COUNT_OFFSET),
        0x1E3 => Some(JIT_CACHE_MISS_OFFSET),
        _ => None,
    }
}

pub(crate) fn emit_movec(ctx: &mut Ctx, opcode: u16) -> u32 {
    let to_ctrl = opcode & 1 != 0;
    let ext = ctx.fetch_ext16();
    let gr = ((ext >> 12) & 0xF) as u8;
    let code = ext & 0xFFF;

    ctx.emit_privilege_check();

    if let Some(off) = movec_offset(code) {
        if to_ctrl {
            let r = ctx.map_read(gr);
            ctx.emit(insn::str_offset(REG_CTX, r, off));
        } else {
            let r = ctx.map_write(gr);
            ctx.emit(insn::ldr_offset(REG_CTX, r, off));
            ctx.mark_dirty(gr);
        }
    } else if let Some(off) = movec_diag_offset(code) {
        if !to_ctrl {
            let r = ctx.map_write(gr);
            ctx.emit(insn::ldr_offset(REG_CTX, r, off));
            ctx.mark_dirty(gr);
        }
        // Guest writes to the diagnostics are ignored.
    } else if code == 0x1E4 && !to_ctrl {
        // Free-running cycle counter for guest-side profiling.
        let r = ctx.map_write(gr);
        ctx.emit(insn::mrs_cntvct(r));
        ctx.emit(insn::mov_reg(r, r));
        ctx.mark_dirty(gr);
    } else {
        log::warn!("MOVEC with unknown control register {code:#05x}");
        return emit_illegal(ctx, opcode);
    }
    ctx.advance_pc_over_insn();
    1
}
