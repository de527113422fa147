//! Multiplies and divides, word and long forms.
//!
//! Word forms widen 16×16 into a 32-bit product or split a 32-bit
//! dividend into a quotient:remainder word pair. The long forms use the
//! host's 64-bit datapath; signed overflow is detected by round-trip
//! sign-extension of the quotient, unsigned by a nonzero high half. A
//! zero divisor raises the divide-by-zero exception with a format 2
//! frame naming the faulting instruction, and the destination stays
//! untouched on overflow.

use asm_aarch64::insn::{self, Shift, ZR};
use asm_aarch64::Cond;

use crate::ccr::{SR_C, SR_V};
use crate::ctx::{Ctx, Size};
use crate::exceptions::{Frame, VEC_DIV_ZERO};

pub(crate) fn emit_mulu_w(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_mul_w(ctx, opcode, false)
}

pub(crate) fn emit_muls_w(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_mul_w(ctx, opcode, true)
}

fn emit_mul_w(ctx: &mut Ctx, opcode: u16, signed: bool) -> u32 {
    let dn = ((opcode >> 9) & 7) as u8;
    let ea = (opcode & 0x3F) as u8;
    let src = ctx.ea_load(Size::Word, ea, signed, false);
    if !signed && ea >> 3 == 0 {
        // Register sources carry junk above the operand width.
        ctx.emit(insn::uxth(src, src));
    }
    let dst = ctx.map_read(dn);
    if signed {
        ctx.emit(insn::sxth(dst, dst));
    } else {
        ctx.emit(insn::uxth(dst, dst));
    }
    ctx.emit(insn::mul(dst, dst, src));
    ctx.mark_dirty(dn);
    ctx.free(src);

    let um = ctx.update_mask;
    if um != 0 {
        ctx.test_nz(dst, Size::Long);
        ctx.commit_nz_clear_vc(um);
    }
    ctx.advance_pc_over_insn();
    1
}

/// MULU.L / MULS.L with the 32- and 64-bit result forms.
pub(crate) fn emit_mul_l(ctx: &mut Ctx, opcode: u16) -> u32 {
    let ext = ctx.fetch_ext16();
    let dl = ((ext >> 12) & 7) as u8;
    let dh = (ext & 7) as u8;
    let signed = ext & 0x0800 != 0;
    let wide = ext & 0x0400 != 0;
    let ea = (opcode & 0x3F) as u8;
    let um = ctx.update_mask;

    let src = ctx.ea_load(Size::Long, ea, false, true);
    let rl = ctx.map_read(dl);
    let t = ctx.alloc_tmp();
    let word = if signed {
        insn::smull(t, rl, src)
    } else {
        insn::umull(t, rl, src)
    };
    ctx.emit(word);
    ctx.free(src);

    if wide {
        let rh = ctx.map_write(dh);
        ctx.emit(insn::lsr64(rh, t, 32));
        ctx.emit(insn::mov_reg(rl, t));
        ctx.mark_dirty(dl);
        ctx.mark_dirty(dh);
        if um != 0 {
            // N and Z reflect the whole 64-bit product.
            ctx.emit(insn::tst64_reg(t, t));
            ctx.commit_nz_clear_vc(um);
        }
    } else {
        ctx.emit(insn::mov_reg(rl, t));
        ctx.mark_dirty(dl);
        if um != 0 {
            ctx.test_nz(rl, Size::Long);
            ctx.commit_nz_clear_vc(um);
            if um & SR_V != 0 {
                let t2 = ctx.alloc_tmp();
                if signed {
                    ctx.emit(insn::sxtw64(t2, t));
                } else {
                    ctx.emit(insn::ubfx64(t2, t, 0, 32));
                }
                ctx.emit(insn::cmp64_reg(t2, t));
                ctx.flags_conditional(SR_V, Cond::Ne);
                ctx.free(t2);
            }
        }
    }
    ctx.free(t);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_divu_w(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_div_w(ctx, opcode, false)
}

pub(crate) fn emit_divs_w(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_div_w(ctx, opcode, true)
}

fn emit_div_w(ctx: &mut Ctx, opcode: u16, signed: bool) -> u32 {
    let dn = ((opcode >> 9) & 7) as u8;
    let ea = (opcode & 0x3F) as u8;
    let insn_addr = ctx.guest_pc.wrapping_sub(2);
    let um = ctx.update_mask;

    let src = ctx.ea_load(Size::Word, ea, signed, false);
    if !signed && ea >> 3 == 0 {
        ctx.emit(insn::uxth(src, src));
    }
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();

    let ok = ctx.emit(insn::nop());
    ctx.emit_exception(VEC_DIV_ZERO, Frame::WithAddress(insn_addr));
    ctx.patch_fwd_cbz(ok, src, true);

    let dst = ctx.map_read(dn);
    let q = ctx.alloc_tmp();
    let r = ctx.alloc_tmp();
    let word = if signed {
        insn::sdiv(q, dst, src)
    } else {
        insn::udiv(q, dst, src)
    };
    ctx.emit(word);

    // 16-bit quotient overflow leaves the destination untouched.
    let overflow_site;
    if signed {
        ctx.emit(insn::sxth(r, q));
        ctx.emit(insn::cmp_reg(r, q, Shift::Lsl, 0));
        overflow_site = ctx.emit(insn::nop());
    } else {
        ctx.emit(insn::lsr(r, q, 16));
        overflow_site = ctx.emit(insn::nop());
    }

    // Fit: remainder then quotient packed into Dn.
    ctx.emit(insn::msub(r, q, src, dst));
    ctx.emit(insn::uxth(q, q));
    ctx.emit(insn::bfi(q, r, 16, 16));
    ctx.emit(insn::mov_reg(dst, q));
    ctx.mark_dirty(dn);
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, q, Shift::Lsl, 16));
        ctx.commit_nz_clear_vc(um);
    }
    let join = ctx.emit(insn::nop());

    // Overflow: V set, C clear, operands untouched.
    if signed {
        ctx.patch_fwd_bcc(overflow_site, Cond::Ne);
    } else {
        ctx.patch_fwd_cbz(overflow_site, r, true);
    }
    ctx.flags_set(um & SR_V);
    ctx.flags_clear(um & SR_C);
    ctx.patch_fwd_b(join);

    ctx.free(q);
    ctx.free(r);
    ctx.free(src);
    1
}

/// DIVU.L / DIVS.L: 32÷32 and 64÷32 with a quotient/remainder register
/// pair named by the extension word.
pub(crate) fn emit_div_l(ctx: &mut Ctx, opcode: u16) -> u32 {
    let ext = ctx.fetch_ext16();
    let dq = ((ext >> 12) & 7) as u8;
    let dr = (ext & 7) as u8;
    let signed = ext & 0x0800 != 0;
    let wide = ext & 0x0400 != 0;
    let ea = (opcode & 0x3F) as u8;
    let insn_addr = ctx.guest_pc.wrapping_sub(2);
    let um = ctx.update_mask;

    let src = ctx.ea_load(Size::Long, ea, false, true);
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();

    let ok = ctx.emit(insn::nop());
    ctx.emit_exception(VEC_DIV_ZERO, Frame::WithAddress(insn_addr));
    ctx.patch_fwd_cbz(ok, src, true);

    // Both destination registers fill before any conditional region, so
    // the skip paths see consistent mappings.
    let rq = ctx.map_read(dq);
    let rr = ctx.map_read(dr);
    let dividend = ctx.alloc_tmp();
    let s64 = ctx.alloc_tmp();
    let q = ctx.alloc_tmp();
    let r = ctx.alloc_tmp();

    if wide {
        ctx.emit(insn::lsl64(dividend, rr, 32));
        ctx.emit(insn::orr64_reg(dividend, dividend, rq, Shift::Lsl, 0));
    } else if signed {
        ctx.emit(insn::sxtw64(dividend, rq));
    } else {
        ctx.emit(insn::mov_reg(dividend, rq));
    }
    if signed {
        ctx.emit(insn::sxtw64(s64, src));
        ctx.emit(insn::sdiv64(q, dividend, s64));
    } else {
        ctx.emit(insn::mov_reg(s64, src));
        ctx.emit(insn::udiv64(q, dividend, s64));
    }

    // Quotient must fit 32 bits.
    if signed {
        ctx.emit(insn::sxtw64(r, q));
    } else {
        ctx.emit(insn::ubfx64(r, q, 0, 32));
    }
    ctx.emit(insn::cmp64_reg(r, q));
    let overflow_site = ctx.emit(insn::nop());

    ctx.emit(insn::msub64(r, q, s64, dividend));
    if dr != dq {
        ctx.emit(insn::mov_reg(rr, r));
        ctx.mark_dirty(dr);
    }
    ctx.emit(insn::mov_reg(rq, q));
    ctx.mark_dirty(dq);
    if um != 0 {
        ctx.test_nz(rq, Size::Long);
        ctx.commit_nz_clear_vc(um);
    }
    let join = ctx.emit(insn::nop());

    ctx.patch_fwd_bcc(overflow_site, Cond::Ne);
    ctx.flags_set(um & SR_V);
    ctx.flags_clear(um & SR_C);
    ctx.patch_fwd_b(join);

    ctx.free(dividend);
    ctx.free(s64);
    ctx.free(q);
    ctx.free(r);
    ctx.free(src);
    1
}
