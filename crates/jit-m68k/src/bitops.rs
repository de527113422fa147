//! Single-bit operations, the compare-and-swap group and the bounds
//! checks CHK2/CMP2.
//!
//! Bit numbers wrap mod 32 on a data register and mod 8 in memory, and
//! Z always reflects the bit's prior value. CAS byte forms always run
//! on load-exclusive/store-exclusive; word and long forms test the
//! address at runtime and fall back to a plain read-compare-write when
//! unaligned. Every CAS variant publishes with an inner-shareable
//! barrier. CAS2 performs both comparisons before either update and
//! stores the second operand first.

use asm_aarch64::insn::{self, Reg, Shift, ZR};
use asm_aarch64::Cond;

use crate::ccr::{CarrySense, CCB_CALT, CCB_Z, SR_C, SR_Z};
use crate::ctx::{Ctx, Size};
use crate::dispatch::emit_illegal;
use crate::exceptions::{Frame, VEC_CHK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitOp {
    Test,
    Change,
    Clear,
    Set,
}

fn bit_op_of(opcode: u16) -> BitOp {
    match (opcode >> 6) & 3 {
        0 => BitOp::Test,
        1 => BitOp::Change,
        2 => BitOp::Clear,
        _ => BitOp::Set,
    }
}

pub(crate) fn emit_bit_static(ctx: &mut Ctx, opcode: u16) -> u32 {
    let bit = (ctx.fetch_ext16() & 0xFF) as u8;
    emit_bit_common(ctx, opcode, BitNum::Imm(bit))
}

pub(crate) fn emit_bit_dynamic(ctx: &mut Ctx, opcode: u16) -> u32 {
    let dn = ((opcode >> 9) & 7) as u8;
    emit_bit_common(ctx, opcode, BitNum::Reg(dn))
}

enum BitNum {
    Imm(u8),
    Reg(u8),
}

fn emit_bit_common(ctx: &mut Ctx, opcode: u16, bit: BitNum) -> u32 {
    let op = bit_op_of(opcode);
    let ea = (opcode & 0x3F) as u8;
    let um = ctx.update_mask;

    if ea >> 3 == 0 {
        let dst = ctx.map_read(ea & 7);
        match bit {
            BitNum::Imm(b) => {
                let b = b & 31;
                if um & SR_Z != 0 {
                    ctx.emit(insn::tst_immed(dst, 1, (32 - b) & 31));
                    ctx.flags_conditional(SR_Z, Cond::Eq);
                }
                let word = match op {
                    BitOp::Test => None,
                    BitOp::Change => Some(insn::eor_immed(dst, dst, 1, (32 - b) & 31)),
                    BitOp::Clear => Some(insn::bic_immed(dst, dst, 1, (32 - b) & 31)),
                    BitOp::Set => Some(insn::orr_immed(dst, dst, 1, (32 - b) & 31)),
                };
                if let Some(w) = word {
                    ctx.emit(w);
                    ctx.mark_dirty(ea & 7);
                }
            }
            BitNum::Reg(dn) => {
                let br = ctx.map_read(dn);
                let m = ctx.alloc_tmp();
                ctx.emit(insn::and_immed(m, br, 5, 0));
                bit_test_and_modify(ctx, op, um, dst, m);
                if op != BitOp::Test {
                    ctx.mark_dirty(ea & 7);
                }
                ctx.free(m);
            }
        }
    } else {
        let m = match bit {
            BitNum::Imm(b) => BitNum::Imm(b & 7),
            BitNum::Reg(dn) => {
                let br = ctx.map_read(dn);
                let m = ctx.alloc_tmp();
                ctx.emit(insn::and_immed(m, br, 3, 0));
                BitNum::Reg(m)
            }
        };
        if op == BitOp::Test {
            let v = ctx.ea_load(Size::Byte, ea, false, true);
            emit_mem_bit(ctx, op, um, v, &m);
            ctx.free(v);
        } else {
            ctx.ea_rmw(Size::Byte, ea, |c, val| {
                emit_mem_bit(c, op, um, val, &m);
            });
        }
        if let BitNum::Reg(m) = m {
            ctx.free(m);
        }
    }
    ctx.advance_pc_over_insn();
    1
}

/// Test (and optionally flip) a bit named by a register, on a register
/// or memory operand already in `dst`.
fn bit_test_and_modify(ctx: &mut Ctx, op: BitOp, um: u8, dst: Reg, m: Reg) {
    let t = ctx.alloc_tmp();
    if um & SR_Z != 0 {
        ctx.emit(insn::lsrv(t, dst, m));
        ctx.emit(insn::tst_immed(t, 1, 0));
        ctx.flags_conditional(SR_Z, Cond::Eq);
    }
    if op != BitOp::Test {
        ctx.emit(insn::movw_immed_u16(t, 1));
        ctx.emit(insn::lslv(t, t, m));
        let word = match op {
            BitOp::Change => insn::eor_reg(dst, dst, t, Shift::Lsl, 0),
            BitOp::Clear => insn::bic_reg(dst, dst, t, Shift::Lsl, 0),
            BitOp::Set => insn::orr_reg(dst, dst, t, Shift::Lsl, 0),
            BitOp::Test => unreachable!(),
        };
        ctx.emit(word);
    }
    ctx.free(t);
}

fn emit_mem_bit(ctx: &mut Ctx, op: BitOp, um: u8, val: Reg, bit: &BitNum) {
    match *bit {
        BitNum::Imm(b) => {
            if um & SR_Z != 0 {
                ctx.emit(insn::tst_immed(val, 1, (32 - b) & 31));
                ctx.flags_conditional(SR_Z, Cond::Eq);
            }
            let word = match op {
                BitOp::Test => None,
                BitOp::Change => Some(insn::eor_immed(val, val, 1, (32 - b) & 31)),
                BitOp::Clear => Some(insn::bic_immed(val, val, 1, (32 - b) & 31)),
                BitOp::Set => Some(insn::orr_immed(val, val, 1, (32 - b) & 31)),
            };
            if let Some(w) = word {
                ctx.emit(w);
            }
        }
        BitNum::Reg(m) => bit_test_and_modify(ctx, op, um, val, m),
    }
}

/// CAS Dc,Du,<ea>.
pub(crate) fn emit_cas(ctx: &mut Ctx, opcode: u16) -> u32 {
    let size = match (opcode >> 9) & 3 {
        1 => Size::Byte,
        2 => Size::Word,
        _ => Size::Long,
    };
    let ext = ctx.fetch_ext16();
    let dc = (ext & 7) as u8;
    let du = ((ext >> 6) & 7) as u8;
    let ea = (opcode & 0x3F) as u8;
    let um = ctx.update_mask;

    let (addr, owned) = ctx.ea_addr_with_update(size, ea);
    let dc_r = ctx.map_read(dc);
    let du_r = ctx.map_read(du);
    let v = ctx.alloc_tmp();
    let co = ctx.alloc_tmp();
    let s = ctx.alloc_tmp();

    // Sized snapshot of the compare operand; the runtime flag result is
    // (memory - compare) regardless of which path ran.
    ctx.emit(match size {
        Size::Byte => insn::uxtb(co, dc_r),
        Size::Word => insn::uxth(co, dc_r),
        Size::Long => insn::mov_reg(co, dc_r),
    });

    match size {
        Size::Byte => {
            let retry = ctx.cursor();
            ctx.emit(insn::ldxrb(addr, v));
            ctx.emit(insn::cmp_reg(v, co, Shift::Lsl, 0));
            let fail = ctx.emit(insn::nop());
            ctx.emit(insn::stxrb(s, addr, du_r));
            let back = ctx.cursor().distance_to(retry);
            ctx.emit(insn::cbnz(s, back));
            let done = ctx.emit(insn::nop());
            ctx.patch_fwd_bcc(fail, Cond::Ne);
            ctx.emit(insn::bfxil(dc_r, v, 0, 8));
            ctx.mark_dirty(dc);
            ctx.patch_fwd_b(done);
        }
        Size::Word | Size::Long => {
            ctx.emit(insn::tst_immed(addr, if size == Size::Word { 1 } else { 2 }, 0));
            let unaligned = ctx.emit(insn::nop());

            // Aligned: exclusive loop.
            let retry = ctx.cursor();
            ctx.emit(match size {
                Size::Word => insn::ldxrh(addr, v),
                _ => insn::ldxr(addr, v),
            });
            ctx.emit(insn::cmp_reg(v, co, Shift::Lsl, 0));
            let fail_x = ctx.emit(insn::nop());
            ctx.emit(match size {
                Size::Word => insn::stxrh(s, addr, du_r),
                _ => insn::stxr(s, addr, du_r),
            });
            let back = ctx.cursor().distance_to(retry);
            ctx.emit(insn::cbnz(s, back));
            let done_x = ctx.emit(insn::nop());

            // Unaligned: plain read-compare-write.
            ctx.patch_fwd_bcc(unaligned, Cond::Ne);
            ctx.emit(match size {
                Size::Word => insn::ldrh_offset(addr, v, 0),
                _ => insn::ldr_offset(addr, v, 0),
            });
            ctx.emit(insn::cmp_reg(v, co, Shift::Lsl, 0));
            let fail_p = ctx.emit(insn::nop());
            ctx.emit(match size {
                Size::Word => insn::strh_offset(addr, du_r, 0),
                _ => insn::str_offset(addr, du_r, 0),
            });
            let done_p = ctx.emit(insn::nop());

            // Miss: load the observed value into Dc.
            ctx.patch_fwd_bcc(fail_x, Cond::Ne);
            ctx.patch_fwd_bcc(fail_p, Cond::Ne);
            if size == Size::Word {
                ctx.emit(insn::bfxil(dc_r, v, 0, 16));
            } else {
                ctx.emit(insn::mov_reg(dc_r, v));
            }
            ctx.mark_dirty(dc);
            ctx.patch_fwd_b(done_x);
            ctx.patch_fwd_b(done_p);
        }
    }
    ctx.emit(insn::dmb_ish());

    if um != 0 {
        let sh = size.top_shift();
        let t = ctx.alloc_tmp();
        ctx.emit(insn::lsl(t, v, sh));
        ctx.emit(insn::subs_reg(ZR, t, co, Shift::Lsl, sh));
        ctx.free(t);
        ctx.commit_nzcv(um, CarrySense::Sub);
    }

    ctx.free(v);
    ctx.free(co);
    ctx.free(s);
    if owned {
        ctx.free(addr);
    }
    ctx.advance_pc_over_insn();
    1
}

/// CAS2 Dc1:Dc2,Du1:Du2,(Rn1):(Rn2). Both comparisons run before either
/// store; on success the second location is written first, then the
/// first, followed by a full barrier.
pub(crate) fn emit_cas2(ctx: &mut Ctx, opcode: u16) -> u32 {
    let size = if (opcode >> 9) & 3 == 2 { Size::Word } else { Size::Long };
    let ext1 = ctx.fetch_ext16();
    let ext2 = ctx.fetch_ext16();
    let um = ctx.update_mask;

    let rn1 = ((ext1 >> 12) & 0xF) as u8;
    let rn2 = ((ext2 >> 12) & 0xF) as u8;
    let dc1 = (ext1 & 7) as u8;
    let dc2 = (ext2 & 7) as u8;
    let du1 = ((ext1 >> 6) & 7) as u8;
    let du2 = ((ext2 >> 6) & 7) as u8;

    let a1 = ctx.map_read(rn1);
    let a2 = ctx.map_read(rn2);
    let v1 = ctx.alloc_tmp();
    let v2 = ctx.alloc_tmp();
    let co1 = ctx.alloc_tmp();
    let co2 = ctx.alloc_tmp();

    let narrow = |c: &mut Ctx, dst: Reg, src: Reg| {
        c.emit(match size {
            Size::Word => insn::uxth(dst, src),
            _ => insn::mov_reg(dst, src),
        });
    };
    let dc1_r = ctx.map_read(dc1);
    narrow(ctx, co1, dc1_r);
    let dc2_r = ctx.map_read(dc2);
    narrow(ctx, co2, dc2_r);

    let load = |c: &mut Ctx, base: Reg, dst: Reg| {
        c.emit(match size {
            Size::Word => insn::ldrh_offset(base, dst, 0),
            _ => insn::ldr_offset(base, dst, 0),
        });
    };
    load(ctx, a1, v1);
    load(ctx, a2, v2);

    ctx.emit(insn::cmp_reg(v1, co1, Shift::Lsl, 0));
    let fail1 = ctx.emit(insn::nop());
    ctx.emit(insn::cmp_reg(v2, co2, Shift::Lsl, 0));
    let fail2 = ctx.emit(insn::nop());

    // Hit: du2 first, then du1.
    let du2_r = ctx.map_read(du2);
    ctx.emit(match size {
        Size::Word => insn::strh_offset(a2, du2_r, 0),
        _ => insn::str_offset(a2, du2_r, 0),
    });
    let du1_r = ctx.map_read(du1);
    ctx.emit(match size {
        Size::Word => insn::strh_offset(a1, du1_r, 0),
        _ => insn::str_offset(a1, du1_r, 0),
    });
    let done = ctx.emit(insn::nop());

    // Miss: both compare operands observe memory.
    ctx.patch_fwd_bcc(fail1, Cond::Ne);
    ctx.patch_fwd_bcc(fail2, Cond::Ne);
    if size == Size::Word {
        ctx.emit(insn::bfxil(dc1_r, v1, 0, 16));
        ctx.emit(insn::bfxil(dc2_r, v2, 0, 16));
    } else {
        ctx.emit(insn::mov_reg(dc1_r, v1));
        ctx.emit(insn::mov_reg(dc2_r, v2));
    }
    ctx.mark_dirty(dc1);
    ctx.mark_dirty(dc2);
    ctx.patch_fwd_b(done);
    ctx.emit(insn::dmb_ish());

    if um != 0 {
        // Flags come from the comparison that decided the outcome.
        let sh = size.top_shift();
        let t = ctx.alloc_tmp();
        ctx.emit(insn::lsl(t, v1, sh));
        ctx.emit(insn::subs_reg(ZR, t, co1, Shift::Lsl, sh));
        let first_ne = ctx.emit(insn::nop());
        ctx.emit(insn::lsl(t, v2, sh));
        ctx.emit(insn::subs_reg(ZR, t, co2, Shift::Lsl, sh));
        ctx.patch_fwd_bcc(first_ne, Cond::Ne);
        ctx.free(t);
        ctx.commit_nzcv(um, CarrySense::Sub);
    }

    ctx.free(v1);
    ctx.free(v2);
    ctx.free(co1);
    ctx.free(co2);
    ctx.advance_pc_over_insn();
    1
}

/// CMP2/CHK2: compare a register against a bounds pair at the EA; CHK2
/// additionally traps when out of bounds.
pub(crate) fn emit_cmp2_chk2(ctx: &mut Ctx, opcode: u16) -> u32 {
    let size = match (opcode >> 9) & 3 {
        0 => Size::Byte,
        1 => Size::Word,
        2 => Size::Long,
        _ => return emit_illegal(ctx, opcode),
    };
    let insn_addr = ctx.guest_pc.wrapping_sub(2);
    let ext = ctx.fetch_ext16();
    let gr = ((ext >> 12) & 0xF) as u8;
    let is_chk2 = ext & 0x0800 != 0;
    let um = ctx.update_mask;

    let addr = ctx.ea_addr((opcode & 0x3F) as u8);
    let lb = ctx.alloc_tmp();
    let ub = ctx.alloc_tmp();
    ctx.emit_load_base_disp(size, true, addr, lb, 0);
    ctx.emit_load_base_disp(size, true, addr, ub, size.bytes() as i32);
    ctx.free(addr);

    // Address registers compare at full width, data registers at the
    // operand size, sign-extended.
    let v = if gr >= 8 {
        ctx.map_read(gr)
    } else if size == Size::Long {
        ctx.map_read(gr)
    } else {
        ctx.ea_load(size, gr & 7, true, false)
    };

    let z = ctx.alloc_tmp();
    let c = ctx.alloc_tmp();
    let t = ctx.alloc_tmp();
    ctx.emit(insn::cmp_reg(v, lb, Shift::Lsl, 0));
    ctx.emit(insn::cset(z, Cond::Eq));
    ctx.emit(insn::cset(c, Cond::Lt));
    ctx.emit(insn::cmp_reg(v, ub, Shift::Lsl, 0));
    ctx.emit(insn::cset(t, Cond::Eq));
    ctx.emit(insn::orr_reg(z, z, t, Shift::Lsl, 0));
    ctx.emit(insn::cset(t, Cond::Gt));
    ctx.emit(insn::orr_reg(c, c, t, Shift::Lsl, 0));
    let cc = ctx.modify_cc();
    if um & SR_Z != 0 {
        ctx.emit(insn::bfi(cc, z, CCB_Z, 1));
    }
    if um & SR_C != 0 || is_chk2 {
        ctx.emit(insn::bfi(cc, c, CCB_CALT, 1));
    }
    ctx.free(z);
    ctx.free(t);
    ctx.free(lb);
    ctx.free(ub);
    if gr < 8 && size != Size::Long {
        ctx.free(v);
    }

    ctx.advance_pc_over_insn();
    if is_chk2 {
        ctx.flush_all_dirty();
        ctx.flush_pc();
        let ok = ctx.emit(insn::nop());
        ctx.emit_exception(VEC_CHK, Frame::WithAddress(insn_addr));
        ctx.patch_fwd_cbz(ok, c, false);
    }
    ctx.free(c);
    1
}
