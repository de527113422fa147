//! Binary arithmetic: ADD/ADDA/ADDX and SUB/SUBA/SUBX.
//!
//! Opcode shape (lines 0x9 and 0xD): `xxxx rrr ooo eeeeee` where `ooo`
//! selects size and direction; `ooo = 011/111` is the address-register
//! form, and `ooo = 1ss` with EA mode 0/1 is the extended form through X.
//!
//! The extended group keeps 68k Z semantics: Z is only cleared by a
//! nonzero result, never set, so multi-precision chains test the whole
//! value.

use asm_aarch64::insn::{self, Reg, Shift};
use asm_aarch64::Cond;

use crate::alu::AluOp;
use crate::ccr::{CarrySense, CCB_CALT, CCB_X, SR_C, SR_N, SR_V, SR_X, SR_Z};
use crate::ctx::{Ctx, Size};
use crate::dispatch::emit_illegal;

pub(crate) fn emit_add(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_add_sub(ctx, opcode, AluOp::Add)
}

pub(crate) fn emit_sub(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_add_sub(ctx, opcode, AluOp::Sub)
}

fn emit_add_sub(ctx: &mut Ctx, opcode: u16, op: AluOp) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let dn = ((opcode >> 9) & 7) as u8;
    let ea = (opcode & 0x3F) as u8;
    if opcode & 0x100 == 0 {
        // <ea> op Dn -> Dn
        let src = ctx.ea_load(size, ea, false, true);
        let dst = ctx.map_read(dn);
        ctx.alu_into(op, size, dst, src, true);
        ctx.mark_dirty(dn);
        ctx.free(src);
    } else {
        // Dn op <ea> -> <ea>
        let src = ctx.map_read(dn);
        ctx.ea_rmw(size, ea, |c, val| {
            c.alu_into(op, size, val, src, true);
        });
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_adda(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_adda_suba(ctx, opcode, AluOp::Add)
}

pub(crate) fn emit_suba(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_adda_suba(ctx, opcode, AluOp::Sub)
}

// Address-register destination: the source is sign-extended to 32 bits,
// the whole register is written, and no flags change.
fn emit_adda_suba(ctx: &mut Ctx, opcode: u16, op: AluOp) -> u32 {
    let size = if opcode & 0x100 == 0 { Size::Word } else { Size::Long };
    let an = ((opcode >> 9) & 7) as u8 + 8;
    let ea = (opcode & 0x3F) as u8;
    let src = ctx.ea_load(size, ea, size == Size::Word, true);
    let dst = ctx.map_read(an);
    let word = match op {
        AluOp::Add => insn::add_reg(dst, dst, src, Shift::Lsl, 0),
        _ => insn::sub_reg(dst, dst, src, Shift::Lsl, 0),
    };
    ctx.emit(word);
    ctx.mark_dirty(an);
    ctx.free(src);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_addx(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_addx_subx(ctx, opcode, AluOp::Add)
}

pub(crate) fn emit_subx(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_addx_subx(ctx, opcode, AluOp::Sub)
}

fn emit_addx_subx(ctx: &mut Ctx, opcode: u16, op: AluOp) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let rx = ((opcode >> 9) & 7) as u8;
    let ry = (opcode & 7) as u8;
    if opcode & 8 == 0 {
        // Dy op Dx -> Dx
        let src = ctx.map_read(ry);
        let dst = ctx.map_read(rx);
        extended_op(ctx, op, size, dst, src);
        ctx.mark_dirty(rx);
    } else {
        // -(Ay) op -(Ax) -> (Ax)
        let src = ctx.ea_load(size, 0o40 | ry, false, false);
        ctx.ea_rmw(size, 0o40 | rx, |c, val| {
            extended_op(c, op, size, val, src);
        });
        ctx.free(src);
    }
    ctx.advance_pc_over_insn();
    1
}

/// `dst = dst op src op X` at the given width, with the extended-group
/// flag rules (X/C from the carry chain, Z clear-only).
pub(crate) fn extended_op(ctx: &mut Ctx, op: AluOp, size: Size, dst: Reg, src: Reg) {
    if size == Size::Long {
        extended_op_long(ctx, op, dst, src);
    } else {
        extended_op_narrow(ctx, op, size, dst, dst, src);
    }
}

/// NEGX: `dst = 0 - dst - X`, same flag rules as the other extended ops.
pub(crate) fn extended_neg(ctx: &mut Ctx, size: Size, dst: Reg) {
    if size == Size::Long {
        let um = ctx.update_mask;
        ctx.host_carry_from_not_x();
        ctx.emit(insn::sbcs_reg(dst, insn::ZR, dst));
        commit_extended_flags(ctx, um, CarrySense::Sub);
    } else {
        extended_op_narrow(ctx, AluOp::Sub, size, dst, insn::ZR, dst);
    }
}

fn extended_op_long(ctx: &mut Ctx, op: AluOp, dst: Reg, src: Reg) {
    let um = ctx.update_mask;
    match op {
        AluOp::Add => {
            ctx.host_carry_from_x();
            ctx.emit(insn::adcs_reg(dst, dst, src));
        }
        _ => {
            ctx.host_carry_from_not_x();
            ctx.emit(insn::sbcs_reg(dst, dst, src));
        }
    }
    commit_extended_flags(ctx, um, op.sense());
}

/// Commit X, N, V, C from the live host flags and apply the clear-only Z
/// rule. Usable right after any carry-producing host op.
pub(crate) fn commit_extended_flags(ctx: &mut Ctx, um: u8, sense: CarrySense) {
    let carry_cond = match sense {
        CarrySense::Add => Cond::Cs,
        CarrySense::Sub => Cond::Cc,
    };
    if um & SR_N != 0 {
        ctx.flags_conditional(SR_N, Cond::Mi);
    }
    if um & SR_V != 0 {
        ctx.flags_conditional(SR_V, Cond::Vs);
    }
    if um & (SR_C | SR_X) != 0 {
        ctx.flags_conditional(um & (SR_C | SR_X), carry_cond);
    }
    if um & SR_Z != 0 {
        ctx.flags_clear_conditional(SR_Z, Cond::Ne);
    }
}

/// The widened form: `wb = a op b op X` where `a`/`b` are the operand
/// registers (ZR reads as zero) and `wb` receives the low `size` bits.
fn extended_op_narrow(ctx: &mut Ctx, op: AluOp, size: Size, wb: Reg, src_a: Reg, src_b: Reg) {
    let um = ctx.update_mask;
    let bits = size.bits();
    let cc = ctx.modify_cc();
    let dst = wb;

    let a = ctx.alloc_tmp();
    let b = ctx.alloc_tmp();
    let r = ctx.alloc_tmp();
    let narrow = |rd: Reg, rn: Reg| match size {
        Size::Byte => insn::uxtb(rd, rn),
        _ => insn::uxth(rd, rn),
    };
    ctx.emit(narrow(a, src_a));
    ctx.emit(narrow(b, src_b));
    ctx.emit(insn::ubfx(r, cc, CCB_X, 1));
    match op {
        AluOp::Add => {
            ctx.emit(insn::add_reg(r, r, a, Shift::Lsl, 0));
            ctx.emit(insn::add_reg(r, r, b, Shift::Lsl, 0));
        }
        _ => {
            ctx.emit(insn::sub_reg(r, a, r, Shift::Lsl, 0));
            ctx.emit(insn::sub_reg(r, r, b, Shift::Lsl, 0));
        }
    }
    ctx.emit(insn::bfxil(dst, r, 0, bits));

    if um & (SR_C | SR_X) != 0 {
        let t = ctx.alloc_tmp();
        // For the add direction the carry sits just above the result;
        // for subtract a negative wide result means borrow.
        let word = match op {
            AluOp::Add => insn::ubfx(t, r, bits, 1),
            _ => insn::lsr(t, r, 31),
        };
        ctx.emit(word);
        if um & SR_C != 0 {
            ctx.emit(insn::bfi(cc, t, CCB_CALT, 1));
        }
        if um & SR_X != 0 {
            ctx.emit(insn::bfi(cc, t, CCB_X, 1));
        }
        ctx.free(t);
    }
    if um & SR_V != 0 {
        let t1 = ctx.alloc_tmp();
        let t2 = ctx.alloc_tmp();
        ctx.emit(insn::eor_reg(t1, a, b, Shift::Lsl, 0));
        ctx.emit(insn::eor_reg(t2, a, r, Shift::Lsl, 0));
        // add: overflow when operand signs agree and the result differs;
        // sub: overflow when they differ and the result flipped.
        let word = match op {
            AluOp::Add => insn::bic_reg(t2, t2, t1, Shift::Lsl, 0),
            _ => insn::and_reg(t2, t2, t1, Shift::Lsl, 0),
        };
        ctx.emit(word);
        ctx.emit(insn::ubfx(t1, t2, bits - 1, 1));
        ctx.emit(insn::bfi(cc, t1, crate::ccr::CCB_VALT, 1));
        ctx.free(t1);
        ctx.free(t2);
    }
    if um & SR_N != 0 {
        ctx.emit(insn::tst_immed(r, 1, (32 - (bits - 1)) & 31));
        ctx.flags_conditional(SR_N, Cond::Ne);
    }
    if um & SR_Z != 0 {
        ctx.emit(insn::tst_immed(r, bits, 0));
        ctx.flags_clear_conditional(SR_Z, Cond::Ne);
    }
    ctx.free(a);
    ctx.free(b);
    ctx.free(r);
}
