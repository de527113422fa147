//! Line E shifts and rotates: ASL/ASR, LSL/LSR, ROL/ROR, ROXL/ROXR in
//! register-immediate, register-count and memory forms.
//!
//! Register counts are taken mod 64 and get a zero-count guard that
//! preserves X, clears C and V and sets N/Z from the unshifted value
//! (ROX reports C = X instead). Counts can exceed the operand width, so
//! the dynamic paths run on the 64-bit datapath where the shifted-out
//! bit and the emptied result fall out naturally. ASL computes V by
//! arithmetically shifting the result back and comparing with the
//! original — overflow means some sign information was lost. ROXd
//! rotates through X by widening the operand to width+1 bits with X on
//! top, reducing the count mod 9, 17 or 33.

use asm_aarch64::insn::{self, Reg, Shift, ZR};
use asm_aarch64::Cond;

use crate::ccr::{CCB_CALT, CCB_VALT, CCB_X, SR_C, SR_V, SR_X};
use crate::ctx::{Ctx, Size};
use crate::dispatch::emit_illegal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Arith,
    Logical,
    RotateX,
    Rotate,
}

pub(crate) fn emit_shift_reg(ctx: &mut Ctx, opcode: u16) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let count_field = ((opcode >> 9) & 7) as u8;
    let left = opcode & 0x0100 != 0;
    let by_register = opcode & 0x0020 != 0;
    let kind = match (opcode >> 3) & 3 {
        0 => Kind::Arith,
        1 => Kind::Logical,
        2 => Kind::RotateX,
        _ => Kind::Rotate,
    };
    let dn = (opcode & 7) as u8;
    let dst = ctx.map_read(dn);

    if by_register {
        dynamic_shift(ctx, kind, left, size, dst, count_field);
    } else {
        let n = if count_field == 0 { 8 } else { count_field };
        match (kind, left) {
            (Kind::Arith | Kind::Logical, true) => {
                shift_left_imm(ctx, kind, size, dst, n);
            }
            (Kind::Arith | Kind::Logical, false) => {
                shift_right_imm(ctx, kind, size, dst, n);
            }
            (Kind::Rotate, _) => rotate_imm(ctx, left, size, dst, n),
            (Kind::RotateX, _) => roxd_imm(ctx, left, size, dst, n),
        }
    }
    ctx.mark_dirty(dn);
    ctx.advance_pc_over_insn();
    1
}

/// Memory form: word operand, shift by one.
pub(crate) fn emit_shift_mem(ctx: &mut Ctx, opcode: u16) -> u32 {
    let kind = match (opcode >> 9) & 3 {
        0 => Kind::Arith,
        1 => Kind::Logical,
        2 => Kind::RotateX,
        _ => Kind::Rotate,
    };
    let left = opcode & 0x0100 != 0;
    let ea = (opcode & 0x3F) as u8;
    ctx.ea_rmw(Size::Word, ea, |c, val| match (kind, left) {
        (Kind::Arith | Kind::Logical, true) => shift_left_imm(c, kind, Size::Word, val, 1),
        (Kind::Arith | Kind::Logical, false) => shift_right_imm(c, kind, Size::Word, val, 1),
        (Kind::Rotate, _) => rotate_imm(c, left, Size::Word, val, 1),
        (Kind::RotateX, _) => roxd_imm(c, left, Size::Word, val, 1),
    });
    ctx.advance_pc_over_insn();
    1
}

/// ASL/LSL #n. The carry is the last bit shifted out; ASL additionally
/// watches for any change of sign across the shift.
fn shift_left_imm(ctx: &mut Ctx, kind: Kind, size: Size, dst: Reg, n: u8) {
    let um = ctx.update_mask;
    let bits = size.bits();
    let cc = ctx.modify_cc();

    let carry = if um & (SR_C | SR_X) != 0 {
        let c = ctx.alloc_tmp();
        ctx.emit(insn::ubfx(c, dst, bits - n, 1));
        Some(c)
    } else {
        None
    };
    let orig = if kind == Kind::Arith && um & SR_V != 0 {
        let o = ctx.alloc_tmp();
        ctx.emit(match size {
            Size::Byte => insn::sbfx(o, dst, 0, 8),
            Size::Word => insn::sbfx(o, dst, 0, 16),
            Size::Long => insn::mov_reg(o, dst),
        });
        Some(o)
    } else {
        None
    };

    let t = ctx.alloc_tmp();
    ctx.emit(insn::lsl(t, dst, n));
    if size == Size::Long {
        ctx.emit(insn::mov_reg(dst, t));
    } else {
        ctx.emit(insn::bfi(dst, t, 0, bits));
    }
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
    }
    if let Some(c) = carry {
        if um & SR_C != 0 {
            ctx.emit(insn::bfi(cc, c, CCB_CALT, 1));
        }
        if um & SR_X != 0 {
            ctx.emit(insn::bfi(cc, c, CCB_X, 1));
        }
        ctx.free(c);
    }
    if let Some(o) = orig {
        // Shift the result back; a mismatch means the sign bit changed
        // at some step.
        let v = ctx.alloc_tmp();
        ctx.emit(match size {
            Size::Byte => insn::sbfx(v, t, 0, 8),
            Size::Word => insn::sbfx(v, t, 0, 16),
            Size::Long => insn::mov_reg(v, t),
        });
        ctx.emit(insn::asr(v, v, n));
        ctx.emit(insn::cmp_reg(v, o, Shift::Lsl, 0));
        ctx.emit(insn::cset(v, Cond::Ne));
        ctx.emit(insn::bfi(cc, v, CCB_VALT, 1));
        ctx.free(v);
        ctx.free(o);
    }
    ctx.free(t);
}

/// ASR/LSR #n.
fn shift_right_imm(ctx: &mut Ctx, kind: Kind, size: Size, dst: Reg, n: u8) {
    let um = ctx.update_mask;
    let bits = size.bits();
    let cc = ctx.modify_cc();

    let carry = if um & (SR_C | SR_X) != 0 {
        let c = ctx.alloc_tmp();
        ctx.emit(insn::ubfx(c, dst, n - 1, 1));
        Some(c)
    } else {
        None
    };

    let t = ctx.alloc_tmp();
    if kind == Kind::Arith {
        ctx.emit(match size {
            Size::Byte => insn::sbfx(t, dst, 0, 8),
            Size::Word => insn::sbfx(t, dst, 0, 16),
            Size::Long => insn::mov_reg(t, dst),
        });
        ctx.emit(insn::asr(t, t, n));
    } else {
        ctx.emit(match size {
            Size::Byte => insn::uxtb(t, dst),
            Size::Word => insn::uxth(t, dst),
            Size::Long => insn::mov_reg(t, dst),
        });
        ctx.emit(insn::lsr(t, t, n));
    }
    if size == Size::Long {
        ctx.emit(insn::mov_reg(dst, t));
    } else {
        ctx.emit(insn::bfi(dst, t, 0, bits));
    }
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
    }
    if let Some(c) = carry {
        if um & SR_C != 0 {
            ctx.emit(insn::bfi(cc, c, CCB_CALT, 1));
        }
        if um & SR_X != 0 {
            ctx.emit(insn::bfi(cc, c, CCB_X, 1));
        }
        ctx.free(c);
    }
    ctx.free(t);
}

/// ROL/ROR #n. X is untouched; C is the bit that crossed the boundary,
/// which is the result's bottom bit (left) or top bit (right) for any
/// nonzero count.
fn rotate_imm(ctx: &mut Ctx, left: bool, size: Size, dst: Reg, n: u8) {
    let um = ctx.update_mask;
    let bits = size.bits();
    let cc = ctx.modify_cc();
    let eff = n % bits;

    let t = ctx.alloc_tmp();
    if size == Size::Long {
        let r = if left { (32 - u32::from(eff)) as u8 & 31 } else { eff };
        if r != 0 {
            ctx.emit(insn::ror_immed(dst, dst, r));
        }
        ctx.emit(insn::mov_reg(t, dst));
    } else {
        let m = ctx.alloc_tmp();
        ctx.emit(match size {
            Size::Byte => insn::uxtb(m, dst),
            _ => insn::uxth(m, dst),
        });
        let right = if left { (bits - eff) % bits } else { eff };
        if right == 0 {
            ctx.emit(insn::mov_reg(t, m));
        } else {
            ctx.emit(insn::lsr(t, m, right));
            ctx.emit(insn::orr_reg(t, t, m, Shift::Lsl, bits - right));
            ctx.emit(match size {
                Size::Byte => insn::uxtb(t, t),
                _ => insn::uxth(t, t),
            });
        }
        ctx.emit(insn::bfi(dst, t, 0, bits));
        ctx.free(m);
    }
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
    }
    if um & SR_C != 0 {
        let c = ctx.alloc_tmp();
        if left {
            ctx.emit(insn::ubfx(c, t, 0, 1));
        } else {
            ctx.emit(insn::ubfx(c, t, bits - 1, 1));
        }
        ctx.emit(insn::bfi(cc, c, CCB_CALT, 1));
        ctx.free(c);
    }
    ctx.free(t);
}

/// ROXL/ROXR #n: rotate through X in a width+1-bit ring.
fn roxd_imm(ctx: &mut Ctx, left: bool, size: Size, dst: Reg, n: u8) {
    let um = ctx.update_mask;
    let bits = u32::from(size.bits());
    let ring = bits + 1;
    let cc = ctx.modify_cc();
    let eff = u32::from(n) % ring;
    // A left rotate by k is a right rotate by ring-k in the same ring.
    let right = if left { (ring - eff) % ring } else { eff };

    let t = ctx.alloc_tmp();
    let x = ctx.alloc_tmp();
    // Widen: operand in the low bits, X on top.
    ctx.emit(match size {
        Size::Byte => insn::uxtb(t, dst),
        Size::Word => insn::uxth(t, dst),
        Size::Long => insn::mov_reg(t, dst),
    });
    ctx.emit(insn::ubfx(x, cc, CCB_X, 1));
    if size == Size::Long {
        ctx.emit(insn::bfi64(t, x, 32, 1));
        if right != 0 {
            let u = ctx.alloc_tmp();
            ctx.emit(insn::lsr64(u, t, right as u8));
            ctx.emit(insn::lsl64(t, t, (ring - right) as u8));
            ctx.emit(insn::orr64_reg(t, t, u, Shift::Lsl, 0));
            ctx.emit(insn::and64_immed(t, t, 33, 0));
            ctx.free(u);
        }
        ctx.emit(insn::ubfx64(x, t, 32, 1));
        ctx.emit(insn::mov_reg(dst, t));
    } else {
        ctx.emit(insn::bfi(t, x, bits as u8, 1));
        if right != 0 {
            let u = ctx.alloc_tmp();
            ctx.emit(insn::lsr(u, t, right as u8));
            ctx.emit(insn::lsl(t, t, (ring - right) as u8));
            ctx.emit(insn::orr_reg(t, t, u, Shift::Lsl, 0));
            ctx.free(u);
        }
        ctx.emit(insn::ubfx(x, t, bits as u8, 1));
        ctx.emit(insn::bfi(dst, t, 0, bits as u8));
    }
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
    }
    // C and X both take the bit now sitting in the ring's top position.
    if um & SR_C != 0 {
        ctx.emit(insn::bfi(cc, x, CCB_CALT, 1));
    }
    if um & SR_X != 0 {
        ctx.emit(insn::bfi(cc, x, CCB_X, 1));
    }
    ctx.free(t);
    ctx.free(x);
}

/// Register-count shifts: count mod 64 with the zero-count guard, then
/// the 64-bit generic datapath.
fn dynamic_shift(ctx: &mut Ctx, kind: Kind, left: bool, size: Size, dst: Reg, count_dn: u8) {
    let um = ctx.update_mask;
    let cc = ctx.modify_cc();

    let cr = ctx.map_read(count_dn);
    let cnt = ctx.alloc_tmp();
    ctx.emit(insn::and_immed(cnt, cr, 6, 0));

    // count == 0: N/Z from the unshifted value, V and C clear (ROX puts
    // X into C instead), X preserved, operand untouched.
    let zero_site = ctx.emit(insn::nop());

    match kind {
        Kind::Arith | Kind::Logical => {
            dynamic_shift_core(ctx, kind, left, size, dst, cnt);
        }
        Kind::Rotate => dynamic_rotate(ctx, left, size, dst, cnt),
        Kind::RotateX => dynamic_roxd(ctx, left, size, dst, cnt),
    }
    let done = ctx.emit(insn::nop());

    ctx.patch_fwd_cbz(zero_site, cnt, false);
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, dst, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
        if kind == Kind::RotateX && um & SR_C != 0 {
            let x = ctx.alloc_tmp();
            ctx.emit(insn::ubfx(x, cc, CCB_X, 1));
            ctx.emit(insn::bfi(cc, x, CCB_CALT, 1));
            ctx.free(x);
        }
    }
    ctx.patch_fwd_b(done);
    ctx.free(cnt);
}

fn dynamic_shift_core(ctx: &mut Ctx, kind: Kind, left: bool, size: Size, dst: Reg, cnt: Reg) {
    let um = ctx.update_mask;
    let bits = size.bits();
    let cc = ctx.modify_cc();
    let t = ctx.alloc_tmp();

    // Operand widened to 64 bits, sign-aware for ASR.
    if kind == Kind::Arith && !left {
        ctx.emit(match size {
            Size::Byte => insn::sbfx(t, dst, 0, 8),
            Size::Word => insn::sbfx(t, dst, 0, 16),
            Size::Long => insn::mov_reg(t, dst),
        });
        ctx.emit(insn::sxtw64(t, t));
    } else {
        ctx.emit(match size {
            Size::Byte => insn::uxtb(t, dst),
            Size::Word => insn::uxth(t, dst),
            Size::Long => insn::mov_reg(t, dst),
        });
    }

    let orig = if kind == Kind::Arith && left && um & SR_V != 0 {
        // Sign-extended original for the shift-back comparison.
        let o = ctx.alloc_tmp();
        ctx.emit(match size {
            Size::Byte => insn::sbfx(o, dst, 0, 8),
            Size::Word => insn::sbfx(o, dst, 0, 16),
            Size::Long => insn::mov_reg(o, dst),
        });
        ctx.emit(insn::sxtw64(o, o));
        Some(o)
    } else {
        None
    };

    // Carry: the last bit out is bit (width-count) going left, or bit
    // (count-1) going right, read on the 64-bit value where counts past
    // the width naturally produce zero (or the sign for ASR).
    let carry = if um & (SR_C | SR_X) != 0 {
        let c = ctx.alloc_tmp();
        let k = ctx.alloc_tmp();
        if left {
            ctx.emit(insn::movw_immed_u16(k, u16::from(bits)));
            ctx.emit(insn::sub_reg(k, k, cnt, Shift::Lsl, 0));
            // Equivalent to a right shift by width-count in the ring.
            ctx.emit(insn::and_immed(k, k, 6, 0));
            ctx.emit(insn::lsrv64(c, t, k));
        } else {
            ctx.emit(insn::sub_immed(k, cnt, 1));
            if kind == Kind::Arith {
                ctx.emit(insn::asrv64(c, t, k));
            } else {
                ctx.emit(insn::lsrv64(c, t, k));
            }
        }
        ctx.emit(insn::and_immed(c, c, 1, 0));
        ctx.free(k);
        Some(c)
    } else {
        None
    };

    // The shift itself.
    if left {
        ctx.emit(insn::lslv64(t, t, cnt));
    } else if kind == Kind::Arith {
        ctx.emit(insn::asrv64(t, t, cnt));
    } else {
        ctx.emit(insn::lsrv64(t, t, cnt));
    }
    if size == Size::Long {
        ctx.emit(insn::mov_reg(dst, t));
    } else {
        ctx.emit(insn::bfi(dst, t, 0, bits));
    }
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
    }
    if let Some(c) = carry {
        if um & SR_C != 0 {
            ctx.emit(insn::bfi(cc, c, CCB_CALT, 1));
        }
        if um & SR_X != 0 {
            ctx.emit(insn::bfi(cc, c, CCB_X, 1));
        }
        ctx.free(c);
    }
    if let Some(o) = orig {
        // ASL overflow: arithmetic shift back differs from the input.
        let v = ctx.alloc_tmp();
        ctx.emit(match size {
            Size::Byte => insn::sbfx(v, t, 0, 8),
            Size::Word => insn::sbfx(v, t, 0, 16),
            Size::Long => insn::sxtw64(v, t),
        });
        if size != Size::Long {
            ctx.emit(insn::sxtw64(v, v));
        }
        ctx.emit(insn::asrv64(v, v, cnt));
        ctx.emit(insn::cmp64_reg(v, o));
        ctx.emit(insn::cset(v, Cond::Ne));
        ctx.emit(insn::bfi(cc, v, CCB_VALT, 1));
        ctx.free(v);
        ctx.free(o);
    }
    ctx.free(t);
}

fn dynamic_rotate(ctx: &mut Ctx, left: bool, size: Size, dst: Reg, cnt: Reg) {
    let um = ctx.update_mask;
    let bits = size.bits();
    let cc = ctx.modify_cc();
    let t = ctx.alloc_tmp();
    let k = ctx.alloc_tmp();

    if size == Size::Long {
        if left {
            ctx.emit(insn::sub_reg(k, ZR, cnt, Shift::Lsl, 0));
            ctx.emit(insn::rorv(dst, dst, k));
        } else {
            ctx.emit(insn::rorv(dst, dst, cnt));
        }
        ctx.emit(insn::mov_reg(t, dst));
    } else {
        // Duplicate the operand so a right shift in the doubled field is
        // a rotate of the narrow one.
        let m = ctx.alloc_tmp();
        ctx.emit(match size {
            Size::Byte => insn::uxtb(m, dst),
            _ => insn::uxth(m, dst),
        });
        ctx.emit(insn::orr_reg(m, m, m, Shift::Lsl, bits));
        if left {
            ctx.emit(insn::sub_reg(k, ZR, cnt, Shift::Lsl, 0));
        } else {
            ctx.emit(insn::mov_reg(k, cnt));
        }
        ctx.emit(insn::and_immed(k, k, if bits == 8 { 3 } else { 4 }, 0));
        ctx.emit(insn::lsrv(t, m, k));
        ctx.emit(match size {
            Size::Byte => insn::uxtb(t, t),
            _ => insn::uxth(t, t),
        });
        ctx.emit(insn::bfi(dst, t, 0, bits));
        ctx.free(m);
    }
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
    }
    if um & SR_C != 0 {
        let c = ctx.alloc_tmp();
        if left {
            ctx.emit(insn::ubfx(c, t, 0, 1));
        } else {
            ctx.emit(insn::ubfx(c, t, bits - 1, 1));
        }
        ctx.emit(insn::bfi(cc, c, CCB_CALT, 1));
        ctx.free(c);
    }
    ctx.free(t);
    ctx.free(k);
}

fn dynamic_roxd(ctx: &mut Ctx, left: bool, size: Size, dst: Reg, cnt: Reg) {
    let um = ctx.update_mask;
    let bits = u32::from(size.bits());
    let ring = bits + 1;
    let cc = ctx.modify_cc();

    let t = ctx.alloc_tmp();
    let x = ctx.alloc_tmp();
    let k = ctx.alloc_tmp();
    let u = ctx.alloc_tmp();

    // count mod ring.
    ctx.emit(insn::movw_immed_u16(u, ring as u16));
    ctx.emit(insn::udiv(k, cnt, u));
    ctx.emit(insn::msub(k, k, u, cnt));
    if left {
        // Left by k is right by ring-k; k = 0 stays 0.
        ctx.emit(insn::sub_reg(u, ZR, k, Shift::Lsl, 0));
        ctx.emit(insn::add_immed(u, u, ring as u16));
        ctx.emit(insn::movw_immed_u16(t, ring as u16));
        ctx.emit(insn::udiv(x, u, t));
        ctx.emit(insn::msub(k, x, t, u));
    }

    // Widen with X on top and rotate right by k within the ring.
    ctx.emit(match size {
        Size::Byte => insn::uxtb(t, dst),
        Size::Word => insn::uxth(t, dst),
        Size::Long => insn::mov_reg(t, dst),
    });
    ctx.emit(insn::ubfx(x, cc, CCB_X, 1));
    if size == Size::Long {
        ctx.emit(insn::bfi64(t, x, 32, 1));
        ctx.emit(insn::lsrv64(u, t, k));
        ctx.emit(insn::movw_immed_u16(x, ring as u16));
        ctx.emit(insn::sub_reg(x, x, k, Shift::Lsl, 0));
        ctx.emit(insn::lslv64(t, t, x));
        ctx.emit(insn::orr64_reg(t, t, u, Shift::Lsl, 0));
        ctx.emit(insn::and64_immed(t, t, 33, 0));
        ctx.emit(insn::ubfx64(x, t, 32, 1));
        ctx.emit(insn::mov_reg(dst, t));
    } else {
        ctx.emit(insn::bfi(t, x, bits as u8, 1));
        ctx.emit(insn::lsrv(u, t, k));
        ctx.emit(insn::movw_immed_u16(x, ring as u16));
        ctx.emit(insn::sub_reg(x, x, k, Shift::Lsl, 0));
        ctx.emit(insn::lslv(t, t, x));
        ctx.emit(insn::orr_reg(t, t, u, Shift::Lsl, 0));
        ctx.emit(insn::and_immed(t, t, ring as u8, 0));
        ctx.emit(insn::ubfx(x, t, bits as u8, 1));
        ctx.emit(insn::bfi(dst, t, 0, bits as u8));
    }
    if um != 0 {
        ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, size.top_shift()));
        ctx.commit_nz_clear_vc(um);
    }
    if um & SR_C != 0 {
        ctx.emit(insn::bfi(cc, x, CCB_CALT, 1));
    }
    if um & SR_X != 0 {
        ctx.emit(insn::bfi(cc, x, CCB_X, 1));
    }
    ctx.free(t);
    ctx.free(x);
    ctx.free(k);
    ctx.free(u);
}
