//! Bitfield instructions: BFTST, BFEXTU, BFEXTS, BFFFO, BFCHG, BFCLR,
//! BFSET and BFINS.
//!
//! A width of 0 means 32. On a data register the operand is a 32-bit
//! ring — the bit offset wraps mod 32 and a rotate brings the field to
//! the top of the register, so wrap-around needs no special casing. In
//! memory the byte address is pre-adjusted by `offset DIV 8` (an
//! arithmetic shift: memory offsets are signed), the residual mod-8
//! offset picks the bit position, and the access width is the smallest
//! of byte/halfword/word/doubleword covering `residual + width`;
//! dynamic offsets or widths always use the doubleword form.
//!
//! N and Z reflect the field (for BFINS, the inserted value). BFFFO
//! yields `offset + CLZ(field-aligned-high OR low-ones)`, which lands
//! on `offset + width` when the field is empty.

use asm_aarch64::insn::{self, Reg, Shift, ZR};

use crate::ctx::Ctx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BfOp {
    Tst,
    Extu,
    Exts,
    Ffo,
    Chg,
    Clr,
    Set,
    Ins,
}

fn bf_op_of(opcode: u16) -> BfOp {
    match (opcode >> 8) & 7 {
        0 => BfOp::Tst,
        1 => BfOp::Extu,
        2 => BfOp::Chg,
        3 => BfOp::Exts,
        4 => BfOp::Clr,
        5 => BfOp::Ffo,
        6 => BfOp::Set,
        _ => BfOp::Ins,
    }
}

enum Operand {
    Imm(u8),
    Dn(u8),
}

pub(crate) fn emit_bitfield(ctx: &mut Ctx, opcode: u16) -> u32 {
    let op = bf_op_of(opcode);
    let ext = ctx.fetch_ext16();
    let reg2 = ((ext >> 12) & 7) as u8;
    let offset = if ext & 0x0800 != 0 {
        Operand::Dn(((ext >> 6) & 7) as u8)
    } else {
        Operand::Imm(((ext >> 6) & 0x1F) as u8)
    };
    let width = if ext & 0x0020 != 0 {
        Operand::Dn((ext & 7) as u8)
    } else {
        let w = (ext & 0x1F) as u8;
        Operand::Imm(if w == 0 { 32 } else { w })
    };
    let ea = (opcode & 0x3F) as u8;

    if ea >> 3 == 0 {
        bitfield_reg(ctx, op, ea & 7, reg2, &offset, &width);
    } else if let (Operand::Imm(o), Operand::Imm(w)) = (&offset, &width) {
        bitfield_mem_static(ctx, op, ea, reg2, *o, *w);
    } else {
        bitfield_mem_dynamic(ctx, op, ea, reg2, &offset, &width);
    }
    ctx.advance_pc_over_insn();
    1
}

/// Commit the bitfield group's flags: N and Z from the just-emitted
/// field test, V and C cleared.
fn bf_flags(ctx: &mut Ctx) {
    let um = ctx.update_mask;
    if um != 0 {
        ctx.commit_nz_clear_vc(um);
    }
}

// === Data-register operand ===

fn bitfield_reg(ctx: &mut Ctx, op: BfOp, dn: u8, reg2: u8, offset: &Operand, width: &Operand) {
    let dst = ctx.map_read(dn);
    let t = ctx.alloc_tmp();

    // Rotate the field to the top of a working copy.
    let dyn_o = match offset {
        Operand::Imm(o) => {
            let o = o & 31;
            if o == 0 {
                ctx.emit(insn::mov_reg(t, dst));
            } else {
                ctx.emit(insn::ror_immed(t, dst, 32 - o));
            }
            None
        }
        Operand::Dn(od) => {
            let or = ctx.map_read(*od);
            let k = ctx.alloc_tmp();
            ctx.emit(insn::sub_reg(k, ZR, or, Shift::Lsl, 0));
            ctx.emit(insn::rorv(t, dst, k));
            ctx.free(k);
            Some(*od)
        }
    };

    // Top-aligned mask for the field.
    let (mask, wdyn) = match width {
        Operand::Imm(w) => {
            if *w == 32 {
                (None, None)
            } else {
                let m = ctx.alloc_tmp();
                // width ones rotated into the top of the register.
                ctx.emit(insn::orr_immed(m, ZR, *w, *w & 31));
                (Some(m), None)
            }
        }
        Operand::Dn(wd) => {
            let wr = ctx.map_read(*wd);
            let wm = ctx.alloc_tmp();
            ctx.emit(insn::sub_immed(wm, wr, 1));
            ctx.emit(insn::and_immed(wm, wm, 5, 0));
            ctx.emit(insn::add_immed(wm, wm, 1));
            let m = ctx.alloc_tmp();
            let k = ctx.alloc_tmp();
            ctx.emit(insn::movn_immed_u16(m, 0, 0));
            ctx.emit(insn::movw_immed_u16(k, 32));
            ctx.emit(insn::sub_reg(k, k, wm, Shift::Lsl, 0));
            ctx.emit(insn::lslv(m, m, k));
            ctx.free(k);
            (Some(m), Some(wm))
        }
    };

    // Field flags: ANDS against the top mask.
    match &mask {
        Some(m) => ctx.emit(insn::ands_reg(ZR, t, *m, Shift::Lsl, 0)),
        None => ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, 0)),
    };
    if op != BfOp::Ins {
        bf_flags(ctx);
    }

    match op {
        BfOp::Tst => {}
        BfOp::Extu | BfOp::Exts => {
            let out = ctx.map_write(reg2);
            let arith = op == BfOp::Exts;
            match (width, &wdyn) {
                (Operand::Imm(w), _) => {
                    let sh = 32 - *w;
                    if arith {
                        ctx.emit(insn::asr(out, t, sh));
                    } else {
                        ctx.emit(insn::lsr(out, t, sh));
                    }
                }
                (_, Some(wm)) => {
                    let k = ctx.alloc_tmp();
                    ctx.emit(insn::movw_immed_u16(k, 32));
                    ctx.emit(insn::sub_reg(k, k, *wm, Shift::Lsl, 0));
                    if arith {
                        ctx.emit(insn::asrv(out, t, k));
                    } else {
                        ctx.emit(insn::lsrv(out, t, k));
                    }
                    ctx.free(k);
                }
                _ => unreachable!(),
            }
            ctx.mark_dirty(reg2);
        }
        BfOp::Ffo => {
            let out = ctx.map_write(reg2);
            // Force ones below the field so an empty field counts
            // exactly `width` leading zeros.
            match &mask {
                Some(m) => {
                    ctx.emit(insn::orn_reg(out, t, *m, Shift::Lsl, 0));
                    ctx.emit(insn::clz(out, out));
                }
                None => {
                    ctx.emit(insn::clz(out, t));
                }
            }
            match offset {
                Operand::Imm(o) => {
                    if *o != 0 {
                        ctx.emit(insn::add_immed(out, out, u16::from(*o & 31)));
                    }
                }
                Operand::Dn(od) => {
                    let or = ctx.map_read(*od);
                    let k = ctx.alloc_tmp();
                    ctx.emit(insn::and_immed(k, or, 5, 0));
                    ctx.emit(insn::add_reg(out, out, k, Shift::Lsl, 0));
                    ctx.free(k);
                }
            }
            ctx.mark_dirty(reg2);
        }
        BfOp::Chg | BfOp::Clr | BfOp::Set => {
            match &mask {
                Some(m) => {
                    let word = match op {
                        BfOp::Chg => insn::eor_reg(t, t, *m, Shift::Lsl, 0),
                        BfOp::Clr => insn::bic_reg(t, t, *m, Shift::Lsl, 0),
                        _ => insn::orr_reg(t, t, *m, Shift::Lsl, 0),
                    };
                    ctx.emit(word);
                }
                None => {
                    let word = match op {
                        BfOp::Chg => insn::mvn_reg(t, t),
                        BfOp::Clr => insn::mov_reg(t, ZR),
                        _ => insn::movn_immed_u16(t, 0, 0),
                    };
                    ctx.emit(word);
                }
            }
            rotate_back(ctx, dst, t, offset, dyn_o);
            ctx.mark_dirty(dn);
        }
        BfOp::Ins => {
            let src = ctx.map_read(reg2);
            match (width, &wdyn) {
                (Operand::Imm(w), _) => {
                    if *w == 32 {
                        ctx.emit(insn::mov_reg(t, src));
                    } else {
                        ctx.emit(insn::bfi(t, src, 32 - *w, *w));
                    }
                    // Inserted-value flags.
                    ctx.emit(insn::cmn_reg(ZR, src, Shift::Lsl, 32 - *w));
                }
                (_, Some(wm)) => {
                    let k = ctx.alloc_tmp();
                    let s = ctx.alloc_tmp();
                    ctx.emit(insn::movw_immed_u16(k, 32));
                    ctx.emit(insn::sub_reg(k, k, *wm, Shift::Lsl, 0));
                    ctx.emit(insn::lslv(s, src, k));
                    match &mask {
                        Some(m) => {
                            ctx.emit(insn::bic_reg(t, t, *m, Shift::Lsl, 0));
                            ctx.emit(insn::and_reg(s, s, *m, Shift::Lsl, 0));
                        }
                        None => {
                            ctx.emit(insn::mov_reg(t, ZR));
                        }
                    }
                    ctx.emit(insn::orr_reg(t, t, s, Shift::Lsl, 0));
                    ctx.emit(insn::cmn_reg(ZR, s, Shift::Lsl, 0));
                    ctx.free(k);
                    ctx.free(s);
                }
                _ => unreachable!(),
            }
            bf_flags(ctx);
            rotate_back(ctx, dst, t, offset, dyn_o);
            ctx.mark_dirty(dn);
        }
    }

    if let Some(m) = mask {
        ctx.free(m);
    }
    if let Some(wm) = wdyn {
        ctx.free(wm);
    }
    ctx.free(t);
}

fn rotate_back(ctx: &mut Ctx, dst: Reg, t: Reg, offset: &Operand, dyn_o: Option<u8>) {
    match (offset, dyn_o) {
        (Operand::Imm(o), _) => {
            let o = o & 31;
            if o == 0 {
                ctx.emit(insn::mov_reg(dst, t));
            } else {
                ctx.emit(insn::ror_immed(dst, t, o));
            }
        }
        (_, Some(od)) => {
            let or = ctx.map_read(od);
            ctx.emit(insn::rorv(dst, t, or));
        }
        _ => unreachable!(),
    }
}

// === Memory operand, immediate offset and width ===

fn bitfield_mem_static(ctx: &mut Ctx, op: BfOp, ea: u8, reg2: u8, o: u8, w: u8) {
    let addr = ctx.ea_addr(ea);
    let byte_adj = i32::from(o >> 3);
    let residual = o & 7;
    let total = residual + w;
    // Smallest big-endian access covering the field.
    let (bytes, load, store): (u8, fn(Reg, Reg, u16) -> u32, fn(Reg, Reg, u16) -> u32) =
        match total {
            0..=8 => (1, insn::ldrb_offset, insn::strb_offset),
            9..=16 => (2, insn::ldrh_offset, insn::strh_offset),
            17..=32 => (4, insn::ldr_offset, insn::str_offset),
            _ => (8, insn::ldr64_offset, insn::str64_offset),
        };
    if byte_adj != 0 {
        ctx.emit_add_base_disp(addr, addr, byte_adj);
    }
    let v = ctx.alloc_tmp();
    ctx.emit(load(addr, v, 0));

    if bytes == 8 {
        bitfield_mem64(ctx, op, reg2, v, u32::from(residual), u32::from(w), i32::from(o), addr);
    } else {
        let dom = u32::from(bytes) * 8;
        let p = (dom - u32::from(residual) - u32::from(w)) as u8;
        if op != BfOp::Ins {
            bf_mem_nz(ctx, v, p, w);
        }
        match op {
            BfOp::Tst => {}
            BfOp::Extu => {
                let out = ctx.map_write(reg2);
                ctx.emit(insn::ubfx(out, v, p, w));
                ctx.mark_dirty(reg2);
            }
            BfOp::Exts => {
                let out = ctx.map_write(reg2);
                ctx.emit(insn::sbfx(out, v, p, w));
                ctx.mark_dirty(reg2);
            }
            BfOp::Ffo => {
                let out = ctx.map_write(reg2);
                let t = ctx.alloc_tmp();
                ctx.emit(insn::ubfx(t, v, p, w));
                if w == 32 {
                    ctx.emit(insn::clz(out, t));
                } else {
                    ctx.emit(insn::lsl(t, t, 32 - w));
                    ctx.emit(insn::orr_immed(t, t, 32 - w, 0));
                    ctx.emit(insn::clz(out, t));
                }
                if o != 0 {
                    ctx.emit(insn::add_immed(out, out, u16::from(o)));
                }
                ctx.mark_dirty(reg2);
                ctx.free(t);
            }
            BfOp::Chg | BfOp::Clr | BfOp::Set => {
                let word = match op {
                    BfOp::Chg => insn::eor_immed(v, v, w, (32 - p) & 31),
                    BfOp::Clr => insn::bic_immed(v, v, w, (32 - p) & 31),
                    _ => insn::orr_immed(v, v, w, (32 - p) & 31),
                };
                ctx.emit(word);
                ctx.emit(store(addr, v, 0));
            }
            BfOp::Ins => {
                let src = ctx.map_read(reg2);
                ctx.emit(insn::bfi(v, src, p, w));
                ctx.emit(insn::cmn_reg(ZR, src, Shift::Lsl, 32 - w));
                bf_flags(ctx);
                ctx.emit(store(addr, v, 0));
            }
        }
    }
    ctx.free(v);
    ctx.free(addr);
}

/// N and Z from a field at bit position `p`, width `w`, of `v`.
fn bf_mem_nz(ctx: &mut Ctx, v: Reg, p: u8, w: u8) {
    // The tst just emitted gives Z directly, but its N is the 32-bit
    // sign, not the field's. Recompute on the top-aligned field.
    let t = ctx.alloc_tmp();
    ctx.emit(insn::ubfx(t, v, p, w));
    ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, 32 - w));
    bf_flags(ctx);
    ctx.free(t);
}

// === Memory operand, dynamic offset or width ===

fn bitfield_mem_dynamic(ctx: &mut Ctx, op: BfOp, ea: u8, reg2: u8, offset: &Operand, width: &Operand) {
    let addr = ctx.ea_addr(ea);
    let or = ctx.alloc_tmp();
    match offset {
        Operand::Imm(o) => ctx.load_const(or, u32::from(*o)),
        Operand::Dn(od) => {
            let r = ctx.map_read(*od);
            ctx.emit(insn::mov_reg(or, r));
        }
    }
    // Signed byte adjust, residual bit offset.
    let t = ctx.alloc_tmp();
    ctx.emit(insn::asr(t, or, 3));
    ctx.emit(insn::add_reg(addr, addr, t, Shift::Lsl, 0));
    let res = ctx.alloc_tmp();
    ctx.emit(insn::and_immed(res, or, 3, 0));

    let wm = ctx.alloc_tmp();
    match width {
        Operand::Imm(w) => ctx.load_const(wm, u32::from(*w)),
        Operand::Dn(wd) => {
            let r = ctx.map_read(*wd);
            ctx.emit(insn::sub_immed(wm, r, 1));
            ctx.emit(insn::and_immed(wm, wm, 5, 0));
            ctx.emit(insn::add_immed(wm, wm, 1));
        }
    }

    let v = ctx.alloc_tmp();
    ctx.emit(insn::ldr64_offset(addr, v, 0));
    dyn64_field(ctx, op, reg2, v, res, wm, or, Some(addr));

    ctx.free(t);
    ctx.free(or);
    ctx.free(res);
    ctx.free(wm);
    ctx.free(v);
    ctx.free(addr);
}

#[allow(clippy::too_many_arguments)]
fn bitfield_mem64(
    ctx: &mut Ctx,
    op: BfOp,
    reg2: u8,
    v: Reg,
    residual: u32,
    w: u32,
    full_o: i32,
    addr: Reg,
) {
    // Static parameters, doubleword domain; reuse the dynamic core with
    // constants loaded.
    let res = ctx.alloc_tmp();
    let wm = ctx.alloc_tmp();
    let or = ctx.alloc_tmp();
    ctx.load_const(res, residual);
    ctx.load_const(wm, w);
    ctx.load_const(or, full_o as u32);
    dyn64_field(ctx, op, reg2, v, res, wm, or, Some(addr));
    ctx.free(res);
    ctx.free(wm);
    ctx.free(or);
}

/// Core of the doubleword-domain bitfield: `v` holds the loaded 64-bit
/// value, `res` the residual bit offset, `wm` the width, `or` the full
/// original offset (for BFFFO). `store_addr` carries the base register
/// when the operation writes back.
fn dyn64_field(
    ctx: &mut Ctx,
    op: BfOp,
    reg2: u8,
    v: Reg,
    res: Reg,
    wm: Reg,
    or: Reg,
    store_addr: Option<Reg>,
) {
    // p = 64 - residual - width: LSB position of the field.
    let p = ctx.alloc_tmp();
    ctx.emit(insn::movw_immed_u16(p, 64));
    ctx.emit(insn::sub_reg(p, p, res, Shift::Lsl, 0));
    ctx.emit(insn::sub_reg(p, p, wm, Shift::Lsl, 0));

    // Extracted field, right-aligned.
    let f = ctx.alloc_tmp();
    ctx.emit(insn::lsrv64(f, v, p));
    let m = ctx.alloc_tmp();
    let k = ctx.alloc_tmp();
    ctx.emit(insn::movn64_immed_u16(m, 0));
    ctx.emit(insn::movw_immed_u16(k, 64));
    ctx.emit(insn::sub_reg(k, k, wm, Shift::Lsl, 0));
    ctx.emit(insn::lsrv64(m, m, k));
    ctx.emit(insn::and64_reg(f, f, m));

    // Field flags: Z from the masked field, N from its top bit.
    let t = ctx.alloc_tmp();
    ctx.emit(insn::movw_immed_u16(k, 32));
    ctx.emit(insn::sub_reg(k, k, wm, Shift::Lsl, 0));
    ctx.emit(insn::lslv(t, f, k));
    ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, 0));
    if op != BfOp::Ins {
        bf_flags(ctx);
    }

    match op {
        BfOp::Tst => {}
        BfOp::Extu => {
            let out = ctx.map_write(reg2);
            ctx.emit(insn::mov_reg(out, f));
            ctx.mark_dirty(reg2);
        }
        BfOp::Exts => {
            let out = ctx.map_write(reg2);
            // Sign-extend the w-bit field: top-align then shift back.
            ctx.emit(insn::lslv(out, f, k));
            ctx.emit(insn::asrv(out, out, k));
            ctx.mark_dirty(reg2);
        }
        BfOp::Ffo => {
            let out = ctx.map_write(reg2);
            // Top-aligned field with ones forced below it.
            ctx.emit(insn::lslv(t, f, k));
            let ones = ctx.alloc_tmp();
            ctx.emit(insn::movn_immed_u16(ones, 0, 0));
            ctx.emit(insn::lsrv(ones, ones, wm));
            ctx.emit(insn::orr_reg(t, t, ones, Shift::Lsl, 0));
            ctx.emit(insn::clz(out, t));
            ctx.emit(insn::add_reg(out, out, or, Shift::Lsl, 0));
            ctx.mark_dirty(reg2);
            ctx.free(ones);
        }
        BfOp::Chg | BfOp::Clr | BfOp::Set | BfOp::Ins => {
            // Positioned mask.
            ctx.emit(insn::lslv64(m, m, p));
            match op {
                BfOp::Chg => {
                    ctx.emit(insn::eor64_reg(v, v, m));
                }
                BfOp::Clr => {
                    ctx.emit(insn::bic64_reg(v, v, m));
                }
                BfOp::Set => {
                    ctx.emit(insn::orr64_reg(v, v, m, Shift::Lsl, 0));
                }
                BfOp::Ins => {
                    let src = ctx.map_read(reg2);
                    let s = ctx.alloc_tmp();
                    ctx.emit(insn::lslv64(s, src, p));
                    ctx.emit(insn::bic64_reg(v, v, m));
                    ctx.emit(insn::and64_reg(s, s, m));
                    ctx.emit(insn::orr64_reg(v, v, s, Shift::Lsl, 0));
                    // Inserted-value flags.
                    ctx.emit(insn::lslv(t, src, k));
                    ctx.emit(insn::cmn_reg(ZR, t, Shift::Lsl, 0));
                    bf_flags(ctx);
                    ctx.free(s);
                }
                _ => unreachable!(),
            }
            if let Some(base) = store_addr {
                ctx.emit(insn::str64_offset(base, v, 0));
            }
        }
    }
    ctx.free(p);
    ctx.free(f);
    ctx.free(m);
    ctx.free(k);
    ctx.free(t);
}
