//! Line 4: single-operand ALU ops, register plumbing, control transfers
//! and MOVEM.
//!
//! EXT.W immediately followed by EXT.L of the same register fuses into
//! one sign-extension covering both (the handler reports two
//! instructions consumed and commits the second instruction's flags).

use asm_aarch64::insn::{self, Reg, Shift, ZR};
use asm_aarch64::Cond;

use crate::arith::extended_neg;
use crate::ccr::{M68kCond, SR_N, SR_Z};
use crate::ctx::{Ctx, Size, REG_CTX};
use crate::dispatch::{self, emit_illegal};
use crate::exceptions::{Frame, VEC_CHK, VEC_TRAP0, VEC_TRAPCC};
use crate::logic::bcd_sub_core;
use crate::state::USP_OFFSET;

pub(crate) fn emit_clr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let ea = (opcode & 0x3F) as u8;
    ctx.ea_store(size, ea, ZR);
    let um = ctx.update_mask;
    ctx.flags_clear(um & !SR_Z);
    ctx.flags_set(um & SR_Z);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_not(ctx: &mut Ctx, opcode: u16) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let ea = (opcode & 0x3F) as u8;
    let um = ctx.update_mask;
    if ea >> 3 == 0 {
        let dst = ctx.map_read(ea & 7);
        if size == Size::Long {
            ctx.emit(insn::mvn_reg(dst, dst));
            if um != 0 {
                ctx.test_nz(dst, size);
                ctx.commit_nz_clear_vc(um);
            }
        } else {
            let t = ctx.alloc_tmp();
            ctx.emit(insn::mvn_reg(t, dst));
            ctx.emit(insn::bfxil(dst, t, 0, size.bits()));
            if um != 0 {
                ctx.test_nz(t, size);
                ctx.commit_nz_clear_vc(um);
            }
            ctx.free(t);
        }
        ctx.mark_dirty(ea & 7);
    } else {
        ctx.ea_rmw(size, ea, |c, val| {
            c.emit(insn::mvn_reg(val, val));
            if um != 0 {
                c.test_nz(val, size);
                c.commit_nz_clear_vc(um);
            }
        });
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_neg(ctx: &mut Ctx, opcode: u16) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let ea = (opcode & 0x3F) as u8;
    if ea >> 3 == 0 {
        let dst = ctx.map_read(ea & 7);
        neg_val(ctx, size, dst);
        ctx.mark_dirty(ea & 7);
    } else {
        ctx.ea_rmw(size, ea, |c, val| neg_val(c, size, val));
    }
    ctx.advance_pc_over_insn();
    1
}

fn neg_val(ctx: &mut Ctx, size: Size, dst: Reg) {
    let um = ctx.update_mask;
    if size == Size::Long {
        if um != 0 {
            ctx.emit(insn::subs_reg(dst, ZR, dst, Shift::Lsl, 0));
        } else {
            ctx.emit(insn::sub_reg(dst, ZR, dst, Shift::Lsl, 0));
        }
        ctx.commit_nzcvx(um, crate::ccr::CarrySense::Sub);
    } else {
        let sh = size.top_shift();
        let t = ctx.alloc_tmp();
        if um != 0 {
            ctx.emit(insn::subs_reg(t, ZR, dst, Shift::Lsl, sh));
        } else {
            ctx.emit(insn::sub_reg(t, ZR, dst, Shift::Lsl, sh));
        }
        ctx.emit(insn::bfxil(dst, t, sh, size.bits()));
        ctx.commit_nzcvx(um, crate::ccr::CarrySense::Sub);
        ctx.free(t);
    }
}

pub(crate) fn emit_negx(ctx: &mut Ctx, opcode: u16) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let ea = (opcode & 0x3F) as u8;
    if ea >> 3 == 0 {
        let dst = ctx.map_read(ea & 7);
        extended_neg(ctx, size, dst);
        ctx.mark_dirty(ea & 7);
    } else {
        ctx.ea_rmw(size, ea, |c, val| extended_neg(c, size, val));
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_tst(ctx: &mut Ctx, opcode: u16) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let ea = (opcode & 0x3F) as u8;
    let v = ctx.ea_load(size, ea, false, true);
    let um = ctx.update_mask;
    if um != 0 {
        ctx.test_nz(v, size);
        ctx.commit_nz_clear_vc(um);
    }
    ctx.free(v);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_tas(ctx: &mut Ctx, opcode: u16) -> u32 {
    let ea = (opcode & 0x3F) as u8;
    let um = ctx.update_mask;
    if ea >> 3 == 0 {
        let dst = ctx.map_read(ea & 7);
        if um != 0 {
            ctx.test_nz(dst, Size::Byte);
            ctx.commit_nz_clear_vc(um);
        }
        ctx.emit(insn::orr_immed(dst, dst, 1, 25));
        ctx.mark_dirty(ea & 7);
    } else {
        let (addr, owned) = ctx.ea_addr_with_update(Size::Byte, ea);
        let v = ctx.alloc_tmp();
        let t = ctx.alloc_tmp();
        let s = ctx.alloc_tmp();
        // Exclusive read-or-set loop; the loaded value feeds the flags.
        ctx.emit(insn::ldxrb(addr, v));
        ctx.emit(insn::orr_immed(t, v, 1, 25));
        ctx.emit(insn::stxrb(s, addr, t));
        ctx.emit(insn::cbnz(s, -3));
        if um != 0 {
            ctx.test_nz(v, Size::Byte);
            ctx.commit_nz_clear_vc(um);
        }
        ctx.free(v);
        ctx.free(t);
        ctx.free(s);
        if owned {
            ctx.free(addr);
        }
    }
    ctx.advance_pc_over_insn();
    1
}

/// EXT.W, EXT.L and EXTB.L, with the EXT.W+EXT.L pair fused into one
/// sign-extension.
pub(crate) fn emit_ext(ctx: &mut Ctx, opcode: u16) -> u32 {
    let dn = (opcode & 7) as u8;
    let opmode = (opcode >> 6) & 7;
    let dst = ctx.map_read(dn);
    let um = ctx.update_mask;
    let mut consumed = 1;

    match opmode {
        0b010 => {
            let ext_l = 0x48C0 | u16::from(dn);
            if ctx.peek_next_opcode() == ext_l {
                // EXT.W then EXT.L of the same register: one sxtb covers
                // both, flags follow the second instruction.
                let next_addr = ctx.guest_pc.wrapping_add(2 * u32::from(ctx.ext_words));
                let next_op = ctx.peek_next_opcode();
                ctx.update_mask = dispatch::sr_update_mask(ctx.icache, next_addr, next_op);
                ctx.emit(insn::sxtb(dst, dst));
                let um2 = ctx.update_mask;
                if um2 != 0 {
                    ctx.test_nz(dst, Size::Long);
                    ctx.commit_nz_clear_vc(um2);
                }
                ctx.advance_pc(4);
                ctx.guest_pc = ctx.guest_pc.wrapping_add(2);
                consumed = 2;
            } else {
                let t = ctx.alloc_tmp();
                ctx.emit(insn::sxtb(t, dst));
                ctx.emit(insn::bfxil(dst, t, 0, 16));
                if um != 0 {
                    ctx.test_nz(t, Size::Word);
                    ctx.commit_nz_clear_vc(um);
                }
                ctx.free(t);
                ctx.advance_pc_over_insn();
            }
        }
        0b011 => {
            ctx.emit(insn::sxth(dst, dst));
            if um != 0 {
                ctx.test_nz(dst, Size::Long);
                ctx.commit_nz_clear_vc(um);
            }
            ctx.advance_pc_over_insn();
        }
        0b111 => {
            ctx.emit(insn::sxtb(dst, dst));
            if um != 0 {
                ctx.test_nz(dst, Size::Long);
                ctx.commit_nz_clear_vc(um);
            }
            ctx.advance_pc_over_insn();
        }
        _ => return emit_illegal(ctx, opcode),
    }
    ctx.mark_dirty(dn);
    consumed
}

pub(crate) fn emit_swap(ctx: &mut Ctx, opcode: u16) -> u32 {
    let dn = (opcode & 7) as u8;
    let dst = ctx.map_read(dn);
    ctx.emit(insn::ror_immed(dst, dst, 16));
    ctx.mark_dirty(dn);
    let um = ctx.update_mask;
    if um != 0 {
        ctx.test_nz(dst, Size::Long);
        ctx.commit_nz_clear_vc(um);
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_nbcd(ctx: &mut Ctx, opcode: u16) -> u32 {
    let ea = (opcode & 0x3F) as u8;
    if ea >> 3 == 0 {
        let dst = ctx.map_read(ea & 7);
        bcd_sub_core(ctx, dst, None, dst);
        ctx.mark_dirty(ea & 7);
    } else {
        ctx.ea_rmw(Size::Byte, ea, |c, val| bcd_sub_core(c, val, None, val));
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_lea(ctx: &mut Ctx, opcode: u16) -> u32 {
    let an = ((opcode >> 9) & 7) as u8 + 8;
    let addr = ctx.ea_addr((opcode & 0x3F) as u8);
    let dst = ctx.map_write(an);
    ctx.emit(insn::mov_reg(dst, addr));
    ctx.mark_dirty(an);
    ctx.free(addr);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_pea(ctx: &mut Ctx, opcode: u16) -> u32 {
    let addr = ctx.ea_addr((opcode & 0x3F) as u8);
    let a7 = ctx.map_read(15);
    ctx.emit(insn::str_offset_preindex(a7, addr, -4));
    ctx.mark_dirty(15);
    ctx.free(addr);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_link(ctx: &mut Ctx, opcode: u16) -> u32 {
    let an = (opcode & 7) as u8 + 8;
    let disp = if opcode & 0xFFF8 == 0x4808 {
        ctx.fetch_ext32() as i32
    } else {
        i32::from(ctx.fetch_ext16() as i16)
    };
    let a7 = ctx.map_read(15);
    let rn = ctx.map_read(an);
    ctx.emit(insn::str_offset_preindex(a7, rn, -4));
    ctx.emit(insn::mov_reg(rn, a7));
    ctx.emit_add_base_disp(a7, a7, disp);
    ctx.mark_dirty(15);
    ctx.mark_dirty(an);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_unlk(ctx: &mut Ctx, opcode: u16) -> u32 {
    let an = (opcode & 7) as u8 + 8;
    let a7 = ctx.map_read(15);
    let rn = ctx.map_read(an);
    ctx.emit(insn::mov_reg(a7, rn));
    ctx.emit(insn::ldr_offset_postindex(a7, rn, 4));
    ctx.mark_dirty(15);
    ctx.mark_dirty(an);
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_trap(ctx: &mut Ctx, opcode: u16) -> u32 {
    let vector = VEC_TRAP0 + (opcode & 0xF) as u8;
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();
    ctx.emit_exception(vector, Frame::Normal);
    ctx.block_done = true;
    1
}

pub(crate) fn emit_trapv(ctx: &mut Ctx, opcode: u16) -> u32 {
    let insn_addr = ctx.guest_pc.wrapping_sub(2);
    let _ = opcode;
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();
    let host = ctx.eval_cond(M68kCond::Vs);
    let site = ctx.emit(insn::nop());
    ctx.emit_exception(VEC_TRAPCC, Frame::WithAddress(insn_addr));
    ctx.patch_fwd_bcc(site, host.invert());
    1
}

pub(crate) fn emit_chk(ctx: &mut Ctx, opcode: u16) -> u32 {
    let size = if opcode & 0x80 != 0 { Size::Word } else { Size::Long };
    let dn = ((opcode >> 9) & 7) as u8;
    let insn_addr = ctx.guest_pc.wrapping_sub(2);
    let bound = ctx.ea_load(size, (opcode & 0x3F) as u8, true, false);
    let v = ctx.ea_load(size, dn & 7, true, false);
    ctx.advance_pc_over_insn();
    ctx.flush_all_dirty();
    ctx.flush_pc();

    // Below zero traps with N set.
    ctx.emit(insn::cmp_immed(v, 0));
    let ok_low = ctx.emit(insn::nop());
    ctx.flags_set(SR_N);
    ctx.emit_exception(VEC_CHK, Frame::WithAddress(insn_addr));
    ctx.patch_fwd_bcc(ok_low, Cond::Ge);

    // Above the bound traps with N clear.
    ctx.emit(insn::cmp_reg(v, bound, Shift::Lsl, 0));
    let ok_high = ctx.emit(insn::nop());
    ctx.flags_clear(SR_N);
    ctx.emit_exception(VEC_CHK, Frame::WithAddress(insn_addr));
    ctx.patch_fwd_bcc(ok_high, Cond::Le);

    ctx.free(bound);
    ctx.free(v);
    1
}

/// Constant-target control modes can chain like a branch.
fn jump_target_const(ctx: &mut Ctx, ea: u8) -> Option<u32> {
    match ea >> 3 {
        7 => match ea & 7 {
            0 => Some(ctx.fetch_ext16() as i16 as i32 as u32),
            1 => Some(ctx.fetch_ext32()),
            2 => {
                let base = ctx.ext_word_addr();
                let disp = ctx.fetch_ext16() as i16;
                Some(base.wrapping_add(disp as i32 as u32))
            }
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn emit_jmp(ctx: &mut Ctx, opcode: u16) -> u32 {
    let ea = (opcode & 0x3F) as u8;
    if let Some(target) = jump_target_const(ctx, ea) {
        ctx.advance_pc_over_insn();
        ctx.flush_all_dirty();
        ctx.flush_pc();
        let site = ctx.emit(insn::nop());
        ctx.defer_bcc(site, Cond::Al, target);
        ctx.block_done = true;
    } else {
        let addr = ctx.ea_addr(ea);
        ctx.flush_all_dirty();
        ctx.set_pc_reg(addr);
        ctx.free(addr);
        ctx.end_block_with_exit();
    }
    1
}

pub(crate) fn emit_jsr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let ea = (opcode & 0x3F) as u8;
    let const_target = jump_target_const(ctx, ea);
    let dyn_addr = if const_target.is_none() {
        Some(ctx.ea_addr(ea))
    } else {
        None
    };
    let ret_addr = ctx.guest_pc.wrapping_add(2 * u32::from(ctx.ext_words));
    ctx.advance_pc_over_insn();

    let t = ctx.alloc_tmp();
    ctx.load_const(t, ret_addr);
    let a7 = ctx.map_read(15);
    ctx.emit(insn::str_offset_preindex(a7, t, -4));
    ctx.mark_dirty(15);
    ctx.free(t);

    match (const_target, dyn_addr) {
        (Some(target), _) => {
            if ctx.cfg.inline_returns && ctx.return_stack.push(ret_addr) {
                ctx.advance_pc(target.wrapping_sub(ret_addr) as i32);
                ctx.guest_pc = target;
            } else {
                ctx.flush_all_dirty();
                ctx.flush_pc();
                let site = ctx.emit(insn::nop());
                ctx.defer_bcc(site, Cond::Al, target);
                ctx.block_done = true;
            }
        }
        (None, Some(addr)) => {
            ctx.flush_all_dirty();
            ctx.set_pc_reg(addr);
            ctx.free(addr);
            ctx.end_block_with_exit();
        }
        (None, None) => unreachable!(),
    }
    1
}

pub(crate) fn emit_rts(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    ctx.advance_pc_over_insn();
    let a7 = ctx.map_read(15);
    let t = ctx.alloc_tmp();
    ctx.emit(insn::ldr_offset_postindex(a7, t, 4));
    ctx.mark_dirty(15);

    if let Some(expected) = ctx.return_stack.pop() {
        // Inlined call: check the popped address against the inline
        // expectation, exit if the program returned somewhere else.
        ctx.flush_all_dirty();
        ctx.set_pc_reg(t);
        let e = ctx.alloc_tmp();
        ctx.load_const(e, expected);
        ctx.emit(insn::cmp_reg(t, e, Shift::Lsl, 0));
        ctx.free(e);
        let site = ctx.emit(insn::nop());
        let at = ctx.cursor();
        ctx.emit_exit();
        ctx.fixups.push(crate::block::Fixup {
            at,
            kind: crate::block::FixupKind::LocalExit,
        });
        ctx.patch_fwd_bcc(site, Cond::Eq);
        ctx.free(t);
        ctx.guest_pc = expected;
        ctx.pc_offset = 0;
    } else {
        ctx.flush_all_dirty();
        ctx.set_pc_reg(t);
        ctx.free(t);
        ctx.end_block_with_exit();
    }
    1
}

pub(crate) fn emit_rtd(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    let disp = i32::from(ctx.fetch_ext16() as i16);
    ctx.advance_pc_over_insn();
    let a7 = ctx.map_read(15);
    let t = ctx.alloc_tmp();
    ctx.emit(insn::ldr_offset_postindex(a7, t, 4));
    ctx.emit_add_base_disp(a7, a7, disp);
    ctx.mark_dirty(15);
    ctx.flush_all_dirty();
    ctx.set_pc_reg(t);
    ctx.free(t);
    ctx.end_block_with_exit();
    1
}

pub(crate) fn emit_rtr(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    ctx.advance_pc_over_insn();
    let a7 = ctx.map_read(15);
    let t = ctx.alloc_tmp();
    let t2 = ctx.alloc_tmp();
    // CCR word first, canonical order on the stack.
    ctx.emit(insn::ldrh_offset_postindex(a7, t, 2));
    ctx.emit_swap_cv(t2, t);
    let cc = ctx.modify_cc();
    ctx.emit(insn::bfi(cc, t2, 0, 8));
    ctx.emit(insn::ldr_offset_postindex(a7, t, 4));
    ctx.mark_dirty(15);
    ctx.flush_all_dirty();
    ctx.set_pc_reg(t);
    ctx.free(t);
    ctx.free(t2);
    ctx.end_block_with_exit();
    1
}

pub(crate) fn emit_move_usp(ctx: &mut Ctx, opcode: u16) -> u32 {
    ctx.emit_privilege_check();
    let an = (opcode & 7) as u8 + 8;
    if opcode & 8 == 0 {
        // MOVE An,USP
        let rn = ctx.map_read(an);
        ctx.emit(insn::str_offset(REG_CTX, rn, USP_OFFSET));
    } else {
        let rn = ctx.map_write(an);
        ctx.emit(insn::ldr_offset(REG_CTX, rn, USP_OFFSET));
        ctx.mark_dirty(an);
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_nop(ctx: &mut Ctx, opcode: u16) -> u32 {
    let _ = opcode;
    ctx.advance_pc_over_insn();
    1
}

/// MOVEM: the register list rides in an extension word; predecrement
/// interprets it in reverse and adjusts An once. Adjacent long
/// registers pair into LDP/STP.
pub(crate) fn emit_movem(ctx: &mut Ctx, opcode: u16) -> u32 {
    let to_regs = opcode & 0x0400 != 0;
    let size = if opcode & 0x40 != 0 { Size::Long } else { Size::Word };
    let ea = (opcode & 0x3F) as u8;
    let mode = ea >> 3;
    let reg = ea & 7;
    let mask = ctx.fetch_ext16();
    let step = size.bytes() as i32;

    // Registers in ascending D0..A7 order; predecrement stores them at
    // descending addresses, which is the same layout when counted from
    // the final stack pointer.
    let list: Vec<u8> = if mode == 4 {
        (0..16u8).filter(|i| mask & (0x8000 >> i) != 0).collect()
    } else {
        (0..16u8).filter(|i| mask & (1 << i) != 0).collect()
    };
    let total = list.len() as i32 * step;

    let base = match mode {
        3 | 4 => {
            let an = ctx.map_read(reg + 8);
            let b = ctx.alloc_tmp();
            if mode == 4 {
                ctx.emit_add_base_disp(b, an, -total);
            } else {
                ctx.emit(insn::mov_reg(b, an));
            }
            b
        }
        _ => ctx.ea_addr(ea),
    };

    let mut i = 0;
    let mut off = 0i32;
    while i < list.len() {
        let gr = list[i];
        if to_regs {
            let pairable = size == Size::Long
                && i + 1 < list.len()
                && off >= -256
                && off < 252;
            if pairable {
                let r1 = ctx.map_write(gr);
                let r2 = ctx.map_write(list[i + 1]);
                ctx.emit(insn::ldp_offset(base, r1, r2, off as i16));
                ctx.mark_dirty(gr);
                ctx.mark_dirty(list[i + 1]);
                i += 2;
                off += 2 * step;
                continue;
            }
            if size == Size::Long {
                let r = ctx.map_write(gr);
                ctx.emit_load_base_disp(Size::Long, false, base, r, off);
                ctx.mark_dirty(gr);
            } else {
                let r = ctx.map_write(gr);
                ctx.emit_load_base_disp(Size::Word, true, base, r, off);
                ctx.mark_dirty(gr);
            }
        } else {
            let pairable = size == Size::Long
                && i + 1 < list.len()
                && off >= -256
                && off < 252;
            if pairable {
                let r1 = ctx.map_read(gr);
                let r2 = ctx.map_read(list[i + 1]);
                ctx.emit(insn::stp_offset(base, r1, r2, off as i16));
                i += 2;
                off += 2 * step;
                continue;
            }
            let r = ctx.map_read(gr);
            ctx.emit_store_base_disp(size, base, r, off);
        }
        i += 1;
        off += step;
    }

    // One total adjustment of An for the incrementing/decrementing
    // forms, computed from the entry value held in `base` so a load
    // over An cannot disturb it; the architectural final value wins.
    if mode == 3 || mode == 4 {
        let an = ctx.map_read(reg + 8);
        if mode == 3 {
            ctx.emit_add_base_disp(an, base, total);
        } else {
            ctx.emit(insn::mov_reg(an, base));
        }
        ctx.mark_dirty(reg + 8);
    }
    ctx.free(base);
    ctx.advance_pc_over_insn();
    1
}
