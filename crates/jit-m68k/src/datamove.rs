//! Data movement: MOVE, MOVEA, MOVEQ and MOVEP.
//!
//! MOVE consumes the source EA's extension words before the
//! destination's, matching the instruction stream order. Flags come
//! from the moved value (N, Z set; V, C cleared); MOVEA sign-extends a
//! word source and never touches flags.

use asm_aarch64::insn::{self, Shift};

use crate::ccr::{SR_N, SR_Z};
use crate::ctx::{Ctx, Size};
use crate::dispatch::emit_illegal;

/// MOVE/MOVEA, lines 1-3. The line number carries the size.
pub(crate) fn emit_move(ctx: &mut Ctx, opcode: u16) -> u32 {
    let size = match opcode >> 12 {
        1 => Size::Byte,
        2 => Size::Long,
        3 => Size::Word,
        _ => return emit_illegal(ctx, opcode),
    };
    let src_ea = (opcode & 0x3F) as u8;
    let dst_mode = ((opcode >> 6) & 7) as u8;
    let dst_reg = ((opcode >> 9) & 7) as u8;
    let dst_ea = (dst_mode << 3) | dst_reg;

    if dst_mode == 1 {
        // MOVEA: sign-extend word sources, whole register, no flags.
        if size == Size::Byte {
            return emit_illegal(ctx, opcode);
        }
        let v = ctx.ea_load(size, src_ea, size == Size::Word, true);
        ctx.ea_store(Size::Long, dst_ea, v);
        ctx.free(v);
    } else {
        let v = ctx.ea_load(size, src_ea, false, true);
        let um = ctx.update_mask;
        if um != 0 {
            ctx.test_nz(v, size);
            ctx.commit_nz_clear_vc(um);
        }
        ctx.ea_store(size, dst_ea, v);
        ctx.free(v);
    }
    ctx.advance_pc_over_insn();
    1
}

/// MOVEQ: sign-extended 8-bit immediate, flags known at translate time.
pub(crate) fn emit_moveq(ctx: &mut Ctx, opcode: u16) -> u32 {
    let dn = ((opcode >> 9) & 7) as u8;
    let value = opcode as u8 as i8 as i32 as u32;
    let dst = ctx.map_write(dn);
    ctx.load_const(dst, value);
    ctx.mark_dirty(dn);

    let um = ctx.update_mask;
    if um != 0 {
        let mut set = 0;
        if value == 0 {
            set |= SR_Z;
        }
        if value & 0x8000_0000 != 0 {
            set |= SR_N;
        }
        ctx.flags_clear(um & !set);
        ctx.flags_set(um & set);
    }
    ctx.advance_pc_over_insn();
    1
}

/// MOVEP: alternate-byte transfers between a data register and
/// (d16,An), big-endian byte order, no flags.
pub(crate) fn emit_movep(ctx: &mut Ctx, opcode: u16) -> u32 {
    let dx = ((opcode >> 9) & 7) as u8;
    let ay = (opcode & 7) as u8;
    let opmode = (opcode >> 6) & 7;
    let long = opmode & 1 != 0;
    let to_mem = opmode & 2 != 0;
    let disp = ctx.fetch_ext16() as i16;

    let base = ctx.map_read(ay + 8);
    let a = ctx.alloc_tmp();
    ctx.emit_add_base_disp(a, base, i32::from(disp));

    if to_mem {
        let src = ctx.map_read(dx);
        let t = ctx.alloc_tmp();
        let lanes: &[u8] = if long { &[24, 16, 8, 0] } else { &[8, 0] };
        for (i, &sh) in lanes.iter().enumerate() {
            if sh == 0 {
                ctx.emit(insn::strb_offset(a, src, (i * 2) as u16));
            } else {
                ctx.emit(insn::lsr(t, src, sh));
                ctx.emit(insn::strb_offset(a, t, (i * 2) as u16));
            }
        }
        ctx.free(t);
    } else {
        let r = ctx.alloc_tmp();
        let t = ctx.alloc_tmp();
        let count = if long { 4 } else { 2 };
        ctx.emit(insn::ldrb_offset(a, r, 0));
        for i in 1..count {
            ctx.emit(insn::ldrb_offset(a, t, (i * 2) as u16));
            ctx.emit(insn::orr_reg(r, t, r, Shift::Lsl, 8));
        }
        let dst = ctx.map_read(dx);
        if long {
            ctx.emit(insn::mov_reg(dst, r));
        } else {
            ctx.emit(insn::bfxil(dst, r, 0, 16));
        }
        ctx.mark_dirty(dx);
        ctx.free(r);
        ctx.free(t);
    }
    ctx.free(a);
    ctx.advance_pc_over_insn();
    1
}
