//! Line 5: ADDQ, SUBQ, Scc, DBcc and TRAPcc.
//!
//! DBcc keeps the translated unit open on the loop-exit side: both the
//! condition-true case and counter exhaustion skip forward to the next
//! instruction, while the taken branch leaves through a chainable exit
//! stub. Dirty registers are flushed before the conditional skips so
//! every runtime path sees the same committed state; the counter
//! decrement after that point is written through to `GuestState`
//! directly.

use asm_aarch64::insn::{self, ZR};
use asm_aarch64::Cond;

use crate::alu::AluOp;
use crate::ccr::M68kCond;
use crate::ctx::{Ctx, Size, REG_CTX};
use crate::dispatch::emit_illegal;
use crate::exceptions::{Frame, VEC_TRAPCC};
use crate::state::reg_offset;

pub(crate) fn emit_addq(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_addq_subq(ctx, opcode, AluOp::Add)
}

pub(crate) fn emit_subq(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_addq_subq(ctx, opcode, AluOp::Sub)
}

fn emit_addq_subq(ctx: &mut Ctx, opcode: u16, op: AluOp) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let mut data = ((opcode >> 9) & 7) as u16;
    if data == 0 {
        data = 8;
    }
    let ea = (opcode & 0x3F) as u8;
    let mode = ea >> 3;

    if mode == 1 {
        // Address-register destination: whole register, no flags.
        let an = (ea & 7) + 8;
        let dst = ctx.map_read(an);
        let word = match op {
            AluOp::Add => insn::add_immed(dst, dst, data),
            _ => insn::sub_immed(dst, dst, data),
        };
        ctx.emit(word);
        ctx.mark_dirty(an);
    } else if mode == 0 {
        let dn = ea & 7;
        let dst = ctx.map_read(dn);
        if size == Size::Long {
            let um = ctx.update_mask;
            let word = match (op, um != 0) {
                (AluOp::Add, true) => insn::adds_immed(dst, dst, data),
                (AluOp::Add, false) => insn::add_immed(dst, dst, data),
                (AluOp::Sub, true) => insn::subs_immed(dst, dst, data),
                _ => insn::sub_immed(dst, dst, data),
            };
            ctx.emit(word);
            ctx.commit_nzcvx(um, op.sense());
        } else {
            let t = ctx.alloc_tmp();
            ctx.emit(insn::movw_immed_u16(t, data));
            ctx.alu_into(op, size, dst, t, true);
            ctx.free(t);
        }
        ctx.mark_dirty(dn);
    } else {
        let t = ctx.alloc_tmp();
        ctx.emit(insn::movw_immed_u16(t, data));
        ctx.ea_rmw(size, ea, |c, val| {
            c.alu_into(op, size, val, t, true);
        });
        ctx.free(t);
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_scc(ctx: &mut Ctx, opcode: u16) -> u32 {
    let cond = M68kCond::from_bits(((opcode >> 8) & 0xF) as u8);
    let ea = (opcode & 0x3F) as u8;

    match cond {
        M68kCond::True | M68kCond::False => {
            let wanted = cond == M68kCond::True;
            if ea >> 3 == 0 {
                let dst = ctx.map_read(ea & 7);
                let word = if wanted {
                    insn::orr_immed(dst, dst, 8, 0)
                } else {
                    insn::bic_immed(dst, dst, 8, 0)
                };
                ctx.emit(word);
                ctx.mark_dirty(ea & 7);
            } else {
                let t = ctx.alloc_tmp();
                if wanted {
                    ctx.emit(insn::movn_immed_u16(t, 0, 0));
                } else {
                    ctx.emit(insn::mov_reg(t, ZR));
                }
                ctx.ea_store(Size::Byte, ea, t);
                ctx.free(t);
            }
        }
        _ => {
            let host = ctx.eval_cond(cond);
            let t = ctx.alloc_tmp();
            ctx.emit(insn::csetm(t, host));
            ctx.ea_store(Size::Byte, ea, t);
            ctx.free(t);
        }
    }
    ctx.advance_pc_over_insn();
    1
}

pub(crate) fn emit_dbcc(ctx: &mut Ctx, opcode: u16) -> u32 {
    let cond = M68kCond::from_bits(((opcode >> 8) & 0xF) as u8);
    let dn = (opcode & 7) as u8;
    let insn_addr = ctx.guest_pc.wrapping_sub(2);
    let disp_base = ctx.ext_word_addr();
    let disp = ctx.fetch_ext16() as i16;
    let target = disp_base.wrapping_add(disp as i32 as u32);

    // Legacy busy-wait timing: a DBF spinning on itself can be asked to
    // burn extra host cycles so tight delay loops keep their feel.
    if ctx.cfg.dbf_slowdown && cond == M68kCond::False && target == insn_addr {
        let t = ctx.alloc_tmp();
        ctx.emit(insn::movw_immed_u16(t, 64));
        ctx.emit(insn::subs_immed(t, t, 1));
        ctx.emit(insn::b_cc(Cond::Ne, -1));
        ctx.free(t);
    }

    ctx.advance_pc_over_insn();
    // The counter's fill must happen on every path, before any skip.
    let dst = ctx.map_read(dn);
    ctx.flush_all_dirty();
    ctx.flush_pc();

    // Condition true: the loop is over, skip to the next instruction.
    let skip_cond = if matches!(cond, M68kCond::False) {
        None
    } else {
        let host = ctx.eval_cond(cond);
        Some((ctx.emit(insn::nop()), host))
    };

    // Decrement the low word of Dn, written through so every later path
    // sees committed state.
    let t = ctx.alloc_tmp();
    ctx.emit(insn::uxth(t, dst));
    ctx.emit(insn::sub_immed(t, t, 1));
    ctx.emit(insn::bfxil(dst, t, 0, 16));
    ctx.emit(insn::str_offset(REG_CTX, dst, reg_offset(dn)));
    // Counter ran out at -1.
    ctx.emit(insn::cmn_immed(t, 1));
    let skip_exhaust = ctx.emit(insn::nop());
    ctx.free(t);

    // Loop taken: leave through a chainable stub.
    let site = ctx.emit(insn::nop());
    ctx.defer_bcc(site, Cond::Al, target);

    if let Some((site, host)) = skip_cond {
        ctx.patch_fwd_bcc(site, host);
    }
    ctx.patch_fwd_bcc(skip_exhaust, Cond::Eq);
    1
}

pub(crate) fn emit_trapcc(ctx: &mut Ctx, opcode: u16) -> u32 {
    let cond = M68kCond::from_bits(((opcode >> 8) & 0xF) as u8);
    let insn_addr = ctx.guest_pc.wrapping_sub(2);
    // Optional operand words exist only to be skipped.
    match opcode & 7 {
        0b010 => {
            let _ = ctx.fetch_ext16();
        }
        0b011 => {
            let _ = ctx.fetch_ext32();
        }
        _ => {}
    }
    ctx.advance_pc_over_insn();

    match cond {
        M68kCond::False => {}
        M68kCond::True => {
            ctx.flush_all_dirty();
            ctx.flush_pc();
            ctx.emit_exception(VEC_TRAPCC, Frame::WithAddress(insn_addr));
            // The trap is unconditional; nothing after it is reachable.
            ctx.block_done = true;
        }
        _ => {
            ctx.flush_all_dirty();
            ctx.flush_pc();
            let host = ctx.eval_cond(cond);
            let site = ctx.emit(insn::nop());
            ctx.emit_exception(VEC_TRAPCC, Frame::WithAddress(insn_addr));
            ctx.patch_fwd_bcc(site, host.invert());
        }
    }
    1
}
