//! Immediate arithmetic and logic: ORI, ANDI, EORI, ADDI, SUBI, CMPI.
//!
//! Bitmask-encodable immediates use the host's logical-immediate forms
//! and small add/sub immediates use the 12-bit forms; everything else
//! materializes the constant into a temporary. Byte and word flag
//! updates run on the shifted 32-bit value so host NZCV matches the
//! narrow width (the shared ALU path), and the narrow field is inserted
//! back with a bitfield move.
//!
//! The `#imm,CCR` and `#imm,SR` encodings are routed to the supervisor
//! module by the dispatch tables, not here.

use asm_aarch64::insn::{self, Shift, ZR};

use crate::alu::AluOp;
use crate::ctx::{Ctx, Size};
use crate::dispatch::emit_illegal;

pub(crate) fn emit_ori(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_immediate_alu(ctx, opcode, AluOp::Or)
}

pub(crate) fn emit_andi(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_immediate_alu(ctx, opcode, AluOp::And)
}

pub(crate) fn emit_eori(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_immediate_alu(ctx, opcode, AluOp::Eor)
}

pub(crate) fn emit_addi(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_immediate_alu(ctx, opcode, AluOp::Add)
}

pub(crate) fn emit_subi(ctx: &mut Ctx, opcode: u16) -> u32 {
    emit_immediate_alu(ctx, opcode, AluOp::Sub)
}

fn fetch_immediate(ctx: &mut Ctx, size: Size) -> u32 {
    match size {
        Size::Byte => u32::from(ctx.fetch_ext16() & 0xFF),
        Size::Word => u32::from(ctx.fetch_ext16()),
        Size::Long => ctx.fetch_ext32(),
    }
}

fn emit_immediate_alu(ctx: &mut Ctx, opcode: u16, op: AluOp) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let ea = (opcode & 0x3F) as u8;
    let imm = fetch_immediate(ctx, size);
    let latch_x = matches!(op, AluOp::Add | AluOp::Sub);

    if ea >> 3 == 0 {
        let dn = ea & 7;
        let dst = ctx.map_read(dn);
        if !emit_encoded_immediate(ctx, op, size, dst, imm) {
            let t = ctx.alloc_tmp();
            ctx.load_const(t, imm);
            ctx.alu_into(op, size, dst, t, latch_x);
            ctx.free(t);
        }
        ctx.mark_dirty(dn);
    } else {
        let t = ctx.alloc_tmp();
        ctx.load_const(t, imm);
        ctx.ea_rmw(size, ea, |c, val| {
            c.alu_into(op, size, val, t, latch_x);
        });
        ctx.free(t);
    }
    ctx.advance_pc_over_insn();
    1
}

/// Use an immediate-operand host instruction when the constant encodes.
/// Only the 32-bit forms are worth it; narrow sizes need the shifted
/// flag domain anyway. Returns false when the caller must materialize.
fn emit_encoded_immediate(ctx: &mut Ctx, op: AluOp, size: Size, dst: u8, imm: u32) -> bool {
    if size != Size::Long {
        return false;
    }
    let um = ctx.update_mask;
    match op {
        AluOp::Add | AluOp::Sub if imm < 4096 => {
            let word = match (op, um != 0) {
                (AluOp::Add, true) => insn::adds_immed(dst, dst, imm as u16),
                (AluOp::Add, false) => insn::add_immed(dst, dst, imm as u16),
                (AluOp::Sub, true) => insn::subs_immed(dst, dst, imm as u16),
                (_, false) => insn::sub_immed(dst, dst, imm as u16),
                _ => unreachable!(),
            };
            ctx.emit(word);
            ctx.commit_nzcvx(um, op.sense());
            true
        }
        AluOp::And | AluOp::Or | AluOp::Eor => {
            let Some((width, ror)) = insn::bitmask_immediate(imm) else {
                return false;
            };
            let word = match (op, um != 0) {
                (AluOp::And, true) => insn::ands_immed(dst, dst, width, ror),
                (AluOp::And, false) => insn::and_immed(dst, dst, width, ror),
                (AluOp::Or, _) => insn::orr_immed(dst, dst, width, ror),
                (AluOp::Eor, _) => insn::eor_immed(dst, dst, width, ror),
                _ => unreachable!(),
            };
            ctx.emit(word);
            if um != 0 {
                if !matches!(op, AluOp::And) {
                    ctx.emit(insn::cmn_reg(ZR, dst, Shift::Lsl, 0));
                }
                ctx.commit_nz_clear_vc(um);
            }
            true
        }
        _ => false,
    }
}

pub(crate) fn emit_cmpi(ctx: &mut Ctx, opcode: u16) -> u32 {
    let Some(size) = Size::from_bits(((opcode >> 6) & 3) as u8) else {
        return emit_illegal(ctx, opcode);
    };
    let ea = (opcode & 0x3F) as u8;
    let imm = fetch_immediate(ctx, size);
    let dst = ctx.ea_load(size, ea, false, true);
    if size == Size::Long && imm < 4096 && ctx.update_mask != 0 {
        ctx.emit(insn::cmp_immed(dst, imm as u16));
        ctx.commit_nzcv(ctx.update_mask, crate::ccr::CarrySense::Sub);
    } else {
        let t = ctx.alloc_tmp();
        ctx.load_const(t, imm);
        ctx.alu_cmp(size, dst, t);
        ctx.free(t);
    }
    ctx.free(dst);
    ctx.advance_pc_over_insn();
    1
}
