//! Shared ALU emission patterns.
//!
//! Byte and word operations that need flags run on the value shifted to
//! the top of the host register, so host NZCV reflects the narrow width
//! directly; the narrow field is then inserted back with a bitfield move.
//! When the lookahead mask wants only Z or only N, the cheap unshifted
//! form plus a single bit test is used instead — the shifted form stays
//! the authoritative general path.

use asm_aarch64::insn::{self, Reg, Shift, ZR};
use asm_aarch64::Cond;

use crate::ccr::{CarrySense, SR_N, SR_X, SR_Z};
use crate::ctx::{Ctx, Size};

/// Two-operand ALU operations sharing one emission shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Eor,
}

impl AluOp {
    pub(crate) const fn sense(self) -> CarrySense {
        match self {
            AluOp::Sub => CarrySense::Sub,
            _ => CarrySense::Add,
        }
    }

    const fn is_logic(self) -> bool {
        matches!(self, AluOp::And | AluOp::Or | AluOp::Eor)
    }
}

impl Ctx<'_> {
    /// `dst op= src` on the low `size` bits of a host register `dst`
    /// whose upper bits must be preserved, committing flags per the
    /// current update mask. `src` is read-only.
    ///
    /// `latch_x` selects the X-latching commit used by the add/sub
    /// group; logic ops never latch X.
    pub(crate) fn alu_into(&mut self, op: AluOp, size: Size, dst: Reg, src: Reg, latch_x: bool) {
        let um = self.update_mask;
        let shift = size.top_shift();

        if um == 0 || um == SR_Z || um == SR_N {
            // Cheap path: unshifted op, then a single bit test when one
            // flag is wanted.
            let t = if size == Size::Long { dst } else { self.alloc_tmp() };
            let word = match op {
                AluOp::Add => insn::add_reg(t, dst, src, Shift::Lsl, 0),
                AluOp::Sub => insn::sub_reg(t, dst, src, Shift::Lsl, 0),
                AluOp::And => insn::and_reg(t, dst, src, Shift::Lsl, 0),
                AluOp::Or => insn::orr_reg(t, dst, src, Shift::Lsl, 0),
                AluOp::Eor => insn::eor_reg(t, dst, src, Shift::Lsl, 0),
            };
            self.emit(word);
            if size != Size::Long {
                self.emit(insn::bfxil(dst, t, 0, size.bits()));
            }
            if um == SR_Z {
                self.emit(insn::tst_immed(t, size.bits(), 0));
                self.flags_conditional(SR_Z, Cond::Eq);
            } else if um == SR_N {
                self.emit(insn::tst_immed(t, 1, (32 - (size.bits() - 1)) & 31));
                self.flags_conditional(SR_N, Cond::Ne);
            }
            if size != Size::Long {
                self.free(t);
            }
            return;
        }

        match size {
            Size::Long => {
                let word = match op {
                    AluOp::Add => insn::adds_reg(dst, dst, src, Shift::Lsl, 0),
                    AluOp::Sub => insn::subs_reg(dst, dst, src, Shift::Lsl, 0),
                    AluOp::And => insn::ands_reg(dst, dst, src, Shift::Lsl, 0),
                    AluOp::Or => insn::orr_reg(dst, dst, src, Shift::Lsl, 0),
                    AluOp::Eor => insn::eor_reg(dst, dst, src, Shift::Lsl, 0),
                };
                self.emit(word);
                if matches!(op, AluOp::Or | AluOp::Eor) {
                    self.emit(insn::cmn_reg(ZR, dst, Shift::Lsl, 0));
                }
            }
            Size::Byte | Size::Word => {
                let t = self.alloc_tmp();
                match op {
                    AluOp::Add => {
                        self.emit(insn::lsl(t, src, shift));
                        self.emit(insn::adds_reg(t, t, dst, Shift::Lsl, shift));
                    }
                    AluOp::Sub => {
                        self.emit(insn::lsl(t, dst, shift));
                        self.emit(insn::subs_reg(t, t, src, Shift::Lsl, shift));
                    }
                    AluOp::And => {
                        self.emit(insn::lsl(t, src, shift));
                        self.emit(insn::ands_reg(t, t, dst, Shift::Lsl, shift));
                    }
                    AluOp::Or => {
                        self.emit(insn::lsl(t, src, shift));
                        self.emit(insn::orr_reg(t, t, dst, Shift::Lsl, shift));
                        self.emit(insn::cmn_reg(ZR, t, Shift::Lsl, 0));
                    }
                    AluOp::Eor => {
                        self.emit(insn::lsl(t, src, shift));
                        self.emit(insn::eor_reg(t, t, dst, Shift::Lsl, shift));
                        self.emit(insn::cmn_reg(ZR, t, Shift::Lsl, 0));
                    }
                }
                self.emit(insn::bfxil(dst, t, shift, size.bits()));
                self.free(t);
            }
        }

        if op.is_logic() {
            self.commit_nz_clear_vc(um);
        } else if latch_x && um & SR_X != 0 {
            self.commit_nzcvx(um, op.sense());
        } else {
            self.commit_nzcv(um, op.sense());
        }
    }

    /// Compare `dst - src` at the given width, flags only.
    pub(crate) fn alu_cmp(&mut self, size: Size, dst: Reg, src: Reg) {
        let um = self.update_mask;
        if um == 0 {
            return;
        }
        match size {
            Size::Long => {
                self.emit(insn::cmp_reg(dst, src, Shift::Lsl, 0));
            }
            Size::Byte | Size::Word => {
                let shift = size.top_shift();
                let t = self.alloc_tmp();
                self.emit(insn::lsl(t, dst, shift));
                self.emit(insn::subs_reg(ZR, t, src, Shift::Lsl, shift));
                self.free(t);
            }
        }
        self.commit_nzcv(um, CarrySense::Sub);
    }
}
