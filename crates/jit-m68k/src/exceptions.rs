//! Guest exception injection.
//!
//! A guest-visible exception is emitted as a sequence that switches to
//! the supervisor stack if needed, pushes a stack frame (format 0 or 2),
//! fetches the handler address through VBR and exits the unit. The whole
//! sequence runs on the reserved scratch registers with every guest
//! register already flushed, so it is safe both as an unconditional tail
//! (illegal instruction) and as a conditionally skipped side path
//! (divide by zero, CHK, TRAPcc).

use asm_aarch64::insn;

use crate::ccr::{SRB_S, SRB_T0};
use crate::ctx::{Ctx, REG_CC, REG_CTX, REG_PC, SCRATCH};
use crate::state::{areg_offset, ISP_OFFSET, USP_OFFSET, VBR_OFFSET};

pub(crate) const VEC_ILLEGAL: u8 = 4;
pub(crate) const VEC_DIV_ZERO: u8 = 5;
pub(crate) const VEC_CHK: u8 = 6;
pub(crate) const VEC_TRAPCC: u8 = 7;
pub(crate) const VEC_PRIVILEGE: u8 = 8;
pub(crate) const VEC_LINE_A: u8 = 10;
pub(crate) const VEC_LINE_F: u8 = 11;
pub(crate) const VEC_FORMAT: u8 = 14;
pub(crate) const VEC_TRAP0: u8 = 32;

/// Stack-frame flavor pushed by [`Ctx::emit_exception`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum Frame {
    /// Four-word format 0 frame: SR, PC, format/vector.
    Normal,
    /// Six-word format 2 frame: adds the address of the faulting
    /// instruction.
    WithAddress(u32),
}

impl Ctx<'_> {
    /// Emit an "exception `vector`" sequence.
    ///
    /// The caller must have flushed dirty registers and the PC delta;
    /// the PC register holds the return PC the frame captures. The
    /// sequence ends with an exit to the dispatcher, so control never
    /// falls through it.
    pub(crate) fn emit_exception(&mut self, vector: u8, frame: Frame) {
        let sr = SCRATCH[0];
        let sp = SCRATCH[1];
        let t = SCRATCH[2];
        let frame_bytes: u16 = match frame {
            Frame::Normal => 8,
            Frame::WithAddress(_) => 12,
        };

        // Canonical SR for the frame.
        self.emit_swap_cv(sr, REG_CC);

        // Enter the supervisor stack when coming from user mode.
        self.emit(insn::ldr_offset(REG_CTX, sp, areg_offset(7)));
        self.emit(insn::tbnz(sr, SRB_S, 3));
        self.emit(insn::str_offset(REG_CTX, sp, USP_OFFSET));
        self.emit(insn::ldr_offset(REG_CTX, sp, ISP_OFFSET));

        // Push the frame.
        self.emit(insn::sub_immed(sp, sp, frame_bytes));
        self.emit(insn::str_offset(REG_CTX, sp, areg_offset(7)));
        self.emit(insn::strh_offset(sp, sr, 0));
        self.emit(insn::stur_offset(sp, REG_PC, 2));
        let (format, extra) = match frame {
            Frame::Normal => (0u32, None),
            Frame::WithAddress(addr) => (2, Some(addr)),
        };
        self.load_const(t, (format << 12) | (u32::from(vector) << 2));
        self.emit(insn::strh_offset(sp, t, 6));
        if let Some(addr) = extra {
            self.load_const(t, addr);
            self.emit(insn::stur_offset(sp, t, 8));
        }

        // New SR: supervisor, trace cleared. The mirror keeps its
        // alternate encoding; only the pushed copy is canonical.
        self.emit(insn::orr_immed(REG_CC, REG_CC, 1, (32 - SRB_S) & 31));
        self.emit(insn::bic_immed(REG_CC, REG_CC, 2, (32 - SRB_T0) & 31));

        // Vector through VBR and leave the unit.
        self.emit(insn::ldr_offset(REG_CTX, t, VBR_OFFSET));
        self.emit(insn::ldr_offset(t, REG_PC, u16::from(vector) * 4));
        self.emit_exit();
    }

    /// Emit the standard "privileged instruction" prologue: when the S
    /// bit is clear, raise a privilege violation capturing the current
    /// instruction's PC and leave the unit; otherwise fall through.
    ///
    /// Call before advancing the PC; returns after emitting the
    /// conditional side path.
    pub(crate) fn emit_privilege_check(&mut self) {
        self.flush_all_dirty();
        self.flush_pc();
        let site = self.emit(insn::nop());
        self.emit_exception(VEC_PRIVILEGE, Frame::Normal);
        self.patch_fwd_tbz(site, REG_CC, SRB_S, true);
    }
}
