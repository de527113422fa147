//! Guest condition-code engine.
//!
//! Guest flags are {X, N, Z, V, C}. The SR mirror register keeps the low
//! byte in an *alternate* encoding whose bit order matches the host NZCV
//! nibble: bit 3 = N, bit 2 = Z, bit 1 = C, bit 0 = V. With that layout,
//! committing flags after a host data-processing instruction is a plain
//! `mrs` + `bfxil` of the NZCV nibble into the mirror, with no bit
//! reordering. The canonical 68k order (bit 1 = V, bit 0 = C) differs
//! only in the low two bits; a 1-bit reverse of those converts between
//! the forms, and is emitted only where the guest observes the CCR
//! directly (MOVE from SR/CCR, RTE, exception frames).
//!
//! Masks that *identify* flags (metadata tables, update masks) always use
//! the canonical bit numbering; only mirror accesses use the alternate
//! positions.
//!
//! For subtract-like operations the guest carry is the inverse of the
//! host carry. Committed flags honor that by either choosing the opposite
//! host condition when materializing one bit, or by an `eor` on the
//! committed nibble.

use asm_aarch64::insn::{self, Reg, ZR};
use asm_aarch64::Cond;

use crate::ctx::{Ctx, Size, REG_CC};

// Flag identity masks, canonical 68k bit positions.
pub const SR_C: u8 = 0x01;
pub const SR_V: u8 = 0x02;
pub const SR_Z: u8 = 0x04;
pub const SR_N: u8 = 0x08;
pub const SR_X: u8 = 0x10;
pub const SR_NZVC: u8 = SR_N | SR_Z | SR_V | SR_C;
pub const SR_CCR: u8 = 0x1F;

// Mirror bit positions (alternate encoding).
pub(crate) const CCB_VALT: u8 = 0;
pub(crate) const CCB_CALT: u8 = 1;
pub(crate) const CCB_Z: u8 = 2;
pub(crate) const CCB_N: u8 = 3;
pub(crate) const CCB_X: u8 = 4;

// Whole-SR bit positions shared by both encodings.
pub(crate) const SRB_IPL: u8 = 8;
pub(crate) const SRB_M: u8 = 12;
pub(crate) const SRB_S: u8 = 13;
pub(crate) const SRB_T0: u8 = 14;

/// Whether the last flag-producing host op was add-like (guest C = host C)
/// or subtract-like (guest C = NOT host C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CarrySense {
    #[default]
    Add,
    Sub,
}

/// Which guest flags currently live where, tracked across one unit.
#[derive(Debug, Default)]
pub(crate) struct CcState {
    /// Flags authoritative in host NZCV, not yet in the mirror.
    pub host_live: u8,
    /// Flags whose mirror copy is stale.
    pub stale: u8,
    /// Width of the last flag-producing operation.
    pub producer_size: Option<Size>,
    pub sense: CarrySense,
}

/// Identity mask translated to alternate mirror bit positions.
pub(crate) const fn mirror_mask(mask: u8) -> u8 {
    let mut out = mask & !(SR_C | SR_V);
    if mask & SR_C != 0 {
        out |= 1 << CCB_CALT;
    }
    if mask & SR_V != 0 {
        out |= 1 << CCB_VALT;
    }
    out
}

/// Convert a CCR byte between canonical and alternate encodings (the
/// transform is its own inverse: it swaps the low two bits).
#[must_use]
pub const fn swap_cv(ccr: u8) -> u8 {
    (ccr & !3) | ((ccr & 1) << 1) | ((ccr >> 1) & 1)
}

/// Host condition that tests one guest flag being *set*, given the carry
/// sense of the producing operation.
pub(crate) const fn flag_cond(flag: u8, sense: CarrySense) -> Cond {
    match flag {
        SR_N => Cond::Mi,
        SR_Z => Cond::Eq,
        SR_V => Cond::Vs,
        SR_C => match sense {
            CarrySense::Add => Cond::Cs,
            CarrySense::Sub => Cond::Cc,
        },
        _ => panic!("flag_cond wants a single NZVC flag"),
    }
}

impl Ctx<'_> {
    /// The SR mirror register, for handlers that poke it directly.
    pub(crate) fn modify_cc(&mut self) -> Reg {
        REG_CC
    }

    /// Clear guest flags in the mirror.
    pub(crate) fn flags_clear(&mut self, mask: u8) {
        if mask == 0 {
            return;
        }
        let m = mirror_mask(mask);
        for (lsb, width) in bit_runs(m) {
            self.emit(insn::bic_immed(REG_CC, REG_CC, width, (32 - lsb) & 31));
        }
        self.cc.stale &= !mask;
        self.cc.host_live &= !mask;
    }

    /// Set guest flags in the mirror.
    pub(crate) fn flags_set(&mut self, mask: u8) {
        if mask == 0 {
            return;
        }
        let m = mirror_mask(mask);
        for (lsb, width) in bit_runs(m) {
            self.emit(insn::orr_immed(REG_CC, REG_CC, width, (32 - lsb) & 31));
        }
        self.cc.stale &= !mask;
        self.cc.host_live &= !mask;
    }

    /// Set the masked flags in the mirror when `cond` holds, clear them
    /// otherwise.
    pub(crate) fn flags_conditional(&mut self, mask: u8, cond: Cond) {
        if mask == 0 {
            return;
        }
        let m = mirror_mask(mask);
        if m.count_ones() == 1 {
            let bit = m.trailing_zeros() as u8;
            let t = self.alloc_tmp();
            self.emit(insn::cset(t, cond));
            self.emit(insn::bfi(REG_CC, t, bit, 1));
            self.free(t);
        } else {
            let t = self.alloc_tmp();
            for (lsb, width) in bit_runs(m) {
                self.emit(insn::bic_immed(REG_CC, REG_CC, width, (32 - lsb) & 31));
            }
            let mut src = REG_CC;
            for (lsb, width) in bit_runs(m) {
                self.emit(insn::orr_immed(t, src, width, (32 - lsb) & 31));
                src = t;
            }
            self.emit(insn::csel(REG_CC, t, REG_CC, cond));
            self.free(t);
        }
        self.cc.stale &= !mask;
        self.cc.host_live &= !mask;
    }

    /// Clear the masked flags in the mirror when `cond` holds, leave
    /// them otherwise. The clear-only Z semantics of the extended
    /// arithmetic group (ADDX, SUBX, NEGX, ABCD, SBCD, NBCD) live here.
    pub(crate) fn flags_clear_conditional(&mut self, mask: u8, cond: Cond) {
        if mask == 0 {
            return;
        }
        let m = mirror_mask(mask);
        let t = self.alloc_tmp();
        self.emit(insn::mov_reg(t, REG_CC));
        for (lsb, width) in bit_runs(m) {
            self.emit(insn::bic_immed(t, t, width, (32 - lsb) & 31));
        }
        self.emit(insn::csel(REG_CC, t, REG_CC, cond));
        self.free(t);
        self.cc.stale &= !mask;
        self.cc.host_live &= !mask;
    }

    /// Record that a flag-producing host op just ran.
    pub(crate) fn cc_produced(&mut self, mask: u8, size: Size, sense: CarrySense) {
        self.cc.host_live = mask;
        self.cc.stale |= mask;
        self.cc.producer_size = Some(size);
        self.cc.sense = sense;
    }

    /// Ensure the listed guest flags read correctly from the mirror.
    /// With the eager commit discipline every handler materializes its
    /// update mask before returning, so this only needs to catch a
    /// handler that deferred.
    pub(crate) fn need_flags(&mut self, mask: u8) {
        let pending = self.cc.host_live & mask;
        debug_assert_eq!(
            pending, 0,
            "flags {pending:#x} still live in host NZCV at a consumer \
             (producer was {:?}, {:?})",
            self.cc.producer_size, self.cc.sense
        );
        self.cc.stale &= !mask;
    }

    /// Commit N and Z from host flags and clear V and C. The producing
    /// op must leave host C = V = 0 (`ands`, or `cmn wzr, value`).
    pub(crate) fn commit_nz_clear_vc(&mut self, mask: u8) {
        if mask == 0 {
            return;
        }
        if mask == SR_Z {
            self.flags_conditional(SR_Z, Cond::Eq);
        } else if mask == SR_N {
            self.flags_conditional(SR_N, Cond::Mi);
        } else {
            let t = self.alloc_tmp();
            self.emit(insn::mrs_nzcv(t));
            self.emit(insn::bfxil(REG_CC, t, 28, 4));
            self.free(t);
        }
        self.cc.host_live = 0;
        self.cc.stale &= !(mask | SR_NZVC);
    }

    /// Commit all of N, Z, V, C from host flags, honoring the carry
    /// sense of the producing op.
    pub(crate) fn commit_nzcv(&mut self, mask: u8, sense: CarrySense) {
        if mask == 0 {
            return;
        }
        if mask.count_ones() == 1 && mask & SR_NZVC != 0 {
            self.flags_conditional(mask, flag_cond(mask, sense));
        } else {
            let t = self.alloc_tmp();
            self.emit(insn::mrs_nzcv(t));
            self.emit(insn::bfxil(REG_CC, t, 28, 4));
            if sense == CarrySense::Sub {
                self.emit(insn::eor_immed(REG_CC, REG_CC, 1, (32 - CCB_CALT) & 31));
            }
            self.free(t);
        }
        self.cc.host_live = 0;
        self.cc.stale &= !(mask | SR_NZVC);
    }

    /// Commit N, Z, V, C and latch X from the carry.
    pub(crate) fn commit_nzcvx(&mut self, mask: u8, sense: CarrySense) {
        self.commit_nzcv(mask & !SR_X, sense);
        if mask & SR_X != 0 {
            // Latch X straight from the host carry; the commit above does
            // not disturb NZCV.
            let t = self.alloc_tmp();
            self.emit(insn::cset(t, flag_cond(SR_C, sense)));
            self.emit(insn::bfi(REG_CC, t, CCB_X, 1));
            self.free(t);
            self.cc.stale &= !SR_X;
        }
    }

    /// Emit `cmn wzr, value << shift` so host N and Z reflect the low
    /// `size` bits of `value`, with host C = V = 0.
    pub(crate) fn test_nz(&mut self, value: Reg, size: Size) {
        self.emit(insn::cmn_reg(ZR, value, insn::Shift::Lsl, size.top_shift()));
        self.cc_produced(SR_N | SR_Z, size, CarrySense::Add);
    }

    /// Copy the mirror to `dst` with the low two bits rotated back to the
    /// canonical 68k order (the transform is symmetric, so the same
    /// sequence converts canonical input to the alternate form). Used at
    /// every boundary where the guest observes the CCR (MOVE from
    /// SR/CCR, exception frames, RTE input). `dst` must differ from
    /// `src`.
    pub(crate) fn emit_swap_cv(&mut self, dst: Reg, src: Reg) {
        debug_assert_ne!(dst, src);
        // dst = 0b11 when the low two bits differ, else 0; xor swaps them.
        self.emit(insn::eor_reg(dst, src, src, insn::Shift::Lsr, 1));
        self.emit(insn::and_immed(dst, dst, 1, 0));
        self.emit(insn::orr_reg(dst, dst, dst, insn::Shift::Lsl, 1));
        self.emit(insn::eor_reg(dst, dst, src, insn::Shift::Lsl, 0));
    }

    /// Set host C from the guest X flag, for extended arithmetic.
    /// Clobbers host N, Z and V.
    pub(crate) fn host_carry_from_x(&mut self) {
        let t = self.alloc_tmp();
        self.emit(insn::ubfx(t, REG_CC, CCB_X, 1));
        self.emit(insn::subs_immed(ZR, t, 1));
        self.free(t);
    }

    /// Set host C to NOT X, the borrow convention `sbcs` wants.
    /// Clobbers host N, Z and V.
    pub(crate) fn host_carry_from_not_x(&mut self) {
        let t = self.alloc_tmp();
        self.emit(insn::ubfx(t, REG_CC, CCB_X, 1));
        self.emit(insn::subs_reg(ZR, ZR, t, insn::Shift::Lsl, 0));
        self.free(t);
    }
}

/// Decompose a byte mask into (lsb, width) runs of consecutive ones.
fn bit_runs(mask: u8) -> Vec<(u8, u8)> {
    let mut runs = Vec::new();
    let mut m = u32::from(mask);
    while m != 0 {
        let lsb = m.trailing_zeros() as u8;
        let width = (m >> lsb).trailing_ones() as u8;
        runs.push((lsb, width));
        m &= !(((1 << width) - 1) << lsb);
    }
    runs
}

/// 68k condition codes (Bcc/Scc/DBcc/TRAPcc condition field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum M68kCond {
    True = 0,
    False = 1,
    Hi = 2,
    Ls = 3,
    Cc = 4,
    Cs = 5,
    Ne = 6,
    Eq = 7,
    Vc = 8,
    Vs = 9,
    Pl = 10,
    Mi = 11,
    Ge = 12,
    Lt = 13,
    Gt = 14,
    Le = 15,
}

impl M68kCond {
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0xF {
            0 => M68kCond::True,
            1 => M68kCond::False,
            2 => M68kCond::Hi,
            3 => M68kCond::Ls,
            4 => M68kCond::Cc,
            5 => M68kCond::Cs,
            6 => M68kCond::Ne,
            7 => M68kCond::Eq,
            8 => M68kCond::Vc,
            9 => M68kCond::Vs,
            10 => M68kCond::Pl,
            11 => M68kCond::Mi,
            12 => M68kCond::Ge,
            13 => M68kCond::Lt,
            14 => M68kCond::Gt,
            _ => M68kCond::Le,
        }
    }

    /// Guest flags this condition reads.
    #[must_use]
    pub const fn flags_needed(self) -> u8 {
        match self {
            M68kCond::True | M68kCond::False => 0,
            M68kCond::Eq | M68kCond::Ne => SR_Z,
            M68kCond::Mi | M68kCond::Pl => SR_N,
            M68kCond::Vc | M68kCond::Vs => SR_V,
            M68kCond::Cc | M68kCond::Cs => SR_C,
            M68kCond::Hi | M68kCond::Ls => SR_Z | SR_C,
            M68kCond::Ge | M68kCond::Lt => SR_N | SR_V,
            M68kCond::Gt | M68kCond::Le => SR_N | SR_Z | SR_V,
        }
    }
}

impl Ctx<'_> {
    /// Evaluate a guest condition from the mirror into the host flags and
    /// return the host condition that is true when the guest condition
    /// holds. Must not be used for True/False.
    ///
    /// The mirror's alternate layout keeps N,Z,C,V in bits 3..0, which is
    /// exactly the NZCV nibble, so loading the shifted mirror into NZCV
    /// makes almost every guest condition a native host conditional. The
    /// exception is the carry: the guest C is a borrow for compare-like
    /// producers while the host C is a not-borrow, and the host HI/LS
    /// conditions bake in the host polarity. Conditions that read C
    /// therefore load an inverted carry and use the matching host
    /// condition (guest CC tests as host CS, and HI/LS line up again).
    pub(crate) fn eval_cond(&mut self, cond: M68kCond) -> Cond {
        self.need_flags(cond.flags_needed());
        debug_assert!(!matches!(cond, M68kCond::True | M68kCond::False));
        let reads_c = cond.flags_needed() & SR_C != 0;
        let t = self.alloc_tmp();
        self.emit(insn::and_immed(t, REG_CC, 4, 0));
        if reads_c {
            self.emit(insn::eor_immed(t, t, 1, (32 - CCB_CALT) & 31));
        }
        self.emit(insn::lsl(t, t, 28));
        self.emit(insn::msr_nzcv(t));
        self.free(t);
        match cond {
            M68kCond::Hi => Cond::Hi,
            M68kCond::Ls => Cond::Ls,
            M68kCond::Cc => Cond::Cs,
            M68kCond::Cs => Cond::Cc,
            M68kCond::Ne => Cond::Ne,
            M68kCond::Eq => Cond::Eq,
            M68kCond::Vc => Cond::Vc,
            M68kCond::Vs => Cond::Vs,
            M68kCond::Pl => Cond::Pl,
            M68kCond::Mi => Cond::Mi,
            M68kCond::Ge => Cond::Ge,
            M68kCond::Lt => Cond::Lt,
            M68kCond::Gt => Cond::Gt,
            M68kCond::Le => Cond::Le,
            M68kCond::True | M68kCond::False => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_cv_swaps_only_low_two_bits() {
        assert_eq!(swap_cv(0b00001), 0b00010);
        assert_eq!(swap_cv(0b00010), 0b00001);
        assert_eq!(swap_cv(0b00011), 0b00011);
        assert_eq!(swap_cv(0b11100), 0b11100);
        for v in 0..=0x1F_u8 {
            assert_eq!(swap_cv(swap_cv(v)), v);
        }
    }

    #[test]
    fn mirror_mask_moves_c_and_v() {
        assert_eq!(mirror_mask(SR_C), 1 << CCB_CALT);
        assert_eq!(mirror_mask(SR_V), 1 << CCB_VALT);
        assert_eq!(mirror_mask(SR_NZVC), 0b1111);
        assert_eq!(mirror_mask(SR_CCR), 0b11111);
        assert_eq!(mirror_mask(SR_X | SR_Z), (1 << CCB_X) | (1 << CCB_Z));
        assert_eq!(mirror_mask(SR_N), 1 << CCB_N);
    }

    #[test]
    fn bit_runs_decomposition() {
        assert_eq!(bit_runs(0b1111), vec![(0, 4)]);
        assert_eq!(bit_runs(0b10010), vec![(1, 1), (4, 1)]);
        assert_eq!(bit_runs(0b11100), vec![(2, 3)]);
        assert_eq!(bit_runs(0), Vec::<(u8, u8)>::new());
    }

    #[test]
    fn cond_flag_requirements_match_the_architecture() {
        assert_eq!(M68kCond::Eq.flags_needed(), SR_Z);
        assert_eq!(M68kCond::Hi.flags_needed(), SR_Z | SR_C);
        assert_eq!(M68kCond::Ge.flags_needed(), SR_N | SR_V);
        assert_eq!(M68kCond::Gt.flags_needed(), SR_N | SR_Z | SR_V);
        assert_eq!(M68kCond::True.flags_needed(), 0);
    }

    #[test]
    fn subtract_carry_uses_the_inverted_host_condition() {
        assert_eq!(flag_cond(SR_C, CarrySense::Add), Cond::Cs);
        assert_eq!(flag_cond(SR_C, CarrySense::Sub), Cond::Cc);
    }
}
