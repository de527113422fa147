//! AArch64 instruction-word constructors.
//!
//! Naming follows the assembler mnemonics with operand order
//! `(rd, rn, rm, ...)`. Load/store constructors take `(rn, rt, offset)` —
//! base register first — because the translator reads them as
//! "through rn, move rt".
//!
//! Field ranges are checked with debug assertions; encoders never mask an
//! out-of-range operand into silence in debug builds.

use crate::cond::Cond;

/// General-purpose register index, 0..=30. 31 encodes WZR/XZR in data
/// processing and is never a valid allocatable register.
pub type Reg = u8;

/// WZR/XZR as a data-processing operand.
pub const ZR: Reg = 31;

/// Shift type for shifted-register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Shift {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

const fn r(reg: Reg) -> u32 {
    assert!(reg <= 31, "register index out of range");
    reg as u32
}

// === Move wide ===

/// MOVZ Wd, #imm16, LSL #(hw*16)
#[must_use]
pub const fn mov_immed_u16(rd: Reg, imm: u16, hw: u8) -> u32 {
    assert!(hw < 2, "32-bit movz shift is 0 or 16");
    0x5280_0000 | (hw as u32) << 21 | (imm as u32) << 5 | r(rd)
}

/// MOVZ Wd, #imm16 (no shift).
#[must_use]
pub const fn movw_immed_u16(rd: Reg, imm: u16) -> u32 {
    mov_immed_u16(rd, imm, 0)
}

/// MOVK Wd, #imm16, LSL #16 — patches the high half, keeps the low.
#[must_use]
pub const fn movt_immed_u16(rd: Reg, imm: u16) -> u32 {
    0x72A0_0000 | (imm as u32) << 5 | r(rd)
}

/// MOVK Wd, #imm16, LSL #(hw*16)
#[must_use]
pub const fn movk_immed_u16(rd: Reg, imm: u16, hw: u8) -> u32 {
    assert!(hw < 2, "32-bit movk shift is 0 or 16");
    0x7280_0000 | (hw as u32) << 21 | (imm as u32) << 5 | r(rd)
}

/// MOVN Wd, #imm16, LSL #(hw*16) — loads the bitwise NOT.
#[must_use]
pub const fn movn_immed_u16(rd: Reg, imm: u16, hw: u8) -> u32 {
    assert!(hw < 2, "32-bit movn shift is 0 or 16");
    0x1280_0000 | (hw as u32) << 21 | (imm as u32) << 5 | r(rd)
}

/// MOVN Xd, #imm16 — 64-bit bitwise-NOT load (`movn64(rd, 0)` is -1).
#[must_use]
pub const fn movn64_immed_u16(rd: Reg, imm: u16) -> u32 {
    0x9280_0000 | (imm as u32) << 5 | r(rd)
}

// === Add / subtract ===

const fn addsub_reg(base: u32, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    assert!(amount < 32, "shift amount out of range");
    base | (shift as u32) << 22 | r(rm) << 16 | (amount as u32) << 10 | r(rn) << 5 | r(rd)
}

/// ADD Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn add_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    addsub_reg(0x0B00_0000, rd, rn, rm, shift, amount)
}

/// ADDS Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn adds_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    addsub_reg(0x2B00_0000, rd, rn, rm, shift, amount)
}

/// SUB Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn sub_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    addsub_reg(0x4B00_0000, rd, rn, rm, shift, amount)
}

/// SUBS Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn subs_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    addsub_reg(0x6B00_0000, rd, rn, rm, shift, amount)
}

/// ADD Xd, Xn, Xm
#[must_use]
pub const fn add64_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    addsub_reg(0x8B00_0000, rd, rn, rm, Shift::Lsl, 0)
}

/// SUB Xd, Xn, Xm
#[must_use]
pub const fn sub64_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    addsub_reg(0xCB00_0000, rd, rn, rm, Shift::Lsl, 0)
}

/// SUBS Xd, Xn, Xm
#[must_use]
pub const fn subs64_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    addsub_reg(0xEB00_0000, rd, rn, rm, Shift::Lsl, 0)
}

/// CMP Xn, Xm
#[must_use]
pub const fn cmp64_reg(rn: Reg, rm: Reg) -> u32 {
    subs64_reg(ZR, rn, rm)
}

const fn addsub_immed(base: u32, rd: Reg, rn: Reg, imm12: u16) -> u32 {
    assert!(imm12 < 4096, "add/sub immediate out of range");
    base | (imm12 as u32) << 10 | r(rn) << 5 | r(rd)
}

/// ADD Wd, Wn, #imm12
#[must_use]
pub const fn add_immed(rd: Reg, rn: Reg, imm12: u16) -> u32 {
    addsub_immed(0x1100_0000, rd, rn, imm12)
}

/// ADDS Wd, Wn, #imm12
#[must_use]
pub const fn adds_immed(rd: Reg, rn: Reg, imm12: u16) -> u32 {
    addsub_immed(0x3100_0000, rd, rn, imm12)
}

/// SUB Wd, Wn, #imm12
#[must_use]
pub const fn sub_immed(rd: Reg, rn: Reg, imm12: u16) -> u32 {
    addsub_immed(0x5100_0000, rd, rn, imm12)
}

/// SUBS Wd, Wn, #imm12
#[must_use]
pub const fn subs_immed(rd: Reg, rn: Reg, imm12: u16) -> u32 {
    addsub_immed(0x7100_0000, rd, rn, imm12)
}

/// ADD Xd, Xn, #imm12
#[must_use]
pub const fn add64_immed(rd: Reg, rn: Reg, imm12: u16) -> u32 {
    addsub_immed(0x9100_0000, rd, rn, imm12)
}

/// SUB Xd, Xn, #imm12
#[must_use]
pub const fn sub64_immed(rd: Reg, rn: Reg, imm12: u16) -> u32 {
    addsub_immed(0xD100_0000, rd, rn, imm12)
}

/// CMP Wn, Wm (SUBS WZR, ...)
#[must_use]
pub const fn cmp_reg(rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    subs_reg(ZR, rn, rm, shift, amount)
}

/// CMN Wn, Wm (ADDS WZR, ...)
#[must_use]
pub const fn cmn_reg(rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    adds_reg(ZR, rn, rm, shift, amount)
}

/// CMP Wn, #imm12
#[must_use]
pub const fn cmp_immed(rn: Reg, imm12: u16) -> u32 {
    subs_immed(ZR, rn, imm12)
}

/// CMN Wn, #imm12
#[must_use]
pub const fn cmn_immed(rn: Reg, imm12: u16) -> u32 {
    adds_immed(ZR, rn, imm12)
}

// === Add / subtract with carry ===

const fn addsub_carry(base: u32, rd: Reg, rn: Reg, rm: Reg) -> u32 {
    base | r(rm) << 16 | r(rn) << 5 | r(rd)
}

/// ADC Wd, Wn, Wm
#[must_use]
pub const fn adc_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    addsub_carry(0x1A00_0000, rd, rn, rm)
}

/// ADCS Wd, Wn, Wm
#[must_use]
pub const fn adcs_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    addsub_carry(0x3A00_0000, rd, rn, rm)
}

/// SBC Wd, Wn, Wm
#[must_use]
pub const fn sbc_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    addsub_carry(0x5A00_0000, rd, rn, rm)
}

/// SBCS Wd, Wn, Wm
#[must_use]
pub const fn sbcs_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    addsub_carry(0x7A00_0000, rd, rn, rm)
}

// === Logical (shifted register) ===

const fn logical_reg(base: u32, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    assert!(amount < 32, "shift amount out of range");
    base | (shift as u32) << 22 | r(rm) << 16 | (amount as u32) << 10 | r(rn) << 5 | r(rd)
}

/// AND Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn and_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    logical_reg(0x0A00_0000, rd, rn, rm, shift, amount)
}

/// ANDS Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn ands_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    logical_reg(0x6A00_0000, rd, rn, rm, shift, amount)
}

/// ORR Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn orr_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    logical_reg(0x2A00_0000, rd, rn, rm, shift, amount)
}

/// EOR Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn eor_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    logical_reg(0x4A00_0000, rd, rn, rm, shift, amount)
}

/// AND Xd, Xn, Xm
#[must_use]
pub const fn and64_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    logical_reg(0x8A00_0000, rd, rn, rm, Shift::Lsl, 0)
}

/// EOR Xd, Xn, Xm
#[must_use]
pub const fn eor64_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    logical_reg(0xCA00_0000, rd, rn, rm, Shift::Lsl, 0)
}

/// BIC Xd, Xn, Xm
#[must_use]
pub const fn bic64_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    logical_reg(0x8A20_0000, rd, rn, rm, Shift::Lsl, 0)
}

/// ANDS Xd, Xn, Xm
#[must_use]
pub const fn ands64_reg(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    logical_reg(0xEA00_0000, rd, rn, rm, Shift::Lsl, 0)
}

/// TST Xn, Xm
#[must_use]
pub const fn tst64_reg(rn: Reg, rm: Reg) -> u32 {
    ands64_reg(ZR, rn, rm)
}

/// BIC Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn bic_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    logical_reg(0x0A20_0000, rd, rn, rm, shift, amount)
}

/// ORN Wd, Wn, Wm, shift #amount
#[must_use]
pub const fn orn_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    logical_reg(0x2A20_0000, rd, rn, rm, shift, amount)
}

/// MVN Wd, Wm (ORN Wd, WZR, Wm)
#[must_use]
pub const fn mvn_reg(rd: Reg, rm: Reg) -> u32 {
    orn_reg(rd, ZR, rm, Shift::Lsl, 0)
}

/// MOV Wd, Wm (ORR Wd, WZR, Wm)
#[must_use]
pub const fn mov_reg(rd: Reg, rm: Reg) -> u32 {
    orr_reg(rd, ZR, rm, Shift::Lsl, 0)
}

/// MOV Xd, Xm
#[must_use]
pub const fn mov64_reg(rd: Reg, rm: Reg) -> u32 {
    logical_reg(0xAA00_0000, rd, ZR, rm, Shift::Lsl, 0)
}

/// ORR Xd, Xn, Xm, shift #amount
#[must_use]
pub const fn orr64_reg(rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> u32 {
    assert!(amount < 64, "shift amount out of range");
    0xAA00_0000 | (shift as u32) << 22 | r(rm) << 16 | (amount as u32) << 10 | r(rn) << 5 | r(rd)
}

// === Logical (immediate) ===
//
// The immediate operand is expressed the way the translator thinks about
// it: a run of `width` ones rotated right by `ror` within 32 bits, i.e.
// imms = width-1, immr = ror. `bic_immed` is the same operation with the
// complement mask, which is itself a rotated run.

const fn logical_immed(base: u32, rd: Reg, rn: Reg, width: u8, ror: u8) -> u32 {
    assert!(width >= 1 && width <= 31, "logical immediate width 1..=31");
    assert!(ror < 32, "logical immediate rotation out of range");
    base | (ror as u32) << 16 | ((width - 1) as u32) << 10 | r(rn) << 5 | r(rd)
}

/// AND Wd, Wn, #mask — mask is `width` ones rotated right by `ror`.
#[must_use]
pub const fn and_immed(rd: Reg, rn: Reg, width: u8, ror: u8) -> u32 {
    logical_immed(0x1200_0000, rd, rn, width, ror)
}

/// ANDS Wd, Wn, #mask
#[must_use]
pub const fn ands_immed(rd: Reg, rn: Reg, width: u8, ror: u8) -> u32 {
    logical_immed(0x7200_0000, rd, rn, width, ror)
}

/// ORR Wd, Wn, #mask
#[must_use]
pub const fn orr_immed(rd: Reg, rn: Reg, width: u8, ror: u8) -> u32 {
    logical_immed(0x3200_0000, rd, rn, width, ror)
}

/// EOR Wd, Wn, #mask
#[must_use]
pub const fn eor_immed(rd: Reg, rn: Reg, width: u8, ror: u8) -> u32 {
    logical_immed(0x5200_0000, rd, rn, width, ror)
}

/// TST Wn, #mask (ANDS WZR, ...)
#[must_use]
pub const fn tst_immed(rn: Reg, width: u8, ror: u8) -> u32 {
    ands_immed(ZR, rn, width, ror)
}

/// AND Wd, Wn, #!mask — clears the `width` ones rotated right by `ror`.
///
/// There is no BIC (immediate); the complement of a rotated run of ones
/// is itself a rotated run, so this folds to AND.
#[must_use]
pub const fn bic_immed(rd: Reg, rn: Reg, width: u8, ror: u8) -> u32 {
    and_immed(rd, rn, 32 - width, (32 - width + ror) & 31)
}

/// AND Xd, Xn, #mask — mask is `width` ones rotated right by `ror`
/// within 64 bits.
#[must_use]
pub const fn and64_immed(rd: Reg, rn: Reg, width: u8, ror: u8) -> u32 {
    assert!(width >= 1 && width <= 63, "64-bit logical immediate width 1..=63");
    assert!(ror < 64, "64-bit logical immediate rotation out of range");
    0x9240_0000 | (ror as u32) << 16 | ((width - 1) as u32) << 10 | r(rn) << 5 | r(rd)
}

/// The (width, ror) pair encoding `value` as a logical immediate, if it
/// is a single rotated run of ones (and not 0 or all-ones).
#[must_use]
pub const fn bitmask_immediate(value: u32) -> Option<(u8, u8)> {
    if value == 0 || value == u32::MAX {
        return None;
    }
    // Rotate so the run of ones starts at bit 0: after rotating right by
    // `ror`, the value must be a contiguous low mask.
    let mut ror = 0u32;
    let mut v = value;
    // Spin a 1 into bit 0 with a 0 above it at bit 31 wrapped, i.e. find
    // the start of the run.
    while !(v & 1 == 1 && v & 0x8000_0000 == 0) {
        v = v.rotate_right(1);
        ror += 1;
        if ror == 32 {
            return None;
        }
    }
    // The loop exit guarantees bit 31 is clear, so width <= 31 here.
    let width = v.trailing_ones();
    if v == (1u32 << width) - 1 {
        // Rotating right by `ror` normalized it, so the original value is
        // the low mask rotated LEFT by ror = rotated right by 32-ror.
        Some((width as u8, ((32 - ror) & 31) as u8))
    } else {
        None
    }
}

// === Bitfield ===

const fn bitfield(base: u32, rd: Reg, rn: Reg, immr: u8, imms: u8) -> u32 {
    assert!(immr < 32 && imms < 32, "bitfield immediate out of range");
    base | (immr as u32) << 16 | (imms as u32) << 10 | r(rn) << 5 | r(rd)
}

/// LSL Wd, Wn, #shift
#[must_use]
pub const fn lsl(rd: Reg, rn: Reg, shift: u8) -> u32 {
    assert!(shift < 32, "lsl shift out of range");
    bitfield(0x5300_0000, rd, rn, (32 - shift as u32) as u8 & 31, 31 - shift)
}

/// LSR Wd, Wn, #shift
#[must_use]
pub const fn lsr(rd: Reg, rn: Reg, shift: u8) -> u32 {
    bitfield(0x5300_0000, rd, rn, shift, 31)
}

/// ASR Wd, Wn, #shift
#[must_use]
pub const fn asr(rd: Reg, rn: Reg, shift: u8) -> u32 {
    bitfield(0x1300_0000, rd, rn, shift, 31)
}

/// UBFX Wd, Wn, #lsb, #width
#[must_use]
pub const fn ubfx(rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    bitfield(0x5300_0000, rd, rn, lsb, lsb + width - 1)
}

/// SBFX Wd, Wn, #lsb, #width
#[must_use]
pub const fn sbfx(rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    bitfield(0x1300_0000, rd, rn, lsb, lsb + width - 1)
}

/// BFI Wd, Wn, #lsb, #width — insert low `width` bits of Wn at `lsb`.
#[must_use]
pub const fn bfi(rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    bitfield(0x3300_0000, rd, rn, (32 - lsb as u32) as u8 & 31, width - 1)
}

/// BFXIL Wd, Wn, #lsb, #width — extract `width` bits at `lsb` from Wn
/// into the low bits of Wd, keeping the rest of Wd.
#[must_use]
pub const fn bfxil(rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    bitfield(0x3300_0000, rd, rn, lsb, lsb + width - 1)
}

/// SXTB Wd, Wn
#[must_use]
pub const fn sxtb(rd: Reg, rn: Reg) -> u32 {
    bitfield(0x1300_0000, rd, rn, 0, 7)
}

/// SXTH Wd, Wn
#[must_use]
pub const fn sxth(rd: Reg, rn: Reg) -> u32 {
    bitfield(0x1300_0000, rd, rn, 0, 15)
}

/// UXTB Wd, Wn
#[must_use]
pub const fn uxtb(rd: Reg, rn: Reg) -> u32 {
    bitfield(0x5300_0000, rd, rn, 0, 7)
}

/// UXTH Wd, Wn
#[must_use]
pub const fn uxth(rd: Reg, rn: Reg) -> u32 {
    bitfield(0x5300_0000, rd, rn, 0, 15)
}

/// SXTW Xd, Wn
#[must_use]
pub const fn sxtw64(rd: Reg, rn: Reg) -> u32 {
    0x9340_0000 | 31 << 10 | r(rn) << 5 | r(rd)
}

/// LSL Xd, Xn, #shift
#[must_use]
pub const fn lsl64(rd: Reg, rn: Reg, shift: u8) -> u32 {
    assert!(shift < 64, "lsl64 shift out of range");
    0xD340_0000 | (((64 - shift as u32) & 63) << 16) | ((63 - shift as u32) << 10) | r(rn) << 5 | r(rd)
}

/// LSR Xd, Xn, #shift
#[must_use]
pub const fn lsr64(rd: Reg, rn: Reg, shift: u8) -> u32 {
    assert!(shift < 64, "lsr64 shift out of range");
    0xD340_0000 | (shift as u32) << 16 | 63 << 10 | r(rn) << 5 | r(rd)
}

/// ASR Xd, Xn, #shift
#[must_use]
pub const fn asr64(rd: Reg, rn: Reg, shift: u8) -> u32 {
    assert!(shift < 64, "asr64 shift out of range");
    0x9340_0000 | (shift as u32) << 16 | 63 << 10 | r(rn) << 5 | r(rd)
}

/// UBFX Xd, Xn, #lsb, #width
#[must_use]
pub const fn ubfx64(rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    assert!(lsb < 64 && width >= 1 && lsb + width <= 64, "ubfx64 field out of range");
    0xD340_0000 | (lsb as u32) << 16 | ((lsb + width - 1) as u32) << 10 | r(rn) << 5 | r(rd)
}

/// BFI Xd, Xn, #lsb, #width
#[must_use]
pub const fn bfi64(rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    assert!(lsb < 64 && width >= 1 && lsb + width <= 64, "bfi64 field out of range");
    0xB340_0000 | (((64 - lsb as u32) & 63) << 16) | ((width - 1) as u32) << 10 | r(rn) << 5 | r(rd)
}

// === Extract (rotate by immediate) ===

/// EXTR Wd, Wn, Wm, #lsb
#[must_use]
pub const fn extr(rd: Reg, rn: Reg, rm: Reg, lsb: u8) -> u32 {
    assert!(lsb < 32, "extr lsb out of range");
    0x1380_0000 | r(rm) << 16 | (lsb as u32) << 10 | r(rn) << 5 | r(rd)
}

/// ROR Wd, Wn, #shift
#[must_use]
pub const fn ror_immed(rd: Reg, rn: Reg, shift: u8) -> u32 {
    extr(rd, rn, rn, shift)
}

/// EXTR Xd, Xn, Xm, #lsb
#[must_use]
pub const fn extr64(rd: Reg, rn: Reg, rm: Reg, lsb: u8) -> u32 {
    assert!(lsb < 64, "extr64 lsb out of range");
    0x93C0_0000 | r(rm) << 16 | (lsb as u32) << 10 | r(rn) << 5 | r(rd)
}

// === Variable shifts ===

const fn dp2(base: u32, opcode: u32, rd: Reg, rn: Reg, rm: Reg) -> u32 {
    base | r(rm) << 16 | opcode << 10 | r(rn) << 5 | r(rd)
}

/// LSLV Wd, Wn, Wm
#[must_use]
pub const fn lslv(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x1AC0_0000, 0b00_1000, rd, rn, rm)
}

/// LSRV Wd, Wn, Wm
#[must_use]
pub const fn lsrv(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x1AC0_0000, 0b00_1001, rd, rn, rm)
}

/// ASRV Wd, Wn, Wm
#[must_use]
pub const fn asrv(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x1AC0_0000, 0b00_1010, rd, rn, rm)
}

/// RORV Wd, Wn, Wm
#[must_use]
pub const fn rorv(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x1AC0_0000, 0b00_1011, rd, rn, rm)
}

/// LSLV Xd, Xn, Xm
#[must_use]
pub const fn lslv64(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x9AC0_0000, 0b00_1000, rd, rn, rm)
}

/// LSRV Xd, Xn, Xm
#[must_use]
pub const fn lsrv64(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x9AC0_0000, 0b00_1001, rd, rn, rm)
}

/// ASRV Xd, Xn, Xm
#[must_use]
pub const fn asrv64(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x9AC0_0000, 0b00_1010, rd, rn, rm)
}

/// RORV Xd, Xn, Xm
#[must_use]
pub const fn rorv64(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x9AC0_0000, 0b00_1011, rd, rn, rm)
}

// === Divide, bit counting, byte reverse ===

/// UDIV Wd, Wn, Wm
#[must_use]
pub const fn udiv(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x1AC0_0000, 0b00_0010, rd, rn, rm)
}

/// SDIV Wd, Wn, Wm
#[must_use]
pub const fn sdiv(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x1AC0_0000, 0b00_0011, rd, rn, rm)
}

/// UDIV Xd, Xn, Xm
#[must_use]
pub const fn udiv64(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x9AC0_0000, 0b00_0010, rd, rn, rm)
}

/// SDIV Xd, Xn, Xm
#[must_use]
pub const fn sdiv64(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp2(0x9AC0_0000, 0b00_0011, rd, rn, rm)
}

/// CLZ Wd, Wn
#[must_use]
pub const fn clz(rd: Reg, rn: Reg) -> u32 {
    0x5AC0_1000 | r(rn) << 5 | r(rd)
}

/// CLZ Xd, Xn
#[must_use]
pub const fn clz64(rd: Reg, rn: Reg) -> u32 {
    0xDAC0_1000 | r(rn) << 5 | r(rd)
}

/// RBIT Wd, Wn
#[must_use]
pub const fn rbit(rd: Reg, rn: Reg) -> u32 {
    0x5AC0_0000 | r(rn) << 5 | r(rd)
}

/// REV Wd, Wn — byte-reverse a word.
#[must_use]
pub const fn rev(rd: Reg, rn: Reg) -> u32 {
    0x5AC0_0800 | r(rn) << 5 | r(rd)
}

/// REV16 Wd, Wn — byte-reverse each halfword.
#[must_use]
pub const fn rev16(rd: Reg, rn: Reg) -> u32 {
    0x5AC0_0400 | r(rn) << 5 | r(rd)
}

// === Multiply ===

const fn dp3(base: u32, rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> u32 {
    base | r(rm) << 16 | r(ra) << 10 | r(rn) << 5 | r(rd)
}

/// MUL Wd, Wn, Wm
#[must_use]
pub const fn mul(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp3(0x1B00_0000, rd, rn, rm, ZR)
}

/// MSUB Wd, Wn, Wm, Wa — Wa - Wn*Wm
#[must_use]
pub const fn msub(rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> u32 {
    dp3(0x1B00_8000, rd, rn, rm, ra)
}

/// MSUB Xd, Xn, Xm, Xa
#[must_use]
pub const fn msub64(rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> u32 {
    dp3(0x9B00_8000, rd, rn, rm, ra)
}

/// SMULL Xd, Wn, Wm
#[must_use]
pub const fn smull(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp3(0x9B20_0000, rd, rn, rm, ZR)
}

/// UMULL Xd, Wn, Wm
#[must_use]
pub const fn umull(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp3(0x9BA0_0000, rd, rn, rm, ZR)
}

/// MUL Xd, Xn, Xm
#[must_use]
pub const fn mul64(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp3(0x9B00_0000, rd, rn, rm, ZR)
}

/// SMULH Xd, Xn, Xm
#[must_use]
pub const fn smulh(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp3(0x9B40_0000, rd, rn, rm, ZR)
}

/// UMULH Xd, Xn, Xm
#[must_use]
pub const fn umulh(rd: Reg, rn: Reg, rm: Reg) -> u32 {
    dp3(0x9BC0_0000, rd, rn, rm, ZR)
}

// === Conditional select / set ===

const fn condsel(base: u32, rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> u32 {
    base | r(rm) << 16 | cond.bits() << 12 | r(rn) << 5 | r(rd)
}

/// CSEL Wd, Wn, Wm, cond
#[must_use]
pub const fn csel(rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> u32 {
    condsel(0x1A80_0000, rd, rn, rm, cond)
}

/// CSINC Wd, Wn, Wm, cond
#[must_use]
pub const fn csinc(rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> u32 {
    condsel(0x1A80_0400, rd, rn, rm, cond)
}

/// CSINV Wd, Wn, Wm, cond
#[must_use]
pub const fn csinv(rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> u32 {
    condsel(0x5A80_0000, rd, rn, rm, cond)
}

/// CSNEG Wd, Wn, Wm, cond
#[must_use]
pub const fn csneg(rd: Reg, rn: Reg, rm: Reg, cond: Cond) -> u32 {
    condsel(0x5A80_0400, rd, rn, rm, cond)
}

/// CSET Wd, cond
#[must_use]
pub const fn cset(rd: Reg, cond: Cond) -> u32 {
    csinc(rd, ZR, ZR, cond.invert())
}

/// CSETM Wd, cond — all-ones if cond holds.
#[must_use]
pub const fn csetm(rd: Reg, cond: Cond) -> u32 {
    csinv(rd, ZR, ZR, cond.invert())
}

// === Conditional compare ===

/// CCMP Wn, #imm5, #nzcv, cond
#[must_use]
pub const fn ccmp_immed(rn: Reg, imm5: u8, nzcv: u8, cond: Cond) -> u32 {
    assert!(imm5 < 32 && nzcv < 16, "ccmp operand out of range");
    0x7A40_0800 | (imm5 as u32) << 16 | cond.bits() << 12 | r(rn) << 5 | nzcv as u32
}

/// CCMP Wn, Wm, #nzcv, cond
#[must_use]
pub const fn ccmp_reg(rn: Reg, rm: Reg, nzcv: u8, cond: Cond) -> u32 {
    assert!(nzcv < 16, "ccmp nzcv out of range");
    0x7A40_0000 | r(rm) << 16 | cond.bits() << 12 | r(rn) << 5 | nzcv as u32
}

// === Loads and stores ===
//
// Operand order is (rn, rt, offset): base register first.

const fn ls_unsigned(base: u32, scale: u8, rn: Reg, rt: Reg, offset: u16) -> u32 {
    let imm12 = (offset >> scale) as u32;
    assert!(imm12 < 4096, "scaled offset out of range");
    assert!(offset as u32 == imm12 << scale, "offset not aligned to access size");
    base | imm12 << 10 | r(rn) << 5 | r(rt)
}

const fn ls_unscaled(base: u32, rn: Reg, rt: Reg, simm9: i16) -> u32 {
    assert!(simm9 >= -256 && simm9 < 256, "unscaled offset out of range");
    base | ((simm9 as u32) & 0x1FF) << 12 | r(rn) << 5 | r(rt)
}

/// LDR Wt, [Xn, #offset]
#[must_use]
pub const fn ldr_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0xB940_0000, 2, rn, rt, offset)
}

/// STR Wt, [Xn, #offset]
#[must_use]
pub const fn str_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0xB900_0000, 2, rn, rt, offset)
}

/// LDR Xt, [Xn, #offset]
#[must_use]
pub const fn ldr64_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0xF940_0000, 3, rn, rt, offset)
}

/// STR Xt, [Xn, #offset]
#[must_use]
pub const fn str64_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0xF900_0000, 3, rn, rt, offset)
}

/// LDRH Wt, [Xn, #offset]
#[must_use]
pub const fn ldrh_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0x7940_0000, 1, rn, rt, offset)
}

/// LDRSH Wt, [Xn, #offset]
#[must_use]
pub const fn ldrsh_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0x79C0_0000, 1, rn, rt, offset)
}

/// STRH Wt, [Xn, #offset]
#[must_use]
pub const fn strh_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0x7900_0000, 1, rn, rt, offset)
}

/// LDRB Wt, [Xn, #offset]
#[must_use]
pub const fn ldrb_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0x3940_0000, 0, rn, rt, offset)
}

/// LDRSB Wt, [Xn, #offset]
#[must_use]
pub const fn ldrsb_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0x39C0_0000, 0, rn, rt, offset)
}

/// STRB Wt, [Xn, #offset]
#[must_use]
pub const fn strb_offset(rn: Reg, rt: Reg, offset: u16) -> u32 {
    ls_unsigned(0x3900_0000, 0, rn, rt, offset)
}

/// LDUR Wt, [Xn, #simm9]
#[must_use]
pub const fn ldur_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0xB840_0000, rn, rt, simm9)
}

/// STUR Wt, [Xn, #simm9]
#[must_use]
pub const fn stur_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0xB800_0000, rn, rt, simm9)
}

/// LDURH Wt, [Xn, #simm9]
#[must_use]
pub const fn ldurh_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0x7840_0000, rn, rt, simm9)
}

/// LDURSH Wt, [Xn, #simm9]
#[must_use]
pub const fn ldursh_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0x78C0_0000, rn, rt, simm9)
}

/// STURH Wt, [Xn, #simm9]
#[must_use]
pub const fn sturh_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0x7800_0000, rn, rt, simm9)
}

/// LDURB Wt, [Xn, #simm9]
#[must_use]
pub const fn ldurb_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0x3840_0000, rn, rt, simm9)
}

/// LDURSB Wt, [Xn, #simm9]
#[must_use]
pub const fn ldursb_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0x38C0_0000, rn, rt, simm9)
}

/// STURB Wt, [Xn, #simm9]
#[must_use]
pub const fn sturb_offset(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_unscaled(0x3800_0000, rn, rt, simm9)
}

const fn ls_preindex(base: u32, rn: Reg, rt: Reg, simm9: i16) -> u32 {
    assert!(simm9 >= -256 && simm9 < 256, "pre-index offset out of range");
    base | 0b11 << 10 | ((simm9 as u32) & 0x1FF) << 12 | r(rn) << 5 | r(rt)
}

const fn ls_postindex(base: u32, rn: Reg, rt: Reg, simm9: i16) -> u32 {
    assert!(simm9 >= -256 && simm9 < 256, "post-index offset out of range");
    base | 0b01 << 10 | ((simm9 as u32) & 0x1FF) << 12 | r(rn) << 5 | r(rt)
}

/// LDR Wt, [Xn, #simm9]!
#[must_use]
pub const fn ldr_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0xB840_0000, rn, rt, simm9)
}

/// STR Wt, [Xn, #simm9]!
#[must_use]
pub const fn str_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0xB800_0000, rn, rt, simm9)
}

/// LDR Wt, [Xn], #simm9
#[must_use]
pub const fn ldr_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0xB840_0000, rn, rt, simm9)
}

/// STR Wt, [Xn], #simm9
#[must_use]
pub const fn str_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0xB800_0000, rn, rt, simm9)
}

/// LDRH Wt, [Xn, #simm9]!
#[must_use]
pub const fn ldrh_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0x7840_0000, rn, rt, simm9)
}

/// LDRH Wt, [Xn], #simm9
#[must_use]
pub const fn ldrh_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0x7840_0000, rn, rt, simm9)
}

/// LDRSH Wt, [Xn, #simm9]!
#[must_use]
pub const fn ldrsh_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0x78C0_0000, rn, rt, simm9)
}

/// LDRSH Wt, [Xn], #simm9
#[must_use]
pub const fn ldrsh_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0x78C0_0000, rn, rt, simm9)
}

/// STRH Wt, [Xn, #simm9]!
#[must_use]
pub const fn strh_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0x7800_0000, rn, rt, simm9)
}

/// STRH Wt, [Xn], #simm9
#[must_use]
pub const fn strh_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0x7800_0000, rn, rt, simm9)
}

/// LDRB Wt, [Xn, #simm9]!
#[must_use]
pub const fn ldrb_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0x3840_0000, rn, rt, simm9)
}

/// LDRB Wt, [Xn], #simm9
#[must_use]
pub const fn ldrb_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0x3840_0000, rn, rt, simm9)
}

/// LDRSB Wt, [Xn, #simm9]!
#[must_use]
pub const fn ldrsb_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0x38C0_0000, rn, rt, simm9)
}

/// LDRSB Wt, [Xn], #simm9
#[must_use]
pub const fn ldrsb_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0x38C0_0000, rn, rt, simm9)
}

/// STRB Wt, [Xn, #simm9]!
#[must_use]
pub const fn strb_offset_preindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_preindex(0x3800_0000, rn, rt, simm9)
}

/// STRB Wt, [Xn], #simm9
#[must_use]
pub const fn strb_offset_postindex(rn: Reg, rt: Reg, simm9: i16) -> u32 {
    ls_postindex(0x3800_0000, rn, rt, simm9)
}

// === Load/store pair (32-bit registers) ===

/// LDP Wt1, Wt2, [Xn, #offset]
#[must_use]
pub const fn ldp_offset(rn: Reg, rt1: Reg, rt2: Reg, offset: i16) -> u32 {
    let imm7 = offset / 4;
    assert!(imm7 >= -64 && imm7 < 64 && offset % 4 == 0, "ldp offset out of range");
    0x2940_0000 | ((imm7 as u32) & 0x7F) << 15 | r(rt2) << 10 | r(rn) << 5 | r(rt1)
}

/// STP Wt1, Wt2, [Xn, #offset]
#[must_use]
pub const fn stp_offset(rn: Reg, rt1: Reg, rt2: Reg, offset: i16) -> u32 {
    let imm7 = offset / 4;
    assert!(imm7 >= -64 && imm7 < 64 && offset % 4 == 0, "stp offset out of range");
    0x2900_0000 | ((imm7 as u32) & 0x7F) << 15 | r(rt2) << 10 | r(rn) << 5 | r(rt1)
}

// === Exclusives and barriers ===

/// LDXRB Wt, [Xn]
#[must_use]
pub const fn ldxrb(rn: Reg, rt: Reg) -> u32 {
    0x085F_7C00 | r(rn) << 5 | r(rt)
}

/// LDXRH Wt, [Xn]
#[must_use]
pub const fn ldxrh(rn: Reg, rt: Reg) -> u32 {
    0x485F_7C00 | r(rn) << 5 | r(rt)
}

/// LDXR Wt, [Xn]
#[must_use]
pub const fn ldxr(rn: Reg, rt: Reg) -> u32 {
    0x885F_7C00 | r(rn) << 5 | r(rt)
}

/// LDAXR Wt, [Xn]
#[must_use]
pub const fn ldaxr(rn: Reg, rt: Reg) -> u32 {
    0x885F_FC00 | r(rn) << 5 | r(rt)
}

/// LDAXRB Wt, [Xn]
#[must_use]
pub const fn ldaxrb(rn: Reg, rt: Reg) -> u32 {
    0x085F_FC00 | r(rn) << 5 | r(rt)
}

/// LDAXRH Wt, [Xn]
#[must_use]
pub const fn ldaxrh(rn: Reg, rt: Reg) -> u32 {
    0x485F_FC00 | r(rn) << 5 | r(rt)
}

/// STXRB Ws, Wt, [Xn] — Ws receives 0 on success.
#[must_use]
pub const fn stxrb(rs: Reg, rn: Reg, rt: Reg) -> u32 {
    0x0800_7C00 | r(rs) << 16 | r(rn) << 5 | r(rt)
}

/// STXRH Ws, Wt, [Xn]
#[must_use]
pub const fn stxrh(rs: Reg, rn: Reg, rt: Reg) -> u32 {
    0x4800_7C00 | r(rs) << 16 | r(rn) << 5 | r(rt)
}

/// STXR Ws, Wt, [Xn]
#[must_use]
pub const fn stxr(rs: Reg, rn: Reg, rt: Reg) -> u32 {
    0x8800_7C00 | r(rs) << 16 | r(rn) << 5 | r(rt)
}

/// STLXR Ws, Wt, [Xn] — store-release exclusive.
#[must_use]
pub const fn stlxr(rs: Reg, rn: Reg, rt: Reg) -> u32 {
    0x8800_FC00 | r(rs) << 16 | r(rn) << 5 | r(rt)
}

/// STLXRB Ws, Wt, [Xn]
#[must_use]
pub const fn stlxrb(rs: Reg, rn: Reg, rt: Reg) -> u32 {
    0x0800_FC00 | r(rs) << 16 | r(rn) << 5 | r(rt)
}

/// STLXRH Ws, Wt, [Xn]
#[must_use]
pub const fn stlxrh(rs: Reg, rn: Reg, rt: Reg) -> u32 {
    0x4800_FC00 | r(rs) << 16 | r(rn) << 5 | r(rt)
}

/// DMB ISH — inner-shareable full barrier.
#[must_use]
pub const fn dmb_ish() -> u32 {
    0xD503_3BBF
}

// === Branches ===

/// B label — `offset` in words from this instruction.
#[must_use]
pub const fn b(offset: i32) -> u32 {
    assert!(offset >= -(1 << 25) && offset < (1 << 25), "branch offset out of range");
    0x1400_0000 | (offset as u32) & 0x03FF_FFFF
}

/// BL label
#[must_use]
pub const fn bl(offset: i32) -> u32 {
    assert!(offset >= -(1 << 25) && offset < (1 << 25), "branch offset out of range");
    0x9400_0000 | (offset as u32) & 0x03FF_FFFF
}

/// B.cond label — `offset` in words.
#[must_use]
pub const fn b_cc(cond: Cond, offset: i32) -> u32 {
    assert!(offset >= -(1 << 18) && offset < (1 << 18), "conditional branch offset out of range");
    0x5400_0000 | ((offset as u32) & 0x7_FFFF) << 5 | cond.bits()
}

/// CBZ Wt, label
#[must_use]
pub const fn cbz(rt: Reg, offset: i32) -> u32 {
    assert!(offset >= -(1 << 18) && offset < (1 << 18), "cbz offset out of range");
    0x3400_0000 | ((offset as u32) & 0x7_FFFF) << 5 | r(rt)
}

/// CBNZ Wt, label
#[must_use]
pub const fn cbnz(rt: Reg, offset: i32) -> u32 {
    assert!(offset >= -(1 << 18) && offset < (1 << 18), "cbnz offset out of range");
    0x3500_0000 | ((offset as u32) & 0x7_FFFF) << 5 | r(rt)
}

/// CBZ Xt, label
#[must_use]
pub const fn cbz64(rt: Reg, offset: i32) -> u32 {
    assert!(offset >= -(1 << 18) && offset < (1 << 18), "cbz offset out of range");
    0xB400_0000 | ((offset as u32) & 0x7_FFFF) << 5 | r(rt)
}

/// CBNZ Xt, label
#[must_use]
pub const fn cbnz64(rt: Reg, offset: i32) -> u32 {
    assert!(offset >= -(1 << 18) && offset < (1 << 18), "cbnz offset out of range");
    0xB500_0000 | ((offset as u32) & 0x7_FFFF) << 5 | r(rt)
}

/// TBZ Wt, #bit, label
#[must_use]
pub const fn tbz(rt: Reg, bit: u8, offset: i32) -> u32 {
    assert!(bit < 32, "tbz bit out of range for W register");
    assert!(offset >= -(1 << 13) && offset < (1 << 13), "tbz offset out of range");
    0x3600_0000 | ((bit as u32) & 0x1F) << 19 | ((offset as u32) & 0x3FFF) << 5 | r(rt)
}

/// TBNZ Wt, #bit, label
#[must_use]
pub const fn tbnz(rt: Reg, bit: u8, offset: i32) -> u32 {
    assert!(bit < 32, "tbnz bit out of range for W register");
    assert!(offset >= -(1 << 13) && offset < (1 << 13), "tbnz offset out of range");
    0x3700_0000 | ((bit as u32) & 0x1F) << 19 | ((offset as u32) & 0x3FFF) << 5 | r(rt)
}

/// BR Xn
#[must_use]
pub const fn br(rn: Reg) -> u32 {
    0xD61F_0000 | r(rn) << 5
}

/// BLR Xn
#[must_use]
pub const fn blr(rn: Reg) -> u32 {
    0xD63F_0000 | r(rn) << 5
}

/// RET (X30)
#[must_use]
pub const fn ret() -> u32 {
    0xD65F_03C0
}

// === System ===

/// NOP
#[must_use]
pub const fn nop() -> u32 {
    0xD503_201F
}

/// WFE — wait for event.
#[must_use]
pub const fn wfe() -> u32 {
    0xD503_205F
}

/// SEV — send event.
#[must_use]
pub const fn sev() -> u32 {
    0xD503_209F
}

/// SVC #imm16
#[must_use]
pub const fn svc(imm: u16) -> u32 {
    0xD400_0001 | (imm as u32) << 5
}

/// UDF #imm16 — permanently undefined; used as a stream marker.
#[must_use]
pub const fn udf(imm: u16) -> u32 {
    imm as u32
}

/// MSR DAIFClr, #imm — unmask the selected interrupt classes.
#[must_use]
pub const fn msr_daifclr(imm: u8) -> u32 {
    assert!(imm < 16, "daif immediate out of range");
    0xD500_401F | 3 << 16 | 7 << 5 | (imm as u32) << 8
}

/// MSR DAIFSet, #imm — mask the selected interrupt classes.
#[must_use]
pub const fn msr_daifset(imm: u8) -> u32 {
    assert!(imm < 16, "daif immediate out of range");
    0xD500_401F | 3 << 16 | 6 << 5 | (imm as u32) << 8
}

/// MRS Xt, NZCV — read the condition flags into bits 31:28.
#[must_use]
pub const fn mrs_nzcv(rt: Reg) -> u32 {
    0xD53B_4200 | r(rt)
}

/// MSR NZCV, Xt — set the condition flags from bits 31:28.
#[must_use]
pub const fn msr_nzcv(rt: Reg) -> u32 {
    0xD51B_4200 | r(rt)
}

/// MRS Xt, CNTVCT_EL0 — free-running virtual counter.
#[must_use]
pub const fn mrs_cntvct(rt: Reg) -> u32 {
    0xD53B_E040 | r(rt)
}

/// MRS Xt, CNTFRQ_EL0 — counter frequency.
#[must_use]
pub const fn mrs_cntfrq(rt: Reg) -> u32 {
    0xD53B_E000 | r(rt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cond::Cond;

    // Golden words cross-checked against a reference assembler.

    #[test]
    fn data_processing_register() {
        assert_eq!(add_reg(0, 1, 2, Shift::Lsl, 0), 0x0B02_0020); // add w0, w1, w2
        assert_eq!(subs_reg(0, 1, 2, Shift::Lsl, 0), 0x6B02_0020); // subs w0, w1, w2
        assert_eq!(adds_reg(3, 3, 4, Shift::Lsl, 24), 0x2B04_6063); // adds w3, w3, w4, lsl #24
        assert_eq!(mov_reg(5, 6), 0x2A06_03E5); // mov w5, w6
        assert_eq!(adc_reg(0, 1, 2), 0x1A02_0020); // adc w0, w1, w2
        assert_eq!(sbcs_reg(0, 1, 2), 0x7A02_0020); // sbcs w0, w1, w2
    }

    #[test]
    fn immediates() {
        assert_eq!(mov_immed_u16(0, 1, 0), 0x5280_0020); // mov w0, #1
        assert_eq!(movt_immed_u16(0, 1), 0x72A0_0020); // movk w0, #1, lsl #16
        assert_eq!(movn_immed_u16(0, 0, 0), 0x1280_0000); // mov w0, #-1
        assert_eq!(add_immed(0, 1, 4), 0x1100_1020); // add w0, w1, #4
        assert_eq!(subs_immed(0, 0, 1), 0x7100_0400); // subs w0, w0, #1
    }

    #[test]
    fn logical_immediates() {
        assert_eq!(and_immed(0, 0, 8, 0), 0x1200_1C00); // and w0, w0, #0xff
        assert_eq!(ands_immed(ZR, 2, 16, 0), 0x7200_3C5F); // tst w2, #0xffff
        // orr w0, w0, #0x10 — one bit at position 4 = width 1, ror 28
        assert_eq!(orr_immed(0, 0, 1, 28), 0x321C_0000);
        // bic of bit 0 folds to and with #0xfffffffe
        assert_eq!(bic_immed(0, 0, 1, 0), and_immed(0, 0, 31, 31));
    }

    #[test]
    fn bitmask_immediate_detection() {
        assert_eq!(bitmask_immediate(0xFF), Some((8, 0)));
        assert_eq!(bitmask_immediate(0xFF00), Some((8, 24)));
        assert_eq!(bitmask_immediate(0x8000_0001), Some((2, 1)));
        assert_eq!(bitmask_immediate(0xF000_000F), Some((8, 4)));
        assert_eq!(bitmask_immediate(0), None);
        assert_eq!(bitmask_immediate(u32::MAX), None);
        assert_eq!(bitmask_immediate(0x5), None);
        // Every detected pair must reproduce the value through the
        // rotated-run definition.
        for v in [0x1u32, 0x6, 0x3C, 0xFFFE, 0x7FFF_FFFF, 0xFFFF_0000, 0x0FF0] {
            let (width, ror) = bitmask_immediate(v).unwrap();
            let mask = ((1u64 << width) - 1) as u32;
            assert_eq!(mask.rotate_right(u32::from(ror)), v, "value {v:#x}");
        }
    }

    #[test]
    fn bitfields() {
        assert_eq!(lsl(0, 1, 4), 0x531C_6C20); // lsl w0, w1, #4
        assert_eq!(lsr(0, 1, 4), 0x5304_7C20); // lsr w0, w1, #4
        assert_eq!(asr(0, 1, 4), 0x1304_7C20); // asr w0, w1, #4
        assert_eq!(ubfx(0, 1, 4, 8), 0x5304_2C20); // ubfx w0, w1, #4, #8
        assert_eq!(bfi(0, 1, 8, 8), 0x3318_1C20); // bfi w0, w1, #8, #8
        assert_eq!(bfxil(0, 1, 8, 8), 0x3308_3C20); // bfxil w0, w1, #8, #8
        assert_eq!(sxth(0, 1), 0x1300_3C20); // sxth w0, w1
        assert_eq!(uxtb(0, 1), 0x5300_1C20); // uxtb w0, w1
        assert_eq!(ror_immed(0, 1, 8), 0x1381_2020); // ror w0, w1, #8
    }

    #[test]
    fn muldiv_and_misc() {
        assert_eq!(mul(0, 1, 2), 0x1B02_7C20); // mul w0, w1, w2
        assert_eq!(sdiv(0, 1, 2), 0x1AC2_0C20); // sdiv w0, w1, w2
        assert_eq!(smull(0, 1, 2), 0x9B22_7C20); // smull x0, w1, w2
        assert_eq!(umull(0, 1, 2), 0x9BA2_7C20); // umull x0, w1, w2
        assert_eq!(msub(0, 1, 2, 3), 0x1B02_8C20); // msub w0, w1, w2, w3
        assert_eq!(clz(0, 1), 0x5AC0_1020); // clz w0, w1
        assert_eq!(rev(0, 1), 0x5AC0_0820); // rev w0, w1
        assert_eq!(csel(0, 1, 2, Cond::Eq), 0x1A82_0020); // csel w0, w1, w2, eq
        assert_eq!(cset(0, Cond::Eq), 0x1A9F_17E0); // cset w0, eq
    }

    #[test]
    fn loads_stores() {
        assert_eq!(ldr_offset(2, 1, 4), 0xB940_0441); // ldr w1, [x2, #4]
        assert_eq!(str_offset(2, 1, 0), 0xB900_0041); // str w1, [x2]
        assert_eq!(ldrh_offset(2, 1, 2), 0x7940_0441); // ldrh w1, [x2, #2]
        assert_eq!(ldrb_offset(2, 1, 1), 0x3940_0441); // ldrb w1, [x2, #1]
        assert_eq!(ldrsh_offset(2, 1, 0), 0x79C0_0041); // ldrsh w1, [x2]
        assert_eq!(ldur_offset(2, 1, -4), 0xB85F_C041); // ldur w1, [x2, #-4]
        assert_eq!(ldp_offset(3, 1, 2, 0), 0x2940_0861); // ldp w1, w2, [x3]
        assert_eq!(stp_offset(3, 1, 2, 8), 0x2901_0861); // stp w1, w2, [x3, #8]
        // ldrb w1, [x2, #-1]! / strb w1, [x2], #1
        assert_eq!(ldrb_offset_preindex(2, 1, -1), 0x385F_FC41);
        assert_eq!(strb_offset_postindex(2, 1, 1), 0x3800_1441);
    }

    #[test]
    fn exclusives() {
        assert_eq!(ldxr(2, 1), 0x885F_7C41); // ldxr w1, [x2]
        assert_eq!(stxr(0, 2, 1), 0x8800_7C41); // stxr w0, w1, [x2]
        assert_eq!(stlxr(0, 2, 1), 0x8800_FC41); // stlxr w0, w1, [x2]
        assert_eq!(dmb_ish(), 0xD503_3BBF);
    }

    #[test]
    fn branches() {
        assert_eq!(b(2), 0x1400_0002);
        assert_eq!(b(-1), 0x17FF_FFFF);
        assert_eq!(b_cc(Cond::Eq, 2), 0x5400_0040); // b.eq .+8
        assert_eq!(cbz(0, 2), 0x3400_0040); // cbz w0, .+8
        assert_eq!(tbz(0, 3, 2), 0x3618_0040); // tbz w0, #3, .+8
        assert_eq!(ret(), 0xD65F_03C0);
        assert_eq!(br(0), 0xD61F_0000);
    }

    #[test]
    fn system() {
        assert_eq!(nop(), 0xD503_201F);
        assert_eq!(wfe(), 0xD503_205F);
        assert_eq!(svc(0x100), 0xD400_2001);
        assert_eq!(mrs_cntvct(0), 0xD53B_E040);
        assert_eq!(mrs_nzcv(1), 0xD53B_4201);
        assert_eq!(msr_nzcv(1), 0xD51B_4201);
    }
}
