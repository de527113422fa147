//! Canonical guest CPU state.
//!
//! `GuestState` is the single source of truth for the guest machine when no
//! translated code is running. Emitted code addresses its fields directly
//! through the pinned context register, so the layout is `#[repr(C)]` and
//! field offsets are exported as constants via `offset_of!`.
//!
//! Emitted loads and stores of guest memory rely on the platform running
//! translated code with big-endian data accesses (SCTLR.EE), the way a
//! drop-in 68k accelerator maps the guest bus; nothing in the emitters
//! byte-swaps data.

use core::mem::offset_of;

/// Guest machine state, shared between translated code, the dispatcher and
/// the interrupt path. Consistency is enforced by the translator's
/// dirty-bit/flush discipline, not by locking.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct GuestState {
    /// Data registers D0-D7.
    pub d: [u32; 8],
    /// Address registers A0-A7. A7 mirrors the stack pointer selected by
    /// the (S, M) bits of `sr`.
    pub a: [u32; 8],
    /// Program counter.
    pub pc: u32,
    /// Status register. The low byte is the CCR in the translator's
    /// alternate C/V encoding; it is rotated to the canonical 68k order
    /// only at architectural boundaries.
    pub sr: u32,
    /// Pending interrupt/event word, polled by the STOP wait loop and
    /// written by the interrupt path.
    pub int: u32,

    // Control registers (supervisor programming model).
    pub sfc: u32,
    pub dfc: u32,
    pub vbr: u32,
    pub cacr: u32,
    pub caar: u32,
    pub itt0: u32,
    pub itt1: u32,
    pub dtt0: u32,
    pub dtt1: u32,
    pub tcr: u32,
    pub urp: u32,
    pub srp: u32,
    pub mmusr: u32,

    // Stack homes. These sit behind the fields the interrupt path touches;
    // only the supervisor-transition sequences read or write them, always
    // with all guest registers already flushed.
    pub usp: u32,
    pub isp: u32,
    pub msp: u32,

    // Translator statistics, exposed to the guest through MOVEC.
    pub jit_cache_miss: u32,
    pub jit_unit_count: u32,
    pub jit_cache_total: u32,
    pub jit_cache_free: u32,
}

impl GuestState {
    /// Reset state: supervisor mode, interrupts masked, everything else
    /// zero. PC and ISP come from the reset vector, which is the
    /// dispatcher's job to fetch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            d: [0; 8],
            a: [0; 8],
            pc: 0,
            sr: 0x2700,
            int: 0,
            sfc: 0,
            dfc: 0,
            vbr: 0,
            cacr: 0,
            caar: 0,
            itt0: 0,
            itt1: 0,
            dtt0: 0,
            dtt1: 0,
            tcr: 0,
            urp: 0,
            srp: 0,
            mmusr: 0,
            usp: 0,
            isp: 0,
            msp: 0,
            jit_cache_miss: 0,
            jit_unit_count: 0,
            jit_cache_total: 0,
            jit_cache_free: 0,
        }
    }
}

impl Default for GuestState {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of data register `n` within `GuestState`.
#[must_use]
pub const fn dreg_offset(n: u8) -> u16 {
    (offset_of!(GuestState, d) + 4 * n as usize) as u16
}

/// Byte offset of address register `n` within `GuestState`.
#[must_use]
pub const fn areg_offset(n: u8) -> u16 {
    (offset_of!(GuestState, a) + 4 * n as usize) as u16
}

/// Byte offset of a guest register in the translator's 0-15 numbering
/// (0-7 = D0-D7, 8-15 = A0-A7).
#[must_use]
pub const fn reg_offset(gr: u8) -> u16 {
    assert!(gr < 16, "guest register index out of range");
    if gr < 8 {
        dreg_offset(gr)
    } else {
        areg_offset(gr - 8)
    }
}

pub const PC_OFFSET: u16 = offset_of!(GuestState, pc) as u16;
pub const SR_OFFSET: u16 = offset_of!(GuestState, sr) as u16;
pub const INT_OFFSET: u16 = offset_of!(GuestState, int) as u16;
pub const SFC_OFFSET: u16 = offset_of!(GuestState, sfc) as u16;
pub const DFC_OFFSET: u16 = offset_of!(GuestState, dfc) as u16;
pub const VBR_OFFSET: u16 = offset_of!(GuestState, vbr) as u16;
pub const CACR_OFFSET: u16 = offset_of!(GuestState, cacr) as u16;
pub const CAAR_OFFSET: u16 = offset_of!(GuestState, caar) as u16;
pub const ITT0_OFFSET: u16 = offset_of!(GuestState, itt0) as u16;
pub const ITT1_OFFSET: u16 = offset_of!(GuestState, itt1) as u16;
pub const DTT0_OFFSET: u16 = offset_of!(GuestState, dtt0) as u16;
pub const DTT1_OFFSET: u16 = offset_of!(GuestState, dtt1) as u16;
pub const TCR_OFFSET: u16 = offset_of!(GuestState, tcr) as u16;
pub const URP_OFFSET: u16 = offset_of!(GuestState, urp) as u16;
pub const SRP_OFFSET: u16 = offset_of!(GuestState, srp) as u16;
pub const MMUSR_OFFSET: u16 = offset_of!(GuestState, mmusr) as u16;
pub const USP_OFFSET: u16 = offset_of!(GuestState, usp) as u16;
pub const ISP_OFFSET: u16 = offset_of!(GuestState, isp) as u16;
pub const MSP_OFFSET: u16 = offset_of!(GuestState, msp) as u16;
pub const JIT_CACHE_MISS_OFFSET: u16 = offset_of!(GuestState, jit_cache_miss) as u16;
pub const JIT_UNIT_COUNT_OFFSET: u16 = offset_of!(GuestState, jit_unit_count) as u16;
pub const JIT_CACHE_TOTAL_OFFSET: u16 = offset_of!(GuestState, jit_cache_total) as u16;
pub const JIT_CACHE_FREE_OFFSET: u16 = offset_of!(GuestState, jit_cache_free) as u16;

// Every field must stay inside the scaled-offset range of a 32-bit load
// through the context register.
const _: () = assert!(size_of::<GuestState>() <= 4 * 4096);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets_are_dense() {
        assert_eq!(dreg_offset(0), 0);
        assert_eq!(dreg_offset(7), 28);
        assert_eq!(areg_offset(0), 32);
        assert_eq!(reg_offset(15), areg_offset(7));
        for gr in 0..15u8 {
            assert_eq!(reg_offset(gr) + 4, reg_offset(gr + 1));
        }
    }

    #[test]
    fn offsets_are_word_aligned() {
        for off in [PC_OFFSET, SR_OFFSET, INT_OFFSET, VBR_OFFSET, USP_OFFSET, ISP_OFFSET, MSP_OFFSET] {
            assert_eq!(off % 4, 0);
        }
    }

    #[test]
    fn reset_state_is_supervisor_masked() {
        let s = GuestState::new();
        assert_eq!(s.sr, 0x2700);
        assert_eq!(s.pc, 0);
    }
}
