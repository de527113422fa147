//! Per-block translation context.
//!
//! One `Ctx` lives for the translation of one unit: it owns the emit
//! buffer, the register allocator state, the condition-code state, the
//! pending fixups and the guest-PC cursor. Every per-instruction emitter
//! is a free function over `&mut Ctx`.
//!
//! ## Compiled-block ABI
//!
//! On entry, x27 points at [`GuestState`](crate::GuestState), w26 holds
//! the SR mirror (CCR low byte in alternate C/V encoding) and w28 the
//! guest PC. x0-x11 and x19-x25 are scratch, allocated through the
//! register pool; x12-x17 are reserved for fixed sequences (exception
//! prologues, atomics). On exit all dirty guest registers are committed,
//! SR and PC are stored back, and control returns with `ret`.

use asm_aarch64::insn::{self, Reg};
use asm_aarch64::{Cond, EmitBuffer, Offset};

use crate::alloc::RegAllocator;
use crate::block::{Fixup, PendingBcc};
use crate::ccr::CcState;
use crate::icache::InstructionCache;
use crate::state::{PC_OFFSET, SR_OFFSET};

/// SR mirror (alternate C/V encoding in the low byte).
pub const REG_CC: Reg = 26;
/// Pointer to `GuestState`.
pub const REG_CTX: Reg = 27;
/// Guest PC shadow.
pub const REG_PC: Reg = 28;

/// Registers handed out by the allocator.
pub(crate) const POOL: [Reg; 19] =
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 19, 20, 21, 22, 23, 24, 25];

/// Reserved scratch for fixed emitted sequences that run with the
/// allocator's registers flushed (exception prologues, stack swaps).
pub(crate) const SCRATCH: [Reg; 5] = [12, 13, 14, 15, 16];

/// Operand size of a 68k operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Byte,
    Word,
    Long,
}

impl Size {
    /// Decode the common 2-bit size field (00=byte, 01=word, 10=long).
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Size::Byte),
            1 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        (self.bytes() * 8) as u8
    }

    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Size::Byte => 0xFF,
            Size::Word => 0xFFFF,
            Size::Long => 0xFFFF_FFFF,
        }
    }

    /// Left-shift that moves the operand's sign bit to host bit 31.
    #[must_use]
    pub const fn top_shift(self) -> u8 {
        32 - self.bits()
    }
}

/// Translator configuration.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Maximum guest instructions per translation unit.
    pub block_horizon: u32,
    /// Emulate legacy busy-wait timing for a backward DBF branching to
    /// itself by inflating its cycle cost.
    pub dbf_slowdown: bool,
    /// Inline the return path of BSR/JSR followed by a matching RTS.
    pub inline_returns: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            block_horizon: 256,
            dbf_slowdown: false,
            inline_returns: true,
        }
    }
}

/// Bounded stack of expected return addresses for inlined BSR/RTS.
/// If it would grow past capacity the caller exits the block instead.
#[derive(Debug, Default)]
pub(crate) struct ReturnStack {
    slots: [u32; 8],
    depth: usize,
}

impl ReturnStack {
    pub(crate) fn push(&mut self, addr: u32) -> bool {
        if self.depth == self.slots.len() {
            return false;
        }
        self.slots[self.depth] = addr;
        self.depth += 1;
        true
    }

    pub(crate) fn pop(&mut self) -> Option<u32> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        Some(self.slots[self.depth])
    }
}

/// Translation context for one unit.
pub struct Ctx<'a> {
    pub(crate) icache: &'a dyn InstructionCache,
    pub(crate) cfg: &'a JitConfig,
    pub(crate) buf: EmitBuffer,

    /// Guest address of the next unread 16-bit word. After the dispatcher
    /// reads the opcode this points at the first extension word.
    pub(crate) guest_pc: u32,
    /// Signed byte delta between the logical guest PC and the value held
    /// in the PC register; applied lazily by `flush_pc`.
    pub(crate) pc_offset: i32,
    /// Extension words consumed by the current instruction.
    pub(crate) ext_words: u8,
    /// Flags the current instruction must leave correct (subset of its
    /// architectural `sr_sets`, filtered by lookahead).
    pub(crate) update_mask: u8,

    pub(crate) ra: RegAllocator,
    pub(crate) cc: CcState,

    pub(crate) fixups: Vec<Fixup>,
    pub(crate) pending_bcc: Vec<PendingBcc>,
    pub(crate) return_stack: ReturnStack,

    /// Set by handlers that close the unit (control transfer, supervisor
    /// transition, untranslatable opcode).
    pub(crate) block_done: bool,
    /// Set when the allocator pool is exhausted; the in-progress
    /// instruction is rewound and the unit closed.
    pub(crate) aborted: bool,
}

impl<'a> Ctx<'a> {
    pub(crate) fn new(icache: &'a dyn InstructionCache, cfg: &'a JitConfig, pc: u32) -> Self {
        Self {
            icache,
            cfg,
            buf: EmitBuffer::new(),
            guest_pc: pc,
            pc_offset: 0,
            ext_words: 0,
            update_mask: 0,
            ra: RegAllocator::new(),
            cc: CcState::default(),
            fixups: Vec::new(),
            pending_bcc: Vec::new(),
            return_stack: ReturnStack::default(),
            block_done: false,
            aborted: false,
        }
    }

    // === Emit plumbing ===

    pub(crate) fn emit(&mut self, word: u32) -> Offset {
        self.buf.write(word)
    }

    pub(crate) fn cursor(&self) -> Offset {
        self.buf.cursor()
    }

    // === Guest instruction stream ===

    /// Consume the next extension word.
    pub(crate) fn fetch_ext16(&mut self) -> u16 {
        let w = self.icache.read16(self.guest_pc.wrapping_add(2 * u32::from(self.ext_words)));
        self.ext_words += 1;
        w
    }

    /// Consume two extension words as one 32-bit immediate.
    pub(crate) fn fetch_ext32(&mut self) -> u32 {
        let hi = self.fetch_ext16();
        let lo = self.fetch_ext16();
        (u32::from(hi) << 16) | u32::from(lo)
    }

    /// Guest address of the next extension word (the PC value that
    /// PC-relative addressing uses).
    pub(crate) fn ext_word_addr(&self) -> u32 {
        self.guest_pc.wrapping_add(2 * u32::from(self.ext_words))
    }

    /// Peek at the opcode following the current instruction, for
    /// peephole fusion. Does not consume anything.
    pub(crate) fn peek_next_opcode(&self) -> u16 {
        self.icache.read16(self.guest_pc.wrapping_add(2 * u32::from(self.ext_words)))
    }

    // === PC coalescing ===

    /// Record that the logical guest PC moved by `bytes`.
    pub(crate) fn advance_pc(&mut self, bytes: i32) {
        self.pc_offset += bytes;
    }

    /// Standard end-of-handler accounting: logical PC moves over the
    /// opcode plus consumed extension words, and the stream cursor skips
    /// the extension words.
    pub(crate) fn advance_pc_over_insn(&mut self) {
        self.advance_pc(2 * (1 + i32::from(self.ext_words)));
        self.guest_pc = self.guest_pc.wrapping_add(2 * u32::from(self.ext_words));
    }

    /// Materialize any pending PC delta into the PC register.
    pub(crate) fn flush_pc(&mut self) {
        let delta = self.pc_offset;
        self.pc_offset = 0;
        if delta == 0 {
            return;
        }
        let mag = delta.unsigned_abs();
        if mag < 4096 {
            let op = if delta > 0 {
                insn::add_immed(REG_PC, REG_PC, mag as u16)
            } else {
                insn::sub_immed(REG_PC, REG_PC, mag as u16)
            };
            self.emit(op);
        } else {
            let t = SCRATCH[0];
            self.load_const(t, mag);
            let op = if delta > 0 {
                insn::add_reg(REG_PC, REG_PC, t, insn::Shift::Lsl, 0)
            } else {
                insn::sub_reg(REG_PC, REG_PC, t, insn::Shift::Lsl, 0)
            };
            self.emit(op);
        }
    }

    // === Constants ===

    /// Load a 32-bit constant with the shortest move sequence.
    pub(crate) fn load_const(&mut self, rd: Reg, value: u32) {
        let lo = value as u16;
        let hi = (value >> 16) as u16;
        if hi == 0 {
            self.emit(insn::movw_immed_u16(rd, lo));
        } else if lo == 0 {
            self.emit(insn::mov_immed_u16(rd, hi, 1));
        } else if hi == 0xFFFF {
            self.emit(insn::movn_immed_u16(rd, !lo, 0));
        } else if lo == 0xFFFF {
            self.emit(insn::movn_immed_u16(rd, !hi, 1));
        } else {
            self.emit(insn::movw_immed_u16(rd, lo));
            self.emit(insn::movt_immed_u16(rd, hi));
        }
    }

    /// Sign-extended 16-bit constant, the common displacement case.
    pub(crate) fn load_const_s16(&mut self, rd: Reg, value: i16) {
        if value < 0 {
            self.emit(insn::movn_immed_u16(rd, !(value as u16), 0));
        } else {
            self.emit(insn::movw_immed_u16(rd, value as u16));
        }
    }

    // === Block exit ===

    /// Commit SR and PC and return to the dispatcher. Dirty guest
    /// registers must already be flushed.
    pub(crate) fn emit_exit(&mut self) {
        self.emit(insn::str_offset(REG_CTX, REG_CC, SR_OFFSET));
        self.emit(insn::str_offset(REG_CTX, REG_PC, PC_OFFSET));
        self.emit(insn::ret());
    }

    /// Patch a forward conditional branch at `site` to land on the
    /// current cursor.
    pub(crate) fn patch_fwd_bcc(&mut self, site: Offset, cond: Cond) {
        let delta = site.distance_to(self.cursor());
        self.buf.patch(site, insn::b_cc(cond, delta));
    }

    /// Patch a forward CBZ/CBNZ at `site` to land on the current cursor.
    pub(crate) fn patch_fwd_cbz(&mut self, site: Offset, reg: Reg, nonzero: bool) {
        let delta = site.distance_to(self.cursor());
        let word = if nonzero { insn::cbnz(reg, delta) } else { insn::cbz(reg, delta) };
        self.buf.patch(site, word);
    }

    /// Patch a forward unconditional branch at `site` to the cursor.
    pub(crate) fn patch_fwd_b(&mut self, site: Offset) {
        let delta = site.distance_to(self.cursor());
        self.buf.patch(site, insn::b(delta));
    }

    /// Patch a forward TBZ/TBNZ at `site` to land on the current cursor.
    pub(crate) fn patch_fwd_tbz(&mut self, site: Offset, reg: Reg, bit: u8, nonzero: bool) {
        let delta = site.distance_to(self.cursor());
        let word = if nonzero {
            insn::tbnz(reg, bit, delta)
        } else {
            insn::tbz(reg, bit, delta)
        };
        self.buf.patch(site, word);
    }

    /// Discard any pending PC delta and load a constant guest PC.
    pub(crate) fn set_pc_const(&mut self, target: u32) {
        self.pc_offset = 0;
        self.load_const(REG_PC, target);
    }

    /// Discard any pending PC delta and take the guest PC from a register.
    pub(crate) fn set_pc_reg(&mut self, src: Reg) {
        self.pc_offset = 0;
        if src != REG_PC {
            self.emit(insn::mov_reg(REG_PC, src));
        }
    }
}
