//! Host register allocator.
//!
//! Maps guest registers (0-7 = D0-D7, 8-15 = A0-A7) onto the host pool,
//! tracking per-host-register dirty state, reverse mapping and an LRU
//! stamp. These three fields are the hot path and live in a dense
//! array-of-struct layout.
//!
//! Reads map lazily (fill from `GuestState`), writes promise a value and
//! set the dirty bit; a dirty register is never dropped without a spill
//! back to `GuestState`. Eviction prefers the least-recently-used clean
//! mapping, then spills the oldest dirty one. Registers touched by the
//! instruction currently being translated are never victims, so a handler
//! can hold any reasonable number of operands live at once. If the pool
//! is genuinely exhausted the allocator flags an abort; the translator
//! rewinds the instruction and closes the unit.

use asm_aarch64::insn::{self, Reg};
use asm_aarch64::EmitBuffer;

use crate::ctx::{Ctx, POOL, REG_CTX, SCRATCH};
use crate::state::reg_offset;

#[derive(Debug, Clone, Copy, Default)]
struct HostSlot {
    /// Guest register this host register currently backs.
    guest: Option<u8>,
    /// The host value is newer than `GuestState` and must be written
    /// back before the mapping is dropped.
    dirty: bool,
    /// LRU stamp of the last touch.
    stamp: u32,
    /// Instruction epoch of the last touch; same-epoch slots are pinned.
    epoch: u32,
    /// Allocated as a non-guest-backed temporary.
    tmp: bool,
}

/// Allocator state. Methods that may emit fill/spill code take the emit
/// buffer explicitly; `Ctx` forwards with its own buffer.
#[derive(Debug)]
pub(crate) struct RegAllocator {
    slots: [HostSlot; 32],
    host_of: [Option<Reg>; 16],
    tick: u32,
    epoch: u32,
    pub(crate) exhausted: bool,
}

/// Copy of the allocator state, taken before each instruction so an
/// aborted instruction can be rewound together with its emitted code.
#[derive(Debug, Clone)]
pub(crate) struct AllocSnapshot {
    slots: [HostSlot; 32],
    host_of: [Option<Reg>; 16],
    tick: u32,
    epoch: u32,
}

impl RegAllocator {
    pub(crate) fn new() -> Self {
        Self {
            slots: [HostSlot::default(); 32],
            host_of: [None; 16],
            tick: 0,
            epoch: 0,
            exhausted: false,
        }
    }

    pub(crate) fn snapshot(&self) -> AllocSnapshot {
        AllocSnapshot {
            slots: self.slots,
            host_of: self.host_of,
            tick: self.tick,
            epoch: self.epoch,
        }
    }

    pub(crate) fn restore(&mut self, snap: &AllocSnapshot) {
        self.slots = snap.slots;
        self.host_of = snap.host_of;
        self.tick = snap.tick;
        self.epoch = snap.epoch;
        self.exhausted = false;
    }

    /// Start a new instruction epoch; registers touched before this call
    /// become eligible for eviction again.
    pub(crate) fn begin_insn(&mut self) {
        self.epoch += 1;
    }

    fn touch(&mut self, host: Reg) {
        self.tick += 1;
        let slot = &mut self.slots[host as usize];
        slot.stamp = self.tick;
        slot.epoch = self.epoch;
    }

    /// Pick a host register, evicting if necessary. Never returns a slot
    /// touched during the current instruction.
    fn take_slot(&mut self, buf: &mut EmitBuffer) -> Reg {
        // Free pool register first.
        for &h in &POOL {
            let s = &self.slots[h as usize];
            if s.guest.is_none() && !s.tmp {
                self.touch(h);
                return h;
            }
        }
        // Oldest clean mapping from a previous instruction.
        let mut victim: Option<Reg> = None;
        for &h in &POOL {
            let s = &self.slots[h as usize];
            if s.tmp || s.epoch == self.epoch {
                continue;
            }
            if s.guest.is_some() && !s.dirty {
                if victim.is_none_or(|v| s.stamp < self.slots[v as usize].stamp) {
                    victim = Some(h);
                }
            }
        }
        // Failing that, the oldest dirty mapping, spilled.
        if victim.is_none() {
            for &h in &POOL {
                let s = &self.slots[h as usize];
                if s.tmp || s.epoch == self.epoch || s.guest.is_none() {
                    continue;
                }
                if victim.is_none_or(|v| s.stamp < self.slots[v as usize].stamp) {
                    victim = Some(h);
                }
            }
        }
        match victim {
            Some(h) => {
                self.unmap(buf, h);
                self.touch(h);
                h
            }
            None => {
                // Pool exhausted by live temporaries. Cannot happen with a
                // well-formed handler; close the unit and let the
                // dispatcher retry with a shorter horizon.
                log::warn!("register pool exhausted mid-instruction, aborting unit");
                self.exhausted = true;
                SCRATCH[4]
            }
        }
    }

    fn unmap(&mut self, buf: &mut EmitBuffer, host: Reg) {
        let slot = &mut self.slots[host as usize];
        if let Some(gr) = slot.guest.take() {
            if slot.dirty {
                buf.write(insn::str_offset(REG_CTX, host, reg_offset(gr)));
                slot.dirty = false;
            }
            self.host_of[gr as usize] = None;
        }
    }

    /// Host register holding the guest register's current value, filling
    /// from `GuestState` on first use. Idempotent within an instruction.
    pub(crate) fn map_read(&mut self, buf: &mut EmitBuffer, gr: u8) -> Reg {
        if let Some(h) = self.host_of[gr as usize] {
            self.touch(h);
            return h;
        }
        let h = self.take_slot(buf);
        buf.write(insn::ldr_offset(REG_CTX, h, reg_offset(gr)));
        self.slots[h as usize].guest = Some(gr);
        self.host_of[gr as usize] = Some(h);
        h
    }

    /// Host register promised to receive a full new 32-bit value for the
    /// guest register. Skips the fill when no mapping exists, because the
    /// caller overwrites every bit. Partial writes must use `map_read`.
    pub(crate) fn map_write(&mut self, buf: &mut EmitBuffer, gr: u8) -> Reg {
        if let Some(h) = self.host_of[gr as usize] {
            self.touch(h);
            return h;
        }
        let h = self.take_slot(buf);
        self.slots[h as usize].guest = Some(gr);
        self.host_of[gr as usize] = Some(h);
        h
    }

    /// Fresh host register holding a copy of the guest value, independent
    /// of the canonical mapping, for callers that will clobber it.
    pub(crate) fn copy_read(&mut self, buf: &mut EmitBuffer, gr: u8) -> Reg {
        let h = self.take_slot(buf);
        self.slots[h as usize].tmp = true;
        match self.host_of[gr as usize] {
            Some(src) => {
                buf.write(insn::mov_reg(h, src));
            }
            None => {
                buf.write(insn::ldr_offset(REG_CTX, h, reg_offset(gr)));
            }
        }
        h
    }

    /// Non-guest-backed scratch register.
    pub(crate) fn alloc_tmp(&mut self, buf: &mut EmitBuffer) -> Reg {
        let h = self.take_slot(buf);
        self.slots[h as usize].tmp = true;
        h
    }

    /// Release a temporary. Releasing a guest-mapped register is a no-op;
    /// the mapping stays until evicted or flushed.
    pub(crate) fn free(&mut self, host: Reg) {
        if (host as usize) < self.slots.len() && self.slots[host as usize].guest.is_none() {
            self.slots[host as usize].tmp = false;
        }
    }

    /// The mapped host register's value is the new guest value.
    pub(crate) fn mark_dirty(&mut self, gr: u8) {
        let h = self.host_of[gr as usize].expect("mark_dirty on unmapped guest register");
        self.slots[h as usize].dirty = true;
    }

    pub(crate) fn is_guest_mapped(&self, host: Reg) -> bool {
        self.slots[host as usize].guest.is_some()
    }

    pub(crate) fn host_for(&self, gr: u8) -> Option<Reg> {
        self.host_of[gr as usize]
    }

    pub(crate) fn is_dirty(&self, gr: u8) -> bool {
        self.host_of[gr as usize]
            .map(|h| self.slots[h as usize].dirty)
            .unwrap_or(false)
    }

    /// Spill every dirty mapping to `GuestState`. Mappings survive with
    /// their dirty bits cleared, so fall-through paths keep their
    /// registers.
    pub(crate) fn flush_all_dirty(&mut self, buf: &mut EmitBuffer) {
        for &h in &POOL {
            let slot = self.slots[h as usize];
            if let Some(gr) = slot.guest {
                if slot.dirty {
                    buf.write(insn::str_offset(REG_CTX, h, reg_offset(gr)));
                    self.slots[h as usize].dirty = false;
                }
            }
        }
    }
}

// Ctx forwarding, so handlers read as `ctx.map_read(reg)`.
impl Ctx<'_> {
    pub(crate) fn map_read(&mut self, gr: u8) -> Reg {
        self.ra.map_read(&mut self.buf, gr)
    }

    pub(crate) fn map_write(&mut self, gr: u8) -> Reg {
        self.ra.map_write(&mut self.buf, gr)
    }

    pub(crate) fn copy_read(&mut self, gr: u8) -> Reg {
        self.ra.copy_read(&mut self.buf, gr)
    }

    pub(crate) fn alloc_tmp(&mut self) -> Reg {
        self.ra.alloc_tmp(&mut self.buf)
    }

    pub(crate) fn free(&mut self, host: Reg) {
        self.ra.free(host);
    }

    pub(crate) fn mark_dirty(&mut self, gr: u8) {
        self.ra.mark_dirty(gr);
    }

    pub(crate) fn flush_all_dirty(&mut self) {
        self.ra.flush_all_dirty(&mut self.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> EmitBuffer {
        EmitBuffer::new()
    }

    #[test]
    fn map_read_is_idempotent() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        let h1 = ra.map_read(&mut b, 3);
        let h2 = ra.map_read(&mut b, 3);
        assert_eq!(h1, h2);
        // One fill, no second load.
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn map_write_skips_the_fill() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        let _ = ra.map_write(&mut b, 0);
        assert_eq!(b.len(), 0, "full write must not load the old value");
    }

    #[test]
    fn copy_read_leaves_mapping_intact() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        let mapped = ra.map_read(&mut b, 5);
        let copy = ra.copy_read(&mut b, 5);
        assert_ne!(mapped, copy);
        assert_eq!(ra.host_for(5), Some(mapped));
        assert!(!ra.is_guest_mapped(copy));
    }

    #[test]
    fn dirty_registers_spill_on_eviction() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        let h = ra.map_write(&mut b, 1);
        ra.mark_dirty(1);
        ra.begin_insn();
        // Exhaust the rest of the pool so guest register 1 gets evicted.
        for gr in 2..16 {
            let _ = ra.map_read(&mut b, gr);
        }
        let mut tmps = Vec::new();
        for _ in 0..5 {
            tmps.push(ra.alloc_tmp(&mut b));
        }
        assert!(!ra.exhausted);
        assert!(ra.host_for(1).is_none(), "oldest mapping must be evicted");
        // The spill store for guest reg 1 must be in the stream.
        let spill = insn::str_offset(REG_CTX, h, reg_offset(1));
        assert!(b.words().contains(&spill));
    }

    #[test]
    fn clean_mappings_are_evicted_before_dirty_ones() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        let _ = ra.map_write(&mut b, 0);
        ra.mark_dirty(0);
        let _ = ra.map_read(&mut b, 1);
        ra.begin_insn();
        // Fill the pool; the next allocation must prefer evicting the
        // clean reg 1 even though reg 0 is older.
        for gr in 2..16 {
            let _ = ra.map_read(&mut b, gr);
        }
        for _ in 0..3 {
            let _ = ra.alloc_tmp(&mut b);
        }
        let before = b.len();
        let _ = ra.alloc_tmp(&mut b);
        assert!(ra.host_for(1).is_none());
        assert!(ra.host_for(0).is_some(), "dirty mapping survives while clean ones remain");
        assert_eq!(b.len(), before, "clean eviction emits nothing");
    }

    #[test]
    fn flush_writes_every_dirty_register_once() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        for gr in [0u8, 7, 8, 15] {
            let _ = ra.map_write(&mut b, gr);
            ra.mark_dirty(gr);
        }
        let start = b.len();
        ra.flush_all_dirty(&mut b);
        assert_eq!(b.len() - start, 4);
        let again = b.len();
        ra.flush_all_dirty(&mut b);
        assert_eq!(b.len(), again, "second flush has nothing to do");
    }

    #[test]
    fn exhaustion_flags_abort_instead_of_corrupting() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        // Pin the entire pool with temporaries in one instruction.
        for _ in 0..POOL.len() {
            let _ = ra.alloc_tmp(&mut b);
        }
        assert!(!ra.exhausted);
        let overflow = ra.alloc_tmp(&mut b);
        assert!(ra.exhausted);
        assert_eq!(overflow, SCRATCH[4]);
    }

    #[test]
    fn snapshot_restore_rewinds_mappings() {
        let mut ra = RegAllocator::new();
        let mut b = buf();
        let _ = ra.map_read(&mut b, 2);
        let snap = ra.snapshot();
        let _ = ra.map_read(&mut b, 9);
        ra.restore(&snap);
        assert!(ra.host_for(9).is_none());
        assert!(ra.host_for(2).is_some());
    }
}
