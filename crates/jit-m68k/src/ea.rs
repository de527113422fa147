//! Effective-address decode, load and store.
//!
//! Given the 6-bit mode/register field and an operand size, these
//! helpers consume the right extension words from the guest stream and
//! emit host code that leaves the operand (or its address) in a host
//! register. The full 68020+ mode set is supported, including the
//! brief and full extension-word formats with base/index suppression
//! and memory-indirect pre/post-indexing.
//!
//! Post-increment and pre-decrement fold into the host's post/pre-indexed
//! load/store forms, so the address-register update and the access are a
//! single instruction; byte accesses through A7 move by 2 to keep the
//! stack word-aligned.

use asm_aarch64::insn::{self, Reg, Shift};

use crate::ctx::{Ctx, Size};

/// Pre/post-adjust step for an address-register access.
pub(crate) const fn ea_step(size: Size, areg: u8) -> i16 {
    if matches!(size, Size::Byte) && areg == 7 {
        2
    } else {
        size.bytes() as i16
    }
}

impl Ctx<'_> {
    // === Operand load ===

    /// Load the operand named by `ea` into a host register.
    ///
    /// With `read_only` a register operand may come back as the live
    /// guest mapping; the caller must not write through it. `sign_ext`
    /// widens byte/word operands to 32 bits.
    pub(crate) fn ea_load(&mut self, size: Size, ea: u8, sign_ext: bool, read_only: bool) -> Reg {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            0 | 1 => {
                let gr = if mode == 0 { reg } else { reg + 8 };
                if sign_ext && size != Size::Long {
                    let src = self.map_read(gr);
                    let out = self.alloc_tmp();
                    let op = match size {
                        Size::Byte => insn::sxtb(out, src),
                        Size::Word => insn::sxth(out, src),
                        Size::Long => unreachable!(),
                    };
                    self.emit(op);
                    out
                } else if read_only {
                    self.map_read(gr)
                } else {
                    self.copy_read(gr)
                }
            }
            2 => {
                let base = self.map_read(reg + 8);
                let out = self.alloc_tmp();
                self.emit_load_base_disp(size, sign_ext, base, out, 0);
                out
            }
            3 => {
                let an = self.map_read(reg + 8);
                let out = self.alloc_tmp();
                let step = ea_step(size, reg);
                let word = match (size, sign_ext) {
                    (Size::Byte, false) => insn::ldrb_offset_postindex(an, out, step),
                    (Size::Byte, true) => insn::ldrsb_offset_postindex(an, out, step),
                    (Size::Word, false) => insn::ldrh_offset_postindex(an, out, step),
                    (Size::Word, true) => insn::ldrsh_offset_postindex(an, out, step),
                    (Size::Long, _) => insn::ldr_offset_postindex(an, out, step),
                };
                self.emit(word);
                self.mark_dirty(reg + 8);
                out
            }
            4 => {
                let an = self.map_read(reg + 8);
                let out = self.alloc_tmp();
                let step = ea_step(size, reg);
                let word = match (size, sign_ext) {
                    (Size::Byte, false) => insn::ldrb_offset_preindex(an, out, -step),
                    (Size::Byte, true) => insn::ldrsb_offset_preindex(an, out, -step),
                    (Size::Word, false) => insn::ldrh_offset_preindex(an, out, -step),
                    (Size::Word, true) => insn::ldrsh_offset_preindex(an, out, -step),
                    (Size::Long, _) => insn::ldr_offset_preindex(an, out, -step),
                };
                self.emit(word);
                self.mark_dirty(reg + 8);
                out
            }
            5 => {
                let disp = self.fetch_ext16() as i16;
                let base = self.map_read(reg + 8);
                let out = self.alloc_tmp();
                self.emit_load_base_disp(size, sign_ext, base, out, i32::from(disp));
                out
            }
            6 => {
                let addr = self.ea_index_addr(IndexBase::Areg(reg));
                let out = self.alloc_tmp();
                self.emit_load_base_disp(size, sign_ext, addr, out, 0);
                self.free(addr);
                out
            }
            _ => match reg {
                0 | 1 | 2 => {
                    let addr = self.ea_const_addr(reg);
                    let out = self.alloc_tmp();
                    self.load_const(out, addr);
                    self.emit_load_base_disp(size, sign_ext, out, out, 0);
                    out
                }
                3 => {
                    let pc_base = self.ext_word_addr();
                    let addr = self.ea_index_addr(IndexBase::Pc(pc_base));
                    let out = self.alloc_tmp();
                    self.emit_load_base_disp(size, sign_ext, addr, out, 0);
                    self.free(addr);
                    out
                }
                4 => {
                    let value = match size {
                        Size::Byte => {
                            let v = u32::from(self.fetch_ext16() & 0xFF);
                            if sign_ext { v as u8 as i8 as i32 as u32 } else { v }
                        }
                        Size::Word => {
                            let v = u32::from(self.fetch_ext16());
                            if sign_ext { v as u16 as i16 as i32 as u32 } else { v }
                        }
                        Size::Long => self.fetch_ext32(),
                    };
                    let out = self.alloc_tmp();
                    self.load_const(out, value);
                    out
                }
                _ => unreachable!("decode tables admit no other absolute modes"),
            },
        }
    }

    // === Operand store ===

    /// Store `src` to the operand named by `ea`. Byte and word stores to
    /// a register write only the low bits of its 32-bit home.
    pub(crate) fn ea_store(&mut self, size: Size, ea: u8, src: Reg) {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            0 | 1 => {
                let gr = if mode == 0 { reg } else { reg + 8 };
                match size {
                    Size::Long => {
                        let dst = self.map_write(gr);
                        if dst != src {
                            self.emit(insn::mov_reg(dst, src));
                        }
                    }
                    Size::Word => {
                        let dst = self.map_read(gr);
                        self.emit(insn::bfxil(dst, src, 0, 16));
                    }
                    Size::Byte => {
                        let dst = self.map_read(gr);
                        self.emit(insn::bfxil(dst, src, 0, 8));
                    }
                }
                self.mark_dirty(gr);
            }
            2 => {
                let base = self.map_read(reg + 8);
                self.emit_store_base_disp(size, base, src, 0);
            }
            3 => {
                let an = self.map_read(reg + 8);
                let step = ea_step(size, reg);
                let word = match size {
                    Size::Byte => insn::strb_offset_postindex(an, src, step),
                    Size::Word => insn::strh_offset_postindex(an, src, step),
                    Size::Long => insn::str_offset_postindex(an, src, step),
                };
                self.emit(word);
                self.mark_dirty(reg + 8);
            }
            4 => {
                let an = self.map_read(reg + 8);
                let step = ea_step(size, reg);
                let word = match size {
                    Size::Byte => insn::strb_offset_preindex(an, src, -step),
                    Size::Word => insn::strh_offset_preindex(an, src, -step),
                    Size::Long => insn::str_offset_preindex(an, src, -step),
                };
                self.emit(word);
                self.mark_dirty(reg + 8);
            }
            5 => {
                let disp = self.fetch_ext16() as i16;
                let base = self.map_read(reg + 8);
                self.emit_store_base_disp(size, base, src, i32::from(disp));
            }
            6 => {
                let addr = self.ea_index_addr(IndexBase::Areg(reg));
                self.emit_store_base_disp(size, addr, src, 0);
                self.free(addr);
            }
            _ => match reg {
                0 | 1 => {
                    let addr = self.ea_const_addr(reg);
                    let t = self.alloc_tmp();
                    self.load_const(t, addr);
                    self.emit_store_base_disp(size, t, src, 0);
                    self.free(t);
                }
                _ => unreachable!("decode tables admit no other store modes"),
            },
        }
    }

    // === Read-modify-write through a memory EA ===

    /// Load the operand, run `modify` on its host register, store back.
    /// For (An)+ the address-register update rides on the post-indexed
    /// store, for -(An) on the pre-indexed load, so the access and the
    /// update stay one instruction. Register modes are the caller's
    /// business.
    pub(crate) fn ea_rmw(&mut self, size: Size, ea: u8, modify: impl FnOnce(&mut Self, Reg)) {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        debug_assert!(mode >= 2, "register modes are not memory RMW");
        match mode {
            3 => {
                let an = self.map_read(reg + 8);
                let t = self.alloc_tmp();
                let step = ea_step(size, reg);
                self.emit_load_base_disp(size, false, an, t, 0);
                modify(self, t);
                let word = match size {
                    Size::Byte => insn::strb_offset_postindex(an, t, step),
                    Size::Word => insn::strh_offset_postindex(an, t, step),
                    Size::Long => insn::str_offset_postindex(an, t, step),
                };
                self.emit(word);
                self.mark_dirty(reg + 8);
                self.free(t);
            }
            4 => {
                let an = self.map_read(reg + 8);
                let t = self.alloc_tmp();
                let step = ea_step(size, reg);
                let word = match size {
                    Size::Byte => insn::ldrb_offset_preindex(an, t, -step),
                    Size::Word => insn::ldrh_offset_preindex(an, t, -step),
                    Size::Long => insn::ldr_offset_preindex(an, t, -step),
                };
                self.emit(word);
                self.mark_dirty(reg + 8);
                modify(self, t);
                self.emit_store_base_disp(size, an, t, 0);
                self.free(t);
            }
            2 => {
                let base = self.map_read(reg + 8);
                let t = self.alloc_tmp();
                self.emit_load_base_disp(size, false, base, t, 0);
                modify(self, t);
                self.emit_store_base_disp(size, base, t, 0);
                self.free(t);
            }
            _ => {
                let addr = self.ea_addr(ea);
                let t = self.alloc_tmp();
                self.emit_load_base_disp(size, false, addr, t, 0);
                modify(self, t);
                self.emit_store_base_disp(size, addr, t, 0);
                self.free(addr);
                self.free(t);
            }
        }
    }

    /// Resolve any memory EA to an address register, applying the
    /// post-increment/pre-decrement side effect as explicit address
    /// arithmetic. Used by the atomic sequences (TAS, CAS), which need a
    /// stable address across an exclusive retry loop. The returned
    /// register is a temporary unless `ea` is mode 3/4, where it is the
    /// live An mapping (second tuple element false).
    pub(crate) fn ea_addr_with_update(&mut self, size: Size, ea: u8) -> (Reg, bool) {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            3 => {
                let an = self.map_read(reg + 8);
                let addr = self.copy_read(reg + 8);
                self.emit(insn::add_immed(an, an, ea_step(size, reg) as u16));
                self.mark_dirty(reg + 8);
                (addr, true)
            }
            4 => {
                let an = self.map_read(reg + 8);
                self.emit(insn::sub_immed(an, an, ea_step(size, reg) as u16));
                self.mark_dirty(reg + 8);
                (an, false)
            }
            2 => (self.map_read(reg + 8), false),
            _ => (self.ea_addr(ea), true),
        }
    }

    // === Address-only resolution (LEA, PEA, JMP, JSR, MOVEM, RMW) ===

    /// Resolve a control-mode EA (2, 5, 6, 7.0-7.3) to a fresh host
    /// register holding the address.
    pub(crate) fn ea_addr(&mut self, ea: u8) -> Reg {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            2 => self.copy_read(reg + 8),
            5 => {
                let disp = self.fetch_ext16() as i16;
                let base = self.map_read(reg + 8);
                let out = self.alloc_tmp();
                self.emit_add_base_disp(out, base, i32::from(disp));
                out
            }
            6 => self.ea_index_addr(IndexBase::Areg(reg)),
            7 => match reg {
                0 | 1 | 2 => {
                    let addr = self.ea_const_addr(reg);
                    let out = self.alloc_tmp();
                    self.load_const(out, addr);
                    out
                }
                3 => {
                    let pc_base = self.ext_word_addr();
                    self.ea_index_addr(IndexBase::Pc(pc_base))
                }
                _ => unreachable!("decode tables admit no other control modes"),
            },
            _ => unreachable!("ea_addr wants a control mode"),
        }
    }

    /// Absolute-word, absolute-long or PC-displacement address, all of
    /// which are compile-time constants.
    fn ea_const_addr(&mut self, reg7: u8) -> u32 {
        match reg7 {
            0 => self.fetch_ext16() as i16 as i32 as u32,
            1 => self.fetch_ext32(),
            2 => {
                let base = self.ext_word_addr();
                let disp = self.fetch_ext16() as i16;
                base.wrapping_add(disp as u32)
            }
            _ => unreachable!(),
        }
    }

    // === Indexed and memory-indirect forms ===

    fn ea_index_addr(&mut self, base: IndexBase) -> Reg {
        let ext = self.fetch_ext16();
        let idx_gr = ((ext >> 12) & 0xF) as u8;
        let idx_long = ext & 0x0800 != 0;
        let scale = ((ext >> 9) & 3) as u8;
        let out = self.alloc_tmp();

        if ext & 0x0100 == 0 {
            // Brief format: d8 + base + scaled index.
            let d8 = i32::from(ext as u8 as i8);
            match base {
                IndexBase::Areg(r) => {
                    let b = self.map_read(r + 8);
                    self.emit_add_base_disp(out, b, d8);
                }
                IndexBase::Pc(pc) => {
                    self.load_const(out, pc.wrapping_add(d8 as u32));
                }
            }
            self.emit_add_index(out, idx_gr, idx_long, scale);
            return out;
        }

        // Full format: optional base displacement, suppressible base and
        // index, optional memory indirection with an outer displacement.
        let base_suppress = ext & 0x0080 != 0;
        let index_suppress = ext & 0x0040 != 0;
        let bd = match (ext >> 4) & 3 {
            2 => i32::from(self.fetch_ext16() as i16),
            3 => self.fetch_ext32() as i32,
            _ => 0,
        };
        let iis = (ext & 7) as u8;

        match base {
            IndexBase::Areg(r) if !base_suppress => {
                let b = self.map_read(r + 8);
                self.emit_add_base_disp(out, b, bd);
            }
            IndexBase::Pc(pc) if !base_suppress => {
                self.load_const(out, pc.wrapping_add(bd as u32));
            }
            _ => {
                self.load_const(out, bd as u32);
            }
        }

        let indirect = iis != 0;
        let post_indexed = iis & 4 != 0;
        if !index_suppress && !(indirect && post_indexed) {
            self.emit_add_index(out, idx_gr, idx_long, scale);
        }
        if indirect {
            self.emit(insn::ldr_offset(out, out, 0));
            if !index_suppress && post_indexed {
                self.emit_add_index(out, idx_gr, idx_long, scale);
            }
            let od = match iis & 3 {
                2 => i32::from(self.fetch_ext16() as i16),
                3 => self.fetch_ext32() as i32,
                _ => 0,
            };
            if od != 0 {
                let b = out;
                self.emit_add_base_disp(out, b, od);
            }
        }
        out
    }

    fn emit_add_index(&mut self, out: Reg, idx_gr: u8, idx_long: bool, scale: u8) {
        let idx = self.map_read(idx_gr);
        if idx_long {
            self.emit(insn::add_reg(out, out, idx, Shift::Lsl, scale));
        } else {
            let t = self.alloc_tmp();
            self.emit(insn::sxth(t, idx));
            self.emit(insn::add_reg(out, out, t, Shift::Lsl, scale));
            self.free(t);
        }
    }

    /// `out = base + disp` with the shortest immediate form.
    pub(crate) fn emit_add_base_disp(&mut self, out: Reg, base: Reg, disp: i32) {
        if disp == 0 {
            if out != base {
                self.emit(insn::mov_reg(out, base));
            }
        } else if (-4096..4096).contains(&disp) {
            let op = if disp > 0 {
                insn::add_immed(out, base, disp as u16)
            } else {
                insn::sub_immed(out, base, (-disp) as u16)
            };
            self.emit(op);
        } else {
            let t = self.alloc_tmp();
            self.load_const(t, disp as u32);
            self.emit(insn::add_reg(out, base, t, Shift::Lsl, 0));
            self.free(t);
        }
    }

    // === Displacement-aware memory access ===

    /// Load through `base + disp`, splitting the displacement when it is
    /// outside the host addressing forms.
    pub(crate) fn emit_load_base_disp(
        &mut self,
        size: Size,
        sign_ext: bool,
        base: Reg,
        out: Reg,
        disp: i32,
    ) {
        if let Some(word) = direct_load(size, sign_ext, base, out, disp) {
            self.emit(word);
            return;
        }
        let t = self.alloc_tmp();
        self.load_const(t, disp as u32);
        self.emit(insn::add_reg(t, base, t, Shift::Lsl, 0));
        let word = direct_load(size, sign_ext, t, out, 0).expect("zero offset always encodes");
        self.emit(word);
        self.free(t);
    }

    pub(crate) fn emit_store_base_disp(&mut self, size: Size, base: Reg, src: Reg, disp: i32) {
        if let Some(word) = direct_store(size, base, src, disp) {
            self.emit(word);
            return;
        }
        let t = self.alloc_tmp();
        self.load_const(t, disp as u32);
        self.emit(insn::add_reg(t, base, t, Shift::Lsl, 0));
        let word = direct_store(size, t, src, 0).expect("zero offset always encodes");
        self.emit(word);
        self.free(t);
    }
}

/// Base register kind for indexed addressing.
enum IndexBase {
    Areg(u8),
    Pc(u32),
}

fn direct_load(size: Size, sign_ext: bool, base: Reg, out: Reg, disp: i32) -> Option<u32> {
    let scaled_max = match size {
        Size::Byte => 4096,
        Size::Word => 8192,
        Size::Long => 16384,
    };
    let aligned = disp % size.bytes() as i32 == 0;
    if (-256..256).contains(&disp) && disp != 0 {
        let d = disp as i16;
        Some(match (size, sign_ext) {
            (Size::Byte, false) => insn::ldurb_offset(base, out, d),
            (Size::Byte, true) => insn::ldursb_offset(base, out, d),
            (Size::Word, false) => insn::ldurh_offset(base, out, d),
            (Size::Word, true) => insn::ldursh_offset(base, out, d),
            (Size::Long, _) => insn::ldur_offset(base, out, d),
        })
    } else if disp >= 0 && disp < scaled_max && aligned {
        let d = disp as u16;
        Some(match (size, sign_ext) {
            (Size::Byte, false) => insn::ldrb_offset(base, out, d),
            (Size::Byte, true) => insn::ldrsb_offset(base, out, d),
            (Size::Word, false) => insn::ldrh_offset(base, out, d),
            (Size::Word, true) => insn::ldrsh_offset(base, out, d),
            (Size::Long, _) => insn::ldr_offset(base, out, d),
        })
    } else {
        None
    }
}

fn direct_store(size: Size, base: Reg, src: Reg, disp: i32) -> Option<u32> {
    let scaled_max = match size {
        Size::Byte => 4096,
        Size::Word => 8192,
        Size::Long => 16384,
    };
    let aligned = disp % size.bytes() as i32 == 0;
    if (-256..256).contains(&disp) && disp != 0 {
        let d = disp as i16;
        Some(match size {
            Size::Byte => insn::sturb_offset(base, src, d),
            Size::Word => insn::sturh_offset(base, src, d),
            Size::Long => insn::stur_offset(base, src, d),
        })
    } else if disp >= 0 && disp < scaled_max && aligned {
        let d = disp as u16;
        Some(match size {
            Size::Byte => insn::strb_offset(base, src, d),
            Size::Word => insn::strh_offset(base, src, d),
            Size::Long => insn::str_offset(base, src, d),
        })
    } else {
        None
    }
}
