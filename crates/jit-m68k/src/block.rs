//! Block closing, exit stubs and the fixup trailer.
//!
//! A conditional branch whose target block is not compiled yet falls
//! through to a stub that sets the target guest PC and exits; the fixup
//! record lets the dispatcher rewrite the branch in place once the
//! target exists. When several branch sites converge on one target they
//! share a stub, and the extra sites are recorded as double-exit fixups.
//!
//! After the last exit the unit carries a trailer the trampoline can
//! parse without any side tables: the marker word `0xFFFF_FFFF`, a
//! count, then per fixup one word `kind << 28 | emit_offset` followed by
//! the target guest PC (zero for a local exit).

use asm_aarch64::{Cond, Offset};

use crate::ctx::Ctx;

/// What a fixup record means to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// End of unit; resume from the guest PC committed to `GuestState`.
    LocalExit,
    /// A conditional branch at `at` currently lands on an exit stub and
    /// may be rewritten to chain straight to the block at `target`.
    Bcc { target: u32 },
    /// A second branch site sharing the previous target's exit stub.
    DoubleExit { target: u32 },
}

impl FixupKind {
    const fn code(self) -> u32 {
        match self {
            FixupKind::LocalExit => 1,
            FixupKind::Bcc { .. } => 2,
            FixupKind::DoubleExit { .. } => 3,
        }
    }

    const fn target(self) -> u32 {
        match self {
            FixupKind::LocalExit => 0,
            FixupKind::Bcc { target } | FixupKind::DoubleExit { target } => target,
        }
    }
}

/// One deferred patch, resolved by the dispatcher at chain time.
#[derive(Debug, Clone, Copy)]
pub struct Fixup {
    /// Offset of the patchable instruction (or the exit, for
    /// `LocalExit`) in the emitted stream.
    pub at: Offset,
    pub kind: FixupKind,
}

/// A conditional branch emitted as a placeholder, waiting for its exit
/// stub at block close.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingBcc {
    pub site: Offset,
    pub cond: Cond,
    pub target: u32,
}

pub(crate) const TRAILER_MARKER: u32 = 0xFFFF_FFFF;

impl Ctx<'_> {
    /// Record a conditional branch site whose target is another unit.
    /// The instruction at `site` is a placeholder until block close.
    pub(crate) fn defer_bcc(&mut self, site: Offset, cond: Cond, target: u32) {
        self.pending_bcc.push(PendingBcc { site, cond, target });
    }

    /// Terminate the unit: commit state, exit, resolve pending branch
    /// stubs, and append the fixup trailer.
    pub(crate) fn close_block(&mut self) {
        if !self.block_done {
            self.flush_all_dirty();
            self.flush_pc();
            let at = self.cursor();
            self.emit_exit();
            self.fixups.push(Fixup { at, kind: FixupKind::LocalExit });
            self.block_done = true;
        }
        self.resolve_pending_bcc();
        self.emit_trailer();
    }

    /// Record the local exit a handler emitted itself.
    pub(crate) fn end_block_with_exit(&mut self) {
        self.flush_all_dirty();
        self.flush_pc();
        let at = self.cursor();
        self.emit_exit();
        self.fixups.push(Fixup { at, kind: FixupKind::LocalExit });
        self.block_done = true;
    }

    fn resolve_pending_bcc(&mut self) {
        let pending = std::mem::take(&mut self.pending_bcc);
        let mut stubs: Vec<(u32, Offset)> = Vec::new();
        for bcc in &pending {
            let stub = match stubs.iter().find(|(t, _)| *t == bcc.target) {
                Some(&(_, at)) => {
                    self.fixups.push(Fixup {
                        at: bcc.site,
                        kind: FixupKind::DoubleExit { target: bcc.target },
                    });
                    at
                }
                None => {
                    let at = self.cursor();
                    self.set_pc_const(bcc.target);
                    self.emit_exit();
                    stubs.push((bcc.target, at));
                    self.fixups.push(Fixup {
                        at: bcc.site,
                        kind: FixupKind::Bcc { target: bcc.target },
                    });
                    at
                }
            };
            let delta = bcc.site.distance_to(stub);
            self.buf.patch(bcc.site, asm_aarch64::insn::b_cc(bcc.cond, delta));
        }
    }

    fn emit_trailer(&mut self) {
        self.emit(TRAILER_MARKER);
        self.emit(self.fixups.len() as u32);
        let records: Vec<(u32, u32)> = self
            .fixups
            .iter()
            .map(|f| ((f.kind.code() << 28) | f.at.0, f.kind.target()))
            .collect();
        for (word, target) in records {
            self.emit(word);
            self.emit(target);
        }
    }
}
