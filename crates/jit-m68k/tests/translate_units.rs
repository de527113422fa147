//! Translation-unit tests over a flat big-endian test memory.
//!
//! These check the translate-time contract of a unit: PC accounting,
//! dirty-register commits, fixup records and the emitted-code shapes the
//! dispatcher relies on. Everything asserted here is independent of the
//! host the tests run on.

use asm_aarch64::insn;
use jit_m68k::state::SR_OFFSET;
use jit_m68k::{translate_block, FixupKind, JitConfig, REG_CC, REG_CTX, REG_PC};

const BASE: u32 = 0x100;

/// 64KB of zeroed guest memory with a program at `BASE`.
fn memory(program: &[u16]) -> Vec<u8> {
    let mut mem = vec![0u8; 0x1_0000];
    for (i, w) in program.iter().enumerate() {
        let a = BASE as usize + i * 2;
        mem[a] = (w >> 8) as u8;
        mem[a + 1] = *w as u8;
    }
    mem
}

fn translate(program: &[u16], horizon: u32) -> jit_m68k::TranslationUnit {
    let mem = memory(program);
    let cfg = JitConfig {
        block_horizon: horizon,
        ..JitConfig::default()
    };
    translate_block(&mem, &cfg, BASE)
}

fn words(unit: &jit_m68k::TranslationUnit) -> Vec<u32> {
    unit.code.words().to_vec()
}

#[test]
fn unit_closes_with_exit_and_trailer() {
    let unit = translate(&[0x4E71, 0x4E71], 2); // NOP; NOP
    assert_eq!(unit.insn_count, 2);
    assert_eq!(unit.guest_start, BASE);
    assert_eq!(unit.guest_end, BASE + 4);
    assert!(!unit.aborted);

    let w = words(&unit);
    // The exit commits SR and PC and returns.
    assert!(w.contains(&insn::str_offset(REG_CTX, REG_CC, SR_OFFSET)));
    assert!(w.contains(&insn::ret()));
    // Trailer: marker, count, one record pair per fixup.
    let marker = w
        .iter()
        .position(|&x| x == 0xFFFF_FFFF)
        .expect("trailer marker");
    assert_eq!(w[marker + 1] as usize, unit.fixups.len());
    assert_eq!(w.len(), marker + 2 + 2 * unit.fixups.len());
    assert!(matches!(unit.fixups[0].kind, FixupKind::LocalExit));
}

#[test]
fn pc_updates_coalesce_across_straight_line_code() {
    // Three MOVEQs consume six bytes; exactly one PC adjustment may
    // appear, at the exit.
    let unit = translate(&[0x7000, 0x7201, 0x7402], 3);
    let w = words(&unit);
    let adjust = insn::add_immed(REG_PC, REG_PC, 6);
    assert_eq!(w.iter().filter(|&&x| x == adjust).count(), 1);
    let any_pc_add = w
        .iter()
        .filter(|&&x| x & 0xFF00_03FF == insn::add_immed(REG_PC, REG_PC, 0) & 0xFF00_03FF)
        .count();
    assert_eq!(any_pc_add, 1, "only the coalesced adjustment");
}

#[test]
fn dirty_registers_are_committed_at_exit() {
    let unit = translate(&[0x7005], 1); // MOVEQ #5,D0
    let w = words(&unit);
    // D0 lands in the first pool register and must be stored back.
    assert!(w.contains(&insn::movw_immed_u16(0, 5)));
    assert!(w.contains(&insn::str_offset(REG_CTX, 0, 0)));
}

#[test]
fn moveq_materializes_flags_statically() {
    // MOVEQ #0 followed by BEQ: Z must be set in the mirror without any
    // host flag computation.
    let unit = translate(&[0x7000, 0x6700, 0x0002], 2);
    let w = words(&unit);
    assert!(w.contains(&insn::orr_immed(REG_CC, REG_CC, 1, 30)), "Z set");
}

#[test]
fn conditional_branch_records_a_chainable_fixup() {
    let unit = translate(&[0x7000, 0x6700, 0x0002], 2);
    let target = BASE + 4 + 2;
    let bcc: Vec<_> = unit
        .fixups
        .iter()
        .filter_map(|f| match f.kind {
            FixupKind::Bcc { target } => Some((f.at, target)),
            _ => None,
        })
        .collect();
    assert_eq!(bcc.len(), 1);
    assert_eq!(bcc[0].1, target);
    // The branch site holds a resolved conditional branch.
    let site = unit.code.peek(bcc[0].0);
    assert_eq!(site & 0xFF00_0000, 0x5400_0000, "b.cond at the fixup site");
    // Its stub loads the target PC before exiting.
    assert!(words(&unit).contains(&insn::movw_immed_u16(REG_PC, target as u16)));
}

#[test]
fn converging_branches_share_an_exit_stub() {
    // BEQ and BNE to the same target.
    let unit = translate(&[0x7000, 0x6700, 0x0006, 0x6600, 0x0002], 3);
    let doubles = unit
        .fixups
        .iter()
        .filter(|f| matches!(f.kind, FixupKind::DoubleExit { .. }))
        .count();
    assert_eq!(doubles, 1);
}

#[test]
fn byte_postincrement_through_a7_steps_by_two() {
    let unit = translate(&[0x101F], 1); // MOVE.B (A7)+,D0
    let w = words(&unit);
    assert!(w.contains(&insn::ldrb_offset_postindex(0, 1, 2)));
}

#[test]
fn movem_predecrement_fuses_store_pairs() {
    // MOVEM.L D0-D3,-(A7)
    let unit = translate(&[0x48E7, 0xF000], 1);
    let w = words(&unit);
    assert!(w.contains(&insn::sub_immed(1, 0, 16)), "single An adjust base");
    assert!(w.contains(&insn::stp_offset(1, 2, 3, 0)), "paired store");
    assert!(w.contains(&insn::stp_offset(1, 4, 5, 8)), "second pair");
    assert!(w.contains(&insn::mov_reg(0, 1)), "A7 takes the final value");
}

#[test]
fn cas_long_uses_exclusives_and_a_barrier() {
    // CAS.L D1,D0,(A0)
    let unit = translate(&[0x0ED0, 0x0001], 1);
    let w = words(&unit);
    assert!(w.iter().any(|&x| x & 0xFFFF_FC00 == 0x885F_7C00), "ldxr");
    assert!(w.iter().any(|&x| x & 0xFFE0_FC00 == 0x8800_7C00), "stxr");
    assert!(w.contains(&insn::dmb_ish()));
}

#[test]
fn divide_emits_zero_check_and_exception_side_path() {
    // DIVU.W #5,D0
    let unit = translate(&[0x80FC, 0x0005], 1);
    let w = words(&unit);
    assert!(w.iter().any(|&x| x & 0xFFE0_FC00 == 0x1AC0_0800), "udiv");
    // The exception side path pushes a format 2 frame word:
    // (2 << 12) | (5 << 2).
    assert!(w.contains(&insn::movw_immed_u16(14, 0x2014)));
}

#[test]
fn illegal_opcode_emits_exception_never_panics() {
    let unit = translate(&[0x4AFC], 1); // ILLEGAL
    assert_eq!(unit.insn_count, 1);
    let w = words(&unit);
    // Vector fetch through VBR at vector 4.
    assert!(w.contains(&insn::ldr_offset(14, REG_PC, 16)));
    assert!(w.contains(&insn::ret()));
}

#[test]
fn supervisor_sr_write_closes_the_unit() {
    // MOVE #$2700,SR then a NOP that must not be translated.
    let unit = translate(&[0x46FC, 0x2700, 0x4E71], 8);
    assert_eq!(unit.insn_count, 1);
    let w = words(&unit);
    assert!(w.contains(&insn::msr_daifclr(2)), "interrupt unmask path");
}

#[test]
fn bra_ends_the_unit_through_a_stub() {
    let unit = translate(&[0x6000, 0x0010, 0x4E71], 8);
    assert_eq!(unit.insn_count, 1);
    let target = BASE + 2 + 0x10;
    assert!(unit
        .fixups
        .iter()
        .any(|f| matches!(f.kind, FixupKind::Bcc { target: t } if t == target)));
}

#[test]
fn bsr_inlines_the_subroutine_body() {
    // BSR +4 lands on a MOVEQ; with return inlining the unit keeps
    // translating at the target.
    let unit = translate(&[0x6100, 0x0004, 0x4E71, 0x7007], 4);
    assert!(unit.insn_count >= 2, "translation continued at the target");
    let w = words(&unit);
    // The return address push onto the guest stack.
    assert!(w.iter().any(|&x| x & 0xFFC0_0C00 == insn::str_offset_preindex(0, 0, -4) & 0xFFC0_0C00));
    // The inlined body at BASE+6: MOVEQ #7 materialized somewhere.
    assert!(w.iter().any(|&x| x & 0xFFFF_FFE0 == 0x5280_00E0));
}

#[test]
fn stop_emits_the_event_wait_loop() {
    let unit = translate(&[0x4E72, 0x2000], 1); // STOP #$2000
    let w = words(&unit);
    assert!(w.contains(&insn::wfe()));
}

#[test]
fn tas_memory_uses_an_exclusive_loop() {
    let unit = translate(&[0x4AD0], 1); // TAS (A0)
    let w = words(&unit);
    assert!(w.iter().any(|&x| x & 0xFFFF_FC00 == 0x085F_7C00), "ldxrb");
    assert!(w.iter().any(|&x| x & 0xFFE0_FC00 == 0x0800_7C00), "stxrb");
}

#[test]
fn ext_pair_fuses_into_one_sign_extend() {
    // EXT.W D2; EXT.L D2 followed by a flag consumer.
    let unit = translate(&[0x4882, 0x48C2, 0x6700, 0x0002], 8);
    // Both guest instructions consumed, one unit instruction count each
    // reported by the fused handler.
    assert_eq!(unit.guest_end, BASE + 8);
    let w = words(&unit);
    let sxtb_count = w
        .iter()
        .filter(|&&x| x & 0xFFFF_FC00 == insn::sxtb(0, 0) & 0xFFFF_FC00)
        .count();
    assert_eq!(sxtb_count, 1, "one sign-extension for the pair");
}

#[test]
fn allocator_abort_is_impossible_in_straight_code() {
    // A long run of register-hungry instructions never exhausts the
    // pool because mappings from earlier instructions are evictable.
    let mut program = Vec::new();
    for dn in 0..8u16 {
        program.push(0x7000 | (dn << 9) | dn); // MOVEQ #n,Dn
    }
    for an in 0..7u16 {
        // LEA (d16,An),An with zero displacement.
        program.push(0x41E8 | (an << 9) | an);
        program.push(0);
    }
    let unit = translate(&program, 15);
    assert!(!unit.aborted);
    assert_eq!(unit.insn_count, 15);
}
