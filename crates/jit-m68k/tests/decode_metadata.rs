//! Decode-metadata tests: the pure accessors and the decode tables.
//!
//! `sr_mask` and `insn_length` must agree with the architecture without
//! running any emitter, and the tables must route every 16-bit opcode
//! somewhere safe — unknown patterns emit the illegal-instruction
//! exception rather than touching anything they should not.

use jit_m68k::ccr::{SR_C, SR_CCR, SR_N, SR_NZVC, SR_V, SR_X, SR_Z};
use jit_m68k::{insn_length, sr_mask, translate_block, JitConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BASE: u32 = 0x100;

fn memory(program: &[u16]) -> Vec<u8> {
    let mut mem = vec![0u8; 0x1_0000];
    for (i, w) in program.iter().enumerate() {
        let a = BASE as usize + i * 2;
        mem[a] = (w >> 8) as u8;
        mem[a + 1] = *w as u8;
    }
    mem
}

#[test]
fn sr_mask_matches_the_architecture() {
    // ADD.L D0,D0 produces the whole CCR, consumes nothing.
    assert_eq!(sr_mask(0xD080), (0, SR_CCR));
    // CMP.L sets NZVC only.
    assert_eq!(sr_mask(0xB080), (0, SR_NZVC));
    // MOVEA.L D0,A0 is flag-transparent.
    assert_eq!(sr_mask(0x2040), (0, 0));
    // TST.B D0.
    assert_eq!(sr_mask(0x4A00), (0, SR_NZVC));
    // ADDX.L D0,D0 consumes X and the accumulating Z.
    assert_eq!(sr_mask(0xD180), (SR_X | SR_Z, SR_CCR));
    // NOP touches nothing.
    assert_eq!(sr_mask(0x4E71), (0, 0));
}

#[test]
fn conditional_consumers_need_only_their_condition() {
    assert_eq!(sr_mask(0x6700).0, SR_Z, "BEQ");
    assert_eq!(sr_mask(0x6B00).0, SR_N, "BMI");
    assert_eq!(sr_mask(0x6200).0, SR_Z | SR_C, "BHI");
    assert_eq!(sr_mask(0x6C00).0, SR_N | SR_V, "BGE");
    assert_eq!(sr_mask(0x6000).0, 0, "BRA");
    // DBF consumes nothing, DBEQ consumes Z.
    assert_eq!(sr_mask(0x51C8).0, 0);
    assert_eq!(sr_mask(0x57C8).0, SR_Z);
    // Scc through the same table.
    assert_eq!(sr_mask(0x54C0).0, SR_C, "SCC D0");
}

#[test]
fn insn_length_is_a_closed_function_of_the_tail() {
    let mem = memory(&[0x4E71]);
    assert_eq!(insn_length(&mem, BASE), 1, "NOP");

    let mem = memory(&[0x7001]);
    assert_eq!(insn_length(&mem, BASE), 1, "MOVEQ");

    let mem = memory(&[0x0680, 0x0001, 0x0000]);
    assert_eq!(insn_length(&mem, BASE), 3, "ADDI.L #,D0");

    let mem = memory(&[0x2B6C, 0x0010, 0x0020]);
    assert_eq!(insn_length(&mem, BASE), 3, "MOVE.L (d16,A4),(d16,A5)");

    let mem = memory(&[0x6700, 0x0040]);
    assert_eq!(insn_length(&mem, BASE), 2, "BEQ.W");

    let mem = memory(&[0x61FF, 0x0000, 0x1000]);
    assert_eq!(insn_length(&mem, BASE), 3, "BSR.L");

    // Brief extension word: one tail word.
    let mem = memory(&[0x2070, 0x1000]);
    assert_eq!(insn_length(&mem, BASE), 2, "MOVEA.L (d8,A0,D1.W),A0");

    // Full extension word with a 32-bit base displacement.
    let mem = memory(&[0x2070, 0x0130, 0x0001, 0x0000]);
    assert_eq!(insn_length(&mem, BASE), 4, "MOVEA.L (bd32,A0),A0");

    // MOVEM carries its mask word plus the EA tail.
    let mem = memory(&[0x48E7, 0xFFFE]);
    assert_eq!(insn_length(&mem, BASE), 2, "MOVEM.L list,-(A7)");

    // Absolute long destination adds two words after the source tail.
    let mem = memory(&[0x23C0, 0x0001, 0x0000]);
    assert_eq!(insn_length(&mem, BASE), 3, "MOVE.L D0,(abs.L)");
}

#[test]
fn flag_lookahead_trims_dead_updates() {
    // ADD.L D1,D0 followed by MOVE.L D0,D2 then BEQ: the MOVE rewrites
    // NZVC, so the ADD's update mask keeps only X (still live past the
    // branch) while the MOVE keeps Z for the branch.
    let mem = memory(&[0xD081, 0x2400, 0x6700, 0x0002]);
    let cfg = JitConfig::default();
    let unit = translate_block(&mem, &cfg, BASE);
    assert!(unit.insn_count >= 3);
    // The ADD emits no NZCV materialization: no mrs appears before the
    // MOVE's own flag commit. One mrs at most (the MOVE's).
    let mrs_count = unit
        .code
        .words()
        .iter()
        .filter(|&&w| w & 0xFFFF_FFE0 == 0xD53B_4200)
        .count();
    assert!(mrs_count <= 1, "dead ADD flags were materialized");
}

#[test]
fn every_opcode_translates_without_panicking() {
    // The decode contract: unknown patterns fold into the
    // illegal-instruction exception, never a host fault. Extension
    // words read as zero.
    let mut rng = StdRng::seed_from_u64(0x68000);
    let cfg = JitConfig {
        block_horizon: 1,
        ..JitConfig::default()
    };
    for _ in 0..20_000 {
        let opcode: u16 = rng.r#gen();
        let mem = memory(&[opcode]);
        let unit = translate_block(&mem, &cfg, BASE);
        assert!(unit.code.words().contains(&0xD65F_03C0), "opcode {opcode:04x} must exit");
    }
    // And the whole 16-bit space once, deterministically.
    for opcode in 0..=u16::MAX {
        let mem = memory(&[opcode]);
        let _ = translate_block(&mem, &cfg, BASE);
    }
}
