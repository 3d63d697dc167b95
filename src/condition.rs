//! ARM condition-code evaluation.

use crate::regs::{CPSR_C, CPSR_N, CPSR_V, CPSR_Z};

/// Evaluates whether an instruction carrying condition code `cond` would
/// execute given the flags in `cpsr`.
///
/// `cond` is the 4-bit field occupying bits 31..28 of an ARM opcode. Codes
/// 14 (`AL`) and 15 (extended-instruction space) both evaluate to `true`:
/// callers are expected to have already routed extended-space opcodes to a
/// different decode table, per the architecture.
#[must_use]
pub fn condition_met(cond: u32, cpsr: u32) -> bool {
    let n = cpsr & CPSR_N != 0;
    let z = cpsr & CPSR_Z != 0;
    let c = cpsr & CPSR_C != 0;
    let v = cpsr & CPSR_V != 0;

    match cond & 0xf {
        0x0 => z,
        0x1 => !z,
        0x2 => c,
        0x3 => !c,
        0x4 => n,
        0x5 => !n,
        0x6 => v,
        0x7 => !v,
        0x8 => c && !z,
        0x9 => !c || z,
        0xa => n == v,
        0xb => n != v,
        0xc => !z && (n == v),
        0xd => z || (n != v),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_and_ne() {
        assert!(condition_met(0x0, CPSR_Z));
        assert!(!condition_met(0x0, 0));
        assert!(!condition_met(0x1, CPSR_Z));
        assert!(condition_met(0x1, 0));
    }

    #[test]
    fn always_is_always() {
        assert!(condition_met(0xe, 0));
        assert!(condition_met(0xe, CPSR_N | CPSR_Z | CPSR_C | CPSR_V));
    }

    #[test]
    fn extended_defaults_true() {
        assert!(condition_met(0xf, 0));
    }

    #[test]
    fn signed_comparisons() {
        // GE: N == V
        assert!(condition_met(0xa, 0));
        assert!(condition_met(0xa, CPSR_N | CPSR_V));
        assert!(!condition_met(0xa, CPSR_N));
        assert!(!condition_met(0xa, CPSR_V));

        // GT: !Z && (N == V)
        assert!(condition_met(0xc, 0));
        assert!(!condition_met(0xc, CPSR_Z));
        assert!(!condition_met(0xc, CPSR_N));
    }

    #[test]
    fn unsigned_comparisons() {
        // HI: C && !Z
        assert!(condition_met(0x8, CPSR_C));
        assert!(!condition_met(0x8, CPSR_C | CPSR_Z));
        assert!(!condition_met(0x8, 0));

        // LS: !C || Z
        assert!(condition_met(0x9, 0));
        assert!(condition_met(0x9, CPSR_Z));
        assert!(!condition_met(0x9, CPSR_C));
    }

    #[test]
    fn full_truth_table_matches_architecture() {
        // Brute-force agreement with the architectural reference semantics
        // restated directly (not copied from the evaluator under test).
        for cond in 0u32..16 {
            for bits in 0u32..16 {
                let n = bits & 0x8 != 0;
                let z = bits & 0x4 != 0;
                let c = bits & 0x2 != 0;
                let v = bits & 0x1 != 0;
                let cpsr = (n as u32) << 31 | (z as u32) << 30 | (c as u32) << 29 | (v as u32) << 28;

                let expected = match cond {
                    0x0 => z,
                    0x1 => !z,
                    0x2 => c,
                    0x3 => !c,
                    0x4 => n,
                    0x5 => !n,
                    0x6 => v,
                    0x7 => !v,
                    0x8 => c && !z,
                    0x9 => !c || z,
                    0xa => n == v,
                    0xb => n != v,
                    0xc => !z && n == v,
                    0xd => z || n != v,
                    0xe | 0xf => true,
                    _ => unreachable!(),
                };

                assert_eq!(condition_met(cond, cpsr), expected, "cond={cond:#x} cpsr={cpsr:#x}");
            }
        }
    }
}
