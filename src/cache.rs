//! The live ARMv7-A [`Platform`] implementation.
//!
//! Since the agent that performs data access is separate from the agent
//! that performs instruction fetches, a write that patches an instruction
//! (installing or removing a trap opcode, per 4.F) is not visible to the
//! CPU's fetch pipeline until:
//!
//! 1. The data cache is cleaned to the Point of Unification, so the write
//!    is visible when the instruction side next queries main memory.
//! 2. The instruction cache is invalidated, so stale fetched state is
//!    discarded.
//! 3. The branch predictor is invalidated, since any prediction trained on
//!    the old instruction is now wrong.
//!
//! This module is compiled only for `target_arch = "arm"`; host-side tests
//! exercise the stub against [`crate::platform::NullPlatform`] instead.

#![cfg(target_arch = "arm")]

use core::arch::asm;

use crate::platform::Platform;

/// The concrete [`Platform`] for a live ARMv7-A target.
///
/// Holds no state of its own: every operation is a direct coprocessor
/// access by address. Firmware typically keeps one `static mut
/// Arm32Platform` and hands a `&'static mut` reference of it to
/// [`crate::init_debug`].
#[derive(Debug, Default)]
pub struct Arm32Platform;

impl Platform for Arm32Platform {
    fn sync_instruction_memory(&mut self, addr: u32) {
        unsafe {
            // Data Cache Clean by MVA to PoU.
            asm!(
                "mcr p15, 0, {mva}, c7, c11, 1",
                "dsb",
                mva = in(reg) addr,
                options(nostack, preserves_flags),
            );

            // Instruction Cache Invalidate by MVA to PoU, then Branch
            // Predictor Invalidate by MVA.
            asm!(
                "mcr p15, 0, {mva}, c7, c5, 1", // ICIMVAU
                "mcr p15, 0, {mva}, c7, c5, 7", // BPIMVA
                "dsb",
                "isb",
                mva = in(reg) addr,
                options(nostack, preserves_flags),
            );
        }
    }

    fn mask_irqs(&mut self, keep_enabled: u32) -> u32 {
        // The interrupt controller's own enable registers are
        // platform-specific MMIO this generic crate has no address for;
        // firmware wraps this type to route `keep_enabled` into its
        // interrupt controller. Here we flip the one thing every ARMv7-A
        // core has in common: the CPSR IRQ mask bit.
        let previous: u32;
        unsafe {
            asm!(
                "mrs {cpsr}, cpsr",
                cpsr = out(reg) previous,
                options(nomem, nostack, preserves_flags),
            );

            if keep_enabled != 0 {
                asm!("cpsie i", options(nostack));
            } else {
                asm!("cpsid i", options(nostack));
            }
        }
        previous
    }

    fn restore_irqs(&mut self, previous: u32) {
        const IRQ_MASK_BIT: u32 = 1 << 7;
        unsafe {
            if previous & IRQ_MASK_BIT == 0 {
                asm!("cpsie i", options(nostack));
            } else {
                asm!("cpsid i", options(nostack));
            }
        }
    }
}
