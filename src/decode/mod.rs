//! Instruction decoding for the subset of ARM and Thumb encodings that can
//! redirect control flow (write to the program counter).

pub mod arm;
pub mod thumb;

use crate::{memory::TargetMemory, regs::RegisterFile};

/// The result of asking a decoder whether an instruction changes the
/// program counter, and to where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeResult {
    /// The instruction does not write to the program counter; control falls
    /// through to the next instruction.
    NoBranch,
    /// The instruction branches to `dest`, switching to Thumb state if
    /// `thumb` is set.
    Branch {
        /// The destination address, with the mode-select bit already
        /// masked off.
        dest: u32,
        /// Whether the destination should be entered in Thumb state.
        thumb: bool,
    },
    /// The instruction writes to the program counter, but this decoder
    /// cannot yet compute the destination (see the barrel-shifter caveat on
    /// data-processing instructions). Callers should fall back to treating
    /// the next linear instruction as the step target.
    UnknownDestination,
}

/// Decodes whichever instruction is current in `regs` (ARM or Thumb,
/// according to [`RegisterFile::is_thumb`]), assuming the caller has already
/// established that the instruction *would* execute (see
/// [`crate::condition::condition_met`] for the ARM case) and that
/// `regs`'s PC field already holds the architectural current-PC value (see
/// [`RegisterFile::architectural_pc`]).
///
/// `mem` backs the handful of encodings (`LDR`/`LDM`/`POP` with `Rd`/list
/// containing the PC) that must dereference a computed address to find
/// their destination rather than reading it out of a register.
#[must_use]
pub fn decode(opcode: u32, regs: &RegisterFile, mem: &dyn TargetMemory) -> DecodeResult {
    if regs.is_thumb() {
        thumb::decode(opcode as u16, regs, mem)
    } else {
        arm::decode(opcode, regs, mem)
    }
}
