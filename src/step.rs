//! Single-step planning (4.D): given the instruction about to execute,
//! compute the address a stepping breakpoint must be planted at so that
//! exactly one logical source step returns control to the stub.

use crate::{
    condition::condition_met,
    decode::{self, DecodeResult},
    memory::TargetMemory,
    regs::{CPSR, PC, RegisterFile},
};

/// The address (and instruction-set state) a stepping breakpoint must be
/// installed at to catch the next retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTarget {
    /// The address to plant the stepping breakpoint at.
    pub address: u32,
    /// Whether `address` should be armed with the Thumb or ARM trap
    /// opcode.
    pub thumb: bool,
}

/// Computes the address execution will next land on if the program resumes
/// at `instr_addr` with register state `regs`, per the algorithm in 4.D.
///
/// `regs`'s `PC` field must hold the *current* value (i.e. `instr_addr`
/// itself, not the architectural `PC + 8`/`PC + 4` value) — this function
/// derives the architectural value itself before calling into the
/// decoders, exactly as 4.D specifies.
#[must_use]
pub fn plan_step(instr_addr: u32, regs: &RegisterFile, mem: &dyn TargetMemory) -> StepTarget {
    let thumb = regs.is_thumb();
    let linear_successor =
        StepTarget { address: instr_addr.wrapping_add(if thumb { 2 } else { 4 }), thumb };

    let mut decode_regs = *regs;
    decode_regs.set(PC, regs.architectural_pc(instr_addr));

    if thumb {
        let Some(opcode) = mem.read_u16(instr_addr) else {
            return linear_successor;
        };
        return resolve(decode::thumb::decode(opcode, &decode_regs, mem), linear_successor);
    }

    let Some(opcode) = mem.read_u32(instr_addr) else {
        return linear_successor;
    };

    let cond = opcode >> 28;
    if cond != 0xF && !condition_met(cond, regs.get(CPSR)) {
        return linear_successor;
    }

    resolve(decode::arm::decode(opcode, &decode_regs, mem), linear_successor)
}

fn resolve(result: DecodeResult, linear_successor: StepTarget) -> StepTarget {
    match result {
        // An ARM decoder that cannot compute a data-processing destination
        // reports `UnknownDestination` rather than silently guessing. The
        // planner's only sound fallback is the linear successor; a step
        // across such an instruction may not stop where expected, which is
        // a documented limitation (see DESIGN.md).
        DecodeResult::NoBranch | DecodeResult::UnknownDestination => linear_successor,
        DecodeResult::Branch { dest, thumb } => StepTarget { address: dest, thumb },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::FakeMemory,
        regs::{CPSR_Z, LR},
    };

    #[test]
    fn non_branching_arm_instruction_steps_linearly() {
        let mut mem = FakeMemory::new(0x0200_0000, 16);
        mem.load(0x0200_0000, &0xE1A0_0001u32.to_le_bytes()); // MOV R0, R1
        let mut regs = RegisterFile::zeroed();
        regs.set(PC, 0x0200_0000);

        let target = plan_step(0x0200_0000, &regs, &mem);
        assert_eq!(target, StepTarget { address: 0x0200_0004, thumb: false });
    }

    #[test]
    fn unmet_condition_steps_linearly() {
        let mut mem = FakeMemory::new(0x0200_0000, 16);
        // BEQ +4, but Z is clear so the branch never executes.
        mem.load(0x0200_0000, &0x0A00_0001u32.to_le_bytes());
        let mut regs = RegisterFile::zeroed();
        regs.set(PC, 0x0200_0000);

        let target = plan_step(0x0200_0000, &regs, &mem);
        assert_eq!(target, StepTarget { address: 0x0200_0004, thumb: false });
    }

    #[test]
    fn step_over_bl_lands_at_destination() {
        let mut mem = FakeMemory::new(0x0200_0000, 16);
        // BL +0x3C (cond=AL): imm24 = 0x3C >> 2 = 0xF, change = 0x3C.
        // Architectural PC = 0x0200_0000 + 8, so dest = 0x0200_0008 + 0x3C
        // = 0x0200_0044, matching the literal scenario in §8.
        let opcode = 0xEB00_0000 | 0xFu32;
        mem.load(0x0200_0000, &opcode.to_le_bytes());
        let mut regs = RegisterFile::zeroed();
        regs.set(PC, 0x0200_0000);

        let target = plan_step(0x0200_0000, &regs, &mem);
        assert_eq!(target, StepTarget { address: 0x0200_0044, thumb: false });
    }

    #[test]
    fn thumb_conditional_branch_taken_plans_destination() {
        let mut mem = FakeMemory::new(0x0800_0000, 16);
        // BEQ #2
        let opcode: u16 = 0xD000 | 0x01;
        mem.load(0x0800_0000, &opcode.to_le_bytes());
        let mut regs = RegisterFile::zeroed();
        regs.set(PC, 0x0800_0000);
        regs.set(CPSR, CPSR_Z | crate::regs::CPSR_T);

        let target = plan_step(0x0800_0000, &regs, &mem);
        assert_eq!(target, StepTarget { address: 0x0800_0006, thumb: true });
    }

    #[test]
    fn bx_lr_switches_to_arm() {
        let mut mem = FakeMemory::new(0x0800_0000, 16);
        // BX LR
        let opcode: u16 = 0x4700 | (u16::try_from(LR).unwrap() << 3);
        mem.load(0x0800_0000, &opcode.to_le_bytes());
        let mut regs = RegisterFile::zeroed();
        regs.set(PC, 0x0800_0000);
        regs.set(LR, 0x0200_0000);
        regs.set(CPSR, crate::regs::CPSR_T);

        let target = plan_step(0x0800_0000, &regs, &mem);
        assert_eq!(target, StepTarget { address: 0x0200_0000, thumb: false });
    }
}
