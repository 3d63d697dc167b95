//! ARM-state branch decoding.
//!
//! The match tables below mirror the two dispatch tables of the original
//! jump-check implementation (`armJumpTestTable_cond` / `_extd`), just
//! expressed as a `match` over tagged mask/value pairs instead of an array
//! of function pointers.

use crate::{
    memory::TargetMemory,
    regs::{CPSR_C, PC, RegisterFile},
};

use super::DecodeResult;

const CONDITION_MASK: u32 = 0xF000_0000;
const CONDITION_EXTD: u32 = 0xF000_0000;

const B_BL_MASK: u32 = 0x0E00_0000;
const B_BL_VALUE: u32 = 0x0A00_0000;

const BLX1_MASK: u32 = 0xFE00_0000;
const BLX1_VALUE: u32 = 0xFA00_0000;

const BLX2_MASK: u32 = 0x0FFF_FFF0;
const BLX2_VALUE: u32 = 0x012F_FF30;
const BX_MASK: u32 = 0x0FFF_FFF0;
const BX_VALUE: u32 = 0x012F_FF10;

const LDR_MASK: u32 = 0x0C50_F000;
const LDR_VALUE: u32 = 0x0410_F000;

const LDM_MASK: u32 = 0x0E10_8000;
const LDM_VALUE: u32 = 0x0810_8000;

const ADD_MASK: u32 = 0x0DE0_F000;
const ADD_VALUE: u32 = 0x0080_F000;

/// Decodes an ARM-state opcode, returning whether (and where) it branches.
///
/// Per the architecture, a condition field of `0xF` selects the extended
/// instruction space (only `BLX1` is handled there); any other condition
/// selects the conditional space. The caller is responsible for having
/// already evaluated the condition via [`crate::condition::condition_met`]
/// for the conditional space — this function performs no condition check of
/// its own.
#[must_use]
pub fn decode(opcode: u32, regs: &RegisterFile, mem: &dyn TargetMemory) -> DecodeResult {
    if opcode & CONDITION_MASK == CONDITION_EXTD {
        if opcode & BLX1_MASK == BLX1_VALUE {
            return blx1(opcode, regs);
        }
        return DecodeResult::NoBranch;
    }

    if opcode & B_BL_MASK == B_BL_VALUE {
        return b_bl(opcode, regs);
    }
    if opcode & BLX2_MASK == BLX2_VALUE || opcode & BX_MASK == BX_VALUE {
        return blx2_bx(opcode, regs);
    }
    if opcode & LDR_MASK == LDR_VALUE {
        return ldr(opcode, regs, mem);
    }
    if opcode & LDM_MASK == LDM_VALUE {
        return ldm(opcode, regs, mem);
    }
    if opcode & ADD_MASK == ADD_VALUE {
        return add(opcode, regs);
    }

    DecodeResult::NoBranch
}

fn sign_extend_24(imm24: u32) -> u32 {
    if imm24 & 0x0080_0000 != 0 {
        imm24 | 0xFF00_0000
    } else {
        imm24
    }
}

fn b_bl(opcode: u32, regs: &RegisterFile) -> DecodeResult {
    let change = sign_extend_24(opcode & 0x00FF_FFFF) << 2;
    let dest = regs.get(PC).wrapping_add(change);
    DecodeResult::Branch { dest, thumb: regs.is_thumb() }
}

fn blx1(opcode: u32, regs: &RegisterFile) -> DecodeResult {
    let change = sign_extend_24(opcode & 0x00FF_FFFF) << 2;
    let h_bit = if opcode & 0x0100_0000 != 0 { 1 << 1 } else { 0 };
    let dest = regs.get(PC).wrapping_add(change).wrapping_add(h_bit);
    DecodeResult::Branch { dest, thumb: true }
}

fn blx2_bx(opcode: u32, regs: &RegisterFile) -> DecodeResult {
    let rm = (opcode & 0xF) as usize;
    let value = regs.get(rm);
    DecodeResult::Branch { dest: value & !1, thumb: value & 1 != 0 }
}

/// Evaluates the full ARM addressing-mode-2 shifter: `Rm` shifted by an
/// immediate shift amount, per the `LSL`/`LSR`/`ASR`/`ROR`/`RRX` encodings.
fn shifter_operand(shift_type: u32, shift_imm: u32, rm_value: u32, carry_in: bool) -> u32 {
    match shift_type {
        0x0 => rm_value << shift_imm,
        0x1 => {
            if shift_imm == 0 {
                0
            } else {
                rm_value >> shift_imm
            }
        }
        0x2 => {
            if shift_imm == 0 {
                if rm_value & 0x8000_0000 != 0 { 0xFFFF_FFFF } else { 0 }
            } else {
                ((rm_value as i32) >> shift_imm) as u32
            }
        }
        0x3 => {
            if shift_imm == 0 {
                // RRX
                let mut result = rm_value >> 1;
                if carry_in {
                    result |= 0x8000_0000;
                }
                result
            } else {
                rm_value.rotate_right(shift_imm)
            }
        }
        _ => unreachable!("shift_type is masked to 2 bits"),
    }
}

fn ldr(opcode: u32, regs: &RegisterFile, mem: &dyn TargetMemory) -> DecodeResult {
    let rn = ((opcode & 0x000F_0000) >> 16) as usize;
    let mut base_addr = regs.get(rn);

    const P_BIT: u32 = 1 << 24;
    const U_BIT: u32 = 1 << 23;
    const I_BIT: u32 = 1 << 25;

    if opcode & P_BIT != 0 {
        let offset = if opcode & I_BIT != 0 {
            let rm = (opcode & 0xF) as usize;
            let rm_value = regs.get(rm);
            let shift_amount = (opcode & 0x0000_0FF0) >> 4;
            if shift_amount != 0 {
                let shift_type = (opcode & 0x0000_0060) >> 5;
                let shift_imm = (opcode & 0x0000_0F80) >> 7;
                let carry_in = regs.get(crate::regs::CPSR) & CPSR_C != 0;
                shifter_operand(shift_type, shift_imm, rm_value, carry_in)
            } else {
                rm_value
            }
        } else {
            opcode & 0x0000_0FFF
        };

        if opcode & U_BIT != 0 {
            base_addr = base_addr.wrapping_add(offset);
        } else {
            base_addr = base_addr.wrapping_sub(offset);
        }
    }
    // Post-indexed: the transfer address is the unmodified base register.

    // The instruction is a *load*: the value that lands in PC is whatever
    // is stored at the effective address, not the address itself.
    let Some(value) = mem.read_u32(base_addr) else {
        return DecodeResult::UnknownDestination;
    };
    DecodeResult::Branch { dest: value & !1, thumb: value & 1 != 0 }
}

fn ldm(opcode: u32, regs: &RegisterFile, mem: &dyn TargetMemory) -> DecodeResult {
    let rn = ((opcode & 0x000F_0000) >> 16) as usize;
    let mut addr = regs.get(rn);
    let reg_count = (opcode & 0xFFFF).count_ones();

    const P_BIT: u32 = 1 << 24;
    const U_BIT: u32 = 1 << 23;
    const S_BIT: u32 = 1 << 22;

    match (opcode & P_BIT != 0, opcode & U_BIT != 0) {
        (true, true) => addr = addr.wrapping_add(reg_count * 4),
        (true, false) => addr = addr.wrapping_sub(4),
        (false, true) => addr = addr.wrapping_add(reg_count * 4).wrapping_sub(4),
        (false, false) => {}
    }

    let Some(value) = mem.read_u32(addr) else {
        return DecodeResult::UnknownDestination;
    };

    if opcode & S_BIT != 0 {
        // The new Thumb state comes from the banked SPSR of the interrupted
        // mode, which this decoder has no access to; a platform-level
        // caller must supply it. Report the destination but let the step
        // planner fall back to a linear-successor breakpoint for the mode
        // bit if it cannot resolve SPSR itself.
        return DecodeResult::Branch { dest: value & !1, thumb: regs.is_thumb() };
    }

    DecodeResult::Branch { dest: value & !1, thumb: value & 1 != 0 }
}

fn add(opcode: u32, regs: &RegisterFile) -> DecodeResult {
    const I_BIT: u32 = 1 << 25;
    let rn = ((opcode & 0x000F_0000) >> 16) as usize;
    let rn_value = regs.get(rn);

    let operand2 = if opcode & I_BIT != 0 {
        let imm8 = opcode & 0xFF;
        let rotate = ((opcode & 0x0F00) >> 8) * 2;
        imm8.rotate_right(rotate)
    } else {
        let shift_by_register = opcode & 0x10 != 0;
        if shift_by_register {
            // Register-specified shift amount: the shift amount comes from
            // a register rather than an immediate, which this decoder
            // cannot yet resolve without also modeling the shifter's carry
            // interaction with a dynamic count. Report unknown rather than
            // guess.
            return DecodeResult::UnknownDestination;
        }

        let rm = (opcode & 0xF) as usize;
        let rm_value = regs.get(rm);
        let shift_type = (opcode & 0x0000_0060) >> 5;
        let shift_imm = (opcode & 0x0000_0F80) >> 7;
        let carry_in = regs.get(crate::regs::CPSR) & CPSR_C != 0;
        shifter_operand(shift_type, shift_imm, rm_value, carry_in)
    };

    let dest = rn_value.wrapping_add(operand2);
    DecodeResult::Branch { dest, thumb: regs.is_thumb() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::FakeMemory, regs::LR};

    fn regs_with_pc(pc_value: u32) -> RegisterFile {
        let mut regs = RegisterFile::zeroed();
        regs.set(PC, pc_value);
        regs
    }

    fn no_memory() -> FakeMemory {
        FakeMemory::new(0, 0)
    }

    #[test]
    fn branch_destination() {
        // B +0x10, encoded relative to architectural PC = instr_addr + 8.
        let regs = regs_with_pc(0x0200_0008);
        let opcode = 0xEA00_0000 | ((0x10u32 >> 2) & 0x00FF_FFFF);
        match decode(opcode, &regs, &no_memory()) {
            DecodeResult::Branch { dest, thumb } => {
                assert_eq!(dest, 0x0200_0018);
                assert!(!thumb);
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn bx_lr_destination() {
        let mut regs = RegisterFile::zeroed();
        regs.set(LR, 0x0200_1235);
        // BX LR: cond=AL(1110), 000100101111111111110001 Rm=1110(LR)
        let opcode = 0xE12F_FF1E;
        match decode(opcode, &regs, &no_memory()) {
            DecodeResult::Branch { dest, thumb } => {
                assert_eq!(dest, 0x0200_1234);
                assert!(thumb);
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn ldr_pc_dereferences_effective_address() {
        let mut regs = RegisterFile::zeroed();
        regs.set(0, 0x0300_0000);
        let mut mem = FakeMemory::new(0x0300_0000, 16);
        mem.load(0x0300_0008, &0x0200_1235u32.to_le_bytes());
        // LDR PC, [R0, #8]: cond=AL, P=1,U=1,I=0(imm), B=0, Rn=R0, Rd=PC, imm12=8
        let opcode = 0xE590_F008;
        match decode(opcode, &regs, &mem) {
            DecodeResult::Branch { dest, thumb } => {
                assert_eq!(dest, 0x0200_1234);
                assert!(thumb);
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn add_to_pc_with_immediate_shift() {
        let mut regs = regs_with_pc(0);
        regs.set(0, 0x100);
        regs.set(1, 0x10);
        // ADD R15, R0, R1, LSL #2: cond=AL, I=0, opcode=0100 (ADD), S=0
        // Rn=R0, Rd=PC, shift_imm=2, shift_type=LSL(00), Rm=R1
        let opcode = 0xE080_F101;
        match decode(opcode, &regs, &no_memory()) {
            DecodeResult::Branch { dest, .. } => assert_eq!(dest, 0x100 + (0x10 << 2)),
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn add_to_pc_register_shift_is_unknown() {
        let mut regs = regs_with_pc(0);
        regs.set(0, 0x100);
        regs.set(1, 4);
        regs.set(2, 2);
        // ADD R15, R0, R1, LSL R2 (register-specified shift amount, bit 4 set)
        let opcode = 0xE080_F211;
        assert_eq!(decode(opcode, &regs, &no_memory()), DecodeResult::UnknownDestination);
    }

    #[test]
    fn non_branching_instruction() {
        let regs = RegisterFile::zeroed();
        // MOV R0, R1 (doesn't touch PC)
        assert_eq!(decode(0xE1A0_0001, &regs, &no_memory()), DecodeResult::NoBranch);
    }
}
