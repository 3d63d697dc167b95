//! Breakpoint engine (4.F): installs and removes trap opcodes at the
//! addresses recorded in a [`BreakpointPool`], and implements the
//! interleaving policy between user breakpoints, stepping breakpoints, and
//! temporarily disabled breakpoints across a trap/resume cycle.

use crate::{
    breakpoint::pool::{BreakpointPool, ListHead, NIL},
    error::BreakpointError,
    instruction::Instruction,
    memory::TargetMemory,
    platform::Platform,
};

/// The 32-bit ARM breakpoint encoding (3: "Trap opcodes"). Architecturally
/// defined; must not change.
pub const ARM_TRAP: u32 = 0xE120_0070;
/// The 16-bit Thumb breakpoint encoding (3: "Trap opcodes"). Architecturally
/// defined; must not change.
pub const THUMB_TRAP: u16 = 0xBE00;

fn trap_instruction(thumb: bool) -> Instruction {
    if thumb { Instruction::Thumb(THUMB_TRAP) } else { Instruction::Arm(ARM_TRAP) }
}

/// Reads the original opcode at every record on `list` into its
/// `saved_instruction` field and writes the trap opcode in its place, then
/// asks `platform` to make the write visible to instruction fetch.
///
/// Per 4.F: called "before resume"; must run after [`remove_all`] has
/// already exposed the program's real opcodes to any host memory command
/// issued in between.
pub fn install_all(
    pool: &mut BreakpointPool,
    list: ListHead,
    mem: &mut dyn TargetMemory,
    platform: &mut dyn Platform,
) {
    let mut cursor = list;
    while cursor != NIL {
        let rec = *pool.record(cursor);
        let original = if rec.thumb {
            mem.read_u16(rec.address).map(u32::from)
        } else {
            mem.read_u32(rec.address)
        };
        if let Some(original) = original {
            pool.set_saved_instruction(cursor, original);
            write_instruction(mem, rec.address, trap_instruction(rec.thumb));
            platform.sync_instruction_memory(rec.address);
            log::trace!("breakpoint armed at {:#010x} (thumb={})", rec.address, rec.thumb);
        } else {
            log::warn!(
                "breakpoint install skipped at {:#010x}: address not accessible",
                rec.address
            );
        }
        cursor = pool.next(cursor);
    }
}

/// Writes every record's `saved_instruction` back over its trap opcode.
///
/// Per 4.F: called "before any host memory reads/writes" so the host sees
/// the program exactly as the user wrote it, not riddled with trap
/// opcodes.
pub fn remove_all(
    pool: &mut BreakpointPool,
    list: ListHead,
    mem: &mut dyn TargetMemory,
    platform: &mut dyn Platform,
) {
    let mut cursor = list;
    while cursor != NIL {
        let rec = *pool.record(cursor);
        let original = if rec.thumb {
            Instruction::Thumb(rec.saved_instruction as u16)
        } else {
            Instruction::Arm(rec.saved_instruction)
        };
        write_instruction(mem, rec.address, original);
        platform.sync_instruction_memory(rec.address);
        log::trace!("breakpoint parked at {:#010x} (thumb={})", rec.address, rec.thumb);
        cursor = pool.next(cursor);
    }
}

fn write_instruction(mem: &mut dyn TargetMemory, addr: u32, instr: Instruction) {
    match instr {
        Instruction::Arm(word) => {
            mem.write_u32(addr, word);
        }
        Instruction::Thumb(half) => {
            mem.write_u16(addr, half);
        }
    }
}

/// Step 1-3 of 4.F's trap-entry interleaving policy: exposes the program's
/// real opcodes to the host, re-arms any breakpoints the previous resume
/// had parked to step over them, and retires a stepping record that has
/// just fired.
///
/// Returns `true` if `return_addr` was the address of a stepping record
/// (i.e. this trap is the step's own completion, not an unrelated
/// breakpoint hit at the same spot).
pub fn on_trap_entry(
    pool: &mut BreakpointPool,
    mem: &mut dyn TargetMemory,
    platform: &mut dyn Platform,
    return_addr: u32,
) -> bool {
    remove_all(pool, pool.active, mem, platform);
    remove_all(pool, pool.stepping, mem, platform);

    let mut disabled = pool.disabled;
    let mut active = pool.active;
    pool.concat(&mut active, &mut disabled);
    pool.active = active;
    pool.disabled = disabled;

    let mut stepping = pool.stepping;
    let retired = pool.remove_by_address(&mut stepping, return_addr);
    pool.stepping = stepping;
    if let Some(idx) = retired {
        let mut free = pool.free;
        pool.add_head(&mut free, idx);
        pool.free = free;
        true
    } else {
        false
    }
}

/// Step 5-6 of 4.F's resume policy: arms (or reuses) a stepping record at
/// `step_addr`, parking any active user breakpoint at that same address so
/// the two don't double-fire, then installs both the `active` and
/// `stepping` lists.
///
/// # Errors
///
/// Returns [`BreakpointError::NoSpace`] if no stepping record could be
/// allocated and none already existed at `step_addr`; per 4.F this is
/// reported to the host as an extra `SIGTRAP`, not treated as fatal.
pub fn prepare_step(
    pool: &mut BreakpointPool,
    mem: &mut dyn TargetMemory,
    platform: &mut dyn Platform,
    step_addr: u32,
    step_thumb: bool,
) -> Result<(), BreakpointError> {
    if pool.find(pool.stepping, step_addr).is_none() {
        let mut stepping = pool.stepping;
        let result = pool.alloc_onto(&mut stepping, step_addr, step_thumb);
        pool.stepping = stepping;
        result?;
    }

    if let Some(idx) = {
        let mut active = pool.active;
        let found = pool.find(active, step_addr);
        pool.active = active;
        found
    } {
        let mut active = pool.active;
        pool.remove_by_address(&mut active, step_addr);
        pool.active = active;
        let mut disabled = pool.disabled;
        pool.add_head(&mut disabled, idx);
        pool.disabled = disabled;
    }

    install_resume_lists(pool, mem, platform);
    Ok(())
}

/// Installs the `active` and `stepping` lists for resume, without touching
/// step planning. Used by the plain `c`ontinue path, which has no stepping
/// record to set up.
pub fn install_resume_lists(
    pool: &mut BreakpointPool,
    mem: &mut dyn TargetMemory,
    platform: &mut dyn Platform,
) {
    install_all(pool, pool.active, mem, platform);
    install_all(pool, pool.stepping, mem, platform);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::FakeMemory, platform::NullPlatform};

    #[test]
    fn install_then_remove_all_is_the_memory_identity() {
        let mut pool = BreakpointPool::new();
        let mut mem = FakeMemory::new(0x0200_0000, 64);
        mem.write_u32(0x0200_0010, 0xE1A0_0000);
        let mut platform = NullPlatform::default();

        let mut active = NIL;
        pool.alloc_onto(&mut active, 0x0200_0010, false).unwrap();
        pool.active = active;

        install_all(&mut pool, pool.active, &mut mem, &mut platform);
        assert_eq!(mem.read_u32(0x0200_0010), Some(ARM_TRAP));

        remove_all(&mut pool, pool.active, &mut mem, &mut platform);
        assert_eq!(mem.read_u32(0x0200_0010), Some(0xE1A0_0000));
        assert_eq!(platform.syncs, 2);
    }

    #[test]
    fn thumb_breakpoint_uses_the_halfword_trap() {
        let mut pool = BreakpointPool::new();
        let mut mem = FakeMemory::new(0x0800_0000, 16);
        mem.write_u16(0x0800_0002, 0x4601);
        let mut platform = NullPlatform::default();

        let mut active = NIL;
        pool.alloc_onto(&mut active, 0x0800_0002, true).unwrap();
        pool.active = active;

        install_all(&mut pool, pool.active, &mut mem, &mut platform);
        assert_eq!(mem.read_u16(0x0800_0002), Some(THUMB_TRAP));
    }

    #[test]
    fn on_trap_entry_retires_the_stepping_record_at_the_return_address() {
        let mut pool = BreakpointPool::new();
        let mut mem = FakeMemory::new(0x0200_0000, 64);
        mem.write_u32(0x0200_0020, 0xE1A0_0000);
        let mut platform = NullPlatform::default();

        let mut stepping = NIL;
        pool.alloc_onto(&mut stepping, 0x0200_0020, false).unwrap();
        pool.stepping = stepping;
        install_all(&mut pool, pool.stepping, &mut mem, &mut platform);

        let retired = on_trap_entry(&mut pool, &mut mem, &mut platform, 0x0200_0020);
        assert!(retired);
        assert_eq!(pool.iter(pool.stepping).count(), 0);
        assert_eq!(pool.iter(pool.free).count(), crate::breakpoint::pool::MAX_BREAKPOINTS);
    }

    #[test]
    fn prepare_step_parks_an_active_breakpoint_at_the_same_address() {
        let mut pool = BreakpointPool::new();
        let mut mem = FakeMemory::new(0x0200_0000, 64);
        mem.write_u32(0x0200_0030, 0xE1A0_0000);
        let mut platform = NullPlatform::default();

        let mut active = NIL;
        pool.alloc_onto(&mut active, 0x0200_0030, false).unwrap();
        pool.active = active;

        prepare_step(&mut pool, &mut mem, &mut platform, 0x0200_0030, false).unwrap();

        assert_eq!(pool.iter(pool.active).count(), 0);
        assert_eq!(pool.iter(pool.disabled).count(), 1);
        assert_eq!(pool.iter(pool.stepping).count(), 1);
        assert_eq!(mem.read_u32(0x0200_0030), Some(ARM_TRAP));
    }

    #[test]
    fn prepare_step_reuses_an_existing_stepping_record_at_the_same_address() {
        let mut pool = BreakpointPool::new();
        let mut mem = FakeMemory::new(0x0200_0000, 64);
        mem.write_u32(0x0200_0040, 0xE1A0_0000);
        let mut platform = NullPlatform::default();

        prepare_step(&mut pool, &mut mem, &mut platform, 0x0200_0040, false).unwrap();
        prepare_step(&mut pool, &mut mem, &mut platform, 0x0200_0040, false).unwrap();

        assert_eq!(pool.iter(pool.stepping).count(), 1);
    }

    #[test]
    fn prepare_step_reports_pool_exhaustion() {
        let mut pool = BreakpointPool::new();
        let mut mem = FakeMemory::new(0x0200_0000, 64);
        let mut platform = NullPlatform::default();

        let mut active = NIL;
        for i in 0..crate::breakpoint::pool::MAX_BREAKPOINTS as u32 {
            pool.alloc_onto(&mut active, 0x0200_0000 + i * 4, false).unwrap();
        }
        pool.active = active;

        let result = prepare_step(&mut pool, &mut mem, &mut platform, 0x0300_0000, false);
        assert_eq!(result, Err(BreakpointError::NoSpace));
    }
}
