//! Protocol dispatcher (4.H): the remote-debugging command set, built on
//! top of the breakpoint store/engine (4.E/4.F), the step planner (4.D),
//! and the register-file snapshot (§3).

use crate::{
    breakpoint::{engine, pool::BreakpointPool},
    error::{BadHexSnafu, CommandError, GuardRejectedSnafu, MalformedSnafu},
    memory::{TargetMemory, guard_allows},
    platform::Platform,
    protocol::{hex, packet},
    regs::{CPSR, PC, RegisterFile},
    step,
};

/// Signal numbers the stop reply can carry (§1: "no signal delivery beyond
/// mapping `SIGTRAP` ... and `SIGILL`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Software breakpoint / single-step trap.
    Trap = 5,
    /// Undefined-instruction exception.
    IllegalInstruction = 4,
}

/// What the dispatcher wants the stub's outer loop to do after handling
/// one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Transmit the reply in `out` and read the next command.
    Reply,
    /// Do not transmit anything; resume the target.
    ResumeSilently,
}

/// The mutable state one dispatched command may touch.
pub struct Session<'a> {
    /// The register-file snapshot (§3), the dispatcher's single source of
    /// truth for program state.
    pub regs: &'a mut RegisterFile,
    /// The breakpoint pool (4.E) backing the `active`/`stepping`/`disabled`
    /// lists.
    pub pool: &'a mut BreakpointPool,
    /// Target memory access, behind the guard in [`memory::guard_allows`].
    pub mem: &'a mut dyn TargetMemory,
    /// Cache/IRQ capability set invoked while installing breakpoints.
    pub platform: &'a mut dyn Platform,
    /// The platform-defined safe floor (4.F's memory guard).
    pub safe_floor: u32,
}

/// Builds the `T` stop reply emitted at trap entry, before the command
/// loop starts (4.H): signal, then `nn:hhhhhhhh;` triples for R0..R14,
/// register 15 (the adjusted return address), and register 25 (CPSR).
///
/// Register values are written in little-endian byte order, matching the
/// target's native endianness, per the wire protocol's convention of
/// sending register bytes in target byte order.
pub fn trap_stop_reply(signal: Signal, regs: &RegisterFile, out: &mut [u8]) -> usize {
    let mut w = Writer::new(out);
    w.byte(b'T');
    w.hex_byte(signal as u8);
    for reg_num in 0u8..15 {
        w.reg_triple(reg_num, regs.get(usize::from(reg_num)));
    }
    w.reg_triple(15, regs.get(PC));
    w.reg_triple(25, regs.get(CPSR));
    w.len()
}

/// Dispatches one command payload (4.H), writing the reply into `out` and
/// reporting what the caller should do next.
pub fn dispatch(payload: &[u8], out: &mut [u8], session: &mut Session<'_>) -> (usize, Action) {
    let Some((&cmd, args)) = payload.split_first() else {
        return (empty_reply(out), Action::Reply);
    };

    match cmd {
        b'?' => {
            let mut w = Writer::new(out);
            w.str(b"S10");
            (w.len(), Action::Reply)
        }
        b'g' => (handle_read_registers(session.regs, out), Action::Reply),
        b'G' => {
            handle_write_registers(session.regs, args);
            let mut w = Writer::new(out);
            w.str(b"OK");
            (w.len(), Action::Reply)
        }
        b'm' => (handle_read_memory(args, session, out), Action::Reply),
        b'M' => (handle_write_memory(args, session, out), Action::Reply),
        b'X' => (handle_write_memory_binary(args, session, out), Action::Reply),
        b'c' => {
            engine::install_resume_lists(session.pool, session.mem, session.platform);
            (0, Action::ResumeSilently)
        }
        b's' => handle_step(session, out),
        b'k' => (0, Action::ResumeSilently),
        _ => (empty_reply(out), Action::Reply),
    }
}

fn empty_reply(out: &mut [u8]) -> usize {
    let mut w = Writer::new(out);
    w.str(b"");
    w.len()
}

fn handle_read_registers(regs: &RegisterFile, out: &mut [u8]) -> usize {
    let mut w = Writer::new(out);
    for index in 0..15 {
        w.hex_u32(regs.get(index));
    }
    w.hex_u32(regs.get(PC)); // R15: current return address.
    for _ in 0..8 {
        // 8 placeholder 96-bit FP registers.
        for _ in 0..12 {
            w.hex_byte(0);
        }
    }
    w.hex_u32(0); // FP status placeholder.
    w.hex_u32(regs.get(CPSR));
    w.len()
}

fn handle_write_registers(regs: &mut RegisterFile, args: &[u8]) {
    // 16 x 32-bit registers = 128 hex digits; anything past that (the FP
    // area) is present in some requests but ignored here per 4.H ("skip
    // the FP area").
    const REGISTER_BYTES: usize = 16 * 4;
    let mut decoded = [0u8; REGISTER_BYTES];
    let Some(written) = hex::decode_into(&args[..args.len().min(REGISTER_BYTES * 2)], &mut decoded)
    else {
        log::warn!("G command had unparseable register payload");
        return;
    };
    if written < REGISTER_BYTES {
        log::warn!("G command register payload too short: {written} of {REGISTER_BYTES} bytes");
        return;
    }

    for index in 0..15 {
        let word = u32::from_le_bytes(decoded[index * 4..index * 4 + 4].try_into().unwrap());
        regs.set(index, word);
    }
    let r15 = u32::from_le_bytes(decoded[60..64].try_into().unwrap());
    regs.set(PC, r15);
}

fn parse_addr_len(args: &[u8]) -> Result<(u32, u32), CommandError> {
    let comma = args.iter().position(|&b| b == b',').ok_or_else(|| MalformedSnafu.build())?;
    let addr = hex::parse_hex_u32(&args[..comma]).ok_or_else(|| BadHexSnafu.build())?;
    let len = hex::parse_hex_u32(&args[comma + 1..]).ok_or_else(|| BadHexSnafu.build())?;
    Ok((addr, len))
}

fn parse_addr_len_data(args: &[u8]) -> Result<(u32, u32, &[u8]), CommandError> {
    let comma = args.iter().position(|&b| b == b',').ok_or_else(|| MalformedSnafu.build())?;
    let rest = &args[comma + 1..];
    let colon = rest.iter().position(|&b| b == b':').ok_or_else(|| MalformedSnafu.build())?;
    let addr = hex::parse_hex_u32(&args[..comma]).ok_or_else(|| BadHexSnafu.build())?;
    let len = hex::parse_hex_u32(&rest[..colon]).ok_or_else(|| BadHexSnafu.build())?;
    Ok((addr, len, &rest[colon + 1..]))
}

fn error_reply(out: &mut [u8], code: CommandError) -> usize {
    let mut w = Writer::new(out);
    w.byte(b'E');
    let num = match code {
        CommandError::Malformed => 1,
        CommandError::BadHex => 2,
        CommandError::GuardRejected => 3,
    };
    w.hex_byte(num);
    w.len()
}

fn handle_read_memory(args: &[u8], session: &mut Session<'_>, out: &mut [u8]) -> usize {
    let (addr, len) = match parse_addr_len(args) {
        Ok(v) => v,
        Err(e) => return error_reply(out, e),
    };

    let mut w = Writer::new(out);
    for i in 0..len {
        let a = addr.wrapping_add(i);
        if !guard_allows(a, session.safe_floor) {
            return error_reply(out, GuardRejectedSnafu.build());
        }
        let Some(byte) = session.mem.read_u8(a) else {
            return error_reply(out, GuardRejectedSnafu.build());
        };
        w.hex_byte(byte);
    }
    w.len()
}

fn handle_write_memory(args: &[u8], session: &mut Session<'_>, out: &mut [u8]) -> usize {
    let (addr, len, data) = match parse_addr_len_data(args) {
        Ok(v) => v,
        Err(e) => return error_reply(out, e),
    };

    let mut buf = [0u8; packet::PACKET_BUF_SIZE];
    let cap = buf.len().min(len as usize);
    let Some(decoded) = hex::decode_into(data, &mut buf[..cap]) else {
        return error_reply(out, BadHexSnafu.build());
    };

    apply_memory_write(session, addr, &buf[..decoded]);

    let mut w = Writer::new(out);
    w.str(b"OK");
    w.len()
}

fn handle_write_memory_binary(args: &[u8], session: &mut Session<'_>, out: &mut [u8]) -> usize {
    let (addr, len, data) = match parse_addr_len_data(args) {
        Ok(v) => v,
        Err(e) => return error_reply(out, e),
    };

    let mut buf = [0u8; packet::PACKET_BUF_SIZE];
    let cap = buf.len().min(len as usize);
    let written = packet::unescape(data, &mut buf[..cap]);

    apply_memory_write(session, addr, &buf[..written]);

    let mut w = Writer::new(out);
    w.str(b"OK");
    w.len()
}

/// Writes `data` starting at `addr`, silently dropping any byte the memory
/// guard rejects (4.F: "failing writes are silently dropped").
fn write_guarded(session: &mut Session<'_>, addr: u32, data: &[u8]) {
    for (i, &byte) in data.iter().enumerate() {
        let a = addr.wrapping_add(i as u32);
        if guard_allows(a, session.safe_floor) {
            session.mem.write_u8(a, byte);
        }
    }
}

/// Recognizes the host's breakpoint-management convention before performing
/// a guarded write (3: "Lifecycle" — there being no dedicated insert/remove
/// command in this wire protocol's command set, a user breakpoint is
/// installed or lifted through the generic memory-write command itself).
///
/// A write that places the trap opcode, at its native width, over an
/// address with no tracked user breakpoint allocates one from `free` onto
/// `active`, capturing whatever was at that address beforehand as
/// `saved_instruction`. A write of anything else over an address that *is*
/// tracked releases that record back to `free` — the host is understood to
/// be restoring its own copy of the original instruction. Neither case
/// fires when the memory guard would reject the address; an untrackable
/// write is just a write.
fn apply_memory_write(session: &mut Session<'_>, addr: u32, data: &[u8]) {
    if guard_allows(addr, session.safe_floor) {
        match trap_opcode_width(data) {
            Some(thumb) => {
                if session.pool.find(session.pool.active, addr).is_none() {
                    let original = if thumb {
                        session.mem.read_u16(addr).map(u32::from)
                    } else {
                        session.mem.read_u32(addr)
                    };
                    let mut active = session.pool.active;
                    match session.pool.alloc_onto(&mut active, addr, thumb) {
                        Ok(idx) => {
                            session.pool.active = active;
                            if let Some(original) = original {
                                session.pool.set_saved_instruction(idx, original);
                            }
                            log::trace!(
                                "breakpoint inserted at {addr:#010x} via memory write (thumb={thumb})"
                            );
                        }
                        Err(_) => {
                            log::warn!(
                                "breakpoint insert via memory write failed at {addr:#010x}: pool exhausted"
                            );
                        }
                    }
                }
            }
            None => {
                let mut active = session.pool.active;
                if let Some(idx) = session.pool.remove_by_address(&mut active, addr) {
                    session.pool.active = active;
                    let mut free = session.pool.free;
                    session.pool.add_head(&mut free, idx);
                    session.pool.free = free;
                    log::trace!("breakpoint removed at {addr:#010x} via memory write");
                }
            }
        }
    }

    write_guarded(session, addr, data);
}

/// Returns `Some(thumb)` if `data` is exactly the trap opcode encoding at
/// its native width (3: "Trap opcodes"): the 16-bit Thumb encoding for a
/// 2-byte write, the 32-bit ARM encoding for a 4-byte write.
fn trap_opcode_width(data: &[u8]) -> Option<bool> {
    if data.len() == 4 && data == engine::ARM_TRAP.to_le_bytes() {
        Some(false)
    } else if data.len() == 2 && data == engine::THUMB_TRAP.to_le_bytes() {
        Some(true)
    } else {
        None
    }
}

fn handle_step(session: &mut Session<'_>, out: &mut [u8]) -> (usize, Action) {
    let instr_addr = session.regs.get(PC);
    let target = step::plan_step(instr_addr, session.regs, session.mem);

    match engine::prepare_step(
        session.pool,
        session.mem,
        session.platform,
        target.address,
        target.thumb,
    ) {
        Ok(()) => (0, Action::ResumeSilently),
        Err(_) => {
            log::warn!("step planning failed: breakpoint pool exhausted");
            let mut w = Writer::new(out);
            w.str(b"S05");
            (w.len(), Action::Reply)
        }
    }
}

/// A small cursor for building ASCII reply payloads into a caller-owned
/// buffer without heap allocation.
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self, b: u8) {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = b;
            self.pos += 1;
        }
    }

    fn str(&mut self, s: &[u8]) {
        for &b in s {
            self.byte(b);
        }
    }

    fn hex_byte(&mut self, value: u8) {
        let [hi, lo] = hex::encode_byte(value);
        self.byte(hi);
        self.byte(lo);
    }

    fn hex_u32(&mut self, value: u32) {
        for b in value.to_le_bytes() {
            self.hex_byte(b);
        }
    }

    /// Writes a `nn:hhhhhhhh;` register triple (4.H's stop-reply format).
    fn reg_triple(&mut self, reg_num: u8, value: u32) {
        self.hex_byte(reg_num);
        self.byte(b':');
        self.hex_u32(value);
        self.byte(b';');
    }

    fn len(&self) -> usize {
        self.pos
    }
}
