//! An on-target remote-debugging stub for 32-bit ARM/Thumb targets.
//!
//! This crate is installed as the CPU's prefetch-abort handler. When a
//! software breakpoint traps, it converses with a remote host debugger
//! over the textual `$payload#cc` wire protocol — register and memory
//! access, breakpoint management, single-stepping — then resumes the
//! interrupted program. See the module docs for the three subsystems that
//! make this up: [`breakpoint`] (the pool and engine), [`step`] (the
//! planner), and [`protocol`] (the packet codec and dispatcher).
//!
//! Linked into the target image, not run standalone: the public surface
//! is [`init_debug`] and [`debug_halt`].

#![cfg_attr(not(test), no_std)]

pub mod breakpoint;
#[cfg(target_arch = "arm")]
pub mod cache;
pub mod condition;
pub mod config;
pub mod decode;
pub mod error;
pub mod exception;
pub mod instruction;
pub mod memory;
pub mod platform;
pub mod protocol;
pub mod regs;
pub mod step;
pub mod transport;

#[cfg(target_arch = "arm")]
mod stub {
    use core::cell::RefCell;

    use critical_section::Mutex;

    use crate::{
        breakpoint::{engine, pool::BreakpointPool},
        config::DebugConfig,
        exception::{DebugEventContext, ProgramStatus},
        memory::RawMemory,
        platform::Platform,
        protocol::{
            dispatcher::{self, Session, Signal},
            packet::{PACKET_BUF_SIZE, PacketIo},
        },
        regs::{CPSR, LR, PC, RegisterFile, SP},
        transport::Transport,
    };

    /// The process-wide debug stub (§5): the breakpoint pool, packet
    /// codec, and the transport/platform capability references supplied
    /// to [`super::init_debug`].
    pub(crate) struct Stub {
        pool: BreakpointPool,
        io: PacketIo,
        transport: &'static mut dyn Transport,
        platform: &'static mut dyn Platform,
        config: DebugConfig,
    }

    pub(crate) static STUB: Mutex<RefCell<Option<Stub>>> = Mutex::new(RefCell::new(None));

    impl Stub {
        fn new(
            transport: &'static mut dyn Transport,
            platform: &'static mut dyn Platform,
            config: DebugConfig,
        ) -> Self {
            Self { pool: BreakpointPool::new(), io: PacketIo::new(), transport, platform, config }
        }

        /// Converts the trampoline's saved state into a [`RegisterFile`],
        /// runs the protocol session to completion, then writes any
        /// changes (register writes, a new resume `PC`) back.
        pub(crate) fn handle_trap(&mut self, ctx: &mut DebugEventContext) {
            let mut regs = RegisterFile::zeroed();
            for i in 0..13 {
                regs.set(i, ctx.registers[i]);
            }
            regs.set(SP, ctx.stack_pointer as u32);
            regs.set(LR, ctx.link_register as u32);
            regs.set(PC, ctx.program_counter as u32);
            regs.set(CPSR, ctx.spsr.0);

            self.run_session(&mut regs);

            for i in 0..13 {
                ctx.registers[i] = regs.get(i);
            }
            ctx.stack_pointer = regs.get(SP) as usize;
            ctx.link_register = regs.get(LR) as usize;
            ctx.program_counter = regs.get(PC) as usize;
            ctx.spsr = ProgramStatus(regs.get(CPSR));
        }

        /// Implements the data flow of §2: trap entry (4.F steps 1-3),
        /// the `T` stop reply, the `loop { receive, dispatch, reply }`
        /// protocol loop, then resume (4.F steps 5-6), all under the IRQ
        /// routing policy of §5.
        fn run_session(&mut self, regs: &mut RegisterFile) {
            let mut mem = RawMemory;

            engine::on_trap_entry(&mut self.pool, &mut mem, self.platform, regs.get(PC));

            let previous_mask = self.platform.mask_irqs(self.transport.interrupt_mask());

            let mut out = [0u8; PACKET_BUF_SIZE];
            let len = dispatcher::trap_stop_reply(Signal::Trap, regs, &mut out);
            self.io.send(self.transport, &out[..len]);

            loop {
                self.io.receive(self.transport);

                let mut session = Session {
                    regs: &mut *regs,
                    pool: &mut self.pool,
                    mem: &mut mem,
                    platform: &mut *self.platform,
                    safe_floor: self.config.safe_floor,
                };
                let (len, action) = dispatcher::dispatch(self.io.payload(), &mut out, &mut session);

                match action {
                    dispatcher::Action::Reply => self.io.send(self.transport, &out[..len]),
                    dispatcher::Action::ResumeSilently => break,
                }
            }

            self.platform.restore_irqs(previous_mask);
        }
    }

    /// Installs `transport`/`platform` as the debug stub's singleton and
    /// points the exception vector table at it (§6: `init_debug`).
    ///
    /// Returns `false` (without touching the vector table) if a stub is
    /// already installed; per §5's two-phase installation, this is meant
    /// to be called exactly once.
    #[must_use]
    pub fn init_debug(
        transport: &'static mut dyn Transport,
        platform: &'static mut dyn Platform,
        config: DebugConfig,
    ) -> bool {
        let stub = Stub::new(transport, platform, config);

        let installed = critical_section::with(|cs| {
            let mut slot = STUB.borrow(cs).borrow_mut();
            if slot.is_some() {
                false
            } else {
                *slot = Some(stub);
                true
            }
        });

        if installed {
            crate::exception::install_vectors();
        }
        installed
    }

    /// Executes a trap opcode inline, so the running program can
    /// proactively enter the debugger (§6: `debug_halt`).
    ///
    /// Uses the assembler's ISA-independent `udf` mnemonic rather than
    /// one of the fixed-width breakpoint encodings in
    /// [`crate::breakpoint::engine`]: trap entry only needs to identify
    /// *that* an instruction faulted at this address, not reproduce a
    /// specific saved opcode.
    pub fn debug_halt() {
        unsafe {
            core::arch::asm!("udf #0", options(nomem, nostack));
        }
    }
}

#[cfg(target_arch = "arm")]
pub use stub::{debug_halt, init_debug};

/// Re-entrancy guard (§3's "Stub descriptor" `in_stub` field): set for the
/// duration of [`handle_trap_from_exception`], so a second exception taken
/// while the stub is already servicing the host — e.g. a fault triggered by
/// the stub's own code — can be detected.
#[cfg(target_arch = "arm")]
static IN_STUB: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

#[cfg(target_arch = "arm")]
pub(crate) fn handle_trap_from_exception(ctx: &mut exception::DebugEventContext) {
    use core::sync::atomic::Ordering;

    if IN_STUB.swap(true, Ordering::SeqCst) {
        // Re-entry into the stub (§5/§7): fatal. Recovery requires a reset,
        // so there is nothing to do but stop making forward progress.
        loop {
            core::hint::spin_loop();
        }
    }

    critical_section::with(|cs| {
        let mut slot = stub::STUB.borrow(cs).borrow_mut();
        if let Some(s) = slot.as_mut() {
            s.handle_trap(ctx);
        }
    });

    IN_STUB.store(false, Ordering::SeqCst);
}
