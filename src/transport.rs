//! The byte-oriented transport capability set (§6) the packet codec
//! consumes. Production firmware supplies a concrete implementation (UART,
//! SPI, USB CDC, ...); [`LoopbackTransport`] stands in for host-side tests.

/// A byte-oriented channel to the host debugger.
///
/// The stub never assumes anything about framing, buffering, or hardware
/// flow control beyond what this trait exposes; §4.G's packet codec is
/// built entirely on top of it.
pub trait Transport {
    /// Performs any first-time setup the transport needs. Default: no-op.
    fn init(&mut self) -> bool {
        true
    }

    /// Non-blocking single-byte read. Returns `None` if no byte is queued
    /// yet; the packet codec calls this in a loop, driving
    /// [`Transport::poll`] between attempts, rather than assuming this
    /// method blocks.
    fn read_byte(&mut self) -> Option<u8>;

    /// Writes a single byte, blocking if necessary until it is queued.
    fn write_byte(&mut self, byte: u8);

    /// Writes a buffer of bytes. The default calls [`Transport::write_byte`]
    /// once per byte; transports with a bulk-write primitive should
    /// override this for efficiency.
    fn write_data(&mut self, data: &[u8]) {
        for &byte in data {
            self.write_byte(byte);
        }
    }

    /// Gives the transport a chance to service its own state machine while
    /// the stub is blocked waiting for a byte (§5). Most transports need
    /// not override this.
    fn poll(&mut self) {}

    /// The bitmask of interrupt sources the transport needs routed while
    /// the stub is active (§5). Zero (the default) means "leave interrupts
    /// disabled for the duration of the debug session".
    fn interrupt_mask(&self) -> u32 {
        0
    }
}

/// A fixed-capacity in-memory [`Transport`] used by tests: bytes written by
/// the stub accumulate in `sent`, and bytes queued via [`LoopbackTransport::feed`]
/// are handed back one at a time by [`Transport::read_byte`].
#[cfg(any(test, feature = "test-transport"))]
#[derive(Debug, Clone, Copy)]
pub struct LoopbackTransport {
    to_read: LoopbackBuf,
    sent: LoopbackBuf,
}

#[cfg(any(test, feature = "test-transport"))]
#[derive(Debug, Clone, Copy)]
struct LoopbackBuf {
    storage: [u8; 4096],
    len: usize,
    pos: usize,
}

#[cfg(any(test, feature = "test-transport"))]
impl Default for LoopbackBuf {
    fn default() -> Self {
        Self { storage: [0; 4096], len: 0, pos: 0 }
    }
}

#[cfg(any(test, feature = "test-transport"))]
impl Default for LoopbackTransport {
    fn default() -> Self {
        Self { to_read: LoopbackBuf::default(), sent: LoopbackBuf::default() }
    }
}

#[cfg(any(test, feature = "test-transport"))]
impl LoopbackTransport {
    /// Queues `bytes` to be returned by future [`Transport::read_byte`] calls.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.to_read.storage[self.to_read.len..self.to_read.len + bytes.len()]
            .copy_from_slice(bytes);
        self.to_read.len += bytes.len();
    }

    /// Returns every byte written through this transport so far.
    #[must_use]
    pub fn sent(&self) -> &[u8] {
        &self.sent.storage[..self.sent.len]
    }

    /// Clears the record of sent bytes, keeping queued input intact.
    pub fn clear_sent(&mut self) {
        self.sent.len = 0;
    }
}

#[cfg(any(test, feature = "test-transport"))]
impl Transport for LoopbackTransport {
    fn read_byte(&mut self) -> Option<u8> {
        if self.to_read.pos >= self.to_read.len {
            return None;
        }
        let byte = self.to_read.storage[self.to_read.pos];
        self.to_read.pos += 1;
        Some(byte)
    }

    fn write_byte(&mut self, byte: u8) {
        self.sent.storage[self.sent.len] = byte;
        self.sent.len += 1;
    }
}
