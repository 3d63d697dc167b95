//! Packet codec (4.G): the `$payload#cc` frame, `+`/`-` acks, the `0x7d`
//! binary escape convention, and the optional `nn:` sequence-ID prefix.

use crate::{protocol::hex, transport::Transport};

/// Minimum packet buffer size (§6: "Packet buffer size at least 2048
/// bytes").
pub const PACKET_BUF_SIZE: usize = 2048;

const DOLLAR: u8 = b'$';
const HASH: u8 = b'#';
const ACK: u8 = b'+';
const NAK: u8 = b'-';
/// Byte-stuffing escape marker for `X` payloads (4.G).
pub const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// A fixed-capacity packet buffer plus the receive/transmit state machine
/// of 4.G.
///
/// Production firmware keeps exactly one of these as part of the stub
/// singleton; it holds no transport state of its own, so the same buffer
/// is reused for every packet in a debug session.
pub struct PacketIo {
    buf: [u8; PACKET_BUF_SIZE],
    len: usize,
}

impl PacketIo {
    /// Builds an empty packet buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: [0; PACKET_BUF_SIZE], len: 0 }
    }

    /// The most recently received payload (post sequence-ID stripping).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Blocks (busy-polling `transport`, per §5) until one validated packet
    /// has been received and acked, then returns its payload via
    /// [`PacketIo::payload`].
    ///
    /// Implements the receive state machine of 4.G: discard until `$`,
    /// accumulate (restarting on a stray `$`) until `#`, validate the
    /// trailing checksum, NAK-and-retry on mismatch, ACK on match, then
    /// strip an optional `nn:` sequence-ID prefix and echo its two bytes
    /// back to the host.
    pub fn receive(&mut self, transport: &mut dyn Transport) {
        loop {
            if self.receive_one_frame(transport) {
                self.strip_sequence_id(transport);
                return;
            }
        }
    }

    /// Reads one `$...#cc` frame, NAKing and retrying on checksum mismatch.
    /// Returns `true` once a frame has been ACKed, with the raw payload
    /// (sequence-ID still attached, if present) in `self.buf`.
    fn receive_one_frame(&mut self, transport: &mut dyn Transport) -> bool {
        loop {
            if read_byte_blocking(transport) != DOLLAR {
                continue;
            }
            break;
        }

        let mut len = 0;
        let mut checksum: u8 = 0;
        loop {
            let byte = read_byte_blocking(transport);
            if byte == DOLLAR {
                // A stray `$` mid-packet restarts accumulation (4.G).
                len = 0;
                checksum = 0;
                continue;
            }
            if byte == HASH {
                break;
            }
            if len < self.buf.len() {
                self.buf[len] = byte;
                len += 1;
            }
            // A buffer overrun truncates silently and lets the checksum
            // fail below, per 4.G ("truncate and let checksum fail").
            checksum = checksum.wrapping_add(byte);
        }

        let hi = read_byte_blocking(transport);
        let lo = read_byte_blocking(transport);
        let received = hex::decode_byte(hi, lo);

        if received == Some(checksum) {
            transport.write_byte(ACK);
            self.len = len;
            true
        } else {
            transport.write_byte(NAK);
            false
        }
    }

    /// Strips a `??:` sequence-ID prefix (two arbitrary bytes followed by a
    /// colon at index 2) from `self.buf`, echoing the two sequence bytes
    /// back to the host, per 4.G.
    fn strip_sequence_id(&mut self, transport: &mut dyn Transport) {
        if self.len >= 3 && self.buf[2] == b':' {
            transport.write_byte(self.buf[0]);
            transport.write_byte(self.buf[1]);
            self.buf.copy_within(3..self.len, 0);
            self.len -= 3;
        }
    }

    /// Frames `payload` and transmits it, retrying until the host ACKs
    /// (per 4.G: "repeatedly send until the next received byte is `+`").
    pub fn send(&self, transport: &mut dyn Transport, payload: &[u8]) {
        loop {
            transport.write_byte(DOLLAR);
            transport.write_data(payload);
            transport.write_byte(HASH);
            let checksum = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
            let [hi, lo] = hex::encode_byte(checksum);
            transport.write_byte(hi);
            transport.write_byte(lo);

            if read_byte_blocking(transport) == ACK {
                return;
            }
        }
    }
}

impl Default for PacketIo {
    fn default() -> Self {
        Self::new()
    }
}

fn read_byte_blocking(transport: &mut dyn Transport) -> u8 {
    loop {
        if let Some(byte) = transport.read_byte() {
            return byte;
        }
        transport.poll();
    }
}

/// Reverses the `0x7D` binary-escape convention of 4.G: a `0x7D` byte marks
/// the next byte as escaped (XOR `0x20` to recover the literal). Writes
/// decoded bytes into `out`, stopping when either `input` is exhausted or
/// `out` is full. Returns the number of bytes written.
pub fn unescape(input: &[u8], out: &mut [u8]) -> usize {
    let mut written = 0;
    let mut i = 0;
    while i < input.len() && written < out.len() {
        let byte = if input[i] == ESCAPE {
            i += 1;
            if i >= input.len() {
                break;
            }
            input[i] ^ ESCAPE_XOR
        } else {
            input[i]
        };
        out[written] = byte;
        written += 1;
        i += 1;
    }
    written
}
