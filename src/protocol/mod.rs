//! The remote-debugging wire protocol: hex helpers (used by both the
//! packet checksum and the dispatcher's register/memory payloads), the
//! `$...#cc` packet codec (4.G), and the command dispatcher (4.H).

pub mod dispatcher;
pub mod hex;
pub mod packet;
