//! Per-connection runtime.
//!
//! Thread-per-connection model:
//! - `protocol`: dispatches an accepted socket to its protocol handler and
//!   owns the single close path
//! - `connection`: registry of live connection records used for reaping and
//!   shutdown

mod connection;
pub mod protocol;

pub(crate) use connection::{ConnectionRecord, ConnectionRegistry};
pub(crate) use protocol::{handle_connection, Protocol};

/// Maximum bytes taken from the socket per read.
pub(crate) const READ_CHUNK_SIZE: usize = 1024;

/// Byte counters for one connection, kept across handler errors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub bytes_read: usize,
    pub bytes_written: usize,
}
