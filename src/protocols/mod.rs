//! Protocol implementations.
//!
//! Each protocol exposes a blocking `handle_connection` that runs on the
//! connection's own worker thread.
//!
//! - `echo`: byte-for-byte echo
//! - `http`: single GET request line, single response

pub mod echo;
pub mod http;
