//! Echo protocol implementation.
//!
//! No framing: every chunk read from the client is written back unchanged
//! before the next read. The connection lasts until the client closes it,
//! an I/O error occurs, or the server shuts down.
//!
//! ```text
//! Request:  hello
//! Response: hello
//! ```

pub mod handler;

pub use handler::handle_connection;
