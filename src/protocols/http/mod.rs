//! Minimal HTTP protocol implementation.
//!
//! One request per connection, HTTP/1.0 style: the server reads a single
//! chunk, looks only at the request line and always closes afterwards.
//! Headers and bodies are neither parsed nor produced beyond the fixed ones
//! below.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  GET <path> HTTP/<version>\r\n
//! Response: HTTP/1.1 200 OK\r\n
//!           Content-Type: text/html\r\n
//!           Content-Length: <n>\r\n
//!           \r\n
//!           <html>...method, path and version...</html>
//!
//! Anything else:
//!           HTTP/1.1 400 Bad Request\r\n
//!           Content-Type: text/plain\r\n
//!           Content-Length: 15\r\n
//!           \r\n
//!           400 Bad Request
//! ```

pub mod handler;
pub mod parser;

pub use handler::handle_connection;
