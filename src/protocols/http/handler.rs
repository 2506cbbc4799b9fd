//! HTTP protocol handler: one request line in, one response out.

use std::io::{self, Read, Write};
use tracing::{debug, trace};

use super::parser::{parse_request_line, response_bad_request, response_ok};
use crate::runtime::{Transfer, READ_CHUNK_SIZE};
use crate::shutdown::ShutdownToken;

/// Handle an HTTP protocol connection.
///
/// A single read is treated as the whole request. Whatever the outcome of the
/// parse or of the write, the exchange ends after one response.
pub fn handle_connection<S: Read + Write>(
    mut stream: S,
    shutdown: &ShutdownToken,
    transfer: &mut Transfer,
) -> io::Result<()> {
    if shutdown.is_triggered() {
        return Ok(());
    }

    let mut buffer = [0u8; READ_CHUNK_SIZE];
    let n = stream.read(&mut buffer)?;
    if n == 0 {
        trace!("Connection closed before request");
        return Ok(());
    }
    transfer.bytes_read += n;

    let response = match parse_request_line(&buffer[..n]) {
        Ok(request) => {
            debug!(
                method = %request.method,
                path = %request.path,
                version = %request.version,
                "Serving request"
            );
            response_ok(&request)
        }
        Err(e) => {
            debug!(error = %e, "Rejecting request");
            response_bad_request()
        }
    };

    stream.write_all(&response)?;
    transfer.bytes_written += response.len();

    Ok(())
}
