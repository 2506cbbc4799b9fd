//! Echo protocol handler.

use std::io::{self, Read, Write};
use tracing::trace;

use crate::runtime::{Transfer, READ_CHUNK_SIZE};
use crate::shutdown::ShutdownToken;

/// Handle an echo protocol connection.
///
/// Reads at most one chunk at a time and writes it back in full before
/// reading again. Returns `Ok` when the peer closes the connection or
/// shutdown is observed between iterations.
pub fn handle_connection<S: Read + Write>(
    mut stream: S,
    shutdown: &ShutdownToken,
    transfer: &mut Transfer,
) -> io::Result<()> {
    let mut buffer = [0u8; READ_CHUNK_SIZE];

    while !shutdown.is_triggered() {
        let n = stream.read(&mut buffer)?;
        if n == 0 {
            trace!("Connection closed by client");
            break;
        }
        transfer.bytes_read += n;

        stream.write_all(&buffer[..n])?;
        transfer.bytes_written += n;
        trace!(bytes = n, "Echoed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::MockStream;

    #[test]
    fn test_echo_until_eof() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let mut stream = MockStream::new(&payload);
        let mut transfer = Transfer::default();

        handle_connection(&mut stream, &ShutdownToken::new(), &mut transfer).unwrap();

        assert_eq!(stream.output, payload);
        assert_eq!(transfer.bytes_read, 3000);
        assert_eq!(transfer.bytes_written, 3000);
        // 1024 + 1024 + 952, then EOF
        assert_eq!(stream.reads, 4);
    }

    #[test]
    fn test_write_failure_stops_loop() {
        let mut stream = MockStream::new(b"hello");
        stream.fail_writes = true;
        let mut transfer = Transfer::default();

        let result = handle_connection(&mut stream, &ShutdownToken::new(), &mut transfer);

        assert!(result.is_err());
        assert_eq!(transfer.bytes_read, 5);
        assert_eq!(transfer.bytes_written, 0);
    }

    #[test]
    fn test_shutdown_checked_between_reads() {
        let shutdown = ShutdownToken::new();
        shutdown.trigger();
        let mut stream = MockStream::new(b"never read");
        let mut transfer = Transfer::default();

        handle_connection(&mut stream, &shutdown, &mut transfer).unwrap();

        assert_eq!(stream.reads, 0);
        assert!(stream.output.is_empty());
    }
}
