//! Protocol dispatch for accepted connections.
//!
//! Runs the configured protocol handler on the worker thread and closes the
//! socket on one exit path, whichever condition ended the exchange.

use crate::config::ProtocolType;
use crate::protocols::{echo, http};
use crate::runtime::Transfer;
use crate::shutdown::ShutdownToken;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Protocol type for connection handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Echo,
    Http,
}

impl From<ProtocolType> for Protocol {
    fn from(protocol: ProtocolType) -> Self {
        match protocol {
            ProtocolType::Echo => Protocol::Echo,
            ProtocolType::Http => Protocol::Http,
        }
    }
}

/// Serve one accepted connection until it ends, then close it.
///
/// Errors stay local to this connection: they are logged and end the
/// exchange, nothing is returned to the engine.
pub fn handle_connection(
    conn_id: usize,
    peer: SocketAddr,
    stream: Arc<TcpStream>,
    protocol: Protocol,
    shutdown: ShutdownToken,
) {
    let mut transfer = Transfer::default();

    let result = match protocol {
        Protocol::Echo => echo::handle_connection(&*stream, &shutdown, &mut transfer),
        Protocol::Http => http::handle_connection(&*stream, &shutdown, &mut transfer),
    };

    if let Err(e) = result {
        debug!(conn_id, peer = %peer, error = %e, "Connection error");
    }

    // The registry holds another handle to this socket until it is reaped,
    // so dropping ours is not enough for the peer to see the close.
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        if e.kind() != io::ErrorKind::NotConnected {
            trace!(conn_id, error = %e, "Socket shutdown failed");
        }
    }

    info!(
        conn_id,
        peer = %peer,
        bytes_read = transfer.bytes_read,
        bytes_written = transfer.bytes_written,
        "Connection closed"
    );
}
