//! Registry of live connections.
//!
//! Each accepted socket gets a record holding a second handle to the socket
//! and the join handle of its worker thread. The engine reaps finished
//! workers as it accepts and drains the whole registry on stop.

use slab::Slab;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// A single accepted connection and the thread serving it.
#[derive(Debug)]
pub struct ConnectionRecord {
    /// Remote address of the peer.
    pub peer: SocketAddr,
    /// Shared with the worker; used here only for shutdown.
    stream: Arc<TcpStream>,
    /// Worker running the protocol loop.
    handle: JoinHandle<()>,
}

impl ConnectionRecord {
    pub fn new(peer: SocketAddr, stream: Arc<TcpStream>, handle: JoinHandle<()>) -> Self {
        Self {
            peer,
            stream,
            handle,
        }
    }

    /// Whether the worker has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Shut both directions of the socket so a blocked read returns EOF.
    pub fn shutdown(&self) {
        // NotConnected just means the worker already closed it
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Wait for the worker to return.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

/// Registry of active connections using slab allocation.
///
/// Slab keys double as connection ids in logs and thread names.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Slab<ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted record will receive.
    pub fn next_id(&self) -> usize {
        self.connections.vacant_key()
    }

    /// Insert a new connection into the registry.
    pub fn insert(&mut self, record: ConnectionRecord) -> usize {
        self.connections.insert(record)
    }

    /// Number of tracked connections, finished or not.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Join and remove every record whose worker has already returned.
    ///
    /// Never blocks on a running worker. Returns how many were reaped.
    pub fn reap_finished(&mut self) -> usize {
        let finished: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, record)| record.is_finished())
            .map(|(conn_id, _)| conn_id)
            .collect();

        for &conn_id in &finished {
            let record = self.connections.remove(conn_id);
            let peer = record.peer;
            if record.join().is_err() {
                warn!(conn_id, peer = %peer, "Connection handler panicked");
            }
        }

        finished.len()
    }

    /// Shut down every tracked socket.
    pub fn shutdown_all(&self) {
        for (_, record) in self.connections.iter() {
            record.shutdown();
        }
    }

    /// Remove all records, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<(usize, ConnectionRecord)> {
        let ids: Vec<usize> = self.connections.iter().map(|(conn_id, _)| conn_id).collect();
        ids.into_iter()
            .map(|conn_id| (conn_id, self.connections.remove(conn_id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_reap_finished_only() {
        let mut registry = ConnectionRegistry::new();

        let (_client_a, server_a, peer_a) = socket_pair();
        let done = thread::spawn(|| {});
        let id_done = registry.insert(ConnectionRecord::new(peer_a, Arc::new(server_a), done));

        let (_client_b, server_b, peer_b) = socket_pair();
        let server_b = Arc::new(server_b);
        let worker_stream = Arc::clone(&server_b);
        let blocked = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let _ = (&*worker_stream).read(&mut buf);
        });
        let id_blocked = registry.insert(ConnectionRecord::new(peer_b, server_b, blocked));

        assert_ne!(id_done, id_blocked);
        assert_eq!(registry.len(), 2);

        wait_until(|| registry.connections[id_done].is_finished());
        assert_eq!(registry.reap_finished(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.connections.contains(id_blocked));

        // Released by shutdown rather than by the peer
        registry.shutdown_all();
        let drained = registry.drain();
        assert!(registry.is_empty());
        assert_eq!(drained.len(), 1);
        for (_, record) in drained {
            record.join().unwrap();
        }
    }

    #[test]
    fn test_reap_logs_panicked_worker() {
        let mut registry = ConnectionRegistry::new();
        let (_client, server, peer) = socket_pair();
        let panicked: JoinHandle<()> = thread::spawn(|| panic!("handler failure"));
        let conn_id = registry.insert(ConnectionRecord::new(peer, Arc::new(server), panicked));

        wait_until(|| registry.connections[conn_id].is_finished());
        assert_eq!(registry.reap_finished(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_next_id_matches_insert() {
        let mut registry = ConnectionRegistry::new();
        let (_client, server, peer) = socket_pair();

        let expected = registry.next_id();
        let actual = registry.insert(ConnectionRecord::new(
            peer,
            Arc::new(server),
            thread::spawn(|| {}),
        ));
        assert_eq!(expected, actual);
        assert_eq!(registry.next_id(), actual + 1);
    }
}
