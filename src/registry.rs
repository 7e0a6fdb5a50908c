//! Server-side client registry.
//!
//! Tracks every connected client: its owned socket handle, send
//! counters, the slow-consumer flag, and its subscription set. All
//! state lives under a single coarse mutex; every operation is total,
//! with unknown descriptors treated as no-ops or zero returns.
//!
//! The registry owns the `TcpStream` handles. Removing a client drops
//! its stream and thereby closes the descriptor exactly once; callers
//! never close fds themselves.

use std::collections::{HashMap, HashSet};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Mutex, MutexGuard};

/// By-value snapshot of one client's counters.
///
/// Zeroed when the queried client is unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Raw descriptor of the client socket (0 when unknown).
    pub fd: RawFd,
    /// Messages delivered successfully.
    pub messages_sent: u64,
    /// Bytes delivered successfully.
    pub bytes_sent: u64,
    /// Failed send attempts.
    pub send_errors: u64,
    /// Whether the client has ever stalled a send with would-block.
    pub is_slow: bool,
}

struct ClientRecord {
    stream: TcpStream,
    messages_sent: u64,
    bytes_sent: u64,
    send_errors: u64,
    is_slow: bool,
}

impl ClientRecord {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            messages_sent: 0,
            bytes_sent: 0,
            send_errors: 0,
            is_slow: false,
        }
    }
}

#[derive(Default)]
struct Inner {
    clients: HashMap<RawFd, ClientRecord>,
    subscriptions: HashMap<RawFd, HashSet<u16>>,
}

/// Registry of connected clients and their subscriptions.
#[derive(Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a freshly accepted client stream.
    ///
    /// Returns the descriptor the client is tracked under.
    pub fn add(&self, stream: TcpStream) -> RawFd {
        let fd = stream.as_raw_fd();
        let mut inner = self.lock();
        inner.clients.insert(fd, ClientRecord::new(stream));
        fd
    }

    /// Removes a client and purges its subscriptions.
    ///
    /// Dropping the owned stream closes the descriptor. No-op for
    /// unknown fds.
    pub fn remove(&self, fd: RawFd) {
        let mut inner = self.lock();
        inner.clients.remove(&fd);
        inner.subscriptions.remove(&fd);
    }

    /// Descriptors of every tracked client.
    pub fn all_clients(&self) -> Vec<RawFd> {
        self.lock().clients.keys().copied().collect()
    }

    /// Number of tracked clients.
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Flags a client whose send buffer filled up.
    pub fn mark_slow(&self, fd: RawFd) {
        if let Some(client) = self.lock().clients.get_mut(&fd) {
            client.is_slow = true;
        }
    }

    /// Accounts for one send attempt of `bytes` bytes.
    pub fn record_send(&self, fd: RawFd, bytes: usize, success: bool) {
        if let Some(client) = self.lock().clients.get_mut(&fd) {
            if success {
                client.messages_sent += 1;
                client.bytes_sent += bytes as u64;
            } else {
                client.send_errors += 1;
            }
        }
    }

    /// Counter snapshot for one client; zeroed when unknown.
    pub fn info(&self, fd: RawFd) -> ClientInfo {
        match self.lock().clients.get(&fd) {
            None => ClientInfo::default(),
            Some(c) => ClientInfo {
                fd,
                messages_sent: c.messages_sent,
                bytes_sent: c.bytes_sent,
                send_errors: c.send_errors,
                is_slow: c.is_slow,
            },
        }
    }

    /// Replaces a client's subscription set. An empty set clears it.
    pub fn subscribe(&self, fd: RawFd, symbol_ids: HashSet<u16>) {
        self.lock().subscriptions.insert(fd, symbol_ids);
    }

    /// Drops one symbol from a client's subscription set.
    pub fn unsubscribe(&self, fd: RawFd, symbol_id: u16) {
        if let Some(set) = self.lock().subscriptions.get_mut(&fd) {
            set.remove(&symbol_id);
        }
    }

    /// Clears a client's subscription set.
    pub fn clear_subscriptions(&self, fd: RawFd) {
        self.lock().subscriptions.remove(&fd);
    }

    /// Whether a client is subscribed to a symbol.
    pub fn is_subscribed(&self, fd: RawFd, symbol_id: u16) -> bool {
        self.lock()
            .subscriptions
            .get(&fd)
            .map_or(false, |set| set.contains(&symbol_id))
    }

    /// Size of a client's subscription set (0 when unknown).
    pub fn subscription_count(&self, fd: RawFd) -> usize {
        self.lock().subscriptions.get(&fd).map_or(0, |s| s.len())
    }

    /// Descriptors of every client subscribed to `symbol_id`.
    ///
    /// One pass over the map under the lock; returns a copy so the
    /// caller can send without holding it.
    pub fn subscribed_clients(&self, symbol_id: u16) -> Vec<RawFd> {
        self.lock()
            .subscriptions
            .iter()
            .filter(|(_, set)| set.contains(&symbol_id))
            .map(|(&fd, _)| fd)
            .collect()
    }

    /// Drops every client and subscription. Streams close as their
    /// records are dropped.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.clients.clear();
        inner.subscriptions.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Registry operations are total; a poisoned lock (panicking
        // test client) must not take the server down with it.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    /// Builds a connected stream pair so the registry has a real fd to
    /// own.
    fn client_stream(listener: &TcpListener) -> TcpStream {
        let addr = listener.local_addr().unwrap();
        let _connector = TcpStream::connect(addr).unwrap();
        listener.accept().unwrap().0
    }

    #[test]
    fn test_add_remove_and_count() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();

        let fd_a = registry.add(client_stream(&listener));
        let fd_b = registry.add(client_stream(&listener));
        assert_eq!(registry.client_count(), 2);

        let mut all = registry.all_clients();
        all.sort();
        let mut expected = vec![fd_a, fd_b];
        expected.sort();
        assert_eq!(all, expected);

        registry.remove(fd_a);
        assert_eq!(registry.client_count(), 1);
        // Idempotent for unknown fds.
        registry.remove(fd_a);
        registry.remove(9999);
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_send_accounting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();
        let fd = registry.add(client_stream(&listener));

        registry.record_send(fd, 44, true);
        registry.record_send(fd, 44, true);
        registry.record_send(fd, 44, false);
        registry.mark_slow(fd);

        let info = registry.info(fd);
        assert_eq!(info.messages_sent, 2);
        assert_eq!(info.bytes_sent, 88);
        assert_eq!(info.send_errors, 1);
        assert!(info.is_slow);

        // Unknown fds are invisible: zero info, no-op accounting.
        registry.record_send(4242, 44, true);
        assert_eq!(registry.info(4242), ClientInfo::default());
    }

    #[test]
    fn test_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();
        let fd_a = registry.add(client_stream(&listener));
        let fd_b = registry.add(client_stream(&listener));

        registry.subscribe(fd_a, [1u16, 2, 3].into_iter().collect());
        registry.subscribe(fd_b, [2u16].into_iter().collect());

        assert!(registry.is_subscribed(fd_a, 1));
        assert!(!registry.is_subscribed(fd_b, 1));
        assert_eq!(registry.subscription_count(fd_a), 3);

        let mut subs = registry.subscribed_clients(2);
        subs.sort();
        let mut expected = vec![fd_a, fd_b];
        expected.sort();
        assert_eq!(subs, expected);

        registry.unsubscribe(fd_a, 2);
        assert_eq!(registry.subscribed_clients(2), vec![fd_b]);

        // Replacing with an empty set clears.
        registry.subscribe(fd_b, HashSet::new());
        assert!(registry.subscribed_clients(2).is_empty());
    }

    #[test]
    fn test_remove_purges_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new();
        let fd = registry.add(client_stream(&listener));

        registry.subscribe(fd, [5u16].into_iter().collect());
        registry.remove(fd);

        assert!(registry.subscribed_clients(5).is_empty());
        assert_eq!(registry.subscription_count(fd), 0);
    }
}
