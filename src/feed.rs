//! Client-side feed handler.
//!
//! Wires the non-blocking socket, the stream parser, the seqlock
//! symbol cache and the latency tracker into one receive pipeline. A
//! dedicated receiver thread reads the socket, records the
//! steady-clock interval around each receive call, and routes parsed
//! messages into the cache; application threads read the cache and the
//! statistics concurrently.
//!
//! The handler performs no reconnection. When the server goes away the
//! receiver thread parks itself and the condition is visible through
//! [`FeedHandler::is_connected`]; retry policy belongs to the caller.

use crate::cache::SymbolCache;
use crate::catalog;
use crate::defs::{CONNECT_TIMEOUT_MS, RECV_CHUNK_SIZE};
use crate::errors::{CatalogError, SocketError};
use crate::latency::{LatencyStats, LatencyTracker};
use crate::parser::{ParserStats, StreamParser};
use crate::protocol::Message;
use crate::socket::MarketDataSocket;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Aggregate feed statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Messages dispatched to the cache.
    pub messages_received: u64,
    /// Messages the parser validated.
    pub messages_parsed: u64,
    /// Raw bytes read off the socket.
    pub bytes_received: u64,
    /// Sequence gaps observed on the stream.
    pub sequence_gaps: u64,
    /// Messages dropped for checksum mismatch.
    pub checksum_errors: u64,
    /// Parse attempts stalled on a partial message.
    pub fragmented_hits: u64,
    /// Framing errors resynchronized away.
    pub malformed: u64,
}

/// Receives the market-data stream and maintains per-symbol state.
pub struct FeedHandler {
    host: String,
    port: u16,
    socket: Arc<MarketDataSocket>,
    cache: Arc<SymbolCache>,
    latency: Arc<LatencyTracker>,
    parser_stats: Arc<ParserStats>,
    running: Arc<AtomicBool>,
    messages_received: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    symbol_names: Vec<String>,
    receiver_thread: Mutex<Option<JoinHandle<()>>>,
}

impl FeedHandler {
    /// Creates a handler for `num_symbols` symbols served at
    /// `host:port`.
    ///
    /// # Errors
    /// [`SocketError::Setup`] when the underlying socket cannot be
    /// created.
    pub fn new(host: &str, port: u16, num_symbols: usize) -> Result<Self, SocketError> {
        Ok(Self {
            host: host.to_string(),
            port,
            socket: Arc::new(MarketDataSocket::new()?),
            cache: Arc::new(SymbolCache::new(num_symbols)),
            latency: Arc::new(LatencyTracker::default()),
            parser_stats: Arc::new(ParserStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            messages_received: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            symbol_names: catalog::default_symbol_names(num_symbols),
            receiver_thread: Mutex::new(None),
        })
    }

    /// Replaces the placeholder symbol names with the catalog's.
    ///
    /// Ids the catalog does not cover keep their `SYM<id>` default.
    ///
    /// # Errors
    /// Propagates [`CatalogError`] when the file is unreadable or
    /// empty; existing names are left untouched in that case.
    pub fn load_symbols<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CatalogError> {
        self.symbol_names = catalog::load_symbol_names(path, self.cache.num_symbols())?;
        Ok(())
    }

    /// Name for a symbol id, `"UNKNOWN"` when out of range.
    pub fn symbol_name(&self, symbol_id: u16) -> &str {
        self.symbol_names
            .get(symbol_id as usize)
            .map_or("UNKNOWN", |s| s.as_str())
    }

    /// Connects the underlying socket.
    ///
    /// # Errors
    /// Propagates [`SocketError`] from the connect path.
    pub fn connect(&self) -> Result<(), SocketError> {
        self.socket.connect(&self.host, self.port, CONNECT_TIMEOUT_MS)
    }

    /// Sends a subscription for the given symbol ids.
    ///
    /// # Errors
    /// Propagates [`SocketError`] when disconnected or the frame could
    /// not be written.
    pub fn subscribe(&self, symbol_ids: &[u16]) -> Result<(), SocketError> {
        self.socket.send_subscription(symbol_ids)
    }

    /// Connects if necessary and spawns the receiver thread.
    ///
    /// # Errors
    /// Propagates connect failures. Calling `start` on a handler that
    /// is already running is a warning, not an error.
    pub fn start(&self) -> Result<(), SocketError> {
        let mut guard = match self.receiver_thread.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            log::warn!("Feed handler already running");
            return Ok(());
        }

        if !self.socket.is_connected() {
            self.connect()?;
        }

        self.running.store(true, Ordering::SeqCst);

        let socket = Arc::clone(&self.socket);
        let cache = Arc::clone(&self.cache);
        let latency = Arc::clone(&self.latency);
        let running = Arc::clone(&self.running);
        let messages_received = Arc::clone(&self.messages_received);
        let bytes_received = Arc::clone(&self.bytes_received);
        let parser = StreamParser::with_stats(Arc::clone(&self.parser_stats));

        let handle = thread::spawn(move || {
            receiver_loop(
                socket,
                parser,
                cache,
                latency,
                running,
                messages_received,
                bytes_received,
            );
        });
        *guard = Some(handle);

        log::info!("Feed handler started for {}:{}", self.host, self.port);
        Ok(())
    }

    /// Stops the receiver thread and disconnects.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let handle = match self.receiver_thread.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Receiver thread panicked during shutdown");
            }
        }

        self.socket.disconnect();
    }

    /// The shared symbol cache, for concurrent readers.
    pub fn cache(&self) -> Arc<SymbolCache> {
        Arc::clone(&self.cache)
    }

    /// The latency tracker behind the receive loop.
    pub fn latency(&self) -> Arc<LatencyTracker> {
        Arc::clone(&self.latency)
    }

    /// Percentile statistics of the recorded receive intervals.
    pub fn latency_stats(&self) -> LatencyStats {
        self.latency.stats()
    }

    /// Whether the socket currently believes it is connected.
    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Messages dispatched so far.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Raw bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Aggregate statistics snapshot.
    pub fn stats(&self) -> FeedStats {
        let parser = self.parser_stats.snapshot();
        FeedStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_parsed: parser.parsed,
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            sequence_gaps: parser.sequence_gaps,
            checksum_errors: parser.checksum_errors,
            fragmented_hits: parser.fragmented_hits,
            malformed: parser.malformed,
        }
    }
}

impl Drop for FeedHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receiver_loop(
    socket: Arc<MarketDataSocket>,
    mut parser: StreamParser,
    cache: Arc<SymbolCache>,
    latency: Arc<LatencyTracker>,
    running: Arc<AtomicBool>,
    messages_received: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
) {
    let mut buf = vec![0u8; RECV_CHUNK_SIZE];
    log::debug!("Receiver thread started");

    while running.load(Ordering::SeqCst) {
        let recv_start = Instant::now();

        match socket.receive(&mut buf) {
            Ok(0) => {
                if !socket.is_connected() {
                    log::info!("Feed connection closed by server");
                    break;
                }
                // Nothing pending; yield briefly instead of spinning.
                thread::sleep(Duration::from_micros(100));
            }
            Ok(n) => {
                latency.record(recv_start.elapsed().as_nanos() as u64);
                bytes_received.fetch_add(n as u64, Ordering::Relaxed);

                parser.parse(&buf[..n], |msg| {
                    messages_received.fetch_add(1, Ordering::Relaxed);
                    match msg {
                        Message::Trade(t) => cache.update_trade(
                            t.header.symbol_id,
                            t.payload.price,
                            t.payload.quantity,
                        ),
                        Message::Quote(q) => cache.update_quote(
                            q.header.symbol_id,
                            q.payload.bid_price,
                            q.payload.bid_qty,
                            q.payload.ask_price,
                            q.payload.ask_qty,
                        ),
                        Message::Heartbeat(_) => {}
                    }
                });
            }
            Err(e) => {
                log::error!("Receive error: {}", e);
                break;
            }
        }
    }

    log::debug!("Receiver thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ExchangeServer, ServerSettings};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn test_catalog(num_symbols: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "symbol_id,symbol,price,volatility,drift").unwrap();
        for i in 0..num_symbols {
            writeln!(file, "{},TICK{},250.0,0.2,0.05", i, i).unwrap();
        }
        file
    }

    fn start_server(num_symbols: usize, tick_rate: u32) -> (Arc<ExchangeServer>, NamedTempFile) {
        let catalog = test_catalog(num_symbols);
        let settings = ServerSettings {
            port: 0,
            num_symbols,
            tick_rate,
            symbols_file: catalog.path().to_string_lossy().to_string(),
            fault_injection: false,
        };
        let server = Arc::new(ExchangeServer::new(settings).unwrap());
        server.start().unwrap();
        let runner = Arc::clone(&server);
        thread::spawn(move || {
            let _ = runner.run();
        });
        (server, catalog)
    }

    #[test]
    fn test_end_to_end_feed_into_cache() {
        let (server, catalog) = start_server(4, 4000);
        let port = server.local_port();

        let mut handler = FeedHandler::new("127.0.0.1", port, 4).unwrap();
        handler.load_symbols(catalog.path()).unwrap();

        handler.connect().unwrap();
        handler.subscribe(&[0, 1, 2, 3]).unwrap();
        handler.start().unwrap();

        thread::sleep(Duration::from_millis(1500));

        let stats = handler.stats();
        assert!(stats.messages_parsed > 0, "nothing parsed");
        assert_eq!(stats.messages_received, stats.messages_parsed);
        assert!(stats.bytes_received > 0);
        assert_eq!(stats.checksum_errors, 0);

        let cache = handler.cache();
        assert!(cache.total_updates() > 0);

        // Some symbol saw a quote; its sides must come from one write.
        let quoted = (0..4)
            .map(|id| cache.snapshot(id))
            .find(|s| s.best_bid > 0.0 && s.best_ask > 0.0);
        if let Some(snap) = quoted {
            assert!(snap.best_bid <= snap.best_ask);
        }

        let latency = handler.latency_stats();
        assert!(latency.sample_count > 0);
        assert!(latency.min <= latency.mean && latency.mean <= latency.max);

        handler.stop();
        server.stop();
    }

    #[test]
    fn test_cache_only_touched_for_subscribed_symbols() {
        let (server, _catalog) = start_server(4, 4000);
        let port = server.local_port();

        let handler = FeedHandler::new("127.0.0.1", port, 4).unwrap();
        handler.connect().unwrap();
        handler.subscribe(&[1]).unwrap();
        handler.start().unwrap();

        thread::sleep(Duration::from_millis(1500));

        let cache = handler.cache();
        assert!(cache.snapshot(1).update_count > 0, "subscribed symbol idle");
        for id in [0u16, 2, 3] {
            assert_eq!(cache.snapshot(id).update_count, 0, "leak into symbol {}", id);
        }

        handler.stop();
        server.stop();
    }

    #[test]
    fn test_symbol_names() {
        let catalog = test_catalog(3);
        let mut handler = FeedHandler::new("127.0.0.1", 1, 3).unwrap();

        assert_eq!(handler.symbol_name(0), "SYM0");
        handler.load_symbols(catalog.path()).unwrap();
        assert_eq!(handler.symbol_name(0), "TICK0");
        assert_eq!(handler.symbol_name(2), "TICK2");
        assert_eq!(handler.symbol_name(99), "UNKNOWN");
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let handler = FeedHandler::new("127.0.0.1", 1, 2).unwrap();
        assert!(matches!(
            handler.subscribe(&[0]),
            Err(SocketError::NotConnected)
        ));
    }

    #[test]
    fn test_server_shutdown_observed_as_disconnect() {
        let (server, _catalog) = start_server(2, 1000);
        let port = server.local_port();

        let handler = FeedHandler::new("127.0.0.1", port, 2).unwrap();
        handler.connect().unwrap();
        handler.subscribe(&[0, 1]).unwrap();
        handler.start().unwrap();

        thread::sleep(Duration::from_millis(300));
        server.stop();
        thread::sleep(Duration::from_millis(500));

        assert!(!handler.is_connected());
        handler.stop();
    }
}
