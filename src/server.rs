//! Exchange simulator: tick synthesis and TCP fan-out.
//!
//! One thread generates ticks for every symbol and broadcasts the
//! serialized messages to subscribed clients with non-blocking sends;
//! another runs the epoll event loop handling accepts, subscription
//! commands and disconnects. The [`ClientRegistry`] is the only shared
//! mutable resource between the two.
//!
//! Slow consumers are never waited for: a send that would block marks
//! the client slow and skips it. Per-client errors are contained to
//! that client; only startup failures (bind, listen, symbol catalog)
//! are fatal.

use crate::catalog::load_catalog;
use crate::config::Config;
use crate::defs::{
    DEFAULT_NUM_SYMBOLS, DEFAULT_PORT, DEFAULT_SYMBOLS_FILE, DEFAULT_TICK_RATE,
    EVENT_WAIT_TIMEOUT_MS, FRAGMENT_DELAY_US, FRAGMENT_PROBABILITY, LISTEN_BACKLOG, MAX_EVENTS,
    PRICE_UPDATE_INTERVAL, SEQ_GAP_PROBABILITY,
};
use crate::engine::TickEngine;
use crate::epoll::{empty_event, Epoll};
use crate::errors::ServerError;
use crate::protocol::{
    self, MessageHeader, MessageType, QuoteMessage, QuotePayload, TradeMessage, TradePayload,
    SUBSCRIBE_COMMAND,
};
use crate::registry::ClientRegistry;

use std::collections::HashSet;
use std::io;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Startup parameters of the exchange server.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// TCP port to listen on (0 picks an ephemeral port).
    pub port: u16,
    /// Number of simulated symbols.
    pub num_symbols: usize,
    /// Aggregate messages per second across all symbols.
    pub tick_rate: u32,
    /// Path of the symbol catalog CSV.
    pub symbols_file: String,
    /// Whether sequence-gap and fragmentation faults are injected.
    pub fault_injection: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            num_symbols: DEFAULT_NUM_SYMBOLS,
            tick_rate: DEFAULT_TICK_RATE,
            symbols_file: DEFAULT_SYMBOLS_FILE.to_string(),
            fault_injection: false,
        }
    }
}

impl ServerSettings {
    /// Builds settings from a parsed configuration file, falling back
    /// to the defaults for missing keys.
    pub fn from_config(config: &Config) -> Self {
        Self {
            port: config.get_u16("server.port", DEFAULT_PORT),
            num_symbols: config.get_usize("market.num_symbols", DEFAULT_NUM_SYMBOLS),
            tick_rate: config.get_u32("market.tick_rate", DEFAULT_TICK_RATE),
            symbols_file: config.get_str("market.symbols_file", DEFAULT_SYMBOLS_FILE),
            fault_injection: config.get_bool("fault_injection.enabled", false),
        }
    }
}

/// Mutable per-symbol state owned by the tick thread.
struct SymbolState {
    symbol_id: u16,
    name: String,
    current_price: f64,
    volatility: f64,
    drift: f64,
    seq_num: u32,
    ticks_since_price_update: u32,
}

impl SymbolState {
    fn placeholder(symbol_id: u16) -> Self {
        Self {
            symbol_id,
            name: String::new(),
            current_price: 0.0,
            volatility: 0.0,
            drift: 0.0,
            seq_num: 0,
            ticks_since_price_update: 0,
        }
    }
}

/// The exchange simulator.
///
/// Lifecycle: `new` loads the catalog (fatal on failure), [`start`]
/// binds the listener and spawns the tick thread, [`run`] blocks in the
/// event loop until [`stop`] is called from another thread (or a signal
/// handler flips the shared flag and the next timeout notices).
///
/// [`start`]: Self::start
/// [`run`]: Self::run
/// [`stop`]: Self::stop
pub struct ExchangeServer {
    settings: ServerSettings,
    listener: Mutex<Option<TcpListener>>,
    listener_fd: AtomicI32,
    epoll: Epoll,
    registry: ClientRegistry,
    symbols: Mutex<Vec<SymbolState>>,
    running: AtomicBool,
    tick_rate: AtomicU32,
    fault_injection: AtomicBool,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
    rate_mutex: Mutex<()>,
    rate_cv: Condvar,
}

impl ExchangeServer {
    /// Loads the symbol catalog and prepares an idle server.
    ///
    /// # Errors
    /// [`ServerError::CatalogError`] when the catalog is missing or
    /// empty, [`ServerError::EventLoopError`] when epoll cannot be
    /// created. Both are startup-fatal.
    pub fn new(settings: ServerSettings) -> Result<Self, ServerError> {
        let defs = load_catalog(&settings.symbols_file, settings.num_symbols)?;

        let mut symbols: Vec<SymbolState> = (0..settings.num_symbols)
            .map(|i| SymbolState::placeholder(i as u16))
            .collect();
        for def in defs {
            let state = &mut symbols[def.symbol_id as usize];
            state.name = def.name;
            state.current_price = def.price;
            state.volatility = def.volatility;
            state.drift = def.drift;
            log::debug!(
                "Symbol {} ({}) starts at {} (sigma={}, mu={})",
                state.symbol_id,
                state.name,
                state.current_price,
                state.volatility,
                state.drift
            );
        }

        let epoll = Epoll::new().map_err(|e| ServerError::EventLoopError(e.to_string()))?;

        log::info!(
            "Exchange server configured: port={} symbols={} tick_rate={} fault_injection={}",
            settings.port,
            settings.num_symbols,
            settings.tick_rate,
            settings.fault_injection
        );

        Ok(Self {
            tick_rate: AtomicU32::new(settings.tick_rate),
            fault_injection: AtomicBool::new(settings.fault_injection),
            settings,
            listener: Mutex::new(None),
            listener_fd: AtomicI32::new(-1),
            epoll,
            registry: ClientRegistry::new(),
            symbols: Mutex::new(symbols),
            running: AtomicBool::new(false),
            tick_thread: Mutex::new(None),
            rate_mutex: Mutex::new(()),
            rate_cv: Condvar::new(),
        })
    }

    /// Binds the listening socket and spawns the tick thread.
    ///
    /// # Errors
    /// [`ServerError::BindError`] when the port cannot be bound or
    /// listened on; [`ServerError::EventLoopError`] when the listener
    /// cannot be registered for readiness.
    pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("Exchange server already running");
            return Ok(());
        }

        let setup = || -> Result<TcpListener, ServerError> {
            let listener = bind_listener(self.settings.port)?;
            listener
                .set_nonblocking(true)
                .map_err(|e| ServerError::BindError(e.to_string()))?;
            self.epoll
                .add(listener.as_raw_fd(), libc::EPOLLIN as u32)
                .map_err(|e| ServerError::EventLoopError(e.to_string()))?;
            Ok(listener)
        };

        let listener = match setup() {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let fd = listener.as_raw_fd();

        let port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.settings.port);

        *lock(&self.listener) = Some(listener);
        self.listener_fd.store(fd, Ordering::SeqCst);

        let server = Arc::clone(self);
        let handle = thread::spawn(move || server.tick_generation_loop());
        *lock(&self.tick_thread) = Some(handle);

        log::info!("Exchange server started on port {}", port);
        Ok(())
    }

    /// Runs the event loop until the server is stopped.
    ///
    /// Blocks the calling thread. Each pass waits up to 100 ms for
    /// readiness events: the listener going readable accepts one
    /// client, hangup/error events run the disconnect path, and client
    /// data is read and interpreted as subscription commands.
    ///
    /// # Errors
    /// [`ServerError::EventLoopError`] when called before [`start`] or
    /// when the readiness wait itself fails.
    ///
    /// [`start`]: Self::start
    pub fn run(&self) -> Result<(), ServerError> {
        let listener_fd = self.listener_fd.load(Ordering::SeqCst);
        if listener_fd < 0 {
            return Err(ServerError::EventLoopError(
                "server not started".to_string(),
            ));
        }

        let mut events = [empty_event(); MAX_EVENTS];

        while self.running.load(Ordering::SeqCst) {
            let n = self
                .epoll
                .wait(&mut events, EVENT_WAIT_TIMEOUT_MS)
                .map_err(|e| ServerError::EventLoopError(e.to_string()))?;

            for event in &events[..n] {
                let fd = event.u64 as RawFd;
                let flags = event.events;

                if fd == listener_fd {
                    self.handle_new_connection();
                } else if flags & (libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0 {
                    self.handle_client_disconnect(fd);
                } else if flags & libc::EPOLLIN as u32 != 0 {
                    self.handle_client_data(fd);
                }
            }
        }

        Ok(())
    }

    /// Changes the aggregate tick rate at runtime.
    ///
    /// A rate of zero parks the tick thread on a condition variable;
    /// raising it from zero wakes the thread again.
    pub fn set_tick_rate(&self, ticks_per_second: u32) {
        let _guard = lock(&self.rate_mutex);
        let old = self.tick_rate.swap(ticks_per_second, Ordering::SeqCst);
        if old == 0 && ticks_per_second > 0 {
            self.rate_cv.notify_one();
        }
    }

    /// Current aggregate tick rate.
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate.load(Ordering::SeqCst)
    }

    /// Enables or disables fault injection at runtime.
    pub fn enable_fault_injection(&self, enable: bool) {
        self.fault_injection.store(enable, Ordering::SeqCst);
    }

    /// Whether the server is between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Port the listener is actually bound to (useful when the settings
    /// requested port 0). Zero when not listening.
    pub fn local_port(&self) -> u16 {
        lock(&self.listener)
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map_or(0, |a| a.port())
    }

    /// The client registry, exposed for statistics inspection.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Stops the server: joins the tick thread, closes every client and
    /// the listener. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        // Wake the tick thread in case it is parked on rate == 0. The
        // empty critical section orders the store before the wakeup.
        drop(lock(&self.rate_mutex));
        self.rate_cv.notify_one();

        if let Some(handle) = lock(&self.tick_thread).take() {
            if handle.join().is_err() {
                log::error!("Tick thread panicked during shutdown");
            }
        }

        for fd in self.registry.all_clients() {
            let _ = self.epoll.delete(fd);
        }
        self.registry.clear();

        if let Some(listener) = lock(&self.listener).take() {
            let _ = self.epoll.delete(listener.as_raw_fd());
        }
        self.listener_fd.store(-1, Ordering::SeqCst);

        log::info!("Exchange server stopped");
    }

    fn handle_new_connection(&self) {
        let guard = lock(&self.listener);
        let Some(listener) = guard.as_ref() else {
            return;
        };

        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    log::error!("Failed to set client non-blocking: {}", e);
                    return;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    log::warn!("Failed to set TCP_NODELAY on client: {}", e);
                }

                let fd = stream.as_raw_fd();
                if let Err(e) = self
                    .epoll
                    .add(fd, (libc::EPOLLIN | libc::EPOLLET) as u32)
                {
                    log::error!("Failed to register client fd {}: {}", fd, e);
                    return;
                }

                self.registry.add(stream);
                log::info!("New client connected: fd={} addr={}", fd, addr);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("Accept failed: {}", e),
        }
    }

    fn handle_client_disconnect(&self, fd: RawFd) {
        let _ = self.epoll.delete(fd);
        // Dropping the registry record closes the descriptor.
        self.registry.remove(fd);
        log::info!("Client disconnected: fd={}", fd);
    }

    fn handle_client_data(&self, fd: RawFd) {
        let mut buf = [0u8; 1024];
        let n = unsafe {
            libc::recv(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };

        if n <= 0 {
            let err = io::Error::last_os_error();
            let would_block = matches!(
                err.raw_os_error(),
                Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
            );
            if n == 0 || !would_block {
                self.handle_client_disconnect(fd);
            }
            return;
        }

        let data = &buf[..n as usize];
        if data[0] == SUBSCRIBE_COMMAND {
            self.handle_subscription(fd, data);
        } else {
            log::warn!(
                "Ignoring unknown command 0x{:02X} from fd={} ({} bytes)",
                data[0],
                fd,
                data.len()
            );
        }
    }

    fn handle_subscription(&self, fd: RawFd, data: &[u8]) {
        let Some(raw_ids) = protocol::decode_subscription(data) else {
            log::warn!(
                "Invalid subscription frame from fd={} ({} bytes)",
                fd,
                data.len()
            );
            return;
        };

        let mut symbol_ids = HashSet::new();
        for id in raw_ids {
            if (id as usize) < self.settings.num_symbols {
                symbol_ids.insert(id);
            } else {
                log::warn!(
                    "Invalid symbol ID in subscription: {} (max={})",
                    id,
                    self.settings.num_symbols
                );
            }
        }

        log::info!("Client fd={} subscribed to {} symbols", fd, symbol_ids.len());
        self.registry.subscribe(fd, symbol_ids);
    }

    /// Tick thread body: per one-second cycle, emit `rate / num_symbols`
    /// messages for each symbol, then sleep the remainder.
    fn tick_generation_loop(&self) {
        let mut engine = TickEngine::new();
        log::info!("Tick generation thread started");

        while self.running.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();
            let rate = self.tick_rate.load(Ordering::SeqCst);

            if rate == 0 {
                let guard = lock(&self.rate_mutex);
                let result = self.rate_cv.wait_while(guard, |_| {
                    self.running.load(Ordering::SeqCst)
                        && self.tick_rate.load(Ordering::SeqCst) == 0
                });
                drop(result);
                continue;
            }

            let ticks_per_symbol = (rate as usize / self.settings.num_symbols).max(1);

            {
                let mut symbols = lock(&self.symbols);
                'cycle: for idx in 0..symbols.len() {
                    for _ in 0..ticks_per_symbol {
                        if !self.running.load(Ordering::Relaxed) {
                            break 'cycle;
                        }
                        self.generate_tick(&mut engine, &mut symbols[idx]);
                    }
                }
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < Duration::from_secs(1) && self.running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_secs(1) - elapsed);
            }
        }

        log::info!("Tick generation thread stopped");
    }

    /// Synthesizes and broadcasts one message for `symbol`.
    fn generate_tick(&self, engine: &mut TickEngine, symbol: &mut SymbolState) {
        symbol.ticks_since_price_update += 1;
        if symbol.ticks_since_price_update >= PRICE_UPDATE_INTERVAL {
            let rate = self.tick_rate.load(Ordering::Relaxed);
            let dt = if rate > 0 {
                PRICE_UPDATE_INTERVAL as f64 * self.settings.num_symbols as f64 / rate as f64
            } else {
                0.1
            };
            symbol.current_price =
                engine.next_price(symbol.current_price, symbol.drift, symbol.volatility, dt);
            symbol.ticks_since_price_update = 0;
        }

        let fault = self.fault_injection.load(Ordering::Relaxed);

        // Normally the next message takes seq+1; injecting a fault
        // advances by one extra so exactly one number goes missing.
        if fault && engine.roll() < SEQ_GAP_PROBABILITY {
            symbol.seq_num = symbol.seq_num.wrapping_add(2);
        } else {
            symbol.seq_num = symbol.seq_num.wrapping_add(1);
        }

        let header = |msg_type: MessageType, symbol: &SymbolState| MessageHeader {
            msg_type: msg_type as u16,
            seq_num: symbol.seq_num,
            timestamp: now_ns(),
            symbol_id: symbol.symbol_id,
        };

        if engine.should_generate_quote() {
            let spread = engine.spread(symbol.current_price);
            let msg = QuoteMessage {
                header: header(MessageType::Quote, symbol),
                payload: QuotePayload {
                    bid_price: symbol.current_price - spread / 2.0,
                    bid_qty: engine.volume(),
                    ask_price: symbol.current_price + spread / 2.0,
                    ask_qty: engine.volume(),
                },
            };
            self.broadcast(&msg.encode(), symbol.symbol_id, engine, fault);
        } else {
            let msg = TradeMessage {
                header: header(MessageType::Trade, symbol),
                payload: TradePayload {
                    price: symbol.current_price,
                    quantity: engine.volume(),
                },
            };
            self.broadcast(&msg.encode(), symbol.symbol_id, engine, fault);
        }
    }

    /// Sends one serialized message to every client subscribed to
    /// `symbol_id`.
    fn broadcast(&self, data: &[u8], symbol_id: u16, engine: &mut TickEngine, fault: bool) {
        let clients = self.registry.subscribed_clients(symbol_id);

        for fd in clients {
            if fault && engine.roll() < FRAGMENT_PROBABILITY {
                // Deliberate mid-message split to exercise client-side
                // reassembly.
                let half = data.len() / 2;
                let sent = send_nonblocking(fd, &data[..half]);
                if sent > 0 {
                    thread::sleep(Duration::from_micros(FRAGMENT_DELAY_US));
                    send_nonblocking(fd, &data[half..]);
                }
                continue;
            }

            let sent = send_nonblocking(fd, data);
            if sent < 0 {
                // Capture errno before anything else can clobber it.
                let err = io::Error::last_os_error();
                self.registry.record_send(fd, data.len(), false);
                match err.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => {
                        // Send buffer full: slow consumer. Skip rather
                        // than block the rest of the fan-out.
                        self.registry.mark_slow(fd);
                        log::warn!("Slow consumer detected on fd {}", fd);
                    }
                    Some(libc::EPIPE) | Some(libc::ECONNRESET) => {
                        self.handle_client_disconnect(fd);
                    }
                    _ => {
                        log::debug!("Send error on fd {}: {}", fd, err);
                    }
                }
            } else {
                self.registry.record_send(fd, sent as usize, true);
            }
        }
    }
}

impl Drop for ExchangeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Creates the listening socket with `SO_REUSEADDR` and the full
/// backlog, returning it as an owned `TcpListener`.
fn bind_listener(port: u16) -> Result<TcpListener, ServerError> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(ServerError::BindError(
            io::Error::last_os_error().to_string(),
        ));
    }

    let close_and_err = |fd: RawFd| {
        let err = io::Error::last_os_error().to_string();
        unsafe { libc::close(fd) };
        Err(ServerError::BindError(err))
    };

    let reuse: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return close_and_err(fd);
    }

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: libc::INADDR_ANY.to_be(),
        },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return close_and_err(fd);
    }

    if unsafe { libc::listen(fd, LISTEN_BACKLOG) } < 0 {
        return close_and_err(fd);
    }

    // SAFETY: fd is a freshly created, successfully listening socket
    // owned by nobody else.
    Ok(unsafe { TcpListener::from_raw_fd(fd) })
}

fn send_nonblocking(fd: RawFd, data: &[u8]) -> isize {
    unsafe {
        libc::send(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
        )
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::StreamParser;
    use crate::protocol::Message;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn test_catalog(num_symbols: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "symbol_id,symbol,price,volatility,drift").unwrap();
        for i in 0..num_symbols {
            writeln!(file, "{},SYM{},100.0,0.2,0.05", i, i).unwrap();
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

    fn subscribe_frame(ids: &[u16]) -> Vec<u8> {
        protocol::encode_subscription(ids)
    }

    #[test]
    fn test_settings_from_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server.port = 7777").unwrap();
        writeln!(file, "market.num_symbols = 8").unwrap();
        writeln!(file, "market.tick_rate = 5000").unwrap();
        writeln!(file, "fault_injection.enabled = yes").unwrap();

        let config = Config::load(file.path()).unwrap();
        let settings = ServerSettings::from_config(&config);
        assert_eq!(settings.port, 7777);
        assert_eq!(settings.num_symbols, 8);
        assert_eq!(settings.tick_rate, 5000);
        assert_eq!(settings.symbols_file, DEFAULT_SYMBOLS_FILE);
        assert!(settings.fault_injection);
    }

    #[test]
    fn test_missing_catalog_is_fatal() {
        let settings = ServerSettings {
            symbols_file: "no_such_catalog.csv".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ExchangeServer::new(settings),
            Err(ServerError::CatalogError(_))
        ));
    }

    #[test]
    fn test_subscription_filtering_end_to_end() {
        let (server, _catalog) = start_server(4, 4000);
        let port = server.local_port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(&subscribe_frame(&[2])).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        // Collect a window of messages and check the filter held.
        let mut parser = StreamParser::new();
        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut buf = [0u8; 4096];
        while received.len() < 50 && Instant::now() < deadline {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    parser.parse(&buf[..n], |m| received.push(m));
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => panic!("read error: {}", e),
            }
        }

        assert!(!received.is_empty(), "no messages received");
        for msg in &received {
            assert_eq!(msg.header().symbol_id, 2);
        }
        // Quotes carry a positive spread around the mid.
        for msg in &received {
            if let Message::Quote(q) = msg {
                assert!(q.payload.bid_price < q.payload.ask_price);
            }
        }

        server.stop();
    }

    #[test]
    fn test_unsubscribed_client_receives_nothing() {
        let (server, _catalog) = start_server(2, 2000);
        let port = server.local_port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();

        let mut buf = [0u8; 1024];
        match client.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => panic!("received {} bytes without a subscription", n),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => panic!("read error: {}", e),
        }

        server.stop();
    }

    #[test]
    fn test_invalid_subscription_ids_dropped() {
        let (server, _catalog) = start_server(4, 0);
        let port = server.local_port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(&subscribe_frame(&[1, 999, 4])).unwrap();
        thread::sleep(Duration::from_millis(300));

        let clients = server.registry().all_clients();
        assert_eq!(clients.len(), 1);
        let fd = clients[0];
        assert!(server.registry().is_subscribed(fd, 1));
        assert!(!server.registry().is_subscribed(fd, 4));
        assert_eq!(server.registry().subscription_count(fd), 1);

        server.stop();
    }

    #[test]
    fn test_disconnect_purges_registry() {
        let (server, _catalog) = start_server(2, 0);
        let port = server.local_port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(&subscribe_frame(&[0])).unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(server.registry().client_count(), 1);

        drop(client);
        // A few event-loop iterations to observe the hangup.
        thread::sleep(Duration::from_millis(500));

        assert_eq!(server.registry().client_count(), 0);
        assert!(server.registry().subscribed_clients(0).is_empty());

        server.stop();
    }

    #[test]
    fn test_tick_rate_zero_parks_and_resumes() {
        let (server, _catalog) = start_server(2, 0);
        let port = server.local_port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(&subscribe_frame(&[0, 1])).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();

        // Parked: nothing arrives.
        let mut buf = [0u8; 1024];
        assert!(matches!(
            client.read(&mut buf),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
        ));

        // Waking the tick thread starts the flow.
        server.set_tick_rate(2000);
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let n = client.read(&mut buf).unwrap();
        assert!(n > 0);

        server.stop();
    }

    #[test]
    fn test_slow_consumer_is_isolated() {
        let (server, _catalog) = start_server(1, 500_000);
        let port = server.local_port();

        // Client A subscribes and never reads.
        let mut slow = TcpStream::connect(("127.0.0.1", port)).unwrap();
        slow.write_all(&subscribe_frame(&[0])).unwrap();

        // Client B subscribes and keeps draining.
        let mut fast = TcpStream::connect(("127.0.0.1", port)).unwrap();
        fast.write_all(&subscribe_frame(&[0])).unwrap();
        fast.set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        let drained = thread::spawn(move || {
            let mut total = 0usize;
            let mut buf = [0u8; 65536];
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                match fast.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(_) => {}
                }
            }
            total
        });

        let total = drained.join().unwrap();
        assert!(total > 0, "fast client starved");

        // The non-reading client eventually filled its pipe and was
        // marked slow without stalling the fan-out.
        let slow_info = server
            .registry()
            .all_clients()
            .into_iter()
            .map(|fd| server.registry().info(fd))
            .find(|info| info.is_slow);
        assert!(slow_info.is_some(), "no client was marked slow");
        assert!(slow_info.unwrap().send_errors > 0);

        drop(slow);
        server.stop();
    }
}
