/// Number of ticks between re-samples of the underlying price process.
///
/// Every tick produces a wire message, but the geometric Brownian motion
/// step only runs once per interval. This separates message throughput
/// from the frequency of the simulated price process.
pub const PRICE_UPDATE_INTERVAL: u32 = 100;

/// Default TCP port the exchange server listens on.
pub const DEFAULT_PORT: u16 = 9876;

/// Default number of simulated symbols.
pub const DEFAULT_NUM_SYMBOLS: usize = 100;

/// Default aggregate tick rate in messages per second, spread evenly
/// across all symbols.
pub const DEFAULT_TICK_RATE: u32 = 100_000;

/// Default path of the symbol catalog CSV.
pub const DEFAULT_SYMBOLS_FILE: &str = "config/symbols.csv";

/// Default path of the server configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "config/server.conf";

/// Upper bound on a single wire message.
///
/// Anything larger than this in a message header is treated as a framing
/// error and resynchronized away.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Capacity of the stream parser's internal fragmentation buffer.
pub const PARSER_BUFFER_SIZE: usize = 65536;

/// Size of the receive buffer handed to the socket on each read.
pub const RECV_CHUNK_SIZE: usize = 65536;

/// Receive-side kernel socket buffer requested by the client (bytes).
pub const CLIENT_RECV_SOCKET_BUFFER: usize = 4 * 1024 * 1024;

/// Timeout of one readiness wait in the server event loop (milliseconds).
///
/// Bounds how long shutdown can lag behind the `running` flag flipping.
pub const EVENT_WAIT_TIMEOUT_MS: i32 = 100;

/// Maximum number of readiness events drained per wait.
pub const MAX_EVENTS: usize = 64;

/// Listen backlog of the server socket.
pub const LISTEN_BACKLOG: i32 = 1000;

/// Default client connect timeout (milliseconds).
pub const CONNECT_TIMEOUT_MS: u32 = 5000;

/// Probability that a tick emits a quote rather than a trade.
pub const QUOTE_PROBABILITY: f64 = 0.7;

/// Bid-ask spread bounds as a fraction of the mid price.
pub const MIN_SPREAD_PCT: f64 = 0.0005;
/// Upper spread bound, see [`MIN_SPREAD_PCT`].
pub const MAX_SPREAD_PCT: f64 = 0.002;

/// Floor the simulated price never goes below.
pub const MIN_PRICE: f64 = 0.1;

/// Fault injection: per-tick probability of skipping one sequence number.
pub const SEQ_GAP_PROBABILITY: f64 = 0.01;

/// Fault injection: per-recipient probability of splitting a send in two.
pub const FRAGMENT_PROBABILITY: f64 = 0.05;

/// Delay between the two halves of a fragmented send (microseconds).
pub const FRAGMENT_DELAY_US: u64 = 100;
