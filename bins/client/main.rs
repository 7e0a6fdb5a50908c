//! # Tick Client
//!
//! Feed client: connects to the tick server, subscribes to every
//! symbol, and maintains the seqlock market cache while printing a
//! periodic rate and latency line.
//!
//! ## Command-line Options
//! - `host` (positional, optional): server IPv4 address.
//! - `port` (positional, optional): server TCP port.
//! - `num_symbols` (positional, optional): number of symbols to track.
//! - `--symbols-file` / `-s`: catalog CSV used for display names.
//! - `--latency-csv`: write a latency histogram CSV on exit.
//! - `--log-level` / `-l`: log level.
//!
//! The core feed handler performs no retries; this binary wraps
//! connect in an exponential-backoff loop and restarts the handler
//! when the server goes away. SIGINT/SIGTERM exit cleanly and print
//! final statistics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use structopt::StructOpt;

use tickcast::errors::CliError;
use tickcast::feed::FeedHandler;

/// Command-line options for the tick client.
#[derive(Debug, StructOpt)]
#[structopt(name = "tick_client", about = "Market-data feed client")]
struct Opt {
    /// Server IPv4 address
    #[structopt(default_value = "127.0.0.1")]
    host: String,

    /// Server TCP port
    #[structopt(default_value = "9876")]
    port: u16,

    /// Number of symbols to subscribe to
    #[structopt(default_value = "100")]
    num_symbols: usize,

    /// Path of the symbol catalog CSV (display names)
    #[structopt(short, long, default_value = "config/symbols.csv")]
    symbols_file: String,

    /// Write a latency histogram CSV to this path on exit
    #[structopt(long)]
    latency_csv: Option<String>,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,
}

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_signal: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

/// Initializes the logger using env_logger with the given level.
fn init_logger(level: &str) {
    let log_level = match level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level);
    builder.format_timestamp_micros();
    builder.format_module_path(false);
    builder.format_target(false);
    builder.init();
}

/// Connects with exponential backoff until it succeeds or a signal
/// interrupts. Returns false when interrupted.
fn connect_with_backoff(handler: &FeedHandler) -> bool {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(30);

    while RUNNING.load(Ordering::SeqCst) {
        match handler.connect() {
            Ok(()) => return true,
            Err(e) => {
                log::warn!("Connect failed: {}. Retrying in {:?}", e, backoff);
                thread::sleep(backoff);
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
    false
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();
    init_logger(&opt.log_level);
    install_signal_handlers();

    log::info!("Starting Tick Client");
    log::debug!("Command line options: {:?}", opt);

    let mut handler = FeedHandler::new(&opt.host, opt.port, opt.num_symbols)?;
    if let Err(e) = handler.load_symbols(&opt.symbols_file) {
        log::warn!("Failed to load symbol names ({}), using defaults", e);
    }

    let symbol_ids: Vec<u16> = (0..opt.num_symbols as u16).collect();

    while RUNNING.load(Ordering::SeqCst) {
        if !connect_with_backoff(&handler) {
            break;
        }

        if let Err(e) = handler.subscribe(&symbol_ids) {
            log::error!("Subscription failed: {}", e);
        }
        handler.start()?;

        let mut last_messages = handler.messages_received();
        let mut last_time = Instant::now();

        while RUNNING.load(Ordering::SeqCst) && handler.is_connected() {
            thread::sleep(Duration::from_millis(500));

            let now = Instant::now();
            let messages = handler.messages_received();
            let elapsed_ms = now.duration_since(last_time).as_millis() as u64;
            if elapsed_ms == 0 {
                continue;
            }

            let rate = (messages - last_messages) * 1000 / elapsed_ms;
            let latency = handler.latency_stats();
            let stats = handler.stats();

            log::info!(
                "messages={} rate={}/s p50={}us p99={}us gaps={} checksum_errors={}",
                messages,
                rate,
                latency.p50 / 1000,
                latency.p99 / 1000,
                stats.sequence_gaps,
                stats.checksum_errors
            );

            last_messages = messages;
            last_time = now;
        }

        handler.stop();
        if RUNNING.load(Ordering::SeqCst) {
            log::warn!("Connection lost, reconnecting");
        }
    }

    handler.stop();

    // Final statistics.
    let stats = handler.stats();
    let latency = handler.latency_stats();
    println!("\nFinal Statistics:");
    println!("Total messages received: {}", stats.messages_received);
    println!("Total bytes received: {}", stats.bytes_received);
    println!(
        "Sequence gaps: {}  Checksum errors: {}  Malformed: {}  Fragmented: {}",
        stats.sequence_gaps, stats.checksum_errors, stats.malformed, stats.fragmented_hits
    );
    println!(
        "Latency - p50: {}us, p99: {}us, p999: {}us",
        latency.p50 / 1000,
        latency.p99 / 1000,
        latency.p999 / 1000
    );

    if let Some(path) = opt.latency_csv {
        if handler.latency().export_histogram(&path) {
            println!("Latency histogram written to {}", path);
        } else {
            log::error!("Failed to write latency histogram to {}", path);
        }
    }

    log::info!("Tick Client shutdown complete");
    Ok(())
}
