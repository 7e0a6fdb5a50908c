//! # Tick Server
//!
//! Simulated exchange: synthesizes per-symbol quote/trade ticks and
//! fans them out over TCP to subscribing feed clients.
//!
//! ## Command-line Options
//! - `port` (positional, optional): TCP listen port, overrides the
//!   config file.
//! - `num_symbols` (positional, optional): number of simulated symbols,
//!   overrides the config file.
//! - `--config` / `-c`: path of the key=value configuration file.
//! - `--log-level` / `-l`: log level (`error`, `warn`, `info`, `debug`,
//!   `trace`).
//!
//! SIGINT and SIGTERM request an orderly shutdown: the event loop
//! drains, the tick thread is joined, and every client socket closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use structopt::StructOpt;

use tickcast::config::Config;
use tickcast::defs::DEFAULT_CONFIG_FILE;
use tickcast::errors::CliError;
use tickcast::server::{ExchangeServer, ServerSettings};

/// Command-line options for the tick server.
#[derive(Debug, StructOpt)]
#[structopt(name = "tick_server", about = "Simulated exchange tick server")]
struct Opt {
    /// TCP listen port (overrides the config file)
    port: Option<u16>,

    /// Number of simulated symbols (overrides the config file)
    num_symbols: Option<usize>,

    /// Path of the key=value configuration file
    #[structopt(short, long)]
    config: Option<String>,

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

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();
    init_logger(&opt.log_level);
    install_signal_handlers();

    log::info!("Starting Tick Server");
    log::debug!("Command line options: {:?}", opt);

    let config_path = opt.config.as_deref().unwrap_or(DEFAULT_CONFIG_FILE);
    let mut settings = match Config::load(config_path) {
        Ok(config) => ServerSettings::from_config(&config),
        Err(e) => {
            log::warn!("Config file not found ({}), using defaults", e);
            ServerSettings::default()
        }
    };
    if let Some(port) = opt.port {
        settings.port = port;
    }
    if let Some(num_symbols) = opt.num_symbols {
        settings.num_symbols = num_symbols;
    }

    let server = Arc::new(ExchangeServer::new(settings)?);
    server.start()?;

    // Bridge the signal flag to the server: the event loop only checks
    // its own running flag, so a watcher thread translates.
    {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            while RUNNING.load(Ordering::SeqCst) && server.is_running() {
                thread::sleep(Duration::from_millis(100));
            }
            if !RUNNING.load(Ordering::SeqCst) {
                log::info!("Received signal, shutting down");
                server.stop();
            }
        });
    }

    log::info!("Tick server running on port {}. Press Ctrl+C to stop.", server.local_port());

    // Blocks until stop() flips the running flag.
    server.run()?;

    server.stop();
    log::info!("Shutdown complete");
    Ok(())
}
