//! # Tickcast
//!
//! A simulated market-data fan-out platform: an **exchange server**
//! that synthesizes per-symbol quote and trade ticks from a stochastic
//! price process and broadcasts them over TCP, and a **feed client**
//! that parses the binary stream into a lock-free per-symbol view.
//!
//! ## Features
//!
//! - Geometric Brownian Motion price evolution with Box-Muller normals.
//! - Packed little-endian wire protocol with XOR checksums.
//! - Per-client subscription filtering with slow-consumer isolation.
//! - Fragmentation-tolerant stream parsing with gap detection.
//! - Seqlock symbol cache: one writer, unlimited lock-free readers.
//! - Ring-buffered latency tracking with percentile queries.
//! - Optional fault injection (sequence gaps, split sends).
//!
//! ## Architecture Overview
//!
//! Server side, a tick thread walks every symbol, advances its price
//! process, serializes a quote or trade and hands the bytes to the
//! broadcaster, which sends them non-blocking to each subscribed
//! client. An epoll event loop accepts clients and reads their
//! subscription commands:
//!
//! - [`engine`] — per-tick price, spread, volume and message-kind draws.
//! - [`server`] — accept/read event loop, tick thread, broadcast.
//! - [`registry`] — per-client counters and subscription sets.
//!
//! Client side, a receiver thread drains the socket and feeds the
//! parser; parsed messages land in the cache, where any number of
//! application threads read them concurrently:
//!
//! - [`socket`] — non-blocking connect, edge-triggered receive.
//! - [`parser`] — framing, checksum and sequence validation, dispatch.
//! - [`cache`] — seqlock per-symbol snapshots.
//! - [`latency`] — receive-interval samples and percentiles.
//! - [`feed`] — wires the four together.
//!
//! Shared plumbing: [`protocol`] (wire layout), [`epoll`] (readiness),
//! [`config`] and [`catalog`] (startup files), [`defs`] and [`errors`].
//!
//! ## Wire Protocol
//!
//! All messages are packed little-endian and end in a 4-byte XOR
//! checksum: trades are 32 bytes, quotes 44, heartbeats 20. Clients
//! subscribe by sending `0xFF`, a little-endian `u16` count, and that
//! many `u16` symbol ids. Only subscribed symbols are delivered.
//!
//! ## Example: Serving Ticks
//!
//! ```no_run
//! use std::sync::Arc;
//! use tickcast::server::{ExchangeServer, ServerSettings};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ServerSettings {
//!         port: 9876,
//!         num_symbols: 100,
//!         tick_rate: 100_000,
//!         symbols_file: "config/symbols.csv".into(),
//!         fault_injection: false,
//!     };
//!
//!     let server = Arc::new(ExchangeServer::new(settings)?);
//!     server.start()?;
//!     server.run()?; // blocks until server.stop()
//!     Ok(())
//! }
//! ```
//!
//! ## Example: Consuming the Feed
//!
//! ```no_run
//! use tickcast::feed::FeedHandler;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = FeedHandler::new("127.0.0.1", 9876, 100)?;
//!     handler.connect()?;
//!     handler.subscribe(&(0..100).collect::<Vec<u16>>())?;
//!     handler.start()?;
//!
//!     let cache = handler.cache();
//!     let snap = cache.snapshot(0);
//!     println!("bid={} ask={}", snap.best_bid, snap.best_ask);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unreachable_pub)]

pub mod cache;
pub mod catalog;
pub mod config;
pub mod defs;
pub mod engine;
pub mod epoll;
pub mod errors;
pub mod feed;
pub mod latency;
pub mod parser;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod socket;
