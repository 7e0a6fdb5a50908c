//! Seqlock-protected per-symbol market state.
//!
//! One designated writer (the parser thread) publishes updates; any
//! number of readers take consistent snapshots without locks and without
//! writing to shared cache lines. Torn reads are detected through an
//! even/odd sequence counter: the writer bumps it to odd before touching
//! the payload and to even afterwards, and a reader retries whenever the
//! counter is odd or changed underneath it.
//!
//! Each per-symbol state is padded to its own 64-byte cache line so
//! writer traffic on one symbol never invalidates readers of its
//! neighbors.

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A consistent by-value copy of one symbol's market state.
///
/// Produced atomically by a seqlock read; carries no synchronization
/// state of its own.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MarketSnapshot {
    /// Best bid price.
    pub best_bid: f64,
    /// Best ask price.
    pub best_ask: f64,
    /// Quantity at the best bid.
    pub bid_quantity: u32,
    /// Quantity at the best ask.
    pub ask_quantity: u32,
    /// Price of the last trade.
    pub last_traded_price: f64,
    /// Quantity of the last trade.
    pub last_traded_quantity: u32,
    /// Nanosecond timestamp of the last write.
    pub last_update_time: u64,
    /// Number of writes applied to this symbol.
    pub update_count: u64,
}

/// Payload fields guarded by the sequence counter.
#[derive(Clone, Copy, Default)]
struct MarketFields {
    best_bid: f64,
    best_ask: f64,
    bid_quantity: u32,
    ask_quantity: u32,
    last_traded_price: f64,
    last_traded_quantity: u32,
    last_update_time: u64,
    update_count: u64,
}

/// One cache-line-aligned seqlock cell.
///
/// Sequence counter protocol: odd = write in progress, even = stable.
#[repr(C, align(64))]
struct MarketState {
    sequence: AtomicU64,
    fields: UnsafeCell<MarketFields>,
}

// SAFETY: concurrent access is mediated by the seqlock protocol. The
// single-writer contract is documented on SymbolCache's mutators.
unsafe impl Sync for MarketState {}
unsafe impl Send for MarketState {}

impl MarketState {
    fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            fields: UnsafeCell::new(MarketFields::default()),
        }
    }

    /// Runs one mutation under the write side of the seqlock.
    ///
    /// Must only be called from the single writer thread.
    #[inline]
    fn write_with(&self, mutate: impl FnOnce(&mut MarketFields)) {
        let seq = self.sequence.load(Ordering::Relaxed);

        // Odd: readers now treat the payload as in flux.
        self.sequence.store(seq + 1, Ordering::Release);
        fence(Ordering::Release);

        // SAFETY: single writer guarantee from the caller; readers only
        // copy and re-check the sequence counter afterwards.
        unsafe {
            mutate(&mut *self.fields.get());
        }

        fence(Ordering::Release);
        // Even again: write complete.
        self.sequence.store(seq + 2, Ordering::Release);
    }

    /// Runs one copy-out under the read side of the seqlock, retrying
    /// until a consistent view is obtained.
    #[inline]
    fn read_with<T: Copy>(&self, copy: impl Fn(&MarketFields) -> T) -> T {
        loop {
            let mut seq1 = self.sequence.load(Ordering::Acquire);
            while seq1 & 1 == 1 {
                hint::spin_loop();
                seq1 = self.sequence.load(Ordering::Acquire);
            }

            // SAFETY: the value is copied out and discarded again unless
            // the sequence counter proves it was stable throughout.
            let value = unsafe { copy(&*self.fields.get()) };

            fence(Ordering::Acquire);
            let seq2 = self.sequence.load(Ordering::Acquire);
            if seq1 == seq2 {
                return value;
            }

            hint::spin_loop();
        }
    }
}

/// Per-symbol market state store: single writer, lock-free readers.
///
/// States are allocated once at construction as a contiguous array
/// indexed by symbol id. Out-of-range ids are silent no-ops on write
/// and yield zeroed snapshots on read; there are no other failure
/// modes.
pub struct SymbolCache {
    states: Vec<MarketState>,
}

impl SymbolCache {
    /// Allocates state for `num_symbols` symbols, all zeroed.
    pub fn new(num_symbols: usize) -> Self {
        let mut states = Vec::with_capacity(num_symbols);
        states.resize_with(num_symbols, MarketState::new);
        Self { states }
    }

    /// Number of symbols this cache was sized for.
    pub fn num_symbols(&self) -> usize {
        self.states.len()
    }

    /// Publishes a new best bid. Writer thread only.
    pub fn update_bid(&self, symbol_id: u16, price: f64, quantity: u32) {
        if let Some(state) = self.states.get(symbol_id as usize) {
            let now = now_ns();
            state.write_with(|f| {
                f.best_bid = price;
                f.bid_quantity = quantity;
                f.last_update_time = now;
                f.update_count += 1;
            });
        }
    }

    /// Publishes a new best ask. Writer thread only.
    pub fn update_ask(&self, symbol_id: u16, price: f64, quantity: u32) {
        if let Some(state) = self.states.get(symbol_id as usize) {
            let now = now_ns();
            state.write_with(|f| {
                f.best_ask = price;
                f.ask_quantity = quantity;
                f.last_update_time = now;
                f.update_count += 1;
            });
        }
    }

    /// Publishes a last-trade update. Writer thread only.
    pub fn update_trade(&self, symbol_id: u16, price: f64, quantity: u32) {
        if let Some(state) = self.states.get(symbol_id as usize) {
            let now = now_ns();
            state.write_with(|f| {
                f.last_traded_price = price;
                f.last_traded_quantity = quantity;
                f.last_update_time = now;
                f.update_count += 1;
            });
        }
    }

    /// Publishes both sides of the book in one seqlock write.
    ///
    /// This is the only operation that updates the (bid, ask) pair
    /// atomically; readers never observe a bid from one call paired
    /// with an ask from another. Writer thread only.
    pub fn update_quote(
        &self,
        symbol_id: u16,
        bid_price: f64,
        bid_qty: u32,
        ask_price: f64,
        ask_qty: u32,
    ) {
        if let Some(state) = self.states.get(symbol_id as usize) {
            let now = now_ns();
            state.write_with(|f| {
                f.best_bid = bid_price;
                f.bid_quantity = bid_qty;
                f.best_ask = ask_price;
                f.ask_quantity = ask_qty;
                f.last_update_time = now;
                f.update_count += 1;
            });
        }
    }

    /// Takes a consistent snapshot of one symbol.
    ///
    /// Returns an all-zero snapshot for out-of-range ids.
    pub fn snapshot(&self, symbol_id: u16) -> MarketSnapshot {
        match self.states.get(symbol_id as usize) {
            None => MarketSnapshot::default(),
            Some(state) => state.read_with(|f| MarketSnapshot {
                best_bid: f.best_bid,
                best_ask: f.best_ask,
                bid_quantity: f.bid_quantity,
                ask_quantity: f.ask_quantity,
                last_traded_price: f.last_traded_price,
                last_traded_quantity: f.last_traded_quantity,
                last_update_time: f.last_update_time,
                update_count: f.update_count,
            }),
        }
    }

    /// Best bid for one symbol (seqlock read), 0.0 when out of range.
    pub fn bid(&self, symbol_id: u16) -> f64 {
        self.states
            .get(symbol_id as usize)
            .map_or(0.0, |s| s.read_with(|f| f.best_bid))
    }

    /// Best ask for one symbol (seqlock read), 0.0 when out of range.
    pub fn ask(&self, symbol_id: u16) -> f64 {
        self.states
            .get(symbol_id as usize)
            .map_or(0.0, |s| s.read_with(|f| f.best_ask))
    }

    /// Last traded price for one symbol (seqlock read), 0.0 when out of
    /// range.
    pub fn ltp(&self, symbol_id: u16) -> f64 {
        self.states
            .get(symbol_id as usize)
            .map_or(0.0, |s| s.read_with(|f| f.last_traded_price))
    }

    /// Sum of every symbol's update count, each read under the seqlock.
    pub fn total_updates(&self) -> u64 {
        self.states
            .iter()
            .map(|s| s.read_with(|f| f.update_count))
            .sum()
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
