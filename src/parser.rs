//! Stateful, fragmentation-tolerant stream parser.
//!
//! Consumes arbitrary byte chunks straight off a TCP socket and emits
//! fully validated, typed [`Message`] values through a caller-supplied
//! handler. Fragmentation and coalescing are internal concerns: partial
//! messages wait in an internal buffer, concatenated messages are split
//! apart, and garbage is resynchronized away one byte at a time.

use crate::defs::{MAX_MESSAGE_SIZE, PARSER_BUFFER_SIZE};
use crate::protocol::{
    message_size, HeartbeatMessage, Message, MessageType, QuoteMessage, TradeMessage, HEADER_SIZE,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared parser counters.
///
/// Kept as atomics so the owning thread can keep parsing while another
/// thread reads statistics.
#[derive(Debug, Default)]
pub struct ParserStats {
    /// Messages validated and dispatched.
    pub parsed: AtomicU64,
    /// Messages dropped for checksum mismatch.
    pub checksum_errors: AtomicU64,
    /// Detected jumps in the sequence number stream.
    pub sequence_gaps: AtomicU64,
    /// Framing errors: unknown type or oversized message.
    pub malformed: AtomicU64,
    /// Times extraction stalled on an incomplete message.
    pub fragmented_hits: AtomicU64,
}

impl ParserStats {
    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> ParserStatsSnapshot {
        ParserStatsSnapshot {
            parsed: self.parsed.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            fragmented_hits: self.fragmented_hits.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        self.parsed.store(0, Ordering::Relaxed);
        self.checksum_errors.store(0, Ordering::Relaxed);
        self.sequence_gaps.store(0, Ordering::Relaxed);
        self.malformed.store(0, Ordering::Relaxed);
        self.fragmented_hits.store(0, Ordering::Relaxed);
    }
}

/// Plain-value copy of [`ParserStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserStatsSnapshot {
    /// Messages validated and dispatched.
    pub parsed: u64,
    /// Messages dropped for checksum mismatch.
    pub checksum_errors: u64,
    /// Detected jumps in the sequence number stream.
    pub sequence_gaps: u64,
    /// Framing errors: unknown type or oversized message.
    pub malformed: u64,
    /// Times extraction stalled on an incomplete message.
    pub fragmented_hits: u64,
}

/// Binary stream parser with an internal fragmentation buffer.
pub struct StreamParser {
    buffer: Vec<u8>,
    buffer_pos: usize,
    last_seq: u32,
    stats: Arc<ParserStats>,
}

impl StreamParser {
    /// Creates a parser with an empty 64 KiB fragmentation buffer.
    pub fn new() -> Self {
        Self::with_stats(Arc::new(ParserStats::default()))
    }

    /// Creates a parser that reports into an externally owned counter
    /// block, so statistics stay readable after the parser moves into
    /// its receive thread.
    pub fn with_stats(stats: Arc<ParserStats>) -> Self {
        Self {
            buffer: vec![0u8; PARSER_BUFFER_SIZE],
            buffer_pos: 0,
            last_seq: 0,
            stats,
        }
    }

    /// Handle to the shared counters, for reading from other threads.
    pub fn stats(&self) -> Arc<ParserStats> {
        Arc::clone(&self.stats)
    }

    /// Last sequence number observed on the stream (0 until the first
    /// message).
    pub fn last_seq(&self) -> u32 {
        self.last_seq
    }

    /// Feeds a chunk of received bytes through the parser.
    ///
    /// Every complete, valid message buffered so far is dispatched to
    /// `handler` in stream order. Returns the number of input bytes
    /// consumed (always the full chunk: input larger than the remaining
    /// buffer space is absorbed in slices, draining between slices).
    pub fn parse(&mut self, data: &[u8], mut handler: impl FnMut(Message)) -> usize {
        let mut consumed = 0;

        while consumed < data.len() {
            let space = PARSER_BUFFER_SIZE - self.buffer_pos;
            let to_copy = space.min(data.len() - consumed);
            self.buffer[self.buffer_pos..self.buffer_pos + to_copy]
                .copy_from_slice(&data[consumed..consumed + to_copy]);
            self.buffer_pos += to_copy;
            consumed += to_copy;

            self.drain(&mut handler);
        }

        consumed
    }

    /// Zeroes the buffer position, the last sequence number, and all
    /// counters.
    pub fn reset(&mut self) {
        self.buffer_pos = 0;
        self.last_seq = 0;
        self.stats.clear();
    }

    /// Extracts messages from the front of the buffer until it holds
    /// only a fragment (or nothing).
    fn drain(&mut self, handler: &mut impl FnMut(Message)) {
        loop {
            if self.buffer_pos < HEADER_SIZE {
                return;
            }

            let msg_type = u16::from_le_bytes([self.buffer[0], self.buffer[1]]);
            let msg_size = match message_size(msg_type) {
                Some(size) if size <= MAX_MESSAGE_SIZE => size,
                _ => {
                    // Unknown type or oversize: resynchronize one byte
                    // at a time until a plausible header lines up.
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    self.discard(1);
                    continue;
                }
            };

            if self.buffer_pos < msg_size {
                self.stats.fragmented_hits.fetch_add(1, Ordering::Relaxed);
                return;
            }

            let msg_bytes = &self.buffer[..msg_size];
            if !crate::protocol::validate(msg_bytes) {
                self.stats.checksum_errors.fetch_add(1, Ordering::Relaxed);
                self.discard(msg_size);
                continue;
            }

            let message = decode_message(msg_type, msg_bytes);
            self.discard(msg_size);

            let Some(message) = message else {
                // Size table and decoder disagree; treat as framing
                // damage rather than dropping the stream.
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let seq = message.header().seq_num;
            if self.last_seq != 0 && seq != self.last_seq.wrapping_add(1) {
                self.stats.sequence_gaps.fetch_add(1, Ordering::Relaxed);
            }
            self.last_seq = seq;

            handler(message);
            self.stats.parsed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn discard(&mut self, n: usize) {
        self.buffer.copy_within(n..self.buffer_pos, 0);
        self.buffer_pos -= n;
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_message(msg_type: u16, bytes: &[u8]) -> Option<Message> {
    match MessageType::from_u16(msg_type)? {
        MessageType::Trade => TradeMessage::decode(bytes).map(Message::Trade),
        MessageType::Quote => QuoteMessage::decode(bytes).map(Message::Quote),
        MessageType::Heartbeat => HeartbeatMessage::decode(bytes).map(Message::Heartbeat),
        MessageType::Subscribe => None,
    }
}
