//! Binary wire protocol shared by the exchange server and the feed
//! client.
//!
//! All messages are packed little-endian with no padding and end in a
//! 4-byte XOR checksum. Layouts are fixed by explicit per-field byte
//! serialization rather than struct reinterpretation, so they hold on
//! any host endianness and never require aligned loads.
//!
//! ```text
//! Header (16 B): msg_type u16 | seq_num u32 | timestamp u64 | symbol_id u16
//! Trade  (32 B): header | price f64 | quantity u32 | checksum u32
//! Quote  (44 B): header | bid_price f64 | bid_qty u32
//!                       | ask_price f64 | ask_qty u32 | checksum u32
//! Heartbeat (20 B): header | checksum u32
//! Subscribe: 0xFF u8 | count u16 | count x symbol_id u16
//! ```

/// Size of the common message header in bytes.
pub const HEADER_SIZE: usize = 16;
/// Size of the trade payload in bytes.
pub const TRADE_PAYLOAD_SIZE: usize = 12;
/// Size of the quote payload in bytes.
pub const QUOTE_PAYLOAD_SIZE: usize = 24;
/// Size of the trailing checksum in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Total size of a trade message on the wire.
pub const TRADE_MESSAGE_SIZE: usize = HEADER_SIZE + TRADE_PAYLOAD_SIZE + CHECKSUM_SIZE;
/// Total size of a quote message on the wire.
pub const QUOTE_MESSAGE_SIZE: usize = HEADER_SIZE + QUOTE_PAYLOAD_SIZE + CHECKSUM_SIZE;
/// Total size of a heartbeat message on the wire.
pub const HEARTBEAT_MESSAGE_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

// Wire sizes are load-bearing for the parser; pin them.
const _: () = assert!(TRADE_MESSAGE_SIZE == 32);
const _: () = assert!(QUOTE_MESSAGE_SIZE == 44);
const _: () = assert!(HEARTBEAT_MESSAGE_SIZE == 20);

/// First byte of a subscription frame.
pub const SUBSCRIBE_COMMAND: u8 = 0xFF;
/// Minimum length of a subscription frame (command + count).
pub const SUBSCRIBE_HEADER_SIZE: usize = 3;

/// Message type discriminants carried in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Last-trade report.
    Trade = 0x01,
    /// Two-sided quote update.
    Quote = 0x02,
    /// Keep-alive with no payload.
    Heartbeat = 0x03,
    /// Client-to-server subscription command.
    Subscribe = 0xFF,
}

impl MessageType {
    /// Maps a raw header value to a known type.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::Trade),
            0x02 => Some(MessageType::Quote),
            0x03 => Some(MessageType::Heartbeat),
            0xFF => Some(MessageType::Subscribe),
            _ => None,
        }
    }
}

/// Returns the total wire size for a server-to-client message type, or
/// `None` for unknown values (including the subscribe command, which is
/// variable length and client-to-server only).
pub fn message_size(msg_type: u16) -> Option<usize> {
    match MessageType::from_u16(msg_type) {
        Some(MessageType::Trade) => Some(TRADE_MESSAGE_SIZE),
        Some(MessageType::Quote) => Some(QUOTE_MESSAGE_SIZE),
        Some(MessageType::Heartbeat) => Some(HEARTBEAT_MESSAGE_SIZE),
        _ => None,
    }
}

/// XOR-folds every byte into a `u32`.
///
/// The high 24 bits stay zero; this is a parity-preserving integrity
/// tag, not a cryptographic digest.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut acc: u32 = 0;
    for &b in bytes {
        acc ^= b as u32;
    }
    acc
}

/// Validates a complete message: recomputes the checksum over all bytes
/// except the trailing four and compares it byte-exactly against the
/// stored value.
pub fn validate(bytes: &[u8]) -> bool {
    if bytes.len() < CHECKSUM_SIZE {
        return false;
    }
    let body = &bytes[..bytes.len() - CHECKSUM_SIZE];
    let stored = read_u32(bytes, bytes.len() - CHECKSUM_SIZE);
    checksum(body) == stored
}

/// Common header carried by every server-to-client message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MessageHeader {
    /// One of the [`MessageType`] discriminants, as transmitted.
    pub msg_type: u16,
    /// Per-symbol sequence number, strictly increasing on the wire.
    pub seq_num: u32,
    /// Nanoseconds since the UNIX epoch at synthesis time.
    pub timestamp: u64,
    /// Symbol identifier the message refers to.
    pub symbol_id: u16,
}

impl MessageHeader {
    fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[2..6].copy_from_slice(&self.seq_num.to_le_bytes());
        buf[6..14].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[14..16].copy_from_slice(&self.symbol_id.to_le_bytes());
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// Returns `None` when the slice is too short.
    pub fn read_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(MessageHeader {
            msg_type: read_u16(buf, 0),
            seq_num: read_u32(buf, 2),
            timestamp: read_u64(buf, 6),
            symbol_id: read_u16(buf, 14),
        })
    }
}

/// Trade payload fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TradePayload {
    /// Traded price.
    pub price: f64,
    /// Traded quantity.
    pub quantity: u32,
}

/// Quote payload fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuotePayload {
    /// Best bid price.
    pub bid_price: f64,
    /// Quantity at the best bid.
    pub bid_qty: u32,
    /// Best ask price.
    pub ask_price: f64,
    /// Quantity at the best ask.
    pub ask_qty: u32,
}

/// A complete trade message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TradeMessage {
    /// Common header (`msg_type` is [`MessageType::Trade`]).
    pub header: MessageHeader,
    /// Trade payload.
    pub payload: TradePayload,
}

impl TradeMessage {
    /// Serializes the message and stamps the trailing checksum.
    pub fn encode(&self) -> [u8; TRADE_MESSAGE_SIZE] {
        let mut buf = [0u8; TRADE_MESSAGE_SIZE];
        self.header.write_to(&mut buf);
        buf[16..24].copy_from_slice(&self.payload.price.to_le_bytes());
        buf[24..28].copy_from_slice(&self.payload.quantity.to_le_bytes());
        let ck = checksum(&buf[..TRADE_MESSAGE_SIZE - CHECKSUM_SIZE]);
        buf[28..32].copy_from_slice(&ck.to_le_bytes());
        buf
    }

    /// Decodes from a validated slice of exactly [`TRADE_MESSAGE_SIZE`]
    /// bytes. The checksum is not re-verified here.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < TRADE_MESSAGE_SIZE {
            return None;
        }
        Some(TradeMessage {
            header: MessageHeader::read_from(buf)?,
            payload: TradePayload {
                price: read_f64(buf, 16),
                quantity: read_u32(buf, 24),
            },
        })
    }
}

/// A complete quote message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuoteMessage {
    /// Common header (`msg_type` is [`MessageType::Quote`]).
    pub header: MessageHeader,
    /// Quote payload.
    pub payload: QuotePayload,
}

impl QuoteMessage {
    /// Serializes the message and stamps the trailing checksum.
    pub fn encode(&self) -> [u8; QUOTE_MESSAGE_SIZE] {
        let mut buf = [0u8; QUOTE_MESSAGE_SIZE];
        self.header.write_to(&mut buf);
        buf[16..24].copy_from_slice(&self.payload.bid_price.to_le_bytes());
        buf[24..28].copy_from_slice(&self.payload.bid_qty.to_le_bytes());
        buf[28..36].copy_from_slice(&self.payload.ask_price.to_le_bytes());
        buf[36..40].copy_from_slice(&self.payload.ask_qty.to_le_bytes());
        let ck = checksum(&buf[..QUOTE_MESSAGE_SIZE - CHECKSUM_SIZE]);
        buf[40..44].copy_from_slice(&ck.to_le_bytes());
        buf
    }

    /// Decodes from a validated slice of exactly [`QUOTE_MESSAGE_SIZE`]
    /// bytes. The checksum is not re-verified here.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < QUOTE_MESSAGE_SIZE {
            return None;
        }
        Some(QuoteMessage {
            header: MessageHeader::read_from(buf)?,
            payload: QuotePayload {
                bid_price: read_f64(buf, 16),
                bid_qty: read_u32(buf, 24),
                ask_price: read_f64(buf, 28),
                ask_qty: read_u32(buf, 36),
            },
        })
    }
}

/// A complete heartbeat message (header and checksum only).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeartbeatMessage {
    /// Common header (`msg_type` is [`MessageType::Heartbeat`]).
    pub header: MessageHeader,
}

impl HeartbeatMessage {
    /// Serializes the message and stamps the trailing checksum.
    pub fn encode(&self) -> [u8; HEARTBEAT_MESSAGE_SIZE] {
        let mut buf = [0u8; HEARTBEAT_MESSAGE_SIZE];
        self.header.write_to(&mut buf);
        let ck = checksum(&buf[..HEARTBEAT_MESSAGE_SIZE - CHECKSUM_SIZE]);
        buf[16..20].copy_from_slice(&ck.to_le_bytes());
        buf
    }

    /// Decodes from a validated slice of exactly
    /// [`HEARTBEAT_MESSAGE_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(HeartbeatMessage {
            header: MessageHeader::read_from(buf)?,
        })
    }
}

/// A fully validated, typed message as produced by the stream parser.
///
/// The parser decodes bytes under their packed layout and hands out one
/// of these variants; consumers pattern-match instead of downcasting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    /// Last-trade report.
    Trade(TradeMessage),
    /// Two-sided quote update.
    Quote(QuoteMessage),
    /// Keep-alive.
    Heartbeat(HeartbeatMessage),
}

impl Message {
    /// The common header of whichever variant this is.
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::Trade(m) => &m.header,
            Message::Quote(m) => &m.header,
            Message::Heartbeat(m) => &m.header,
        }
    }
}

/// Builds a subscription frame for the given symbol ids.
pub fn encode_subscription(symbol_ids: &[u16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(SUBSCRIBE_HEADER_SIZE + symbol_ids.len() * 2);
    frame.push(SUBSCRIBE_COMMAND);
    frame.extend_from_slice(&(symbol_ids.len() as u16).to_le_bytes());
    for &id in symbol_ids {
        frame.extend_from_slice(&id.to_le_bytes());
    }
    frame
}

/// Parses a subscription frame into its raw symbol ids.
///
/// Returns `None` when the frame is shorter than the header, carries a
/// different command byte, or declares more ids than the bytes received
/// actually hold. Range-checking of the ids is left to the caller.
pub fn decode_subscription(bytes: &[u8]) -> Option<Vec<u16>> {
    if bytes.len() < SUBSCRIBE_HEADER_SIZE || bytes[0] != SUBSCRIBE_COMMAND {
        return None;
    }
    let count = read_u16(bytes, 1) as usize;
    if bytes.len() < SUBSCRIBE_HEADER_SIZE + count * 2 {
        return None;
    }
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(read_u16(bytes, SUBSCRIBE_HEADER_SIZE + i * 2));
    }
    Some(ids)
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

fn read_f64(buf: &[u8], off: usize) -> f64 {
    f64::from_bits(read_u64(buf, off))
}
