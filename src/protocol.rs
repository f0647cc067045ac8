//! Wire codec for the framed binary protocol.
//!
//! Every message starts with a 12-byte header: `type` (u8) at offset 0,
//! three reserved bytes (zero on send, ignored on receive), `length` (u32,
//! total frame size including the header) at offset 4 and `sequence` (u32,
//! opaque to the server, echoed on responses) at offset 8. Bodies follow the
//! header tightly packed. All multi-byte integers are big-endian.

use thiserror::Error;

use crate::orders::{OrderType, Side};

/// Size of the common message header.
pub const HEADER_LEN: usize = 12;

/// Fixed size of the text field in echo and list-users messages. The field
/// is NUL-terminated and NUL-padded.
pub const TEXT_LEN: usize = 256;

/// Number of level slots carried per side in a book status response.
pub const MAX_LEVELS: usize = 10;

const MSG_QUIT: u8 = 0x01;
const MSG_ECHO_REQUEST: u8 = 0x02;
const MSG_ECHO_RESPONSE: u8 = 0x03;
const MSG_LIST_USERS_REQUEST: u8 = 0x04;
const MSG_LIST_USERS_RESPONSE: u8 = 0x05;
const MSG_ADD_ORDER_REQUEST: u8 = 0x10;
const MSG_ADD_ORDER_RESPONSE: u8 = 0x11;
const MSG_CANCEL_ORDER_REQUEST: u8 = 0x12;
const MSG_CANCEL_ORDER_RESPONSE: u8 = 0x13;
const MSG_MODIFY_ORDER_REQUEST: u8 = 0x14;
const MSG_MODIFY_ORDER_RESPONSE: u8 = 0x15;
const MSG_ORDERBOOK_STATUS_REQUEST: u8 = 0x16;
const MSG_ORDERBOOK_STATUS_RESPONSE: u8 = 0x17;
const MSG_TRADE_NOTIFICATION: u8 = 0x18;
const MSG_ERROR: u8 = 0x30;

/// One `(price, quantity)` slot of a book status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireLevel {
    pub price: u32,
    pub quantity: u32,
}

/// Message body, one variant per wire type code.
///
/// Type codes the codec does not know decode to [`Payload::Unknown`] so the
/// dispatcher can answer with an [`Payload::Error`] frame that still echoes
/// the request sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Quit,
    EchoRequest {
        text: String,
    },
    EchoResponse {
        text: String,
    },
    ListUsersRequest,
    ListUsersResponse {
        num_clients: u32,
        text: String,
    },
    AddOrderRequest {
        order_type: OrderType,
        side: Side,
        price: u32,
        quantity: u32,
        client_order_id: u64,
    },
    AddOrderResponse {
        client_order_id: u64,
        server_order_id: u64,
        status: u8,
    },
    CancelOrderRequest {
        order_id: u64,
    },
    CancelOrderResponse {
        order_id: u64,
        status: u8,
    },
    ModifyOrderRequest {
        order_id: u64,
        side: Side,
        price: u32,
        quantity: u32,
    },
    ModifyOrderResponse {
        order_id: u64,
        side: Side,
        price: u32,
        quantity: u32,
    },
    OrderbookStatusRequest,
    OrderbookStatusResponse {
        bids: Vec<WireLevel>,
        asks: Vec<WireLevel>,
    },
    TradeNotification {
        buy_order_id: u64,
        sell_order_id: u64,
        price: u32,
        quantity: u32,
    },
    Error,
    Unknown(u8),
}

impl Payload {
    /// The wire type code for this payload.
    pub fn msg_type(&self) -> u8 {
        match self {
            Payload::Quit => MSG_QUIT,
            Payload::EchoRequest { .. } => MSG_ECHO_REQUEST,
            Payload::EchoResponse { .. } => MSG_ECHO_RESPONSE,
            Payload::ListUsersRequest => MSG_LIST_USERS_REQUEST,
            Payload::ListUsersResponse { .. } => MSG_LIST_USERS_RESPONSE,
            Payload::AddOrderRequest { .. } => MSG_ADD_ORDER_REQUEST,
            Payload::AddOrderResponse { .. } => MSG_ADD_ORDER_RESPONSE,
            Payload::CancelOrderRequest { .. } => MSG_CANCEL_ORDER_REQUEST,
            Payload::CancelOrderResponse { .. } => MSG_CANCEL_ORDER_RESPONSE,
            Payload::ModifyOrderRequest { .. } => MSG_MODIFY_ORDER_REQUEST,
            Payload::ModifyOrderResponse { .. } => MSG_MODIFY_ORDER_RESPONSE,
            Payload::OrderbookStatusRequest => MSG_ORDERBOOK_STATUS_REQUEST,
            Payload::OrderbookStatusResponse { .. } => MSG_ORDERBOOK_STATUS_RESPONSE,
            Payload::TradeNotification { .. } => MSG_TRADE_NOTIFICATION,
            Payload::Error => MSG_ERROR,
            Payload::Unknown(code) => *code,
        }
    }
}

/// A complete message: the header's sequence plus the typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u32,
    pub payload: Payload,
}

impl Frame {
    pub fn new(sequence: u32, payload: Payload) -> Self {
        Self { sequence, payload }
    }
}

/// Reasons a frame is syntactically unusable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame length {length} is below the minimum for type {msg_type:#04x}")]
    BadLength { msg_type: u8, length: u32 },
    #[error("invalid {field} code {value:#04x}")]
    BadField { field: &'static str, value: u8 },
}

/// Outcome of a [`decode`] attempt on a reassembly buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame. Drain `consumed` bytes from the buffer.
    Frame { frame: Frame, consumed: usize },
    /// The buffer holds no complete frame yet; at least `n` more bytes are
    /// needed.
    NeedMore(usize),
    /// The frame is unusable. Drain `consumed` bytes and answer with an
    /// error frame echoing `sequence`.
    Malformed {
        sequence: u32,
        consumed: usize,
        error: ProtocolError,
    },
}

/// Encodes a frame into wire bytes, header included.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN];
    match &frame.payload {
        Payload::Quit
        | Payload::ListUsersRequest
        | Payload::OrderbookStatusRequest
        | Payload::Error
        | Payload::Unknown(_) => {}
        Payload::EchoRequest { text } | Payload::EchoResponse { text } => {
            put_text(&mut buf, text);
        }
        Payload::ListUsersResponse { num_clients, text } => {
            buf.extend_from_slice(&num_clients.to_be_bytes());
            put_text(&mut buf, text);
        }
        Payload::AddOrderRequest {
            order_type,
            side,
            price,
            quantity,
            client_order_id,
        } => {
            buf.push(order_type.to_wire());
            buf.push(side.to_wire());
            buf.extend_from_slice(&price.to_be_bytes());
            buf.extend_from_slice(&quantity.to_be_bytes());
            buf.extend_from_slice(&client_order_id.to_be_bytes());
        }
        Payload::AddOrderResponse {
            client_order_id,
            server_order_id,
            status,
        } => {
            buf.extend_from_slice(&client_order_id.to_be_bytes());
            buf.extend_from_slice(&server_order_id.to_be_bytes());
            buf.push(*status);
        }
        Payload::CancelOrderRequest { order_id } => {
            buf.extend_from_slice(&order_id.to_be_bytes());
        }
        Payload::CancelOrderResponse { order_id, status } => {
            buf.extend_from_slice(&order_id.to_be_bytes());
            buf.push(*status);
        }
        Payload::ModifyOrderRequest {
            order_id,
            side,
            price,
            quantity,
        }
        | Payload::ModifyOrderResponse {
            order_id,
            side,
            price,
            quantity,
        } => {
            buf.extend_from_slice(&order_id.to_be_bytes());
            buf.push(side.to_wire());
            buf.extend_from_slice(&price.to_be_bytes());
            buf.extend_from_slice(&quantity.to_be_bytes());
        }
        Payload::OrderbookStatusResponse { bids, asks } => {
            let bid_count = bids.len().min(MAX_LEVELS);
            let ask_count = asks.len().min(MAX_LEVELS);
            buf.extend_from_slice(&(bid_count as u32).to_be_bytes());
            buf.extend_from_slice(&(ask_count as u32).to_be_bytes());
            put_levels(&mut buf, &bids[..bid_count]);
            put_levels(&mut buf, &asks[..ask_count]);
        }
        Payload::TradeNotification {
            buy_order_id,
            sell_order_id,
            price,
            quantity,
        } => {
            buf.extend_from_slice(&buy_order_id.to_be_bytes());
            buf.extend_from_slice(&sell_order_id.to_be_bytes());
            buf.extend_from_slice(&price.to_be_bytes());
            buf.extend_from_slice(&quantity.to_be_bytes());
        }
    }

    buf[0] = frame.payload.msg_type();
    let length = buf.len() as u32;
    buf[4..8].copy_from_slice(&length.to_be_bytes());
    buf[8..12].copy_from_slice(&frame.sequence.to_be_bytes());
    buf
}

/// Attempts to decode one frame from the front of `buf`.
///
/// The reassembler should call this whenever new bytes arrive and act on the
/// returned variant; oversized `length` values are simply waited out here,
/// any cap on them is the caller's policy.
pub fn decode(buf: &[u8]) -> Decoded {
    if buf.len() < HEADER_LEN {
        return Decoded::NeedMore(HEADER_LEN - buf.len());
    }
    let msg_type = buf[0];
    let length = get_u32(&buf[4..8]) as usize;
    let sequence = get_u32(&buf[8..12]);

    if length < HEADER_LEN {
        // the advertised length cannot even cover the header; drop the
        // header's worth of bytes and resynchronize from there
        return Decoded::Malformed {
            sequence,
            consumed: HEADER_LEN,
            error: ProtocolError::BadLength {
                msg_type,
                length: length as u32,
            },
        };
    }
    if buf.len() < length {
        return Decoded::NeedMore(length - buf.len());
    }

    let body = &buf[HEADER_LEN..length];
    match decode_body(msg_type, body) {
        Ok(payload) => Decoded::Frame {
            frame: Frame { sequence, payload },
            consumed: length,
        },
        Err(error) => Decoded::Malformed {
            sequence,
            consumed: length,
            error,
        },
    }
}

/// The total frame length advertised by a buffer's header, once the header
/// is complete. Lets the reassembler enforce its own cap before waiting for
/// the body.
pub fn advertised_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    Some(get_u32(&buf[4..8]) as usize)
}

/// Minimum body size for a type code; unknown codes have no body to check.
fn min_body_len(msg_type: u8) -> usize {
    match msg_type {
        MSG_ECHO_REQUEST | MSG_ECHO_RESPONSE => TEXT_LEN,
        MSG_LIST_USERS_RESPONSE => 4 + TEXT_LEN,
        MSG_ADD_ORDER_REQUEST => 18,
        MSG_ADD_ORDER_RESPONSE => 17,
        MSG_CANCEL_ORDER_REQUEST => 8,
        MSG_CANCEL_ORDER_RESPONSE => 9,
        MSG_MODIFY_ORDER_REQUEST | MSG_MODIFY_ORDER_RESPONSE => 17,
        MSG_ORDERBOOK_STATUS_RESPONSE => 8 + 2 * MAX_LEVELS * 8,
        MSG_TRADE_NOTIFICATION => 24,
        _ => 0,
    }
}

fn decode_body(msg_type: u8, body: &[u8]) -> Result<Payload, ProtocolError> {
    if body.len() < min_body_len(msg_type) {
        return Err(ProtocolError::BadLength {
            msg_type,
            length: (HEADER_LEN + body.len()) as u32,
        });
    }

    let payload = match msg_type {
        MSG_QUIT => Payload::Quit,
        MSG_ECHO_REQUEST => Payload::EchoRequest {
            text: get_text(&body[..TEXT_LEN]),
        },
        MSG_ECHO_RESPONSE => Payload::EchoResponse {
            text: get_text(&body[..TEXT_LEN]),
        },
        MSG_LIST_USERS_REQUEST => Payload::ListUsersRequest,
        MSG_LIST_USERS_RESPONSE => Payload::ListUsersResponse {
            num_clients: get_u32(&body[0..4]),
            text: get_text(&body[4..4 + TEXT_LEN]),
        },
        MSG_ADD_ORDER_REQUEST => Payload::AddOrderRequest {
            order_type: OrderType::from_wire(body[0]).ok_or(ProtocolError::BadField {
                field: "order_type",
                value: body[0],
            })?,
            side: Side::from_wire(body[1]).ok_or(ProtocolError::BadField {
                field: "side",
                value: body[1],
            })?,
            price: get_u32(&body[2..6]),
            quantity: get_u32(&body[6..10]),
            client_order_id: get_u64(&body[10..18]),
        },
        MSG_ADD_ORDER_RESPONSE => Payload::AddOrderResponse {
            client_order_id: get_u64(&body[0..8]),
            server_order_id: get_u64(&body[8..16]),
            status: body[16],
        },
        MSG_CANCEL_ORDER_REQUEST => Payload::CancelOrderRequest {
            order_id: get_u64(&body[0..8]),
        },
        MSG_CANCEL_ORDER_RESPONSE => Payload::CancelOrderResponse {
            order_id: get_u64(&body[0..8]),
            status: body[8],
        },
        MSG_MODIFY_ORDER_REQUEST | MSG_MODIFY_ORDER_RESPONSE => {
            let order_id = get_u64(&body[0..8]);
            let side = Side::from_wire(body[8]).ok_or(ProtocolError::BadField {
                field: "side",
                value: body[8],
            })?;
            let price = get_u32(&body[9..13]);
            let quantity = get_u32(&body[13..17]);
            if msg_type == MSG_MODIFY_ORDER_REQUEST {
                Payload::ModifyOrderRequest {
                    order_id,
                    side,
                    price,
                    quantity,
                }
            } else {
                Payload::ModifyOrderResponse {
                    order_id,
                    side,
                    price,
                    quantity,
                }
            }
        }
        MSG_ORDERBOOK_STATUS_REQUEST => Payload::OrderbookStatusRequest,
        MSG_ORDERBOOK_STATUS_RESPONSE => {
            // slots past the advertised counts are unspecified and ignored
            let bid_count = (get_u32(&body[0..4]) as usize).min(MAX_LEVELS);
            let ask_count = (get_u32(&body[4..8]) as usize).min(MAX_LEVELS);
            let bids = get_levels(&body[8..], bid_count);
            let asks = get_levels(&body[8 + MAX_LEVELS * 8..], ask_count);
            Payload::OrderbookStatusResponse { bids, asks }
        }
        MSG_TRADE_NOTIFICATION => Payload::TradeNotification {
            buy_order_id: get_u64(&body[0..8]),
            sell_order_id: get_u64(&body[8..16]),
            price: get_u32(&body[16..20]),
            quantity: get_u32(&body[20..24]),
        },
        MSG_ERROR => Payload::Error,
        other => Payload::Unknown(other),
    };
    Ok(payload)
}

fn get_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn get_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Reads a NUL-terminated text field of exactly [`TEXT_LEN`] bytes.
fn get_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Writes a text field of exactly [`TEXT_LEN`] bytes, NUL-padded; the text
/// is truncated to leave room for the terminator.
fn put_text(buf: &mut Vec<u8>, text: &str) {
    let bytes = text.as_bytes();
    let take = bytes.len().min(TEXT_LEN - 1);
    buf.extend_from_slice(&bytes[..take]);
    buf.resize(buf.len() + (TEXT_LEN - take), 0);
}

/// Writes `levels` into [`MAX_LEVELS`] fixed slots, zero-filling the rest.
fn put_levels(buf: &mut Vec<u8>, levels: &[WireLevel]) {
    for level in levels {
        buf.extend_from_slice(&level.price.to_be_bytes());
        buf.extend_from_slice(&level.quantity.to_be_bytes());
    }
    buf.resize(buf.len() + (MAX_LEVELS - levels.len()) * 8, 0);
}

fn get_levels(bytes: &[u8], count: usize) -> Vec<WireLevel> {
    (0..count)
        .map(|i| {
            let offset = i * 8;
            WireLevel {
                price: get_u32(&bytes[offset..offset + 4]),
                quantity: get_u32(&bytes[offset + 4..offset + 8]),
            }
        })
        .collect()
}
