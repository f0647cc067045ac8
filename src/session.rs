use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::orders::Price;
use crate::protocol::{self, Decoded, Frame, Payload, WireLevel, MAX_LEVELS};
use crate::server::{ClientId, ServerState};
use crate::trade::Trade;

/// Ceiling on the frame length a header may advertise. The largest
/// legitimate frame is 272 bytes; a header claiming more than this is a
/// broken or hostile peer and the session is dropped rather than letting it
/// grow the reassembly buffer without bound.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// How long a blocked read waits before re-checking the shutdown flag.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 4096;

/// What the dispatcher wants done with the session after a frame.
enum Flow {
    Continue,
    Close,
}

/// Owns one client connection for its lifetime: reads bytes, reassembles
/// frames, dispatches them to the engine gateway and writes the responses
/// back on the same socket, in order.
///
/// All writes for one request (the response, then any trade notifications)
/// happen before the next frame is consumed, and always after the engine
/// lock has been released.
pub struct Session {
    stream: TcpStream,
    client_id: ClientId,
    state: Arc<ServerState>,
}

impl Session {
    pub fn new(stream: TcpStream, client_id: ClientId, state: Arc<ServerState>) -> Self {
        Self {
            stream,
            client_id,
            state,
        }
    }

    /// Runs the session loop until the peer hangs up, a quit request is
    /// acknowledged, the socket fails or the server shuts down.
    pub fn run(mut self) {
        if let Err(e) = self.stream.set_read_timeout(Some(READ_TIMEOUT)) {
            warn!("client {}: could not set read timeout: {}", self.client_id, e);
        }
        let peer = self
            .stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());
        info!("client {} connected from {}", self.client_id, peer);

        let mut chunk = [0u8; READ_CHUNK];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            if self.state.is_shutting_down() {
                break;
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    info!("client {} disconnected", self.client_id);
                    break;
                }
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    match self.drain_frames(&mut pending) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break,
                        Err(e) => {
                            warn!("client {}: write failed: {}", self.client_id, e);
                            break;
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    warn!("client {}: read failed: {}", self.client_id, e);
                    break;
                }
            }
        }

        self.state.remove_client(self.client_id);
    }

    /// Splits off and dispatches every complete frame in the buffer.
    fn drain_frames(&mut self, pending: &mut Vec<u8>) -> io::Result<Flow> {
        loop {
            match protocol::decode(pending) {
                Decoded::NeedMore(_) => {
                    if let Some(length) = protocol::advertised_len(pending) {
                        if length > MAX_FRAME_LEN {
                            warn!(
                                "client {}: frame length {} exceeds cap, closing",
                                self.client_id, length
                            );
                            return Ok(Flow::Close);
                        }
                    }
                    return Ok(Flow::Continue);
                }
                Decoded::Frame { frame, consumed } => {
                    pending.drain(..consumed);
                    match self.dispatch(frame)? {
                        Flow::Continue => {}
                        Flow::Close => return Ok(Flow::Close),
                    }
                }
                Decoded::Malformed {
                    sequence,
                    consumed,
                    error,
                } => {
                    warn!("client {}: {}", self.client_id, error);
                    pending.drain(..consumed);
                    self.send(&Frame::new(sequence, Payload::Error))?;
                }
            }
        }
    }

    /// Maps one request to its engine call and response(s).
    fn dispatch(&mut self, frame: Frame) -> io::Result<Flow> {
        let sequence = frame.sequence;
        match frame.payload {
            Payload::Quit => {
                self.send(&Frame::new(
                    sequence,
                    Payload::EchoResponse {
                        text: String::new(),
                    },
                ))?;
                info!("client {} quit", self.client_id);
                Ok(Flow::Close)
            }
            Payload::EchoRequest { text } => {
                self.send(&Frame::new(sequence, Payload::EchoResponse { text }))?;
                Ok(Flow::Continue)
            }
            Payload::ListUsersRequest => {
                let num_clients = self.state.client_count() as u32;
                let text = format!("Connected clients: {num_clients}");
                self.send(&Frame::new(
                    sequence,
                    Payload::ListUsersResponse { num_clients, text },
                ))?;
                Ok(Flow::Continue)
            }
            Payload::AddOrderRequest {
                order_type,
                side,
                price,
                quantity,
                client_order_id,
            } => {
                let (server_order_id, result) =
                    self.state
                        .gateway
                        .add_order(order_type, side, price as Price, quantity);
                match result {
                    Ok(trades) => {
                        self.send(&Frame::new(
                            sequence,
                            Payload::AddOrderResponse {
                                client_order_id,
                                server_order_id,
                                status: 0,
                            },
                        ))?;
                        self.send_trade_notifications(sequence, &trades)?;
                    }
                    Err(rejection) => {
                        debug!(
                            "client {}: order rejected: {}",
                            self.client_id, rejection
                        );
                        // no order was created, so there is no server id to report
                        self.send(&Frame::new(
                            sequence,
                            Payload::AddOrderResponse {
                                client_order_id,
                                server_order_id: 0,
                                status: rejection.status_code(),
                            },
                        ))?;
                    }
                }
                Ok(Flow::Continue)
            }
            Payload::CancelOrderRequest { order_id } => {
                self.state.gateway.cancel_order(order_id);
                self.send(&Frame::new(
                    sequence,
                    Payload::CancelOrderResponse {
                        order_id,
                        status: 0,
                    },
                ))?;
                Ok(Flow::Continue)
            }
            Payload::ModifyOrderRequest {
                order_id,
                side,
                price,
                quantity,
            } => {
                let result = self
                    .state
                    .gateway
                    .modify_order(order_id, side, price as Price, quantity);
                // the response is an echo of the request regardless of outcome
                self.send(&Frame::new(
                    sequence,
                    Payload::ModifyOrderResponse {
                        order_id,
                        side,
                        price,
                        quantity,
                    },
                ))?;
                match result {
                    Ok(trades) => self.send_trade_notifications(sequence, &trades)?,
                    Err(rejection) => debug!(
                        "client {}: modify rejected: {}",
                        self.client_id, rejection
                    ),
                }
                Ok(Flow::Continue)
            }
            Payload::OrderbookStatusRequest => {
                let snapshot = self.state.gateway.snapshot();
                let bids = snapshot
                    .bids
                    .iter()
                    .take(MAX_LEVELS)
                    .map(|level| WireLevel {
                        price: level.price as u32,
                        quantity: level.quantity,
                    })
                    .collect();
                let asks = snapshot
                    .asks
                    .iter()
                    .take(MAX_LEVELS)
                    .map(|level| WireLevel {
                        price: level.price as u32,
                        quantity: level.quantity,
                    })
                    .collect();
                self.send(&Frame::new(
                    sequence,
                    Payload::OrderbookStatusResponse { bids, asks },
                ))?;
                Ok(Flow::Continue)
            }
            other => {
                // server-to-client types arriving here are as wrong as
                // unknown codes; both get an error frame with the sequence
                warn!(
                    "client {}: unhandled message type {:#04x}",
                    self.client_id,
                    other.msg_type()
                );
                self.send(&Frame::new(sequence, Payload::Error))?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Emits one notification per trade, in engine order, after the
    /// request's response. The wire price is the bid side's.
    fn send_trade_notifications(&mut self, sequence: u32, trades: &[Trade]) -> io::Result<()> {
        for trade in trades {
            self.send(&Frame::new(
                sequence,
                Payload::TradeNotification {
                    buy_order_id: trade.bid.order_id,
                    sell_order_id: trade.ask.order_id,
                    price: trade.bid.price as u32,
                    quantity: trade.bid.quantity,
                },
            ))?;
        }
        Ok(())
    }

    fn send(&mut self, frame: &Frame) -> io::Result<()> {
        self.stream.write_all(&protocol::encode(frame))
    }
}
