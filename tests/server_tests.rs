use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use order_book_server::orders::{OrderType, Side};
use order_book_server::protocol::{decode, encode, Decoded, Frame, Payload, WireLevel};
use order_book_server::server::{Server, ServerConfig, ShutdownHandle};

fn start_server() -> (SocketAddr, ShutdownHandle, thread::JoinHandle<()>) {
    let config = ServerConfig {
        bind: "127.0.0.1".into(),
        port: 0,
        workers: 4,
    };
    let server = Server::bind(&config).expect("bind test server");
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let join = thread::spawn(move || server.run());
    (addr, shutdown, join)
}

struct TestClient {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect to test server");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    fn send(&mut self, frame: &Frame) {
        self.stream.write_all(&encode(frame)).expect("send frame");
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("send bytes");
    }

    fn recv(&mut self) -> Frame {
        loop {
            match decode(&self.pending) {
                Decoded::Frame { frame, consumed } => {
                    self.pending.drain(..consumed);
                    return frame;
                }
                Decoded::NeedMore(_) => {
                    let mut chunk = [0u8; 4096];
                    let n = self.stream.read(&mut chunk).expect("read from server");
                    assert!(n > 0, "server closed the connection");
                    self.pending.extend_from_slice(&chunk[..n]);
                }
                other => panic!("unexpected decode result: {:?}", other),
            }
        }
    }

    fn expect_closed(&mut self) {
        let mut chunk = [0u8; 64];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) => panic!("expected clean close, got {}", e),
            }
        }
    }
}

fn add_order(
    client: &mut TestClient,
    sequence: u32,
    order_type: OrderType,
    side: Side,
    price: u32,
    quantity: u32,
    client_order_id: u64,
) {
    client.send(&Frame::new(
        sequence,
        Payload::AddOrderRequest {
            order_type,
            side,
            price,
            quantity,
            client_order_id,
        },
    ));
}

#[test]
fn echo_round_trip() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    client.send(&Frame::new(
        7,
        Payload::EchoRequest {
            text: "ping".into(),
        },
    ));
    let reply = client.recv();
    assert_eq!(reply.sequence, 7);
    assert_eq!(
        reply.payload,
        Payload::EchoResponse {
            text: "ping".into()
        }
    );

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn list_users_counts_sessions() {
    let (addr, shutdown, join) = start_server();
    let mut first = TestClient::connect(addr);
    // make sure the first session is registered before asking
    first.send(&Frame::new(1, Payload::EchoRequest { text: "up".into() }));
    first.recv();

    let mut second = TestClient::connect(addr);
    second.send(&Frame::new(2, Payload::ListUsersRequest));
    match second.recv().payload {
        Payload::ListUsersResponse { num_clients, text } => {
            assert_eq!(num_clients, 2);
            assert_eq!(text, "Connected clients: 2");
        }
        other => panic!("unexpected payload {:?}", other),
    }

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn resting_order_shows_in_status() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    add_order(&mut client, 1, OrderType::GoodTillCancel, Side::Buy, 100, 10, 55);
    match client.recv().payload {
        Payload::AddOrderResponse {
            client_order_id,
            server_order_id,
            status,
        } => {
            assert_eq!(client_order_id, 55);
            assert_eq!(server_order_id, 1);
            assert_eq!(status, 0);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    client.send(&Frame::new(2, Payload::OrderbookStatusRequest));
    match client.recv().payload {
        Payload::OrderbookStatusResponse { bids, asks } => {
            assert_eq!(
                bids,
                vec![WireLevel {
                    price: 100,
                    quantity: 10
                }]
            );
            assert!(asks.is_empty());
        }
        other => panic!("unexpected payload {:?}", other),
    }

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn crossing_add_sends_response_before_notifications() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    add_order(&mut client, 1, OrderType::GoodTillCancel, Side::Buy, 100, 5, 1);
    client.recv();
    add_order(&mut client, 2, OrderType::GoodTillCancel, Side::Buy, 100, 5, 2);
    client.recv();

    // one crossing sell consumes both resting bids in arrival order
    add_order(&mut client, 3, OrderType::GoodTillCancel, Side::Sell, 100, 7, 3);
    let response = client.recv();
    assert_eq!(response.sequence, 3);
    assert!(matches!(
        response.payload,
        Payload::AddOrderResponse { status: 0, .. }
    ));

    let first = client.recv();
    assert_eq!(first.sequence, 3);
    assert_eq!(
        first.payload,
        Payload::TradeNotification {
            buy_order_id: 1,
            sell_order_id: 3,
            price: 100,
            quantity: 5,
        }
    );
    let second = client.recv();
    assert_eq!(
        second.payload,
        Payload::TradeNotification {
            buy_order_id: 2,
            sell_order_id: 3,
            price: 100,
            quantity: 2,
        }
    );

    client.send(&Frame::new(4, Payload::OrderbookStatusRequest));
    match client.recv().payload {
        Payload::OrderbookStatusResponse { bids, asks } => {
            assert_eq!(
                bids,
                vec![WireLevel {
                    price: 100,
                    quantity: 3
                }]
            );
            assert!(asks.is_empty());
        }
        other => panic!("unexpected payload {:?}", other),
    }

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn unmatchable_fill_and_kill_is_rejected_in_status_field() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    add_order(&mut client, 9, OrderType::FillAndKill, Side::Buy, 100, 10, 77);
    match client.recv().payload {
        Payload::AddOrderResponse {
            client_order_id,
            server_order_id,
            status,
        } => {
            assert_eq!(client_order_id, 77);
            assert_eq!(server_order_id, 0);
            assert_ne!(status, 0);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn cancel_unknown_order_is_acknowledged_twice() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    for sequence in [1, 2] {
        client.send(&Frame::new(
            sequence,
            Payload::CancelOrderRequest { order_id: 404 },
        ));
        let reply = client.recv();
        assert_eq!(reply.sequence, sequence);
        assert_eq!(
            reply.payload,
            Payload::CancelOrderResponse {
                order_id: 404,
                status: 0
            }
        );
    }

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn modify_echoes_request_and_reports_trades() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    add_order(&mut client, 1, OrderType::GoodTillCancel, Side::Sell, 100, 5, 1);
    client.recv();
    add_order(&mut client, 2, OrderType::GoodTillCancel, Side::Buy, 95, 5, 2);
    client.recv();

    // re-price the bid onto the ask: the replacement crosses immediately
    client.send(&Frame::new(
        3,
        Payload::ModifyOrderRequest {
            order_id: 2,
            side: Side::Buy,
            price: 100,
            quantity: 5,
        },
    ));
    let response = client.recv();
    assert_eq!(response.sequence, 3);
    assert_eq!(
        response.payload,
        Payload::ModifyOrderResponse {
            order_id: 2,
            side: Side::Buy,
            price: 100,
            quantity: 5,
        }
    );
    let notification = client.recv();
    assert_eq!(
        notification.payload,
        Payload::TradeNotification {
            buy_order_id: 2,
            sell_order_id: 1,
            price: 100,
            quantity: 5,
        }
    );

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn malformed_frame_gets_error_and_session_survives() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    // header whose length field cannot even cover the header itself
    let mut bad = encode(&Frame::new(13, Payload::Quit));
    bad[4..8].copy_from_slice(&5u32.to_be_bytes());
    client.send_raw(&bad);

    let reply = client.recv();
    assert_eq!(reply.sequence, 13);
    assert_eq!(reply.payload, Payload::Error);

    // the session keeps serving
    client.send(&Frame::new(
        14,
        Payload::EchoRequest {
            text: "still here".into(),
        },
    ));
    assert_eq!(
        client.recv().payload,
        Payload::EchoResponse {
            text: "still here".into()
        }
    );

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn unknown_message_type_gets_error_with_sequence() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    client.send(&Frame::new(21, Payload::Unknown(0x42)));
    let reply = client.recv();
    assert_eq!(reply.sequence, 21);
    assert_eq!(reply.payload, Payload::Error);

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn quit_is_acknowledged_then_connection_closes() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);

    client.send(&Frame::new(99, Payload::Quit));
    let reply = client.recv();
    assert_eq!(reply.sequence, 99);
    assert_eq!(
        reply.payload,
        Payload::EchoResponse {
            text: String::new()
        }
    );
    client.expect_closed();

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn notifications_stay_on_the_originating_session() {
    let (addr, shutdown, join) = start_server();
    let mut resting = TestClient::connect(addr);
    let mut aggressor = TestClient::connect(addr);

    add_order(&mut resting, 1, OrderType::GoodTillCancel, Side::Buy, 100, 5, 1);
    resting.recv();

    add_order(&mut aggressor, 1, OrderType::GoodTillCancel, Side::Sell, 100, 5, 2);
    let response = aggressor.recv();
    assert!(matches!(
        response.payload,
        Payload::AddOrderResponse { status: 0, .. }
    ));
    assert!(matches!(
        aggressor.recv().payload,
        Payload::TradeNotification { .. }
    ));

    // the resting session sees nothing about the trade; its next frame is
    // the answer to its own request
    resting.send(&Frame::new(2, Payload::OrderbookStatusRequest));
    match resting.recv().payload {
        Payload::OrderbookStatusResponse { bids, asks } => {
            assert!(bids.is_empty());
            assert!(asks.is_empty());
        }
        other => panic!("unexpected payload {:?}", other),
    }

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn concurrent_sessions_all_get_their_orders_in() {
    let (addr, shutdown, join) = start_server();

    let mut workers = Vec::new();
    for t in 0u32..3 {
        workers.push(thread::spawn(move || {
            let mut client = TestClient::connect(addr);
            for i in 0u32..20 {
                // prices spread out so nothing crosses
                let price = 1_000 + t * 100 + i;
                add_order(
                    &mut client,
                    i,
                    OrderType::GoodTillCancel,
                    Side::Sell,
                    price,
                    1,
                    u64::from(t * 1_000 + i),
                );
                let reply = client.recv();
                assert_eq!(reply.sequence, i);
                assert!(matches!(
                    reply.payload,
                    Payload::AddOrderResponse { status: 0, .. }
                ));
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let mut client = TestClient::connect(addr);
    client.send(&Frame::new(1, Payload::OrderbookStatusRequest));
    match client.recv().payload {
        Payload::OrderbookStatusResponse { bids, asks } => {
            assert!(bids.is_empty());
            // ten best ask levels of the sixty resting orders
            assert_eq!(asks.len(), 10);
            assert_eq!(asks[0].price, 1_000);
            assert!(asks.windows(2).all(|pair| pair[0].price < pair[1].price));
        }
        other => panic!("unexpected payload {:?}", other),
    }

    shutdown.shutdown();
    join.join().unwrap();
}

#[test]
fn shutdown_hangs_up_open_sessions() {
    let (addr, shutdown, join) = start_server();
    let mut client = TestClient::connect(addr);
    client.send(&Frame::new(1, Payload::EchoRequest { text: "hi".into() }));
    client.recv();

    shutdown.shutdown();
    join.join().unwrap();
    client.expect_closed();
}
