//! Interactive client: a line-oriented command loop that speaks the wire
//! protocol and prints whatever the server sends back.
//!
//! Responses arrive on a dedicated reader thread, so trade notifications and
//! replies show up as soon as the server emits them, like the interactive
//! session of any exchange tool.

use std::io::{self, BufRead, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::orders::{OrderType, Side};
use crate::protocol::{self, Decoded, Frame, Payload};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { host: String, port: u16 },
    Disconnect,
    Echo { text: String },
    Users,
    Add {
        order_type: OrderType,
        side: Side,
        price: u32,
        quantity: u32,
    },
    Cancel { order_id: u64 },
    Modify {
        order_id: u64,
        side: Side,
        price: u32,
        quantity: u32,
    },
    Book,
    Quit,
    Help,
}

fn parse_number<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T, String> {
    token
        .ok_or_else(|| format!("missing {what}"))?
        .parse()
        .map_err(|_| format!("{what} must be a number"))
}

/// Parses one input line. Empty lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let mut tokens = line.split_whitespace();
    let Some(cmd) = tokens.next() else {
        return Ok(None);
    };
    let command = match cmd {
        "connect" => {
            let host = tokens
                .next()
                .ok_or("Usage: connect <host> <port>")?
                .to_string();
            let port = parse_number(tokens.next(), "port")?;
            Command::Connect { host, port }
        }
        "disconnect" => Command::Disconnect,
        "echo" => {
            let text = line
                .trim_start()
                .strip_prefix("echo")
                .unwrap_or("")
                .trim()
                .to_string();
            Command::Echo { text }
        }
        "users" => Command::Users,
        "buy" | "sell" | "fkbuy" | "fksell" => {
            let side = if cmd.ends_with("buy") {
                Side::Buy
            } else {
                Side::Sell
            };
            let order_type = if cmd.starts_with("fk") {
                OrderType::FillAndKill
            } else {
                OrderType::GoodTillCancel
            };
            let price = parse_number(tokens.next(), "price")?;
            let quantity = parse_number(tokens.next(), "quantity")?;
            Command::Add {
                order_type,
                side,
                price,
                quantity,
            }
        }
        "cancel" => Command::Cancel {
            order_id: parse_number(tokens.next(), "order id")?,
        },
        "modify" => {
            let order_id = parse_number(tokens.next(), "order id")?;
            let side = match tokens.next() {
                Some("buy") => Side::Buy,
                Some("sell") => Side::Sell,
                _ => return Err("Usage: modify <id> <buy|sell> <price> <qty>".into()),
            };
            let price = parse_number(tokens.next(), "price")?;
            let quantity = parse_number(tokens.next(), "quantity")?;
            Command::Modify {
                order_id,
                side,
                price,
                quantity,
            }
        }
        "book" => Command::Book,
        "quit" => Command::Quit,
        "help" => Command::Help,
        other => return Err(format!("Unknown command: {other} (try 'help')")),
    };
    Ok(Some(command))
}

fn print_help() {
    println!("Available commands:");
    println!("  connect <host> <port>   - Connect to server");
    println!("  disconnect              - Disconnect from server");
    println!("  echo <msg>              - Send echo request");
    println!("  users                   - Request list of connected users");
    println!("  buy <price> <quantity>  - Place buy order");
    println!("  sell <price> <quantity> - Place sell order");
    println!("  fkbuy <price> <qty>     - Place fill-and-kill buy order");
    println!("  fksell <price> <qty>    - Place fill-and-kill sell order");
    println!("  cancel <id>             - Cancel order");
    println!("  modify <id> <side> <price> <qty> - Modify order");
    println!("  book                    - Show order book levels");
    println!("  quit                    - Quit");
    println!("  help                    - Display this help");
}

/// An open connection to the server plus the reader thread that prints its
/// frames.
pub struct Connection {
    stream: TcpStream,
    reader: Option<thread::JoinHandle<()>>,
    closing: Arc<AtomicBool>,
    next_sequence: u32,
    next_client_order_id: u64,
}

impl Connection {
    pub fn open(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        let closing = Arc::new(AtomicBool::new(false));
        let reader_stream = stream.try_clone()?;
        let reader_closing = Arc::clone(&closing);
        let reader = thread::Builder::new()
            .name("client-reader".into())
            .spawn(move || reader_loop(reader_stream, reader_closing))?;
        Ok(Self {
            stream,
            reader: Some(reader),
            closing,
            next_sequence: 1,
            next_client_order_id: 1,
        })
    }

    fn send(&mut self, payload: Payload) -> io::Result<()> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.stream
            .write_all(&protocol::encode(&Frame::new(sequence, payload)))
    }

    pub fn echo(&mut self, text: &str) -> io::Result<()> {
        self.send(Payload::EchoRequest { text: text.into() })
    }

    pub fn list_users(&mut self) -> io::Result<()> {
        self.send(Payload::ListUsersRequest)
    }

    pub fn add_order(
        &mut self,
        order_type: OrderType,
        side: Side,
        price: u32,
        quantity: u32,
    ) -> io::Result<()> {
        let client_order_id = self.next_client_order_id;
        self.next_client_order_id += 1;
        self.send(Payload::AddOrderRequest {
            order_type,
            side,
            price,
            quantity,
            client_order_id,
        })
    }

    pub fn cancel_order(&mut self, order_id: u64) -> io::Result<()> {
        self.send(Payload::CancelOrderRequest { order_id })
    }

    pub fn modify_order(
        &mut self,
        order_id: u64,
        side: Side,
        price: u32,
        quantity: u32,
    ) -> io::Result<()> {
        self.send(Payload::ModifyOrderRequest {
            order_id,
            side,
            price,
            quantity,
        })
    }

    pub fn book_status(&mut self) -> io::Result<()> {
        self.send(Payload::OrderbookStatusRequest)
    }

    /// Sends the quit request and waits for the server to hang up.
    pub fn quit(mut self) {
        self.closing.store(true, Ordering::Relaxed);
        let _ = self.send(Payload::Quit);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Relaxed);
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn reader_loop(mut stream: TcpStream, closing: Arc<AtomicBool>) {
    use std::io::Read;

    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => {
                if !closing.load(Ordering::Relaxed) {
                    println!("Server disconnected");
                }
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                loop {
                    match protocol::decode(&pending) {
                        Decoded::Frame { frame, consumed } => {
                            pending.drain(..consumed);
                            print_frame(&frame);
                        }
                        Decoded::NeedMore(_) => break,
                        Decoded::Malformed {
                            consumed, error, ..
                        } => {
                            println!("Bad frame from server: {error}");
                            pending.drain(..consumed);
                        }
                    }
                }
            }
            Err(e) => {
                if !closing.load(Ordering::Relaxed) {
                    println!("Connection error: {e}");
                }
                break;
            }
        }
    }
}

fn print_frame(frame: &Frame) {
    match &frame.payload {
        Payload::EchoResponse { text } => println!("Echo response: {text}"),
        Payload::ListUsersResponse { num_clients, text } => {
            println!("Users online: {num_clients} ({text})");
        }
        Payload::AddOrderResponse {
            client_order_id,
            server_order_id,
            status,
        } => {
            if *status == 0 {
                println!(
                    "Order accepted - client order id {client_order_id}, server order id {server_order_id}"
                );
            } else {
                println!(
                    "Order rejected - client order id {client_order_id}, status {status}"
                );
            }
        }
        Payload::CancelOrderResponse { order_id, status } => {
            println!("Cancel acknowledged - order id {order_id}, status {status}");
        }
        Payload::ModifyOrderResponse {
            order_id,
            side,
            price,
            quantity,
        } => {
            println!(
                "Modify acknowledged - order id {order_id}, side {side:?}, price {price}, quantity {quantity}"
            );
        }
        Payload::OrderbookStatusResponse { bids, asks } => {
            println!("Bid levels ({}):", bids.len());
            for level in bids {
                println!("  Price: {}, Quantity: {}", level.price, level.quantity);
            }
            println!("Ask levels ({}):", asks.len());
            for level in asks {
                println!("  Price: {}, Quantity: {}", level.price, level.quantity);
            }
        }
        Payload::TradeNotification {
            buy_order_id,
            sell_order_id,
            price,
            quantity,
        } => {
            println!(
                "Trade executed - buy order {buy_order_id}, sell order {sell_order_id}, price {price}, quantity {quantity}"
            );
        }
        Payload::Error => println!("Server reported an error (sequence {})", frame.sequence),
        other => println!("Unexpected message type {:#04x}", other.msg_type()),
    }
}

/// Runs the interactive loop until `quit` or end of input. Returns the
/// process exit code.
pub fn run_repl(initial: Option<(String, u16)>) -> i32 {
    let mut connection: Option<Connection> = None;
    if let Some((host, port)) = initial {
        match Connection::open(&host, port) {
            Ok(conn) => {
                println!("Connected to {host}:{port}");
                connection = Some(conn);
            }
            Err(e) => println!("Error connecting to server: {e}"),
        }
    }
    println!("Type 'help' for available commands");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                // end of input behaves like quit
                if let Some(conn) = connection.take() {
                    conn.quit();
                }
                return 0;
            }
            Ok(_) => {}
        }

        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            Command::Help => print_help(),
            Command::Connect { host, port } => {
                if connection.is_some() {
                    println!("Already connected to a server");
                } else {
                    match Connection::open(&host, port) {
                        Ok(conn) => {
                            println!("Connected to {host}:{port}");
                            connection = Some(conn);
                        }
                        Err(e) => println!("Error connecting to server: {e}"),
                    }
                }
            }
            Command::Disconnect => {
                if connection.take().is_some() {
                    println!("Disconnected from server");
                } else {
                    println!("Not connected to a server");
                }
            }
            Command::Quit => {
                if let Some(conn) = connection.take() {
                    conn.quit();
                }
                return 0;
            }
            other => {
                let Some(conn) = connection.as_mut() else {
                    println!("Not connected to a server");
                    continue;
                };
                let result = match other {
                    Command::Echo { text } => conn.echo(&text),
                    Command::Users => conn.list_users(),
                    Command::Add {
                        order_type,
                        side,
                        price,
                        quantity,
                    } => conn.add_order(order_type, side, price, quantity),
                    Command::Cancel { order_id } => conn.cancel_order(order_id),
                    Command::Modify {
                        order_id,
                        side,
                        price,
                        quantity,
                    } => conn.modify_order(order_id, side, price, quantity),
                    Command::Book => conn.book_status(),
                    _ => unreachable!("handled above"),
                };
                if let Err(e) = result {
                    println!("Send failed: {e}");
                    connection = None;
                }
            }
        }
    }
}
