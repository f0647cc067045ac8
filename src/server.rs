use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::errors::ServerError;
use crate::gateway::EngineGateway;
use crate::pool::WorkerPool;
use crate::session::Session;

/// Process-local connection identity, assigned from 1 upward.
pub type ClientId = u32;

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Worker threads; one concurrent session per worker.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5555,
            workers: 8,
        }
    }
}

/// State shared between the listener and every session: the engine gateway,
/// the table of open client sockets and the shutdown flag.
pub struct ServerState {
    pub gateway: EngineGateway,
    clients: Mutex<HashMap<ClientId, TcpStream>>,
    next_client_id: AtomicU32,
    shutting_down: AtomicBool,
}

impl ServerState {
    fn new() -> Self {
        Self {
            gateway: EngineGateway::new(),
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU32::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Assigns the next client id and keeps a socket handle so shutdown can
    /// hang up on the session.
    pub fn register_client(&self, stream: &TcpStream) -> ClientId {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(handle) => {
                self.clients.lock().insert(client_id, handle);
            }
            Err(e) => {
                warn!("could not keep a handle for client {}: {}", client_id, e);
            }
        }
        client_id
    }

    pub fn remove_client(&self, client_id: ClientId) {
        self.clients.lock().remove(&client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        for stream in self.clients.lock().values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// The listener: accepts connections, assigns client ids and hands each
/// session to the worker pool.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    pool: WorkerPool,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the listening socket and spawns the worker pool. Bind failure
    /// is fatal at startup.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);
        Ok(Self {
            listener,
            state: Arc::new(ServerState::new()),
            pool: WorkerPool::new(config.workers),
            local_addr,
        })
    }

    /// The actual bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that can stop the server from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.state),
            addr: self.local_addr,
        }
    }

    /// Accept loop. Runs until shutdown is requested, then closes the
    /// listener and joins the pool once every session has wound down.
    pub fn run(mut self) {
        for stream in self.listener.incoming() {
            if self.state.is_shutting_down() {
                break;
            }
            match stream {
                Ok(stream) => {
                    let client_id = self.state.register_client(&stream);
                    let state = Arc::clone(&self.state);
                    self.pool
                        .submit(move || Session::new(stream, client_id, state).run());
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                }
            }
        }
        // stop accepting before waiting on in-flight sessions
        drop(self.listener);
        self.pool.shutdown();
        info!("server stopped");
    }
}

/// Stops a running [`Server`]: flags shutdown, hangs up on every open
/// session and wakes the accept loop with a throwaway connection.
pub struct ShutdownHandle {
    state: Arc<ServerState>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.state.begin_shutdown();
        let _ = TcpStream::connect(self.addr);
    }
}
