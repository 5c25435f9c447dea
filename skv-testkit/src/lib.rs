//! # In-Memory Store Server
//!
//! Purpose: Give integration tests a real TCP endpoint that speaks enough
//! RESP2 (GET/SET/DEL/FLUSHDB/PUBLISH/SUBSCRIBE/UNSUBSCRIBE/AUTH/SELECT/PING)
//! to exercise the client and the facade without an external store.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo() -> std::io::Result<()> {
//! let server = skv_testkit::MemoryServer::start().await?;
//! let url = server.url();
//! // ... point a client at `url` ...
//! server.drop_clients();
//! # Ok(())
//! # }
//! ```

mod session;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

pub(crate) type Outbox = mpsc::UnboundedSender<Vec<u8>>;

/// Shared server state, one per `MemoryServer`.
#[derive(Default)]
pub(crate) struct ServerState {
    pub(crate) data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    /// channel → (session id, outbox) of every subscriber.
    pub(crate) channels: Mutex<HashMap<Vec<u8>, Vec<(u64, Outbox)>>>,
    pub(crate) password: Option<String>,
    pub(crate) commands: Mutex<Vec<Vec<String>>>,
    sessions: Mutex<HashMap<u64, Vec<AbortHandle>>>,
    next_session: AtomicU64,
    accepted: AtomicUsize,
}

impl ServerState {
    pub(crate) fn track(&self, session: u64, handle: AbortHandle) {
        self.sessions.lock().entry(session).or_default().push(handle);
    }

    pub(crate) fn forget(&self, session: u64) {
        self.sessions.lock().remove(&session);
        let mut channels = self.channels.lock();
        for subscribers in channels.values_mut() {
            subscribers.retain(|(id, _)| *id != session);
        }
        channels.retain(|_, subscribers| !subscribers.is_empty());
    }
}

/// RESP2 server bound to an ephemeral localhost port.
///
/// Dropping the server stops accepting and closes every client socket.
pub struct MemoryServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    accept: JoinHandle<()>,
}

impl MemoryServer {
    /// Starts a server that accepts clients without authentication.
    pub async fn start() -> io::Result<Self> {
        Self::bind(None).await
    }

    /// Starts a server that requires `AUTH <password>` before other commands.
    pub async fn start_with_password(password: impl Into<String>) -> io::Result<Self> {
        Self::bind(Some(password.into())).await
    }

    async fn bind(password: Option<String>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState {
            password,
            ..ServerState::default()
        });

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                let id = accept_state.next_session.fetch_add(1, Ordering::Relaxed);
                accept_state.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(%peer, session = id, "accepted");

                let handle = tokio::spawn(session::run(stream, Arc::clone(&accept_state), id));
                accept_state.track(id, handle.abort_handle());
            }
        });

        Ok(MemoryServer { addr, state, accept })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `redis://` URI pointing at this server.
    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Total client connections accepted so far.
    pub fn connections_accepted(&self) -> usize {
        self.state.accepted.load(Ordering::Relaxed)
    }

    /// Commands received so far, name upper-cased, arguments lossily decoded.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.commands.lock().clone()
    }

    /// Reads a key directly from the store.
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.state.data.lock().get(key.as_bytes()).cloned()
    }

    /// Number of keys currently stored.
    pub fn key_count(&self) -> usize {
        self.state.data.lock().len()
    }

    /// Abruptly closes every connected client socket.
    pub fn drop_clients(&self) {
        let sessions: Vec<(u64, Vec<AbortHandle>)> = self.state.sessions.lock().drain().collect();
        for (id, handles) in sessions {
            for handle in handles {
                handle.abort();
            }
            self.state.forget(id);
        }
    }
}

impl Drop for MemoryServer {
    fn drop(&mut self) {
        self.accept.abort();
        self.drop_clients();
    }
}
