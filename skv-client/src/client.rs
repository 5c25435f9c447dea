//! # Async Client API
//!
//! Purpose: Expose a compact async API for issuing Redis-compatible commands
//! over RESP2, including pub/sub and database flushing.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `StoreClient` hides the socket, reader task and
//!    reply routing behind plain async methods.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Fail Fast**: Protocol violations and mode misuse surface immediately.
//! 4. **Cheap Handles**: Clones share one connection; `duplicate` opens another.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::pubsub::{Listener, ListenerId, Message};
use crate::resp::RespValue;

/// Result type for the async client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the async client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// URI could not be resolved into an endpoint.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// The connection is closed (by `close` or by the peer).
    #[error("connection closed")]
    Closed,
    /// A regular command was issued on a handle with live subscriptions.
    #[error("connection is in subscriber mode")]
    SubscriberMode,
    /// Subscribe/unsubscribe called without channels.
    #[error("no channels given")]
    NoChannels,
    /// Connect did not finish within the configured timeout.
    #[error("connect timed out")]
    Timeout,
}

impl ClientError {
    fn server(message: Vec<u8>) -> Self {
        ClientError::Server {
            message: String::from_utf8_lossy(&message).into_owned(),
        }
    }
}

/// Configuration for the async client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Store URI, e.g. "redis://127.0.0.1:6379". `None` targets the local default.
    pub url: Option<String>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        ClientConfig {
            url: Some(url.into()),
            ..ClientConfig::default()
        }
    }
}

/// Handle to one open store connection.
///
/// Clones share the connection. Requests from any clone are answered in the
/// order they were written.
#[derive(Clone)]
pub struct StoreClient {
    config: ClientConfig,
    conn: Arc<Connection>,
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("url", &self.config.url)
            .field("open", &self.is_open())
            .finish()
    }
}

impl StoreClient {
    /// Opens a connection and runs the AUTH/SELECT handshake the URI asks for.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let endpoint = Endpoint::parse(config.url.as_deref())?;
        let conn = Connection::open(&endpoint, config.connect_timeout).await?;
        let client = StoreClient { config, conn };
        client.handshake(&endpoint).await?;
        debug!(peer = %endpoint.authority(), db = endpoint.db, "client ready");
        Ok(client)
    }

    /// Opens a second, independent connection with the same configuration.
    pub async fn duplicate(&self) -> ClientResult<Self> {
        Self::connect(self.config.clone()).await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True until the connection is closed by either side.
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// True while at least one channel is subscribed on this handle.
    pub fn is_subscriber(&self) -> bool {
        self.conn.is_subscriber()
    }

    /// Registers a callback fired once when the transport closes.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.conn.on_close(Box::new(callback));
    }

    /// Closes the connection. Pending requests fail with `Closed`.
    ///
    /// Closing an already closed handle returns `ClientError::Closed`.
    pub async fn close(&self) -> ClientResult<()> {
        self.conn.close().await
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub async fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.ensure_command_mode()?;
        match self.conn.exec(&[b"GET", key], 1).await? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key. Returns the acknowledgment text ("OK").
    pub async fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<String> {
        self.ensure_command_mode()?;
        let reply = self.conn.exec(&[b"SET", key, value], 1).await?;
        simple_text(reply)
    }

    /// Deletes a key. Returns the number of keys removed.
    pub async fn del(&self, key: &[u8]) -> ClientResult<i64> {
        self.ensure_command_mode()?;
        match self.conn.exec(&[b"DEL", key], 1).await? {
            RespValue::Integer(count) => Ok(count),
            RespValue::Error(message) => Err(ClientError::server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Publishes a message. Returns the number of receiving subscribers.
    pub async fn publish(&self, channel: &[u8], message: &[u8]) -> ClientResult<i64> {
        self.ensure_command_mode()?;
        match self.conn.exec(&[b"PUBLISH", channel, message], 1).await? {
            RespValue::Integer(count) => Ok(count),
            RespValue::Error(message) => Err(ClientError::server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Removes every key of the selected database.
    pub async fn flush_db(&self) -> ClientResult<String> {
        self.ensure_command_mode()?;
        let reply = self.conn.exec(&[b"FLUSHDB"], 1).await?;
        simple_text(reply)
    }

    /// Registers `listener` for messages on `channels`.
    ///
    /// With `buffer_mode` the listener receives `Payload::Buffer`, otherwise
    /// `Payload::Text`. Only channels without a previous listener are sent to
    /// the server; the call returns once the server confirmed them.
    pub async fn subscribe<F>(
        &self,
        channels: &[&str],
        listener: F,
        buffer_mode: bool,
    ) -> ClientResult<ListenerId>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        if channels.is_empty() {
            return Err(ClientError::NoChannels);
        }

        let listener: Listener = Arc::new(listener);
        let (id, fresh) = self
            .conn
            .subscriptions
            .lock()
            .add(channels, buffer_mode, listener);
        if fresh.is_empty() {
            return Ok(id);
        }

        let result = self.pubsub_command(b"SUBSCRIBE", &fresh).await;
        if result.is_err() {
            self.conn.subscriptions.lock().remove(channels, Some(id));
        }
        result.map(|_| id)
    }

    /// Removes `listener` (every listener when `None`) from `channels`.
    ///
    /// Channels left without listeners are unsubscribed on the server; once
    /// none remain the handle accepts regular commands again.
    pub async fn unsubscribe(&self, channels: &[&str], listener: Option<ListenerId>) -> ClientResult<()> {
        if channels.is_empty() {
            return Err(ClientError::NoChannels);
        }

        let drained = self.conn.subscriptions.lock().remove(channels, listener);
        if drained.is_empty() {
            return Ok(());
        }
        self.pubsub_command(b"UNSUBSCRIBE", &drained).await
    }

    async fn pubsub_command(&self, command: &[u8], channels: &[String]) -> ClientResult<()> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(channels.len() + 1);
        args.push(command);
        args.extend(channels.iter().map(|channel| channel.as_bytes()));

        // One confirmation arrives per channel.
        match self.conn.exec(&args, channels.len()).await? {
            RespValue::Array(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::server(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    async fn handshake(&self, endpoint: &Endpoint) -> ClientResult<()> {
        if let Some(password) = endpoint.password.as_deref() {
            let reply = match endpoint.username.as_deref() {
                Some(username) => {
                    self.conn
                        .exec(&[b"AUTH", username.as_bytes(), password.as_bytes()], 1)
                        .await?
                }
                None => self.conn.exec(&[b"AUTH", password.as_bytes()], 1).await?,
            };
            simple_text(reply)?;
        }

        if endpoint.db != 0 {
            let db = endpoint.db.to_string();
            let reply = self.conn.exec(&[b"SELECT", db.as_bytes()], 1).await?;
            simple_text(reply)?;
        }

        Ok(())
    }

    fn ensure_command_mode(&self) -> ClientResult<()> {
        if self.conn.is_subscriber() {
            return Err(ClientError::SubscriberMode);
        }
        Ok(())
    }
}

fn simple_text(reply: RespValue) -> ClientResult<String> {
    match reply {
        RespValue::Simple(text) => Ok(String::from_utf8_lossy(&text).into_owned()),
        RespValue::Error(message) => Err(ClientError::server(message)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}
