//! # Store Facade
//!
//! Purpose: Own the connections to the store and expose the small set of
//! operations application code needs, broadcasting every lifecycle
//! transition.
//!
//! ## Design Principles
//! 1. **Lazy Connect**: Data operations open the connection on first use.
//! 2. **Single Attempt**: One connect (or disconnect) runs at a time; callers
//!    that arrive meanwhile reuse its outcome.
//! 3. **Split Handles**: Subscriptions run on a duplicate handle, so the
//!    command handle never enters subscriber mode.
//! 4. **Self-Healing**: A handle closed by the store counts as disconnected,
//!    so the next operation reconnects.
//! 5. **Verbatim Writes**: `set` stores bytes as given, while `get` parses by
//!    default. Callers that want JSON round-trips serialize before `set`.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!      ▲                          │                  │
//!      └────────── error ─────────┘    disconnect()  │
//!      └─────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use skv_client::{ClientConfig, ClientError, ClientResult, ListenerId, Message, StoreClient};
use skv_common::{codec, Notifier};
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, FacadeError, FacadeResult};
use crate::events::Event;
use crate::options::{FacadeOptions, GetOptions, MessageDataOptions, PublishOptions};

const DEFAULT_TARGET: &str = "redis://127.0.0.1:6379";

/// The two handles opened by `connect`.
struct Handles {
    command: StoreClient,
    subscriber: StoreClient,
}

/// Async facade over one store.
///
/// All methods take `&self`; share the facade behind an `Arc` to use it from
/// several tasks.
pub struct StoreFacade {
    options: FacadeOptions,
    handles: RwLock<Option<Handles>>,
    connected: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    events: Arc<Notifier<Event>>,
}

impl std::fmt::Debug for StoreFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFacade")
            .field("options", &self.options)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl StoreFacade {
    /// Creates a disconnected facade. No I/O happens until first use.
    pub fn new(options: FacadeOptions) -> Self {
        StoreFacade {
            options,
            handles: RwLock::new(None),
            connected: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            events: Arc::new(Notifier::new()),
        }
    }

    pub fn options(&self) -> &FacadeOptions {
        &self.options
    }

    /// Lifecycle notification channel.
    pub fn events(&self) -> &Arc<Notifier<Event>> {
        &self.events
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Opens the command and subscriber handles unless already connected.
    ///
    /// Emits `connected` on success and `connect:error` on failure. Returns
    /// the command handle. If the store closed either handle, both are
    /// replaced; listeners subscribed on the lost handle do not carry over.
    pub async fn connect(&self) -> Result<StoreClient, ConnectionError> {
        if let Some(client) = self.live_command() {
            return Ok(client);
        }

        let _gate = self.gate.lock().await;
        // Another caller may have connected while we waited.
        if let Some(client) = self.live_command() {
            return Ok(client);
        }
        self.discard_lost().await;

        debug!(target = %self.target(), "connecting");
        match self.open().await {
            Ok(handles) => {
                let command = handles.command.clone();
                *self.handles.write() = Some(handles);
                self.connected.store(true, Ordering::Release);
                info!(target = %self.target(), "store connected");
                self.events.emit(&Event::Connected);
                Ok(command)
            }
            Err(err) => {
                self.connected.store(false, Ordering::Release);
                warn!(target = %self.target(), error = %err, "store connect failed");
                let cause = Arc::new(err);
                self.events.emit(&Event::ConnectError(Arc::clone(&cause)));
                Err(ConnectionError::new(cause))
            }
        }
    }

    /// The live command handle, connecting first if necessary.
    pub async fn client(&self) -> Result<StoreClient, ConnectionError> {
        self.connect().await
    }

    /// Alias of [`client`](Self::client).
    pub async fn connection(&self) -> Result<StoreClient, ConnectionError> {
        self.connect().await
    }

    /// Closes both handles. Does nothing when not connected.
    ///
    /// Emits `disconnected`, or `disconnect:error` when a handle fails to
    /// close. Either way the facade ends up disconnected.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let _gate = self.gate.lock().await;
        if !self.is_connected() {
            return Ok(());
        }

        let handles = self.handles.write().take();
        self.connected.store(false, Ordering::Release);

        let result = match handles {
            Some(handles) => {
                let command = handles.command.close().await;
                let subscriber = handles.subscriber.close().await;
                command.and(subscriber)
            }
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                info!(target = %self.target(), "store disconnected");
                self.events.emit(&Event::Disconnected);
                Ok(())
            }
            Err(err) => {
                warn!(target = %self.target(), error = %err, "store disconnect failed");
                let cause = Arc::new(err);
                self.events.emit(&Event::DisconnectError(Arc::clone(&cause)));
                Err(ConnectionError::new(cause))
            }
        }
    }

    /// Flushes the selected database when connected, then emits `reset`.
    ///
    /// Never opens a connection.
    pub async fn reset(&self) -> FacadeResult<()> {
        if let Some(client) = self.live_command() {
            client.flush_db().await?;
            info!(target = %self.target(), "store flushed");
        }
        self.events.emit(&Event::Reset);
        Ok(())
    }

    /// Reads `key` and parses the stored text. Missing keys yield `None`.
    pub async fn get(&self, key: &str) -> FacadeResult<Option<Value>> {
        self.get_with(key, GetOptions::default()).await
    }

    /// Reads `key`; with `parse` off the raw text comes back as `Value::String`.
    pub async fn get_with(&self, key: &str, options: GetOptions) -> FacadeResult<Option<Value>> {
        let client = self.connect().await?;
        let raw = client.get(key.as_bytes()).await?;
        Ok(raw.map(|bytes| {
            let text = String::from_utf8_lossy(&bytes);
            if options.parse {
                codec::parse(&text)
            } else {
                Value::String(text.into_owned())
            }
        }))
    }

    /// Stores `value` verbatim. Returns the store acknowledgment ("OK").
    pub async fn set(&self, key: &str, value: impl AsRef<[u8]>) -> FacadeResult<String> {
        let client = self.connect().await?;
        Ok(client.set(key.as_bytes(), value.as_ref()).await?)
    }

    /// Alias of [`set`](Self::set).
    pub async fn add(&self, key: &str, value: impl AsRef<[u8]>) -> FacadeResult<String> {
        self.set(key, value).await
    }

    /// Deletes `key`. Returns the number of keys removed.
    pub async fn remove(&self, key: &str) -> FacadeResult<i64> {
        let client = self.connect().await?;
        Ok(client.del(key.as_bytes()).await?)
    }

    /// Alias of [`remove`](Self::remove).
    pub async fn delete(&self, key: &str) -> FacadeResult<i64> {
        self.remove(key).await
    }

    /// Serializes `data` and publishes it. Returns the receiver count.
    pub async fn publish<T>(&self, channel: &str, data: &T) -> FacadeResult<i64>
    where
        T: Serialize + ?Sized,
    {
        let client = self.connect().await?;
        let text = codec::stringify(data)?;
        Ok(client.publish(channel.as_bytes(), text.as_bytes()).await?)
    }

    /// Publishes `data`, serializing only when `options.serialize` is set.
    ///
    /// Without serialization a string is sent as-is and other values as
    /// their JSON text.
    pub async fn publish_with(
        &self,
        channel: &str,
        data: &Value,
        options: PublishOptions,
    ) -> FacadeResult<i64> {
        if options.serialize {
            return self.publish(channel, data).await;
        }

        let client = self.connect().await?;
        let text = match data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Ok(client.publish(channel.as_bytes(), text.as_bytes()).await?)
    }

    /// Registers `handler` for `channels` on the subscriber handle.
    pub async fn subscribe<F>(
        &self,
        channels: &[&str],
        handler: F,
        buffer_mode: bool,
    ) -> FacadeResult<ListenerId>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let subscriber = self.subscriber().await?;
        let id = subscriber.subscribe(channels, handler, buffer_mode).await?;
        debug!(?channels, buffer_mode, "subscribed");
        Ok(id)
    }

    /// Removes `listener` (every listener when `None`) from `channels`.
    pub async fn unsubscribe(&self, channels: &[&str], listener: Option<ListenerId>) -> FacadeResult<()> {
        let subscriber = self.subscriber().await?;
        subscriber.unsubscribe(channels, listener).await?;
        debug!(?channels, "unsubscribed");
        Ok(())
    }

    /// Decodes a received message. Empty messages yield `None`.
    pub fn message_data(message: &str, options: MessageDataOptions) -> Option<Value> {
        if message.is_empty() {
            return None;
        }
        if options.parse {
            Some(codec::parse(message))
        } else {
            Some(Value::String(message.to_string()))
        }
    }

    /// The command handle, unless either handle was closed by the store.
    fn live_command(&self) -> Option<StoreClient> {
        if !self.is_connected() {
            return None;
        }
        self.handles
            .read()
            .as_ref()
            .filter(|handles| handles.command.is_open() && handles.subscriber.is_open())
            .map(|handles| handles.command.clone())
    }

    /// Drops handles left behind by a transport closure. Caller holds the gate.
    async fn discard_lost(&self) {
        let lost = self.handles.write().take();
        self.connected.store(false, Ordering::Release);
        if let Some(handles) = lost {
            warn!(target = %self.target(), "store connection lost, reconnecting");
            for handle in [handles.command, handles.subscriber] {
                if handle.is_open() {
                    let _ = handle.close().await;
                }
            }
        }
    }

    async fn subscriber(&self) -> FacadeResult<StoreClient> {
        self.connect().await?;
        self.handles
            .read()
            .as_ref()
            .map(|handles| handles.subscriber.clone())
            .ok_or(FacadeError::Client(ClientError::Closed))
    }

    async fn open(&self) -> ClientResult<Handles> {
        let config = ClientConfig {
            url: self.options.uri.clone(),
            ..ClientConfig::default()
        };
        let command = StoreClient::connect(config).await?;
        let subscriber = match command.duplicate().await {
            Ok(subscriber) => subscriber,
            Err(err) => {
                let _ = command.close().await;
                return Err(err);
            }
        };

        for (role, handle) in [("command", &command), ("subscriber", &subscriber)] {
            let target = self.target().to_string();
            handle.on_close(move || info!(%target, role, "store connection closed"));
        }

        Ok(Handles { command, subscriber })
    }

    fn target(&self) -> &str {
        self.options.uri.as_deref().unwrap_or(DEFAULT_TARGET)
    }
}
