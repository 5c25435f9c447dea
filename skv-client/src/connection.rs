//! # Pipelined Connection
//!
//! Purpose: Own one TCP socket, write RESP commands in order, and let a
//! background reader task hand each reply back to the request that is
//! waiting for it.
//!
//! ## Design Principles
//! 1. **FIFO Reply Slots**: Every written command enqueues a slot; replies
//!    complete slots front to back.
//! 2. **Ordered Writes**: The writer lock is held while the slot is enqueued
//!    and the frame is written, so slot order equals wire order.
//! 3. **Single Close**: Closing (by us or by the peer) drains pending slots
//!    and fires close listeners exactly once.
//! 4. **No Cycles**: The reader task holds a `Weak` so dropping the last
//!    handle tears the connection down.
//! 5. **Reader Exit Closes**: Whatever ends the reader task, including a
//!    panic, ends in `mark_closed`.
//!
//! ## Structure Overview
//!
//! ```text
//! Connection
//!   ├── writer: tokio Mutex<Option<OwnedWriteHalf>>
//!   ├── pending: VecDeque<PendingReply>      (FIFO reply slots)
//!   ├── subscriptions: Subscriptions          (channel → listeners)
//!   ├── close_listeners: Vec<CloseListener>
//!   └── reader: JoinHandle                    (read_loop task)
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{ClientError, ClientResult};
use crate::endpoint::Endpoint;
use crate::pubsub::{Message, Payload, Subscriptions};
use crate::resp::{encode_command, parse_value, RespValue};

pub(crate) type CloseListener = Box<dyn FnOnce() + Send>;

/// Reply slot for one in-flight command.
struct PendingReply {
    /// Replies still expected (SUBSCRIBE answers once per channel).
    remaining: usize,
    tx: oneshot::Sender<ClientResult<RespValue>>,
}

pub(crate) struct Connection {
    peer: String,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pending: Mutex<VecDeque<PendingReply>>,
    pub(crate) subscriptions: Mutex<Subscriptions>,
    close_listeners: Mutex<Vec<CloseListener>>,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Opens a socket to `endpoint` and starts the reader task.
    pub(crate) async fn open(
        endpoint: &Endpoint,
        connect_timeout: Option<Duration>,
    ) -> ClientResult<Arc<Self>> {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = match connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| ClientError::Timeout)??,
            None => connect.await?,
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Connection {
            peer: endpoint.authority(),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            pending: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Subscriptions::default()),
            close_listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(Arc::downgrade(&conn), read_half));
        *conn.reader.lock() = Some(handle);

        debug!(peer = %conn.peer, "connection opened");
        Ok(conn)
    }

    /// Writes one command and waits until `replies` answers have arrived.
    ///
    /// The last reply is returned; an error reply completes the slot early.
    pub(crate) async fn exec(&self, args: &[&[u8]], replies: usize) -> ClientResult<RespValue> {
        let mut frame = Vec::with_capacity(64);
        encode_command(args, &mut frame);
        let (tx, rx) = oneshot::channel();

        {
            let mut writer = self.writer.lock().await;
            let stream = writer.as_mut().ok_or(ClientError::Closed)?;
            {
                let mut pending = self.pending.lock();
                if self.closed.load(Ordering::Acquire) {
                    return Err(ClientError::Closed);
                }
                pending.push_back(PendingReply {
                    remaining: replies.max(1),
                    tx,
                });
            }
            if let Err(err) = stream.write_all(&frame).await {
                warn!(peer = %self.peer, error = %err, "write failed");
                self.mark_closed();
                return Err(err.into());
            }
        }

        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Shuts the socket down. Fails with `Closed` if already closed.
    pub(crate) async fn close(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        let writer = self.writer.lock().await.take();
        let result = match writer {
            Some(mut stream) => stream.shutdown().await.map_err(ClientError::from),
            None => Err(ClientError::Closed),
        };

        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.mark_closed();
        result
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_subscriber(&self) -> bool {
        self.subscriptions.lock().is_active()
    }

    /// Registers a callback for transport closure.
    ///
    /// Runs immediately when the connection is already closed.
    pub(crate) fn on_close(&self, listener: CloseListener) {
        {
            let mut listeners = self.close_listeners.lock();
            if !self.closed.load(Ordering::Acquire) {
                listeners.push(listener);
                return;
            }
        }
        listener();
    }

    /// Transitions to closed: fails pending slots and fires close listeners.
    fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<PendingReply> = self.pending.lock().drain(..).collect();
        for slot in drained {
            let _ = slot.tx.send(Err(ClientError::Closed));
        }

        // Drop the write half now unless a writer is mid-flight.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        let listeners: Vec<CloseListener> = self.close_listeners.lock().drain(..).collect();
        debug!(peer = %self.peer, listeners = listeners.len(), "connection closed");
        for listener in listeners {
            listener();
        }
    }

    /// Routes one decoded value: pushes go to listeners, the rest to slots.
    fn route(&self, value: RespValue) {
        match value {
            RespValue::Array(items) if is_message_push(&items) => self.dispatch(items),
            other => self.complete(other),
        }
    }

    fn complete(&self, value: RespValue) {
        let mut pending = self.pending.lock();
        let front = match pending.front_mut() {
            Some(front) => front,
            None => {
                warn!(peer = %self.peer, "reply without a pending request");
                return;
            }
        };

        let is_error = matches!(value, RespValue::Error(_));
        front.remaining = front.remaining.saturating_sub(1);
        if front.remaining == 0 || is_error {
            if let Some(slot) = pending.pop_front() {
                let _ = slot.tx.send(Ok(value));
            }
        }
    }

    fn dispatch(&self, items: Vec<RespValue>) {
        let mut items = items.into_iter().skip(1);
        let channel = match items.next() {
            Some(RespValue::Bulk(Some(channel))) => String::from_utf8_lossy(&channel).into_owned(),
            _ => return,
        };
        let payload = match items.next() {
            Some(RespValue::Bulk(Some(payload))) => Bytes::from(payload),
            _ => return,
        };

        let listeners = self.subscriptions.lock().listeners(&channel);
        for (buffer_mode, listener) in listeners {
            let payload = if buffer_mode {
                Payload::Buffer(payload.clone())
            } else {
                Payload::Text(String::from_utf8_lossy(&payload).into_owned())
            };
            listener(Message {
                channel: channel.clone(),
                payload,
            });
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

/// `["message", channel, payload]` push frame.
fn is_message_push(items: &[RespValue]) -> bool {
    items.len() == 3
        && matches!(&items[0], RespValue::Bulk(Some(kind)) if kind.as_slice() == b"message")
}

/// Marks the connection closed when the reader task ends, however it ends.
struct ReaderExit(Weak<Connection>);

impl Drop for ReaderExit {
    fn drop(&mut self) {
        if let Some(live) = self.0.upgrade() {
            live.mark_closed();
        }
    }
}

async fn read_loop(conn: Weak<Connection>, mut reader: OwnedReadHalf) {
    let _exit = ReaderExit(conn.clone());
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "read failed");
                return;
            }
        }

        let live = match conn.upgrade() {
            Some(live) => live,
            None => return,
        };
        loop {
            match parse_value(&mut buffer) {
                Ok(Some(value)) => live.route(value),
                Ok(None) => break,
                Err(err) => {
                    warn!(peer = %live.peer, error = %err, "dropping connection");
                    return;
                }
            }
        }
    }
}
