//! # Pub/Sub Listener Registry
//!
//! Purpose: Track which listeners want which channels on one connection and
//! decide when the server must be told to (un)subscribe.
//!
//! ## Design Principles
//! 1. **Server Sync by Difference**: Only channels gaining their first
//!    listener are subscribed; only channels losing their last are
//!    unsubscribed.
//! 2. **Token Identity**: Listeners are removed by `ListenerId`, since
//!    closures carry no identity of their own.
//! 3. **Per-Listener Delivery Mode**: Buffer listeners get raw bytes, text
//!    listeners get (lossy) UTF-8.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

/// Handle identifying one `subscribe` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Message payload as delivered to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Delivered to listeners registered without buffer mode.
    Text(String),
    /// Delivered to listeners registered with buffer mode.
    Buffer(Bytes),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Buffer(bytes) => &bytes[..],
        }
    }

    /// Payload as text; buffers are decoded lossily.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(text) => Cow::Borrowed(text),
            Payload::Buffer(bytes) => String::from_utf8_lossy(bytes),
        }
    }
}

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: Payload,
}

pub(crate) type Listener = Arc<dyn Fn(Message) + Send + Sync>;

struct Registered {
    id: ListenerId,
    buffer_mode: bool,
    listener: Listener,
}

/// Channel → listeners map for a single connection.
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: u64,
    channels: HashMap<String, Vec<Registered>>,
}

impl Subscriptions {
    /// Registers `listener` on every channel.
    ///
    /// Returns the new id and the channels that had no listener before.
    pub(crate) fn add(
        &mut self,
        channels: &[&str],
        buffer_mode: bool,
        listener: Listener,
    ) -> (ListenerId, Vec<String>) {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        let mut fresh = Vec::new();

        for channel in channels {
            let entry = self.channels.entry((*channel).to_string()).or_default();
            if entry.iter().any(|existing| existing.id == id) {
                continue;
            }
            if entry.is_empty() {
                fresh.push((*channel).to_string());
            }
            entry.push(Registered {
                id,
                buffer_mode,
                listener: Arc::clone(&listener),
            });
        }

        (id, fresh)
    }

    /// Removes `listener` (or every listener when `None`) from the channels.
    ///
    /// Returns the channels left with no listener.
    pub(crate) fn remove(&mut self, channels: &[&str], listener: Option<ListenerId>) -> Vec<String> {
        let mut drained = Vec::new();

        for channel in channels {
            let entry = match self.channels.get_mut(*channel) {
                Some(entry) => entry,
                None => continue,
            };
            match listener {
                Some(id) => entry.retain(|existing| existing.id != id),
                None => entry.clear(),
            }
            if entry.is_empty() {
                self.channels.remove(*channel);
                drained.push((*channel).to_string());
            }
        }

        drained
    }

    /// True while any channel has a listener.
    pub(crate) fn is_active(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Snapshot of `(buffer_mode, listener)` pairs for a channel.
    pub(crate) fn listeners(&self, channel: &str) -> Vec<(bool, Listener)> {
        self.channels
            .get(channel)
            .map(|entry| {
                entry
                    .iter()
                    .map(|registered| (registered.buffer_mode, Arc::clone(&registered.listener)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
