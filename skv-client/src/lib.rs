//! # SimpleKV Async Client
//!
//! Purpose: Provide a lightweight, async Redis-compatible client with a
//! request pipeline and pub/sub listener routing, suitable as the store
//! collaborator of the `skv` facade.
//!
//! ## Design Principles
//! 1. **One Socket, One Reader**: Each handle owns a TCP connection and a
//!    background task that routes replies and push messages.
//! 2. **FIFO Pipeline**: Replies are matched to requests strictly in order.
//! 3. **Explicit Modes**: A handle with live subscriptions refuses regular
//!    commands instead of corrupting the reply stream.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod connection;
mod endpoint;
mod pubsub;
mod resp;

pub use client::{ClientConfig, ClientError, ClientResult, StoreClient};
pub use endpoint::Endpoint;
pub use pubsub::{ListenerId, Message, Payload};
