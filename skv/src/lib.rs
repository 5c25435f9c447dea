//! # SimpleKV Facade
//!
//! Purpose: Give application code a small async surface over a Redis-compatible
//! store: lazy connect, get/set/remove, publish/subscribe, and lifecycle
//! events.
//!
//! ## Design Principles
//! 1. **Lazy Lifecycle**: Data operations connect on first use.
//! 2. **Two Handles**: Subscriptions live on a dedicated handle so they never
//!    block request/response traffic.
//! 3. **Observable**: Every lifecycle transition is broadcast as an [`Event`].
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo() -> skv::FacadeResult<()> {
//! use skv::{FacadeOptions, StoreFacade};
//!
//! let facade = StoreFacade::new(FacadeOptions::from_env());
//! facade.events().register(|event| println!("{}", event.name()));
//! facade.set("greeting", "hello").await?;
//! let value = facade.get("greeting").await?;
//! facade.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod facade;
pub mod options;

pub use error::{ConnectionError, FacadeError, FacadeResult};
pub use events::Event;
pub use facade::StoreFacade;
pub use options::{FacadeOptions, GetOptions, MessageDataOptions, PublishOptions, URI_ENV};

pub use skv_client::{ClientError, ListenerId, Message, Payload, StoreClient};
pub use skv_common::{Notifier, Token};
