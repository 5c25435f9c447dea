// skv-common - Shared utilities for the SimpleKV facade
//
// This crate holds the pieces the facade and its callers both rely on: the
// in-process notification channel and the payload serialization helpers.

pub mod codec;
pub mod notify;

// Re-export for convenience
pub use codec::{parse, stringify};
pub use notify::{Notifier, Token};
