//! # Facade Options
//!
//! Purpose: Hold the fixed configuration of a facade and the per-call
//! switches of `get`, `publish` and `message_data`.

use serde::{Deserialize, Serialize};

/// Environment variable consulted by [`FacadeOptions::from_env`].
pub const URI_ENV: &str = "SERVICE_REDIS_URI";

/// Construction-time configuration of a [`StoreFacade`](crate::StoreFacade).
///
/// An absent `uri` targets the client default, `redis://127.0.0.1:6379`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeOptions {
    pub uri: Option<String>,
}

impl FacadeOptions {
    pub fn with_uri(uri: impl Into<String>) -> Self {
        FacadeOptions {
            uri: Some(uri.into()),
        }
    }

    /// Reads the URI from `SERVICE_REDIS_URI`; unset or empty means default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        FacadeOptions {
            uri: lookup(URI_ENV).filter(|uri| !uri.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Parse the stored text (JSON with raw-string fallback).
    pub parse: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        GetOptions { parse: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Serialize the value before publishing. When off, strings go out verbatim.
    pub serialize: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        PublishOptions { serialize: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDataOptions {
    pub parse: bool,
}

impl Default for MessageDataOptions {
    fn default() -> Self {
        MessageDataOptions { parse: true }
    }
}
