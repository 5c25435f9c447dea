//! Connection target resolved from a `redis://` URI.

use url::Url;

use crate::client::{ClientError, ClientResult};

/// Host used when no URI is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port used when the URI omits one.
pub const DEFAULT_PORT: u16 = 6379;

/// Parsed connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Logical database selected after connecting.
    pub db: u32,
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
        }
    }
}

impl Endpoint {
    /// Resolves `redis://[user[:password]@]host[:port][/db]`.
    ///
    /// `None` yields the default local endpoint.
    pub fn parse(uri: Option<&str>) -> ClientResult<Self> {
        let raw = match uri {
            Some(raw) => raw,
            None => return Ok(Endpoint::default()),
        };
        let invalid = || ClientError::InvalidAddress(raw.to_string());

        let parsed = Url::parse(raw).map_err(|_| invalid())?;
        if parsed.scheme() != "redis" {
            return Err(invalid());
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']'),
            _ => DEFAULT_HOST,
        };

        let db = match parsed.path().trim_start_matches('/') {
            "" => 0,
            db => db.parse().map_err(|_| invalid())?,
        };

        let username = match parsed.username() {
            "" => None,
            name => Some(name.to_string()),
        };

        Ok(Endpoint {
            host: host.to_string(),
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            username,
            password: parsed.password().map(str::to_string),
            db,
        })
    }

    /// `host:port` form used in log lines.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
