//! Lifecycle events broadcast by [`StoreFacade`](crate::StoreFacade).

use std::sync::Arc;

use skv_client::ClientError;

#[derive(Debug, Clone)]
pub enum Event {
    /// Both handles are open.
    Connected,
    /// Opening the handles failed.
    ConnectError(Arc<ClientError>),
    /// Both handles were closed on request.
    Disconnected,
    /// Closing the handles failed; the facade is disconnected anyway.
    DisconnectError(Arc<ClientError>),
    /// `reset` finished.
    Reset,
}

impl Event {
    /// Wire-style name of the event, e.g. `"connect:error"`.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected => "connected",
            Event::ConnectError(_) => "connect:error",
            Event::Disconnected => "disconnected",
            Event::DisconnectError(_) => "disconnect:error",
            Event::Reset => "reset",
        }
    }

    /// Error carried by the `*:error` events.
    pub fn cause(&self) -> Option<&ClientError> {
        match self {
            Event::ConnectError(cause) | Event::DisconnectError(cause) => Some(cause),
            _ => None,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cause() {
            Some(cause) => write!(f, "{} ({})", self.name(), cause),
            None => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_lifecycle_vocabulary() {
        let cause = Arc::new(ClientError::Closed);
        let names: Vec<&str> = [
            Event::Connected,
            Event::ConnectError(Arc::clone(&cause)),
            Event::Disconnected,
            Event::DisconnectError(cause),
            Event::Reset,
        ]
        .iter()
        .map(Event::name)
        .collect();
        assert_eq!(
            names,
            ["connected", "connect:error", "disconnected", "disconnect:error", "reset"]
        );
    }

    #[test]
    fn display_includes_cause() {
        let event = Event::ConnectError(Arc::new(ClientError::Timeout));
        assert_eq!(event.to_string(), "connect:error (connect timed out)");
        assert!(Event::Reset.cause().is_none());
    }
}
