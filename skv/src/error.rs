//! Facade error taxonomy.

use std::sync::Arc;

use skv_client::ClientError;
use thiserror::Error;

pub type FacadeResult<T> = Result<T, FacadeError>;

/// Failure to open or close the store handles.
///
/// The cause is shared with the `connect:error` / `disconnect:error` event
/// broadcast for the same failure.
#[derive(Debug, Clone, Error)]
#[error("store connection failed: {cause}")]
pub struct ConnectionError {
    #[source]
    cause: Arc<ClientError>,
}

impl ConnectionError {
    pub(crate) fn new(cause: Arc<ClientError>) -> Self {
        ConnectionError { cause }
    }

    /// The client error that caused the failure.
    pub fn cause(&self) -> &ClientError {
        &self.cause
    }
}

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A data operation failed on an established connection.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// A publish payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FacadeError {
    pub fn is_connection(&self) -> bool {
        matches!(self, FacadeError::Connection(_))
    }
}
