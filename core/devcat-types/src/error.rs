//! Error types for catalog operations.

use thiserror::Error;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur in catalog operations.
///
/// The same taxonomy is used by the store, the HTTP API and the remote
/// client, so a `NotFound` raised by a remote server surfaces unchanged in
/// the keepalive loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Absent or already-deleted id.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity or resource with this id is already registered.
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// Malformed payload, id, or filter parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal storage fault.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// The remote catalog could not be reached or answered unexpectedly.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The keepalive loop hit its consecutive-failure threshold.
    #[error("keepalive gave up after {attempts} consecutive failures")]
    ProtocolExhausted { attempts: u32 },
}

impl CatalogError {
    /// Whether this error means the id is unknown to the catalog.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidInput(e.to_string())
    }
}
