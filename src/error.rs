//! Error types for the sync engine.

use thiserror::Error;

/// All errors that can arise from sync and reconciliation operations.
///
/// Connectivity failures are surfaced, never retried internally; the caller
/// decides when to try again. Per-record failures during a push or pull are
/// collected into the operation report instead of being raised, so a batch
/// always makes forward progress on the records that do succeed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No or invalid master-store target, or an invalid operator request.
    /// Mutating operations fail with this before touching any store.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Timeout or unreachable master store. Retryable by the caller.
    #[error("master store unreachable: {0}")]
    Connectivity(String),

    /// A record violates the master store's required-field constraints.
    #[error("validation failed for {table} record {uuid}: {reason}")]
    Validation {
        table: &'static str,
        uuid: String,
        reason: String,
    },

    /// Duplicate natural keys or dangling references detected during
    /// reconciliation.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A foreign-key correction rule matched zero or several candidates.
    #[error("ambiguous match: {0}")]
    AmbiguousMatch(String),

    /// The master store rejected a request with a non-retryable status.
    #[error("master store rejected request ({status}): {body}")]
    Master { status: u16, body: String },

    /// An error from the local SQLite store.
    #[error("local store error: {0}")]
    Store(#[from] diesel::result::Error),

    /// The local connection pool could not hand out a connection.
    #[error("local store pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Embedded schema migrations failed to apply.
    #[error("schema migration failed: {0}")]
    Migration(String),

    /// Record (de)serialization failed at a store boundary.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The engine received a shutdown signal and accepts no new sessions.
    #[error("engine is shutting down; no new sync sessions accepted")]
    ShuttingDown,
}

impl SyncError {
    /// True for failures worth retrying once the network is back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Connectivity(_))
    }
}
