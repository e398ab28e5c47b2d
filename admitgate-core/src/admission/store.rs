//! Shared key-value store consumed by the admission controller.
//!
//! ## Key layout
//!
//! | Key | Type | Written by | Read by |
//! |-----|------|------------|---------|
//! | `user:<email>` | string (`admitted` / `rejected`) | external worker | controller |
//! | `usersWaitlist` | list of emails, append at tail | controller | external worker |
//! | `remainingCapacity` | string-encoded integer | external worker | capacity reader |
//!
//! Only single-key operations are assumed to be atomic. Nothing here offers
//! multi-key transactions.

use async_trait::async_trait;
use thiserror::Error;

/// FIFO list of identities awaiting a decision.
pub const WAITLIST_KEY: &str = "usersWaitlist";

/// Integer counter maintained by the external worker.
pub const REMAINING_CAPACITY_KEY: &str = "remainingCapacity";

/// Errors from the admission store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connect failure, timeout, 5xx).
    #[error("Admission store unreachable: {0}")]
    Unreachable(String),

    /// The store answered with something we could not interpret.
    #[error("Unexpected admission store reply: {0}")]
    Protocol(String),

    /// The store executed the command and reported an error.
    #[error("Admission store rejected command: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether a later attempt could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Atomic single-key operations the admission controller relies on.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Read a string value. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Read the last element of a list. `Ok(None)` when the list is empty
    /// or absent.
    async fn list_tail(&self, key: &str) -> StoreResult<Option<String>>;

    /// Append `value` at the tail of a list and return the new length.
    async fn list_append(&self, key: &str, value: &str) -> StoreResult<u64>;
}
