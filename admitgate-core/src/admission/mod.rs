//! Waitlist-gated admission control.
//!
//! An external worker decides which users may pass the capacity gate and
//! records its decision in a shared key-value store. This module reads that
//! decision, enqueues unknown users on the waitlist, and waits a bounded time
//! for a decision to appear.
//!
//! ## State machine (per call)
//!
//! ```text
//!            ┌──────────────── record == "admitted" ───────────────▶ Admitted
//!  Idle ──▶ Polling ─────────── any other record ──────────────────▶ Rejected
//!            │  ▲                                                      │
//!            │  └── no record: enqueue once, sleep POLL_INTERVAL       │ Unauthorized
//!            └───────────── ADMISSION_BUDGET elapsed ──────────▶ TimedOut ─┘
//! ```
//!
//! `Rejected` and `TimedOut` both surface as [`AdmissionError::Unauthorized`];
//! callers cannot tell them apart.
//!
//! ## Waitlist de-duplication
//!
//! Before appending, the controller reads the waitlist tail and skips the
//! append when the tail already holds this identity. The read and the append
//! are two separate store operations, so two concurrent calls for the same
//! identity can still both append.

pub mod kv_rest;
pub mod memory;
pub mod store;

pub use kv_rest::{KvRestConfig, KvRestStore};
pub use memory::InMemoryStore;
pub use store::{AdmissionStore, REMAINING_CAPACITY_KEY, StoreError, StoreResult, WAITLIST_KEY};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::identity::Identity;

/// Total time a single `authorize` call may wait for a decision.
pub const ADMISSION_BUDGET: Duration = Duration::from_millis(5000);

/// Pause between two reads of the admission record.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Record value written by the worker for an admitted user.
pub const ADMITTED_VALUE: &str = "admitted";

// ============================================================================
// Types
// ============================================================================

/// Decision found under `user:<email>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionRecord {
    /// The worker admitted the user.
    Admitted,
    /// Any other recorded value, `rejected` included.
    Denied(String),
}

impl AdmissionRecord {
    /// Interpret a stored value.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == ADMITTED_VALUE {
            Self::Admitted
        } else {
            Self::Denied(raw.to_string())
        }
    }
}

/// Successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionGrant {
    /// The worker recorded `admitted` for this identity.
    Recorded,
    /// No store is configured; gating is off for this deployment.
    GateDisabled,
}

/// Why an admission was denied. Kept for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// A non-`admitted` record was found.
    Rejected,
    /// The budget elapsed while the decision was still pending.
    TimedOut,
}

/// Errors from [`AdmissionController::authorize`].
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// No identity was supplied.
    #[error("Missing identity")]
    MissingIdentity,

    /// Denied or timed out. The message is the same for both reasons.
    #[error("Access denied")]
    Unauthorized {
        /// Internal reason, not exposed to clients.
        reason: DenialReason,
    },

    /// The store failed during the call. Not retried.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller went away while the decision was pending.
    #[error("Admission check cancelled")]
    Cancelled,
}

impl AdmissionError {
    /// Client-visible classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingIdentity => ErrorKind::MissingIdentity,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Store(_) | Self::Cancelled => ErrorKind::ServiceUnavailable,
        }
    }
}

/// Result alias for admission operations.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Remaining capacity as published by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityStatus {
    /// Remaining slots; `0` when the counter is absent or malformed.
    pub remaining: i64,
    /// Whether a "waitlist full" notice should be shown.
    pub waitlist_full: bool,
}

// ============================================================================
// Controller
// ============================================================================

/// Decides whether an identity may pass the capacity gate.
///
/// Holds no per-user state; every call is independent and all coordination
/// goes through the store. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionController {
    store: Option<Arc<dyn AdmissionStore>>,
}

impl AdmissionController {
    /// Create a controller. `None` disables gating.
    #[must_use]
    pub fn new(store: Option<Arc<dyn AdmissionStore>>) -> Self {
        Self { store }
    }

    /// Controller that admits everyone without touching a store.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Whether a store is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Admit `identity`, enqueueing it and waiting for a decision if needed.
    ///
    /// Waits at most [`ADMISSION_BUDGET`], reading the record once per
    /// [`POLL_INTERVAL`]. Returns promptly with [`AdmissionError::Cancelled`]
    /// once `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::MissingIdentity`] for an empty identity
    /// - [`AdmissionError::Unauthorized`] on rejection or timeout
    /// - [`AdmissionError::Store`] if any store operation fails
    /// - [`AdmissionError::Cancelled`] if `cancel` fires first
    pub async fn authorize(
        &self,
        identity: &str,
        cancel: &CancellationToken,
    ) -> AdmissionResult<AdmissionGrant> {
        let identity = Identity::from_email(identity)?;

        let Some(store) = self.store.as_deref() else {
            debug!("Admission gating disabled, admitting");
            return Ok(AdmissionGrant::GateDisabled);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(identity = %identity, "Admission check cancelled by caller");
                Err(AdmissionError::Cancelled)
            }
            result = poll_for_decision(store, &identity) => result,
        }
    }

    /// Read the remaining-capacity counter.
    ///
    /// Returns `Ok(None)` when gating is disabled.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn capacity(&self) -> StoreResult<Option<CapacityStatus>> {
        let Some(store) = self.store.as_deref() else {
            return Ok(None);
        };

        let raw = store.get(REMAINING_CAPACITY_KEY).await?;
        let remaining = match raw.as_deref().map(str::trim) {
            Some(value) => value.parse::<i64>().unwrap_or_else(|_| {
                warn!(value = %value, "Malformed remaining capacity counter, treating as 0");
                0
            }),
            None => 0,
        };

        Ok(Some(CapacityStatus {
            remaining,
            waitlist_full: remaining <= 0,
        }))
    }
}

/// The polling loop. Cancellation is handled by the caller dropping this
/// future.
async fn poll_for_decision(
    store: &dyn AdmissionStore,
    identity: &Identity,
) -> AdmissionResult<AdmissionGrant> {
    let key = identity.record_key();
    let started = Instant::now();
    let deadline = started + ADMISSION_BUDGET;
    let mut enqueued = false;
    let mut polls = 0u32;

    while Instant::now() < deadline {
        polls += 1;
        match store.get(&key).await?.as_deref().map(AdmissionRecord::parse) {
            Some(AdmissionRecord::Admitted) => {
                info!(
                    polls,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Admission granted"
                );
                return Ok(AdmissionGrant::Recorded);
            }
            Some(AdmissionRecord::Denied(value)) => {
                info!(polls, record = %value, "Admission denied by recorded decision");
                return Err(AdmissionError::Unauthorized {
                    reason: DenialReason::Rejected,
                });
            }
            None if !enqueued => {
                enqueue(store, identity).await?;
                enqueued = true;
            }
            None => {}
        }

        debug!(polls, "Admission pending, sleeping");
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    info!(
        polls,
        budget_ms = ADMISSION_BUDGET.as_millis() as u64,
        "Admission timed out while pending"
    );
    Err(AdmissionError::Unauthorized {
        reason: DenialReason::TimedOut,
    })
}

/// Append `identity` to the waitlist unless it is already the tail entry.
async fn enqueue(store: &dyn AdmissionStore, identity: &Identity) -> StoreResult<()> {
    if store.list_tail(WAITLIST_KEY).await?.as_deref() == Some(identity.as_str()) {
        debug!(identity = %identity, "Identity already at waitlist tail, not appending");
        return Ok(());
    }

    let len = store.list_append(WAITLIST_KEY, identity.as_str()).await?;
    info!(waitlist_len = len, "Identity appended to waitlist");
    debug!(identity = %identity, "Waitlist append");
    Ok(())
}
