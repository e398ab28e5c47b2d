//! admitgate core library.
//!
//! Holds the pieces of the gateway that carry real state-machine semantics
//! and are independent of the HTTP transport:
//!
//! - [`admission`]: waitlist-gated admission controller that polls a shared
//!   key-value store for a decision written by an external worker.
//! - [`identity`]: normalization of verified email addresses into store keys.
//! - [`error`]: the client-visible error taxonomy shared with the proxy crate.

pub mod admission;
pub mod error;
pub mod identity;

pub use admission::{AdmissionController, AdmissionError, AdmissionGrant, CapacityStatus};
pub use error::ErrorKind;
pub use identity::Identity;
