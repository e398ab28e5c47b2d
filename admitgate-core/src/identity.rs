//! User identity as seen by the admission store.

use std::fmt;

use crate::admission::AdmissionError;

/// Store key prefix for per-user admission records.
pub const USER_KEY_PREFIX: &str = "user:";

/// Case-normalized identity derived from a verified email address.
///
/// The email is the only attribute the admission core knows about a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Normalize a raw email into an identity.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::MissingIdentity`] when the input is empty
    /// after trimming.
    pub fn from_email(raw: &str) -> Result<Self, AdmissionError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AdmissionError::MissingIdentity);
        }
        Ok(Self(normalized))
    }

    /// The normalized email.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the external worker records this user's decision.
    pub fn record_key(&self) -> String {
        format!("{USER_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
