use thiserror::Error;

/// Failure taxonomy at the remote record store boundary.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level or availability failure. Recovered by queuing the
    /// write; never surfaced to the user as a hard error.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The store rejected the caller's credentials for this path.
    #[error("unauthorized access to {path}")]
    Unauthorized { path: String },

    /// A transactional update lost its compare-and-set race more times
    /// than the store is willing to retry.
    #[error("transaction contention on {path} after {attempts} attempts")]
    Contention { path: String, attempts: u32 },

    /// The document at the path did not decode as expected.
    #[error("failed to decode document at {path}: {reason}")]
    Decode { path: String, reason: String },
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        RemoteError::Transient(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}
