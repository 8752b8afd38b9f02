use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Another event for the same contact held the lock for too long.
    #[error("timed out after {waited_ms}ms waiting for session {tenant}/{contact}")]
    LockTimeout {
        tenant: String,
        contact: String,
        waited_ms: u64,
    },

    /// The work done while holding the session exceeded its budget. State
    /// changes made by that work are not persisted.
    #[error("session {tenant}/{contact} exceeded {limit_ms}ms critical section")]
    Timeout {
        tenant: String,
        contact: String,
        limit_ms: u64,
    },

    #[error(transparent)]
    Store(#[from] parley_store::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
