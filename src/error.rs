//! Error types for lock operations

use tonic::Code;

/// Error type for lock acquisition and release
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("empty key")]
    EmptyKey,

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("lease grant failed (ttl={ttl_seconds}s): {source}")]
    LeaseGrant {
        ttl_seconds: i64,
        #[source]
        source: tonic::Status,
    },

    #[error("lock acquisition failed for {key}: {source}")]
    Acquisition {
        key: String,
        #[source]
        source: tonic::Status,
    },

    #[error("lock release failed for {key}: {source}")]
    Release {
        key: String,
        #[source]
        source: tonic::Status,
    },
}

impl LockError {
    /// The gRPC status code behind this error, if it came from an RPC.
    pub fn code(&self) -> Option<Code> {
        self.status().map(tonic::Status::code)
    }

    /// The gRPC status behind this error, if it came from an RPC.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            LockError::LeaseGrant { source, .. }
            | LockError::Acquisition { source, .. }
            | LockError::Release { source, .. } => Some(source),
            LockError::EmptyKey | LockError::Transport(_) => None,
        }
    }

    /// Whether the failure came from the connection rather than the service.
    pub fn is_transport(&self) -> bool {
        matches!(self, LockError::Transport(_)) || self.code() == Some(Code::Unavailable)
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
