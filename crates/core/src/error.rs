use thiserror::Error;

/// Boxed source error carried by back-end specific failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, RuleStoreError>;

/// Coarse classification of a [`RuleStoreError`], used where callers only
/// need to know *which kind* of failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    OptimisticLock,
    Conflict,
    LockBusy,
    Canceled,
    Database,
    Internal,
}

#[derive(Error, Debug)]
pub enum RuleStoreError {
    #[error("could not find alert rule: {0}")]
    NotFound(String),

    #[error("invalid alert rule: {0}")]
    Validation(String),

    #[error(
        "version conflict while updating a record in the database with optimistic locking: alert rule UID {uid} version {version}"
    )]
    OptimisticLock { uid: String, version: i64 },

    #[error("failed to save alert rule '{uid}' in organization {org_id} due to conflict: {source}")]
    UniqueConstraint {
        org_id: i64,
        uid: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to generate unique UID for alert rule '{title}' in organization {org_id}")]
    FailedGenerateUniqueUid { org_id: i64, title: String },

    #[error("lock '{0}' is already held")]
    LockBusy(String),

    #[error("invalid continue token: {0}")]
    InvalidContinueToken(String),

    #[error("operation canceled before completion")]
    Canceled,

    #[error("database error: {0}")]
    Database(#[source] BoxError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuleStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) | Self::InvalidContinueToken(_) => ErrorKind::Validation,
            Self::OptimisticLock { .. } => ErrorKind::OptimisticLock,
            Self::UniqueConstraint { .. } | Self::FailedGenerateUniqueUid { .. } => {
                ErrorKind::Conflict
            }
            Self::LockBusy(_) => ErrorKind::LockBusy,
            Self::Canceled => ErrorKind::Canceled,
            Self::Database(_) => ErrorKind::Database,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-reading the current state and submitting again can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::OptimisticLock | ErrorKind::LockBusy)
    }
}
