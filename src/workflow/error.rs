//! Errors surfaced by the workflow engine and the overdue reconciler.

use uuid::Uuid;

use crate::store::StoreError;

/// Failure categories that callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Locked,
    Authorization,
    NotPending,
    NotFound,
    Internal,
}

/// Every way a workflow operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Malformed input: missing comment, past-dated deadline, bad placement
    #[error("{0}")]
    Validation(String),
    /// A pending submission exists, or a concurrent writer won
    #[error("{0}")]
    Conflict(String),
    /// The task no longer accepts submissions
    #[error("{0}")]
    Locked(String),
    /// The caller lacks the role or relationship required
    #[error("{0}")]
    Authorization(String),
    #[error("task {0} has no submission awaiting review")]
    NotPending(Uuid),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn task_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "task",
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Locked(_) => ErrorKind::Locked,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::NotPending(_) => ErrorKind::NotPending,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Conflicts may succeed if the caller tries again after refreshing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::VersionConflict { id, .. } => Self::Conflict(format!(
                "task {} was changed by someone else, refresh and try again",
                id
            )),
            other => Self::Store(other),
        }
    }
}
