//! Error types for job execution

use thiserror::Error;

use crate::domain::state::JobState;

/// Result type alias for job operations
pub type Result<T> = std::result::Result<T, JobError>;

/// A job name (or build id) that cannot be used as an identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    Empty,

    #[error("name is {len} bytes long, the maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("invalid character {ch:?} at byte {index}: use lowercase letters, digits and '-'")]
    InvalidCharacter { ch: char, index: usize },

    #[error("name must not start with '-'")]
    LeadingHyphen,

    #[error("name must not end with '-'")]
    TrailingHyphen,
}

/// An invalid mount configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be an absolute path, got '{path}'")]
    RelativeMountPath { field: &'static str, path: String },

    #[error("cache and storage cannot share the mount path '{0}'")]
    SharedMountPath(String),

    #[error("docker socket volume name cannot be empty")]
    EmptyVolumeName,
}

/// Errors reported by an execution backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend refused the execution request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The execution instance does not exist
    #[error("execution not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or misbehaved
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Check if this error means the execution instance is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors surfaced by a job runner
///
/// Jobs that ran and failed, timed out or were canceled are not errors:
/// those outcomes are carried by [`crate::domain::result::JobResult`].
#[derive(Debug, Error)]
pub enum JobError {
    /// The job name is not usable; nothing was sent to the backend
    #[error("invalid job name '{name}': {source}")]
    Validation {
        name: String,
        #[source]
        source: ValidationError,
    },

    /// The backend did not accept the execution request
    #[error("job submission failed: {0}")]
    Submission(#[source] BackendError),

    /// The backend failed while the job was being observed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("job has not been started")]
    NotStarted,

    #[error("job has already been started")]
    AlreadyStarted,

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

impl JobError {
    pub fn validation(name: impl Into<String>, source: ValidationError) -> Self {
        Self::Validation {
            name: name.into(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_submission(&self) -> bool {
        matches!(self, Self::Submission(_))
    }
}
