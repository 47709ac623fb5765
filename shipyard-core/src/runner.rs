//! Job and runner contracts
//!
//! A [`JobRunner`] binds one [`JobSpec`] to one backend execution. A [`Job`]
//! is a kind of job that knows how to drive itself to completion, normally by
//! delegating to a runner.

use async_trait::async_trait;

use crate::domain::job::JobSpec;
use crate::domain::result::JobResult;
use crate::domain::state::JobState;
use crate::error::JobError;

/// Drives one job from submission to a terminal state
///
/// All methods take `&self` so a runner shared through an `Arc` can be
/// waited on while its logs are polled from another task.
#[async_trait]
pub trait JobRunner: Send + Sync {
    fn spec(&self) -> &JobSpec;

    fn state(&self) -> JobState;

    /// Validates, translates and submits the job
    ///
    /// Fails with [`JobError::Validation`] before touching the backend when
    /// the name is invalid. Returns once the backend has accepted the
    /// execution, not once it has finished.
    async fn start(&self) -> Result<&Self, JobError>
    where
        Self: Sized;

    /// Waits for a terminal state
    ///
    /// Failures, timeouts and cancellations are reported in the returned
    /// [`JobResult`]. Errors with [`JobError::NotStarted`] before `start`.
    async fn wait(&self) -> Result<JobResult, JobError>;

    /// Log output so far; empty before the execution instance exists
    async fn logs(&self) -> Result<String, JobError>;

    /// Stops the job and resolves pending waits as canceled
    async fn cancel(&self) -> Result<(), JobError>;
}

/// A kind of job that can run itself
#[async_trait]
pub trait Job: Send + Sync {
    fn spec(&self) -> &JobSpec;

    /// Submits the job and waits for its result
    async fn run(&self) -> Result<JobResult, JobError>;

    /// Log output so far; never fails just because the job has not started
    async fn logs(&self) -> Result<String, JobError>;
}
