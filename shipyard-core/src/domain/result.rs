//! Outcome of one job execution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::identity::ExecutionId;
use crate::domain::state::JobState;

/// Immutable result of a finished execution
///
/// Only a runner creates one. Its rendering always says whether the job
/// succeeded, failed, timed out or was canceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    job_name: String,
    execution_id: ExecutionId,
    state: JobState,
    exit_code: Option<i32>,
    message: Option<String>,
    elapsed: Option<Duration>,
}

impl JobResult {
    pub fn succeeded(job_name: impl Into<String>, execution_id: ExecutionId) -> Self {
        Self::new(job_name, execution_id, JobState::Succeeded).with_exit_code(0)
    }

    /// The job ran and exited unsuccessfully
    pub fn failed(
        job_name: impl Into<String>,
        execution_id: ExecutionId,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(job_name, execution_id, JobState::Failed);
        result.exit_code = exit_code;
        result.message = Some(message.into());
        result
    }

    /// The job did not finish in time
    pub fn timed_out(
        job_name: impl Into<String>,
        execution_id: ExecutionId,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(job_name, execution_id, JobState::TimedOut);
        result.message = Some(message.into());
        result
    }

    pub fn canceled(job_name: impl Into<String>, execution_id: ExecutionId) -> Self {
        Self::new(job_name, execution_id, JobState::Canceled)
    }

    fn new(job_name: impl Into<String>, execution_id: ExecutionId, state: JobState) -> Self {
        Self {
            job_name: job_name.into(),
            execution_id,
            state,
            exit_code: None,
            message: None,
            elapsed: None,
        }
    }

    fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Records how long the job ran
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// Terminal state the job ended in
    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Succeeded
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Backend-provided diagnostic text, if any
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.state {
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed out",
            JobState::Canceled => "canceled",
            // Results are only built for terminal states
            other => return write!(f, "job {} ({}) is {}", self.job_name, self.execution_id, other),
        };

        write!(f, "job {} ({}) {}", self.job_name, self.execution_id, outcome)?;

        if let Some(code) = self.exit_code.filter(|_| self.state != JobState::Succeeded) {
            write!(f, " with exit code {}", code)?;
        }
        if let Some(elapsed) = self.elapsed {
            write!(f, " after {:.1}s", elapsed.as_secs_f64())?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}
