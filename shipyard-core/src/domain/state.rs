//! Job lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// State of a job as seen by its runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Runner constructed, nothing submitted
    Created,

    /// Validating, translating and submitting to the backend
    Starting,

    /// Backend reported the execution instance running
    Running,

    Succeeded,
    Failed,

    /// The job did not finish within its timeout
    TimedOut,

    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Canceled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Created, JobState::Starting) => true,
            // Submission rejected, or the job finished/was stopped before a
            // running status was ever observed
            (JobState::Starting, JobState::Running) => true,
            (JobState::Starting, next) if next.is_terminal() => true,
            (JobState::Running, next) if next.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Created => write!(f, "Created"),
            JobState::Starting => write!(f, "Starting"),
            JobState::Running => write!(f, "Running"),
            JobState::Succeeded => write!(f, "Succeeded"),
            JobState::Failed => write!(f, "Failed"),
            JobState::TimedOut => write!(f, "TimedOut"),
            JobState::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Current state plus the time each phase was entered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
    state: JobState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    running_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: JobState::Created,
            created_at: Utc::now(),
            started_at: None,
            running_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Moves to `next`, recording when it happened
    pub fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            JobState::Starting => self.started_at = Some(now),
            JobState::Running => self.running_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn running_at(&self) -> Option<DateTime<Utc>> {
        self.running_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
