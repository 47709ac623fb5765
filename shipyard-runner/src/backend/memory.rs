//! In-memory execution backend
//!
//! Runs nothing. Each submitted execution follows a scripted [`Behavior`],
//! and every request, termination and release is recorded so tests and dry
//! runs can inspect what a runner asked for.

use async_trait::async_trait;
use shipyard_core::{
    BackendError, ExecutionBackend, ExecutionHandle, ExecutionId, ExecutionRequest,
    ExecutionStatus,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Exit code reported for executions stopped through `terminate`
pub const TERMINATED_EXIT_CODE: i32 = 137;

/// How a simulated execution behaves once submitted
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Runs for `after`, then exits successfully
    Succeed { after: Duration, output: String },

    /// Runs for `after`, then exits with `exit_code`
    Fail {
        after: Duration,
        exit_code: i32,
        message: String,
        output: String,
    },

    /// Runs until terminated
    Hang { output: String },

    /// Accepted but never scheduled
    StayPending,

    /// Submission is refused
    Reject(String),
}

impl Behavior {
    /// Succeeds immediately with no output
    pub fn succeed() -> Self {
        Self::Succeed {
            after: Duration::ZERO,
            output: String::new(),
        }
    }
}

#[derive(Debug)]
struct Execution {
    behavior: Behavior,
    submitted_at: Instant,
    terminated: bool,
    released: bool,
}

/// Backend that simulates executions in memory
#[derive(Debug)]
pub struct InMemoryBackend {
    default_behavior: Behavior,
    by_job: Mutex<HashMap<String, Behavior>>,
    executions: Mutex<HashMap<ExecutionId, Execution>>,
    submissions: Mutex<Vec<ExecutionRequest>>,
    next_ref: AtomicU64,
}

impl InMemoryBackend {
    /// Creates a backend where every job succeeds immediately
    pub fn new() -> Self {
        Self::with_behavior(Behavior::succeed())
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            default_behavior: behavior,
            by_job: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            next_ref: AtomicU64::new(1),
        }
    }

    /// Overrides the behavior for jobs with the given name
    pub fn set_behavior_for(&self, job_name: impl Into<String>, behavior: Behavior) {
        self.by_job.lock().unwrap().insert(job_name.into(), behavior);
    }

    /// Number of `submit` calls, accepted or not
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    /// Every request submitted so far, in order
    pub fn submissions(&self) -> Vec<ExecutionRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn was_terminated(&self, id: &ExecutionId) -> bool {
        self.executions
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|e| e.terminated)
    }

    pub fn was_released(&self, id: &ExecutionId) -> bool {
        self.executions
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|e| e.released)
    }

    fn behavior_for(&self, request: &ExecutionRequest) -> Behavior {
        request
            .job_name()
            .and_then(|name| self.by_job.lock().unwrap().get(name).cloned())
            .unwrap_or_else(|| self.default_behavior.clone())
    }

    fn with_execution<T>(
        &self,
        handle: &ExecutionHandle,
        f: impl FnOnce(&mut Execution) -> T,
    ) -> Result<T, BackendError> {
        let mut executions = self.executions.lock().unwrap();
        match executions.get_mut(&handle.execution_id) {
            Some(execution) if !execution.released => Ok(f(execution)),
            _ => Err(BackendError::NotFound(handle.execution_id.to_string())),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryBackend {
    async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionHandle, BackendError> {
        self.submissions.lock().unwrap().push(request.clone());

        let behavior = self.behavior_for(request);
        if let Behavior::Reject(reason) = &behavior {
            return Err(BackendError::Rejected(reason.clone()));
        }

        let mut executions = self.executions.lock().unwrap();
        if executions
            .get(&request.execution_id)
            .is_some_and(|e| !e.released)
        {
            return Err(BackendError::rejected(format!(
                "execution {} already exists",
                request.execution_id
            )));
        }

        executions.insert(
            request.execution_id.clone(),
            Execution {
                behavior,
                submitted_at: Instant::now(),
                terminated: false,
                released: false,
            },
        );

        let backend_ref = format!("mem-{}", self.next_ref.fetch_add(1, Ordering::Relaxed));
        debug!("Accepted {} as {}", request.execution_id, backend_ref);

        Ok(ExecutionHandle {
            execution_id: request.execution_id.clone(),
            backend_ref,
        })
    }

    async fn status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, BackendError> {
        self.with_execution(handle, |execution| {
            if execution.terminated {
                return ExecutionStatus::Failed {
                    exit_code: Some(TERMINATED_EXIT_CODE),
                    message: "terminated".to_string(),
                };
            }

            let elapsed = execution.submitted_at.elapsed();
            match &execution.behavior {
                Behavior::Succeed { after, .. } if elapsed >= *after => ExecutionStatus::Succeeded,
                Behavior::Fail {
                    after,
                    exit_code,
                    message,
                    ..
                } if elapsed >= *after => ExecutionStatus::Failed {
                    exit_code: Some(*exit_code),
                    message: message.clone(),
                },
                Behavior::StayPending => ExecutionStatus::Pending,
                _ => ExecutionStatus::Running,
            }
        })
    }

    async fn logs(&self, handle: &ExecutionHandle) -> Result<String, BackendError> {
        self.with_execution(handle, |execution| match &execution.behavior {
            Behavior::Succeed { output, .. }
            | Behavior::Fail { output, .. }
            | Behavior::Hang { output } => output.clone(),
            Behavior::StayPending | Behavior::Reject(_) => String::new(),
        })
    }

    async fn terminate(&self, handle: &ExecutionHandle) -> Result<(), BackendError> {
        self.with_execution(handle, |execution| execution.terminated = true)
    }

    async fn release(&self, handle: &ExecutionHandle) -> Result<(), BackendError> {
        self.with_execution(handle, |execution| execution.released = true)
    }
}
