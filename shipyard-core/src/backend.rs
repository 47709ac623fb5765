//! Execution backend boundary
//!
//! A backend turns an [`ExecutionRequest`] into a live execution instance
//! (a container, a pod) and reports on it. Scheduling, secret resolution and
//! storage provisioning all happen behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::identity::ExecutionId;
use crate::dto::execution::ExecutionRequest;
use crate::error::BackendError;

/// Handle to an execution instance accepted by a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,

    /// Backend-native identifier (container id, pod uid)
    pub backend_ref: String,
}

/// Status of an execution instance as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Accepted but not running yet
    Pending,
    Running,
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed { .. }
        )
    }
}

/// Container orchestration collaborator
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submits a request; returns once the backend has accepted it
    async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionHandle, BackendError>;

    async fn status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, BackendError>;

    /// Log text produced so far
    async fn logs(&self, handle: &ExecutionHandle) -> Result<String, BackendError>;

    /// Stops the execution instance; the backend kills the process
    async fn terminate(&self, handle: &ExecutionHandle) -> Result<(), BackendError>;

    /// Frees whatever the backend keeps for a finished execution
    async fn release(&self, handle: &ExecutionHandle) -> Result<(), BackendError>;
}
