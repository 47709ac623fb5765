//! Plain container job

use async_trait::async_trait;
use shipyard_core::{ExecutionBackend, Job, JobError, JobResult, JobRunner, JobSpec};
use std::sync::Arc;

use crate::config::Config;
use crate::runner::ContainerJobRunner;

/// A job that runs its tasks in one container and nothing else
pub struct ContainerJob<B: ?Sized> {
    runner: ContainerJobRunner<B>,
}

impl<B> ContainerJob<B>
where
    B: ExecutionBackend + ?Sized + 'static,
{
    pub fn new(spec: impl Into<Arc<JobSpec>>, backend: Arc<B>, config: Config) -> Self {
        Self {
            runner: ContainerJobRunner::new(spec, backend, config),
        }
    }

    /// The runner driving this job, for cancellation and state inspection
    pub fn runner(&self) -> &ContainerJobRunner<B> {
        &self.runner
    }
}

#[async_trait]
impl<B> Job for ContainerJob<B>
where
    B: ExecutionBackend + ?Sized + 'static,
{
    fn spec(&self) -> &JobSpec {
        self.runner.spec()
    }

    async fn run(&self) -> Result<JobResult, JobError> {
        self.runner.start().await?.wait().await
    }

    async fn logs(&self) -> Result<String, JobError> {
        self.runner.logs().await
    }
}
