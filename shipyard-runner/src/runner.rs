//! Container job runner
//!
//! [`ContainerJobRunner`] binds one [`JobSpec`] to one execution on an
//! [`ExecutionBackend`]. It validates and submits the job, then polls the
//! backend until the job reaches a terminal state, enforcing the job timeout
//! and the startup guard and honoring cancellation.

use async_trait::async_trait;
use shipyard_core::{
    ExecutionBackend, ExecutionHandle, ExecutionId, ExecutionRequest, ExecutionStatus, JobError,
    JobResult, JobRunner, JobSpec, JobState, Lifecycle,
};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::service::log_stream::forward;
use crate::service::{LogBuffer, spawn_log_streamer};

/// Consecutive not-found status replies before the execution counts as lost
const MISSING_STATUS_LIMIT: u32 = 3;

/// Roughly thirty years; stands in for timeouts too large to add to an instant
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn far_add(instant: Instant, timeout: Duration) -> Instant {
    instant
        .checked_add(timeout)
        .unwrap_or_else(|| instant + FAR_FUTURE)
}

/// Runs a job as a container on an execution backend
///
/// Each runner owns at most one execution. Share it through an `Arc` to wait
/// on it while polling its logs from another task.
pub struct ContainerJobRunner<B: ?Sized> {
    spec: Arc<JobSpec>,
    backend: Arc<B>,
    config: Config,
    lifecycle: Mutex<Lifecycle>,
    handle: OnceLock<ExecutionHandle>,
    logs: LogBuffer,
    streamer: Mutex<Option<JoinHandle<()>>>,

    /// Held for the whole of a wait so concurrent waits share one result
    result: AsyncMutex<Option<JobResult>>,

    cancel_tx: watch::Sender<bool>,
    submitted_at: OnceLock<Instant>,
    running_since: OnceLock<Instant>,
}

impl<B> ContainerJobRunner<B>
where
    B: ExecutionBackend + ?Sized + 'static,
{
    pub fn new(spec: impl Into<Arc<JobSpec>>, backend: Arc<B>, config: Config) -> Self {
        let (cancel_tx, _) = watch::channel(false);

        Self {
            spec: spec.into(),
            backend,
            config,
            lifecycle: Mutex::new(Lifecycle::new()),
            handle: OnceLock::new(),
            logs: LogBuffer::new(),
            streamer: Mutex::new(None),
            result: AsyncMutex::new(None),
            cancel_tx,
            submitted_at: OnceLock::new(),
            running_since: OnceLock::new(),
        }
    }

    /// State and phase timestamps
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.lock().unwrap().clone()
    }

    /// Execution id, once the job has been started
    pub fn execution_id(&self) -> Option<&ExecutionId> {
        self.spec.execution_id()
    }

    /// Handle of the accepted execution
    pub fn handle(&self) -> Option<&ExecutionHandle> {
        self.handle.get()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn transition(&self, next: JobState) -> Result<(), JobError> {
        self.lifecycle.lock().unwrap().transition(next)
    }

    fn mark_running(&self, handle: &ExecutionHandle) -> Result<(), JobError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();

        if lifecycle.state() == JobState::Starting {
            lifecycle.transition(JobState::Running)?;
            let _ = self.running_since.set(Instant::now());
            info!("Job {} is running", handle.execution_id);
        }

        Ok(())
    }

    /// When the current phase runs out, and whether that is the job timeout
    fn deadline(&self) -> (Instant, bool) {
        match self.running_since.get() {
            Some(since) => (far_add(*since, self.spec.timeout()), true),
            None => {
                let submitted = self.submitted_at.get().copied().unwrap_or_else(Instant::now);
                (far_add(submitted, self.config.startup_timeout), false)
            }
        }
    }

    /// Polls the backend until the job finishes, times out or is canceled
    async fn observe(&self, handle: &ExecutionHandle) -> Result<JobResult, JobError> {
        let name = self.spec.name();
        let id = &handle.execution_id;

        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut ticker = time::interval(self.config.poll_interval);
        let mut missing = 0;

        loop {
            if *cancel_rx.borrow_and_update() {
                return Ok(JobResult::canceled(name, id.clone()));
            }

            let (deadline, running) = self.deadline();

            tokio::select! {
                _ = ticker.tick() => {}
                _ = time::sleep_until(deadline) => {
                    return Ok(self.time_out(handle, running).await);
                }
                _ = cancel_rx.changed() => continue,
            }

            // A stalled status call must not outlive the deadline
            let status = tokio::select! {
                status = self.backend.status(handle) => status,
                _ = time::sleep_until(deadline) => {
                    return Ok(self.time_out(handle, running).await);
                }
                _ = cancel_rx.changed() => continue,
            };

            let status = match status {
                Ok(status) => {
                    missing = 0;
                    status
                }
                Err(e) if e.is_not_found() => {
                    missing += 1;
                    if missing >= MISSING_STATUS_LIMIT {
                        return Ok(JobResult::failed(
                            name,
                            id.clone(),
                            None,
                            format!("execution instance disappeared: {}", e),
                        ));
                    }
                    warn!("Job {} not found ({}/{})", id, missing, MISSING_STATUS_LIMIT);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to get status for {}: {}", id, e);
                    continue;
                }
            };

            // Termination requested by cancel shows up as a failure
            if status.is_terminal() && *cancel_rx.borrow() {
                return Ok(JobResult::canceled(name, id.clone()));
            }

            match status {
                ExecutionStatus::Pending => debug!("Job {} is pending", id),
                ExecutionStatus::Running => self.mark_running(handle)?,
                ExecutionStatus::Succeeded => {
                    return Ok(JobResult::succeeded(name, id.clone()));
                }
                ExecutionStatus::Failed { exit_code, message } => {
                    return Ok(JobResult::failed(name, id.clone(), exit_code, message));
                }
            }
        }
    }

    async fn time_out(&self, handle: &ExecutionHandle, running: bool) -> JobResult {
        let message = if running {
            format!("job exceeded its timeout of {:?}", self.spec.timeout())
        } else {
            format!(
                "job did not start within the startup timeout of {:?}",
                self.config.startup_timeout
            )
        };

        warn!("Job {} timed out: {}", handle.execution_id, message);

        if let Err(e) = self.backend.terminate(handle).await {
            warn!("Failed to terminate {}: {}", handle.execution_id, e);
        }

        JobResult::timed_out(self.spec.name(), handle.execution_id.clone(), message)
    }

    /// Captures final logs, releases the execution and records the outcome
    async fn finish(&self, handle: &ExecutionHandle, result: JobResult) -> JobResult {
        let streamer = self.streamer.lock().unwrap().take();
        if let Some(task) = streamer {
            task.abort();
        }

        match self.backend.logs(handle).await {
            Ok(snapshot) => {
                let added = self.logs.sync(&snapshot);
                if self.spec.stream_logs {
                    forward(handle, &added);
                }
            }
            Err(e) => debug!("No final logs for {}: {}", handle.execution_id, e),
        }

        if let Err(e) = self.backend.release(handle).await {
            warn!("Failed to release {}: {}", handle.execution_id, e);
        }

        let result = match self.submitted_at.get() {
            Some(submitted) => result.with_elapsed(submitted.elapsed()),
            None => result,
        };

        if let Err(e) = self.transition(result.state()) {
            warn!("Job {}: {}", handle.execution_id, e);
        }

        if result.is_success() {
            info!("{}", result);
        } else {
            warn!("{}", result);
        }

        result
    }
}

#[async_trait]
impl<B> JobRunner for ContainerJobRunner<B>
where
    B: ExecutionBackend + ?Sized + 'static,
{
    fn spec(&self) -> &JobSpec {
        &self.spec
    }

    fn state(&self) -> JobState {
        self.lifecycle.lock().unwrap().state()
    }

    async fn start(&self) -> Result<&Self, JobError> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if lifecycle.state() != JobState::Created {
                return Err(JobError::AlreadyStarted);
            }
            self.spec.validate()?;
            lifecycle.transition(JobState::Starting)?;
        }

        let execution_id = self
            .spec
            .assign_execution_id(ExecutionId::new(self.spec.name(), &self.config.build_id))
            .clone();

        if self.spec.is_security_sensitive() {
            warn!(
                "Job {} runs privileged with the container engine socket mounted",
                execution_id
            );
        }

        let request = ExecutionRequest::from_spec(
            &self.spec,
            execution_id.clone(),
            &self.config.build_id,
            &self.config.mounts,
        );

        info!("Submitting job {} as {}", self.spec.name(), execution_id);
        let _ = self.submitted_at.set(Instant::now());

        match self.backend.submit(&request).await {
            Ok(handle) => {
                debug!("Job {} accepted as {}", execution_id, handle.backend_ref);

                if self.spec.stream_logs {
                    let task = spawn_log_streamer(
                        Arc::clone(&self.backend),
                        handle.clone(),
                        self.logs.clone(),
                        self.config.log_stream_interval,
                    );
                    *self.streamer.lock().unwrap() = Some(task);
                }

                let _ = self.handle.set(handle);
                Ok(self)
            }
            Err(e) => {
                error!("Failed to submit job {}: {}", execution_id, e);

                self.transition(JobState::Failed)?;
                *self.result.lock().await = Some(JobResult::failed(
                    self.spec.name(),
                    execution_id,
                    None,
                    format!("submission failed: {}", e),
                ));

                Err(JobError::Submission(e))
            }
        }
    }

    async fn wait(&self) -> Result<JobResult, JobError> {
        let mut slot = self.result.lock().await;
        if let Some(ref result) = *slot {
            return Ok(result.clone());
        }

        let handle = self.handle.get().ok_or(JobError::NotStarted)?;

        let result = self.observe(handle).await?;
        let result = self.finish(handle, result).await;

        *slot = Some(result.clone());
        Ok(result)
    }

    async fn logs(&self) -> Result<String, JobError> {
        let Some(handle) = self.handle.get() else {
            return Ok(String::new());
        };

        if self.spec.stream_logs || self.state().is_terminal() {
            return Ok(self.logs.snapshot());
        }

        match self.backend.logs(handle).await {
            Ok(snapshot) => {
                self.logs.sync(&snapshot);
                Ok(snapshot)
            }
            // Released between the state check and the fetch
            Err(e) if e.is_not_found() => Ok(self.logs.snapshot()),
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel(&self) -> Result<(), JobError> {
        let handle = self.handle.get().ok_or(JobError::NotStarted)?;

        if self.state().is_terminal() {
            return Ok(());
        }

        info!("Canceling job {}", handle.execution_id);
        self.cancel_tx.send_replace(true);

        if let Err(e) = self.backend.terminate(handle).await {
            warn!("Failed to terminate {}: {}", handle.execution_id, e);
        }

        // Nobody is waiting, so record the outcome here
        if let Ok(mut slot) = self.result.try_lock() {
            if slot.is_none() {
                let canceled = JobResult::canceled(self.spec.name(), handle.execution_id.clone());
                *slot = Some(self.finish(handle, canceled).await);
            }
        }

        Ok(())
    }
}

impl<B: ?Sized> fmt::Debug for ContainerJobRunner<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerJobRunner")
            .field("job", &self.spec.name())
            .field("execution_id", &self.spec.execution_id())
            .field("state", &self.lifecycle.lock().map(|l| l.state()).ok())
            .finish_non_exhaustive()
    }
}

impl<B: ?Sized> Drop for ContainerJobRunner<B> {
    fn drop(&mut self) {
        if let Ok(streamer) = self.streamer.get_mut() {
            if let Some(task) = streamer.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{Behavior, InMemoryBackend, TERMINATED_EXIT_CODE};
    use shipyard_core::{BackendError, BuildId, ValidationError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// One reply of a [`ScriptedBackend`] status call
    #[derive(Debug, Clone)]
    enum Reply {
        Status(ExecutionStatus),
        Delayed(Duration, ExecutionStatus),
        Unavailable,
        Missing,
        Stall,
    }

    /// Backend whose status calls follow a script; the last reply repeats
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        terminated: AtomicBool,
    }

    impl ScriptedBackend {
        fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                terminated: AtomicBool::new(false),
            }
        }

        fn next_reply(&self) -> Reply {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
    }

    #[async_trait]
    impl ExecutionBackend for ScriptedBackend {
        async fn submit(
            &self,
            request: &ExecutionRequest,
        ) -> Result<ExecutionHandle, BackendError> {
            Ok(ExecutionHandle {
                execution_id: request.execution_id.clone(),
                backend_ref: "scripted".to_string(),
            })
        }

        async fn status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, BackendError> {
            match self.next_reply() {
                Reply::Status(status) => Ok(status),
                Reply::Delayed(delay, status) => {
                    time::sleep(delay).await;
                    Ok(status)
                }
                Reply::Unavailable => Err(BackendError::unavailable("blip")),
                Reply::Missing => Err(BackendError::NotFound(handle.execution_id.to_string())),
                Reply::Stall => std::future::pending().await,
            }
        }

        async fn logs(&self, _handle: &ExecutionHandle) -> Result<String, BackendError> {
            Ok(String::new())
        }

        async fn terminate(&self, _handle: &ExecutionHandle) -> Result<(), BackendError> {
            self.terminated.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn release(&self, _handle: &ExecutionHandle) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn scripted_runner(
        spec: JobSpec,
        replies: impl IntoIterator<Item = Reply>,
    ) -> (ContainerJobRunner<ScriptedBackend>, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(replies));
        let runner = ContainerJobRunner::new(spec, Arc::clone(&backend), fast_config());
        (runner, backend)
    }

    fn fast_config() -> Config {
        Config::new(BuildId::parse("b1").unwrap())
            .with_poll_interval(Duration::from_millis(5))
            .with_log_stream_interval(Duration::from_millis(5))
            .with_startup_timeout(Duration::from_secs(5))
    }

    fn runner(
        spec: JobSpec,
        backend: &Arc<InMemoryBackend>,
    ) -> ContainerJobRunner<InMemoryBackend> {
        ContainerJobRunner::new(spec, Arc::clone(backend), fast_config())
    }

    fn hang(output: &str) -> Behavior {
        Behavior::Hang {
            output: output.to_string(),
        }
    }

    #[tokio::test]
    async fn test_simple_job_succeeds() {
        let backend = Arc::new(InMemoryBackend::new());
        let spec = JobSpec::new("build-1")
            .with_image("alpine:3.18")
            .with_tasks(["echo hi"]);
        let runner = runner(spec, &backend);

        let result = runner.start().await.unwrap().wait().await.unwrap();

        assert!(result.is_success());
        assert!(result.to_string().contains("succeeded"));
        assert_eq!(runner.state(), JobState::Succeeded);
        assert!(result.execution_id().as_str().starts_with("build-1-"));

        let submitted = backend.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].image, "alpine:3.18");
        assert_eq!(submitted[0].command[2], "set -e\necho hi");
        assert!(backend.was_released(result.execution_id()));
    }

    #[tokio::test]
    async fn test_invalid_name_never_reaches_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let runner = runner(JobSpec::new("Bad_Name!"), &backend);

        let err = runner.start().await.unwrap_err();

        match err {
            JobError::Validation { name, source } => {
                assert_eq!(name, "Bad_Name!");
                assert_eq!(source, ValidationError::InvalidCharacter { ch: 'B', index: 0 });
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
        assert_eq!(backend.submission_count(), 0);
        assert_eq!(runner.state(), JobState::Created);
        assert!(runner.execution_id().is_none());
    }

    #[tokio::test]
    async fn test_job_failure_carries_exit_code() {
        let backend = Arc::new(InMemoryBackend::with_behavior(Behavior::Fail {
            after: Duration::from_millis(10),
            exit_code: 2,
            message: "make failed".to_string(),
            output: "error: missing file\n".to_string(),
        }));
        let runner = runner(JobSpec::new("compile"), &backend);

        let result = runner.start().await.unwrap().wait().await.unwrap();

        assert_eq!(result.state(), JobState::Failed);
        assert_eq!(result.exit_code(), Some(2));
        assert_eq!(result.message(), Some("make failed"));
        assert_eq!(runner.logs().await.unwrap(), "error: missing file\n");
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_timed_out() {
        let backend = Arc::new(InMemoryBackend::with_behavior(hang("")));
        let spec = JobSpec::new("slow").with_timeout(Duration::from_millis(100));
        let runner = runner(spec, &backend);

        let started = Instant::now();
        let result = runner.start().await.unwrap().wait().await.unwrap();
        let took = started.elapsed();

        assert_eq!(result.state(), JobState::TimedOut);
        assert!(!result.to_string().contains("failed"));
        assert!(took >= Duration::from_millis(100));
        assert!(took < Duration::from_secs(2));
        assert!(backend.was_terminated(result.execution_id()));
        assert_eq!(runner.state(), JobState::TimedOut);
    }

    #[tokio::test]
    async fn test_startup_timeout_for_stuck_job() {
        let backend = Arc::new(InMemoryBackend::with_behavior(Behavior::StayPending));
        let config = fast_config().with_startup_timeout(Duration::from_millis(50));
        let runner = ContainerJobRunner::new(JobSpec::new("stuck"), Arc::clone(&backend), config);

        let result = runner.start().await.unwrap().wait().await.unwrap();

        assert_eq!(result.state(), JobState::TimedOut);
        assert!(result.message().unwrap().contains("did not start"));
        assert!(runner.lifecycle().running_at().is_none());
    }

    #[tokio::test]
    async fn test_logs_before_start_are_empty() {
        let backend = Arc::new(InMemoryBackend::new());
        let runner = runner(JobSpec::new("build-1"), &backend);

        assert_eq!(runner.logs().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_wait_and_cancel_before_start() {
        let backend = Arc::new(InMemoryBackend::new());
        let runner = runner(JobSpec::new("build-1"), &backend);

        assert!(matches!(runner.wait().await, Err(JobError::NotStarted)));
        assert!(matches!(runner.cancel().await, Err(JobError::NotStarted)));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let backend = Arc::new(InMemoryBackend::with_behavior(hang("")));
        let runner = runner(JobSpec::new("build-1"), &backend);

        runner.start().await.unwrap();
        assert!(matches!(runner.start().await, Err(JobError::AlreadyStarted)));
        assert_eq!(backend.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_submission_fails_the_job() {
        let backend = Arc::new(InMemoryBackend::with_behavior(Behavior::Reject(
            "image not found".to_string(),
        )));
        let runner = runner(JobSpec::new("build-1"), &backend);

        let err = runner.start().await.unwrap_err();
        assert!(err.is_submission());
        assert_eq!(runner.state(), JobState::Failed);

        let result = runner.wait().await.unwrap();
        assert_eq!(result.state(), JobState::Failed);
        assert!(result.message().unwrap().contains("image not found"));
    }

    #[tokio::test]
    async fn test_cancel_resolves_pending_wait() {
        let backend = Arc::new(InMemoryBackend::with_behavior(hang("")));
        let runner = Arc::new(runner(JobSpec::new("build-1"), &backend));
        runner.start().await.unwrap();

        let waiter = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.wait().await })
        };

        time::sleep(Duration::from_millis(30)).await;
        runner.cancel().await.unwrap();

        let result = time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("wait should resolve after cancel")
            .unwrap()
            .unwrap();

        assert_eq!(result.state(), JobState::Canceled);
        assert_eq!(runner.state(), JobState::Canceled);
        assert!(backend.was_terminated(result.execution_id()));

        // Cancel after the end is a no-op
        runner.cancel().await.unwrap();
        assert_eq!(runner.wait().await.unwrap(), result);
    }

    #[tokio::test]
    async fn test_cancel_without_waiter() {
        let backend = Arc::new(InMemoryBackend::with_behavior(hang("")));
        let runner = runner(JobSpec::new("build-1"), &backend);
        runner.start().await.unwrap();

        runner.cancel().await.unwrap();

        assert_eq!(runner.state(), JobState::Canceled);
        assert_eq!(runner.wait().await.unwrap().state(), JobState::Canceled);
    }

    #[tokio::test]
    async fn test_terminated_exit_code_is_not_a_timeout() {
        // A job killed from outside reports as a plain failure
        let backend = Arc::new(InMemoryBackend::with_behavior(hang("")));
        let runner = runner(JobSpec::new("build-1"), &backend);
        runner.start().await.unwrap();

        backend.terminate(runner.handle().unwrap()).await.unwrap();
        let result = runner.wait().await.unwrap();

        assert_eq!(result.state(), JobState::Failed);
        assert_eq!(result.exit_code(), Some(TERMINATED_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_streamed_logs_are_captured() {
        let backend = Arc::new(InMemoryBackend::with_behavior(Behavior::Succeed {
            after: Duration::from_millis(30),
            output: "step 1\nstep 2\n".to_string(),
        }));
        let mut spec = JobSpec::new("stream");
        spec.stream_logs = true;
        let runner = runner(spec, &backend);

        runner.start().await.unwrap();
        let result = runner.wait().await.unwrap();

        assert!(result.is_success());
        assert_eq!(runner.logs().await.unwrap(), "step 1\nstep 2\n");
    }

    #[tokio::test]
    async fn test_logs_while_running_come_from_backend() {
        let backend = Arc::new(InMemoryBackend::with_behavior(hang("working\n")));
        let runner = runner(JobSpec::new("build-1"), &backend);
        runner.start().await.unwrap();

        assert_eq!(runner.logs().await.unwrap(), "working\n");
        runner.cancel().await.unwrap();
        assert_eq!(runner.logs().await.unwrap(), "working\n");
    }

    #[tokio::test]
    async fn test_execution_id_is_stable() {
        let backend = Arc::new(InMemoryBackend::new());
        let spec = Arc::new(JobSpec::new("build-1"));
        let runner =
            ContainerJobRunner::new(Arc::clone(&spec), Arc::clone(&backend), fast_config());

        runner.start().await.unwrap();
        let id = runner.execution_id().unwrap().clone();

        assert_eq!(id.as_str(), "build-1-b1");
        assert_eq!(spec.execution_id(), Some(&id));

        let result = runner.wait().await.unwrap();
        assert_eq!(result.execution_id(), &id);
        assert_eq!(runner.execution_id(), Some(&id));
    }

    #[tokio::test]
    async fn test_concurrent_wait_and_logs() {
        let backend = Arc::new(InMemoryBackend::with_behavior(Behavior::Succeed {
            after: Duration::from_millis(50),
            output: "done\n".to_string(),
        }));
        let runner = Arc::new(runner(JobSpec::new("build-1"), &backend));
        runner.start().await.unwrap();

        let first = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.wait().await }
        });
        let second = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.wait().await }
        });

        // Logs never block on a pending wait
        let logs = time::timeout(Duration::from_millis(500), runner.logs())
            .await
            .expect("logs should not wait for the job")
            .unwrap();
        assert!(logs.is_empty() || logs == "done\n");

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert!(first.is_success());
    }

    #[tokio::test]
    async fn test_same_job_name_shares_cache_volume() {
        let backend = Arc::new(InMemoryBackend::new());

        for build in ["b1", "b2"] {
            let mut spec = JobSpec::new("deps");
            spec.cache.enabled = true;
            let config = fast_config();
            let config = Config {
                build_id: BuildId::parse(build).unwrap(),
                ..config
            };
            let runner = ContainerJobRunner::new(spec, Arc::clone(&backend), config);
            runner.start().await.unwrap().wait().await.unwrap();
        }

        let submitted = backend.submissions();
        let cache_of = |i: usize| {
            submitted[i]
                .volumes
                .iter()
                .find(|v| v.name == "deps-cache")
                .cloned()
                .unwrap()
        };
        assert_ne!(submitted[0].execution_id, submitted[1].execution_id);
        assert_eq!(cache_of(0).source, cache_of(1).source);
        assert_eq!(cache_of(0).mount_path, cache_of(1).mount_path);
    }

    #[tokio::test]
    async fn test_lifecycle_timestamps() {
        let backend = Arc::new(InMemoryBackend::with_behavior(Behavior::Succeed {
            after: Duration::from_millis(20),
            output: String::new(),
        }));
        let runner = runner(JobSpec::new("build-1"), &backend);
        runner.start().await.unwrap().wait().await.unwrap();

        let lifecycle = runner.lifecycle();
        assert!(lifecycle.started_at().is_some());
        assert!(lifecycle.running_at().is_some());
        assert!(lifecycle.finished_at().is_some());
    }

    #[tokio::test]
    async fn test_stalled_status_still_times_out() {
        let spec = JobSpec::new("stall").with_timeout(Duration::from_millis(100));
        let (runner, backend) =
            scripted_runner(spec, [Reply::Status(ExecutionStatus::Running), Reply::Stall]);
        runner.start().await.unwrap();

        let result = time::timeout(Duration::from_secs(2), runner.wait())
            .await
            .expect("wait should resolve at the job timeout")
            .unwrap();

        assert_eq!(result.state(), JobState::TimedOut);
        assert!(backend.terminated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_transient_status_error_keeps_polling() {
        let (runner, _backend) = scripted_runner(
            JobSpec::new("flaky"),
            [
                Reply::Status(ExecutionStatus::Running),
                Reply::Unavailable,
                Reply::Status(ExecutionStatus::Succeeded),
            ],
        );
        runner.start().await.unwrap();

        let result = runner.wait().await.unwrap();

        assert!(result.is_success());
        assert_eq!(runner.state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_vanished_execution_fails() {
        let (runner, _backend) = scripted_runner(
            JobSpec::new("vanish"),
            [Reply::Status(ExecutionStatus::Running), Reply::Missing],
        );
        runner.start().await.unwrap();

        let result = time::timeout(Duration::from_secs(2), runner.wait())
            .await
            .expect("a lost execution should not wait for the timeout")
            .unwrap();

        assert_eq!(result.state(), JobState::Failed);
        assert!(result.message().unwrap().contains("disappeared"));
    }

    #[tokio::test]
    async fn test_cancel_during_status_call_is_canceled() {
        let killed = ExecutionStatus::Failed {
            exit_code: Some(TERMINATED_EXIT_CODE),
            message: "killed".to_string(),
        };
        let (runner, _backend) = scripted_runner(
            JobSpec::new("slow-status"),
            [
                Reply::Status(ExecutionStatus::Running),
                Reply::Delayed(Duration::from_millis(50), killed),
            ],
        );
        let runner = Arc::new(runner);
        runner.start().await.unwrap();

        let waiter = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.wait().await }
        });

        time::sleep(Duration::from_millis(20)).await;
        runner.cancel().await.unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.state(), JobState::Canceled);
        assert_eq!(runner.state(), JobState::Canceled);
    }

    #[test]
    fn test_debug_names_the_job() {
        let backend = Arc::new(InMemoryBackend::new());
        let runner = runner(JobSpec::new("build-1"), &backend);

        let rendered = format!("{:?}", runner);
        assert!(rendered.contains("build-1"));
        assert!(rendered.contains("Created"));
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let backend = Arc::new(InMemoryBackend::with_behavior(Behavior::Succeed {
            after: Duration::from_millis(20),
            output: String::new(),
        }));
        let spec = JobSpec::new("patient").with_timeout(Duration::MAX);
        let runner = runner(spec, &backend);

        let result = runner.start().await.unwrap().wait().await.unwrap();
        assert!(result.is_success());
    }
}
