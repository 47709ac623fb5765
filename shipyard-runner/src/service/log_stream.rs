//! Log streaming
//!
//! For jobs with `stream_logs` set, a background task follows the execution
//! from the moment the backend reports it running, pulling new log text into
//! the job's [`LogBuffer`] and forwarding each line to tracing. It runs on
//! its own, whether or not anyone is waiting for the job.

use shipyard_core::{ExecutionBackend, ExecutionHandle, ExecutionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::service::log_buffer::LogBuffer;

/// Tracing target job output is forwarded to
pub const JOB_LOG_TARGET: &str = "shipyard::job";

/// Spawns a background task that streams a job's logs
pub fn spawn_log_streamer<B>(
    backend: Arc<B>,
    handle: ExecutionHandle,
    buffer: LogBuffer,
    interval: Duration,
) -> JoinHandle<()>
where
    B: ExecutionBackend + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        let mut running = false;

        loop {
            ticker.tick().await;

            let status = match backend.status(&handle).await {
                Ok(status) => status,
                Err(e) if e.is_not_found() => {
                    debug!("Execution {} is gone, stopping log stream", handle.execution_id);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Failed to get status for {}: {:#}",
                        handle.execution_id, e
                    );
                    continue;
                }
            };

            if status == ExecutionStatus::Pending {
                continue;
            }

            if !running {
                running = true;
                debug!("Streaming logs for {}", handle.execution_id);
            }

            match backend.logs(&handle).await {
                Ok(snapshot) => forward(&handle, &buffer.sync(&snapshot)),
                Err(e) => warn!("Failed to fetch logs for {}: {:#}", handle.execution_id, e),
            }

            if status.is_terminal() {
                debug!("Execution {} finished, log stream done", handle.execution_id);
                break;
            }
        }
    })
}

/// Forwards each line of job output to tracing
pub(crate) fn forward(handle: &ExecutionHandle, text: &str) {
    for line in text.lines() {
        info!(target: JOB_LOG_TARGET, execution = %handle.execution_id, "{}", line);
    }
}
