//! Service layer
//!
//! Services hold the runner's supporting logic around a job execution:
//! buffering log text and streaming it while the job runs.

pub mod log_buffer;
pub mod log_stream;

pub use log_buffer::LogBuffer;
pub use log_stream::{JOB_LOG_TARGET, spawn_log_streamer};
