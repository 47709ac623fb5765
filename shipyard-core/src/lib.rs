//! Shipyard Core
//!
//! Core types and contracts for running pipeline jobs as isolated containers.
//!
//! This crate contains:
//! - Domain types: job naming rules, job specification, lifecycle, results
//! - DTOs: the execution request handed to backends
//! - Contracts: the backend, job runner and job traits
//!
//! Note: no I/O happens here. Backends and the runner implementation live in
//! `shipyard-runner`.

pub mod backend;
pub mod config;
pub mod domain;
pub mod dto;
pub mod error;
pub mod runner;

pub use backend::{ExecutionBackend, ExecutionHandle, ExecutionStatus};
pub use config::MountConfig;
pub use domain::identity::{
    BuildId, ExecutionId, MAX_EXECUTION_ID_LENGTH, MAX_JOB_NAME_LENGTH, is_valid_name,
    validate_name,
};
pub use domain::job::JobSpec;
pub use domain::result::JobResult;
pub use domain::state::{JobState, Lifecycle};
pub use dto::execution::ExecutionRequest;
pub use error::{BackendError, ConfigError, JobError, ValidationError};
pub use runner::{Job, JobRunner};
