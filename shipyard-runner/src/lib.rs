//! Shipyard runner
//!
//! Runs [`shipyard_core::JobSpec`]s as containers. The runner validates and
//! submits each job to an execution backend, follows it to a terminal state
//! and collects its logs.
//!
//! Backends:
//! - [`backend::PodmanBackend`]: local containers through the podman CLI
//! - [`backend::InMemoryBackend`]: scripted executions for tests and dry runs

pub mod backend;
pub mod config;
pub mod job;
pub mod runner;
pub mod service;

pub use config::{Config, PodmanConfig};
pub use job::ContainerJob;
pub use runner::ContainerJobRunner;
