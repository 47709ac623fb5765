//! Execution backends

pub mod memory;
pub mod podman;

pub use memory::{Behavior, InMemoryBackend};
pub use podman::PodmanBackend;
