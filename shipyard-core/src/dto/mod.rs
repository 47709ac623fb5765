//! Data Transfer Objects for backend communication
//!
//! DTOs are the backend-neutral shapes a runner sends to an execution
//! backend, derived from domain types.

pub mod execution;
