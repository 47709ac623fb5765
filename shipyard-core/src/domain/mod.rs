//! Core domain types
//!
//! This module contains the structures describing a job and its execution:
//! naming rules, the declarative specification, the lifecycle state machine
//! and the final result.

pub mod identity;
pub mod job;
pub mod result;
pub mod state;
