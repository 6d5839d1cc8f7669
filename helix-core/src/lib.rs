//! Core domain types for Helix
//!
//! Shared between the manager (persists, orchestrates) and the connectors
//! (stage, submit, poll, retrieve). Persistence lives in `helix-manager`,
//! execution in `helix-connector`.

pub mod event;
pub mod job;

pub use event::JobEvent;
pub use job::{Job, JobStatus, JobType};
