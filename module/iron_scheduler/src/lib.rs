//! Sandbox scheduler: admission control, concurrency capping, and
//! execution of isolated agent jobs.
//!
//! The scheduler couples three pieces: an [`admission::AdmissionGate`]
//! (bounded running+queued capacity), an [`isolation::IsolationRuntime`]
//! (the pluggable execution mechanism), and a shared `iron_cost::CostLedger`
//! (read after the job terminates to attach its final cost). See
//! [`scheduler::Scheduler`] for the orchestration of all three.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod admission;
#[cfg(feature = "enabled")]
pub mod isolation;
#[cfg(feature = "enabled")]
mod scheduler;

#[cfg(feature = "enabled")]
pub use isolation::{IsolationRuntime, ProcessIsolationRuntime, ResourceCaps, RuntimeOutcome};
#[cfg(feature = "enabled")]
pub use scheduler::{Scheduler, SchedulerConfig};
