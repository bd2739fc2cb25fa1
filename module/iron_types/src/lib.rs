//! Shared types and traits for Iron Cage
//!
//! This crate provides the foundational types used across all iron_cage modules.
//! All types are feature-gated behind the `enabled` feature.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod ids;

#[cfg(feature = "enabled")]
pub use ids::{
  AgentId, ApiTokenId, BudgetRequestId, IcTokenId, IdError, LeaseId, ProjectId, ProviderId,
  RequestId, RunId,
};

#[cfg(feature = "enabled")]
mod types
{
  use serde::{Deserialize, Serialize};
  use thiserror::Error;

  /// Main configuration for Iron Cage runtime
  #[derive(Debug, Clone, Serialize, Deserialize)]
  pub struct Config
  {
    pub safety: SafetyConfig,
    pub cost: CostConfig,
    pub reliability: ReliabilityConfig,
  }

  /// Safety module configuration
  #[derive(Debug, Clone, Serialize, Deserialize, Default)]
  pub struct SafetyConfig
  {
    #[serde(default)]
    pub pii_detection_enabled: bool,
    #[serde(default)]
    pub audit_log_path: Option< String >,
  }

  /// Cost module configuration
  #[derive(Debug, Clone, Serialize, Deserialize)]
  pub struct CostConfig
  {
    pub budget_usd: f64,
    pub alert_threshold: f64,
  }

  /// Reliability module configuration
  #[derive(Debug, Clone, Serialize, Deserialize, Default)]
  pub struct ReliabilityConfig
  {
    #[serde(default)]
    pub circuit_breaker_enabled: bool,
    #[serde(default)]
    pub failure_threshold: u32,
  }

  /// Snapshot of a single service's accumulated cost against its budget,
  /// attached to `Error::BudgetExceeded` so callers can render a full
  /// picture without a second round-trip to the ledger.
  #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
  pub struct ServiceCostSnapshot
  {
    pub current_cost: f64,
    pub budget: f64,
    pub over: bool,
  }

  /// Common error type, covering both the legacy single-global-budget
  /// surface and the full sandbox error taxonomy.
  #[derive(Debug, Error)]
  pub enum Error
  {
    #[error("Safety violation: {0}")]
    Safety(String),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The isolated process did not terminate before its deadline and was killed.
    #[error("Agent timed out after {elapsed_secs:.1}s (deadline {deadline_secs:.1}s)")]
    Timeout
    {
      elapsed_secs: f64,
      deadline_secs: f64,
    },

    /// The isolation runtime itself could not be started or crashed outside
    /// of the agent's own control (e.g. failed to spawn the child process).
    #[error("Container error: {0}")]
    ContainerError(String),

    /// The agent produced no output, malformed output, or output failing
    /// the runner stub's validation rules.
    #[error("Invalid agent output: {0}")]
    InvalidOutput(String),

    /// The agent ran to completion but reported an application-level error.
    #[error("Agent error: {0}")]
    AgentError(String),

    /// A service's per-run budget is already exhausted; the request was
    /// rejected before being forwarded upstream.
    #[error("Budget exceeded for service {service}: {current_cost:.4} > {budget:.4}")]
    ServiceBudgetExceeded
    {
      service: ServiceClass,
      current_cost: f64,
      budget: f64,
      all_services: std::collections::BTreeMap< ServiceClass, ServiceCostSnapshot >,
    },

    /// The scheduler is at its combined running+queued capacity.
    #[error("Server busy. Max {max_concurrent} running, {max_queued} queued.")]
    QueueFull
    {
      max_concurrent: usize,
      max_queued: usize,
    },
  }

  pub type Result< T > = std::result::Result< T, Error >;

  /// Coarse classification of an outbound gateway call, used to key
  /// per-service budgets in the cost ledger.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
  #[serde(rename_all = "lowercase")]
  pub enum ServiceClass
  {
    Chutes,
    Desearch,
    Other,
  }

  impl ServiceClass
  {
    /// Classify a request path by the fixed substring rule: paths containing
    /// `/chutes/` are billed as `Chutes`, `/desearch/` as `Desearch`, anything
    /// else falls back to `Other`.
    pub fn classify( path: &str ) -> Self
    {
      if path.contains( "/chutes/" )
      {
        Self::Chutes
      }
      else if path.contains( "/desearch/" )
      {
        Self::Desearch
      }
      else
      {
        Self::Other
      }
    }

    pub fn as_str( &self ) -> &'static str
    {
      match self
      {
        Self::Chutes => "chutes",
        Self::Desearch => "desearch",
        Self::Other => "other",
      }
    }

    pub fn all() -> [ Self; 3 ]
    {
      [ Self::Chutes, Self::Desearch, Self::Other ]
    }
  }

  impl std::fmt::Display for ServiceClass
  {
    fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      write!( f, "{}", self.as_str() )
    }
  }

  /// Per-service budget caps for a scheduler/proxy instance. Unlisted
  /// services fall back to `default_budget`.
  #[derive(Debug, Clone, Serialize, Deserialize)]
  pub struct BudgetSpec
  {
    pub chutes: f64,
    pub desearch: f64,
    pub other: f64,
  }

  impl BudgetSpec
  {
    pub fn get( &self, service: ServiceClass ) -> f64
    {
      match service
      {
        ServiceClass::Chutes => self.chutes,
        ServiceClass::Desearch => self.desearch,
        ServiceClass::Other => self.other,
      }
    }
  }

  impl Default for BudgetSpec
  {
    fn default() -> Self
    {
      Self { chutes: 0.02, desearch: 0.10, other: 1.00 }
    }
  }
}

#[cfg(feature = "enabled")]
pub use types::*;

#[cfg(feature = "enabled")]
pub mod sandbox;

#[cfg(feature = "enabled")]
pub use sandbox::*;
