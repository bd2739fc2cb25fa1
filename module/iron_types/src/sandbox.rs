//! Data model for the sandbox execution substrate: the job a scheduler
//! runs, the outcome it produces, and the request/response shapes the
//! prediction orchestrator exchanges with its caller.

use crate::RunId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single agent execution request handed to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentJob
{
  pub run_id: RunId,
  /// The agent's source code, verbatim, to be materialized as `agent.py`.
  pub code: String,
  /// The input document handed to `agent_main`, materialized as `input.json`.
  pub input: serde_json::Value,
  /// Wall-clock budget for this single execution.
  pub deadline_secs: f64,
  /// Additional environment variables injected into the isolated process,
  /// beyond the fixed `GATEWAY_URL` / `SANDBOX_PROXY_URL` / `RUN_ID` bindings.
  #[serde(default)]
  pub extra_env: HashMap< String, String >,
}

/// The agent's own reported success output, the contents of `output.json`
/// on the `status: "success"` path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutput
{
  pub event_id: String,
  pub prediction: f64,
  #[serde(default)]
  pub reasoning: Option< String >,
}

/// Coarse category distinguishing why a job did not reach a success state,
/// mirroring the shared error taxonomy but without re-deriving the full
/// `Error` payload (the scheduler already classifies at the point of failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind
{
  Timeout,
  ContainerError,
  InvalidOutput,
  AgentError,
  BudgetExceeded,
  QueueFull,
}

/// Terminal result of one `AgentJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobOutcome
{
  Success
  {
    output: AgentOutput,
    total_cost: f64,
  },
  Failure
  {
    kind: FailureKind,
    message: String,
    /// Cost accrued before the job failed; zero for jobs that never reached
    /// the isolation runtime (e.g. `QueueFull`, `InvalidOutput` on empty input).
    partial_cost: f64,
    stdout: Option< String >,
  },
}

impl JobOutcome
{
  pub fn is_success( &self ) -> bool
  {
    matches!( self, Self::Success { .. } )
  }

  pub fn cost( &self ) -> f64
  {
    match self
    {
      Self::Success { total_cost, .. } => *total_cost,
      Self::Failure { partial_cost, .. } => *partial_cost,
    }
  }
}

/// A leaderboard row as returned by the upstream registry client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry
{
  pub miner_uid: u64,
  pub rank: u32,
  pub hotkey: String,
}

/// A single agent code version belonging to a miner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentVersion
{
  pub version_id: String,
  pub miner_uid: u64,
  pub code: String,
}

/// Selection strategy for a prediction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode
{
  /// Run only the top-ranked miner's agent.
  SingleBest,
  /// Run the top-3 miners' agents in parallel and average the successes.
  Quorum,
  /// Run a single caller-specified miner's agent.
  ByUid
  {
    miner_uid: u64,
  },
}

/// A caller's binary-prediction question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest
{
  pub question: String,
  pub resolution_criteria: String,
  #[serde(default)]
  pub resolution_date: Option< String >,
  #[serde(default)]
  pub categories: Vec< String >,
  #[serde(default = "default_mode")]
  pub mode: PredictionMode,
}

fn default_mode() -> PredictionMode
{
  PredictionMode::SingleBest
}

/// One agent's successful prediction, attributed to its miner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult
{
  pub miner_uid: u64,
  pub rank: u32,
  pub version_id: String,
  pub prediction: f64,
  #[serde(default)]
  pub reasoning: Option< String >,
  pub cost: f64,
}

/// One agent's failed execution, attributed to its miner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentFailure
{
  pub miner_uid: u64,
  pub rank: u32,
  pub error: String,
  #[serde(default)]
  pub kind: Option< FailureKind >,
}

/// Top-level response handed back to the prediction caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse
{
  pub status: PredictionStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub prediction: Option< f64 >,
  #[serde(default)]
  pub agent_predictions: Vec< AgentResult >,
  #[serde(default)]
  pub failures: Vec< AgentFailure >,
  pub total_cost: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option< String >,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus
{
  Success,
  Error,
}

impl PredictionResponse
{
  pub fn error( message: impl Into< String > ) -> Self
  {
    Self
    {
      status: PredictionStatus::Error,
      prediction: None,
      agent_predictions: Vec::new(),
      failures: Vec::new(),
      total_cost: 0.0,
      error: Some( message.into() ),
    }
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn job_outcome_cost_reads_either_variant()
  {
    let success = JobOutcome::Success
    {
      output: AgentOutput { event_id: "e".into(), prediction: 0.5, reasoning: None },
      total_cost: 0.03,
    };
    assert_eq!( success.cost(), 0.03 );
    assert!( success.is_success() );

    let failure = JobOutcome::Failure
    {
      kind: FailureKind::Timeout,
      message: "timed out".into(),
      partial_cost: 0.01,
      stdout: None,
    };
    assert_eq!( failure.cost(), 0.01 );
    assert!( !failure.is_success() );
  }

  #[test]
  fn prediction_request_defaults_to_single_best()
  {
    let json = r#"{"question":"q","resolution_criteria":"c"}"#;
    let req: PredictionRequest = serde_json::from_str( json ).unwrap();
    assert_eq!( req.mode, PredictionMode::SingleBest );
  }
}
