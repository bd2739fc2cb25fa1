//! The sandbox scheduler: admits, executes, and releases agent jobs.

use crate::admission::AdmissionGate;
use crate::isolation::{IsolationRuntime, ResourceCaps, AGENT_RUNNER_PY};
use iron_cost::CostLedger;
use iron_types::{AgentJob, AgentOutput, Error, FailureKind, JobOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Immutable configuration for one scheduler instance. Loaded via the
/// layered configuration stack (see `SandboxConfig` at the binary
/// boundary); sane defaults here are the crate-default layer.
#[derive(Debug, Clone)]
pub struct SchedulerConfig
{
  pub max_concurrent: usize,
  pub max_queued: usize,
  pub default_deadline: Duration,
  pub resource_caps: ResourceCaps,
}

impl Default for SchedulerConfig
{
  fn default() -> Self
  {
    Self
    {
      max_concurrent: 6,
      max_queued: 6,
      default_deadline: Duration::from_secs( 120 ),
      resource_caps: ResourceCaps::default(),
    }
  }
}

/// Admission-controlled executor of agent jobs. Cheap to clone: the
/// admission gate, ledger, and isolation runtime are all shared via `Arc`.
pub struct Scheduler
{
  config: SchedulerConfig,
  gate: Arc< AdmissionGate >,
  ledger: Arc< CostLedger >,
  runtime: Arc< dyn IsolationRuntime >,
  /// Injected into every job so the agent's gateway calls route through
  /// the same proxy instance whose ledger this scheduler reads from.
  proxy_url: String,
}

impl Scheduler
{
  pub fn new(
    config: SchedulerConfig,
    ledger: Arc< CostLedger >,
    runtime: Arc< dyn IsolationRuntime >,
    proxy_url: String,
  ) -> Self
  {
    let gate = Arc::new( AdmissionGate::new( config.max_concurrent, config.max_queued ) );
    Self { config, gate, ledger, runtime, proxy_url }
  }

  /// Submit a job for execution. Blocks until a running slot is free (or
  /// the combined running+queued cap is already at capacity, in which
  /// case this returns immediately with `Failure(QueueFull)`).
  pub async fn submit( &self, job: AgentJob ) -> JobOutcome
  {
    let Some( ticket ) = self.gate.try_admit() else
    {
      tracing::warn!(
        run_id = %job.run_id,
        max_concurrent = self.config.max_concurrent,
        max_queued = self.config.max_queued,
        "rejecting job: scheduler at capacity"
      );
      return JobOutcome::Failure
      {
        kind: FailureKind::QueueFull,
        message: format!(
          "Server busy. Max {} running, {} queued.",
          self.config.max_concurrent, self.config.max_queued
        ),
        partial_cost: 0.0,
        stdout: None,
      };
    };

    let _guard = ticket.enter().await;
    self.execute( job ).await
  }

  async fn execute( &self, job: AgentJob ) -> JobOutcome
  {
    if job.code.trim().is_empty() || !job.input.is_object()
    {
      return JobOutcome::Failure
      {
        kind: FailureKind::InvalidOutput,
        message: "agent code is empty or input is not a JSON object".to_string(),
        partial_cost: 0.0,
        stdout: None,
      };
    }

    let workspace = match tempfile::tempdir()
    {
      Ok( dir ) => dir,
      Err( e ) =>
      {
        return JobOutcome::Failure
        {
          kind: FailureKind::ContainerError,
          message: format!( "failed to provision workspace: {e}" ),
          partial_cost: 0.0,
          stdout: None,
        };
      }
    };

    if let Err( e ) = materialize_workspace( workspace.path(), &job )
    {
      return JobOutcome::Failure
      {
        kind: FailureKind::ContainerError,
        message: format!( "failed to materialize workspace: {e}" ),
        partial_cost: 0.0,
        stdout: None,
      };
    }

    let mut env = job.extra_env.clone();
    env.insert( "GATEWAY_URL".to_string(), self.proxy_url.clone() );
    env.insert( "SANDBOX_PROXY_URL".to_string(), self.proxy_url.clone() );
    env.insert( "RUN_ID".to_string(), job.run_id.to_string() );

    let deadline = Duration::from_secs_f64( job.deadline_secs ).min( self.config.default_deadline + Duration::from_secs( 5 ) );

    tracing::debug!( run_id = %job.run_id, deadline_secs = deadline.as_secs_f64(), "starting agent run" );

    let run_result = self.runtime.run( workspace.path(), &env, self.config.resource_caps, deadline ).await;

    let outcome = match run_result
    {
      Err( Error::ContainerError( message ) ) =>
      {
        JobOutcome::Failure { kind: FailureKind::ContainerError, message, partial_cost: self.ledger.total( &job.run_id, None ), stdout: None }
      }
      Err( other ) =>
      {
        JobOutcome::Failure { kind: FailureKind::ContainerError, message: other.to_string(), partial_cost: self.ledger.total( &job.run_id, None ), stdout: None }
      }
      Ok( outcome ) if outcome.timed_out =>
      {
        JobOutcome::Failure
        {
          kind: FailureKind::Timeout,
          message: format!( "agent timed out after {:.1}s", outcome.elapsed.as_secs_f64() ),
          partial_cost: self.ledger.total( &job.run_id, None ),
          stdout: Some( outcome.stdout ),
        }
      }
      Ok( outcome ) => self.interpret_output( &job, workspace.path(), outcome.stdout ),
    };

    self.ledger.release( &job.run_id );
    outcome
  }

  /// Read and classify `output.json` per the runner stub's exact
  /// success/error shapes (§6.1); anything else, including a missing or
  /// unparseable file, is `InvalidOutput`.
  fn interpret_output( &self, job: &AgentJob, workspace: &std::path::Path, stdout: String ) -> JobOutcome
  {
    let raw = match std::fs::read( workspace.join( "output.json" ) )
    {
      Ok( bytes ) => bytes,
      Err( _ ) =>
      {
        return JobOutcome::Failure
        {
          kind: FailureKind::InvalidOutput,
          message: "agent produced no output.json".to_string(),
          partial_cost: self.ledger.total( &job.run_id, None ),
          stdout: Some( stdout ),
        };
      }
    };

    match serde_json::from_slice::< RunnerOutput >( &raw )
    {
      Ok( RunnerOutput::Success { output } ) if ( 0.0..=1.0 ).contains( &output.prediction ) =>
      {
        JobOutcome::Success { output, total_cost: self.ledger.total( &job.run_id, None ) }
      }
      Ok( RunnerOutput::Success { output } ) =>
      {
        JobOutcome::Failure
        {
          kind: FailureKind::InvalidOutput,
          message: format!( "prediction {} out of range [0.0, 1.0]", output.prediction ),
          partial_cost: self.ledger.total( &job.run_id, None ),
          stdout: Some( stdout ),
        }
      }
      Ok( RunnerOutput::Error { error, .. } ) =>
      {
        JobOutcome::Failure
        {
          kind: FailureKind::AgentError,
          message: error,
          partial_cost: self.ledger.total( &job.run_id, None ),
          stdout: Some( stdout ),
        }
      }
      Err( e ) =>
      {
        JobOutcome::Failure
        {
          kind: FailureKind::InvalidOutput,
          message: format!( "unparseable output.json: {e}" ),
          partial_cost: self.ledger.total( &job.run_id, None ),
          stdout: Some( stdout ),
        }
      }
    }
  }
}

fn materialize_workspace( workspace: &std::path::Path, job: &AgentJob ) -> std::io::Result< () >
{
  std::fs::write( workspace.join( "agent.py" ), &job.code )?;
  std::fs::write( workspace.join( "input.json" ), serde_json::to_vec( &job.input )? )?;
  std::fs::write( workspace.join( "agent_runner.py" ), AGENT_RUNNER_PY )?;
  Ok( () )
}

#[derive(serde::Deserialize)]
#[serde(tag = "status")]
enum RunnerOutput
{
  #[serde(rename = "success")]
  Success
  {
    output: AgentOutput,
  },
  #[serde(rename = "error")]
  Error
  {
    error: String,
    #[serde(default)]
    traceback: Option< String >,
  },
}
