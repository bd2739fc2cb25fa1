//! Prediction orchestration: turns a [`PredictionRequest`] into one or more
//! scheduled agent runs via an [`iron_registry::RegistryClient`] and an
//! [`iron_scheduler::Scheduler`], then folds the results into a single
//! [`PredictionResponse`].
//!
//! Three selection modes mirror the upstream predictor this crate is
//! modeled on: single-best (the top-ranked agent), quorum (top three,
//! averaged), and by-uid (a caller-chosen miner). All three share the same
//! event-data construction and per-agent execution path; only the miner
//! selection and result aggregation differ.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod implementation
{
  use iron_registry::RegistryClient;
  use iron_scheduler::Scheduler;
  use iron_types::
  {
    AgentFailure, AgentJob, AgentResult, JobOutcome, PredictionMode, PredictionRequest,
    PredictionResponse, PredictionStatus, RunId,
  };
  use std::sync::Arc;
  use std::time::Duration;

  /// Configuration for one orchestrator instance.
  #[derive(Debug, Clone)]
  pub struct OrchestratorConfig
  {
    /// Wall-clock budget handed to every agent job.
    pub deadline: Duration,
  }

  impl Default for OrchestratorConfig
  {
    fn default() -> Self
    {
      // Mirrors the upstream predictor's 150s agent budget plus a 30s margin
      // for sandbox provisioning overhead.
      Self { deadline: Duration::from_secs( 180 ) }
    }
  }

  /// Coordinates registry lookups and scheduler submissions to answer one
  /// prediction request. Cheap to clone: both collaborators are `Arc`s.
  pub struct PredictionOrchestrator
  {
    registry: Arc< dyn RegistryClient >,
    scheduler: Arc< Scheduler >,
    config: OrchestratorConfig,
  }

  impl PredictionOrchestrator
  {
    pub fn new( registry: Arc< dyn RegistryClient >, scheduler: Arc< Scheduler >, config: OrchestratorConfig ) -> Self
    {
      Self { registry, scheduler, config }
    }

    /// Dispatches to the mode-specific handler named by `request.mode`.
    pub async fn predict( &self, request: PredictionRequest ) -> PredictionResponse
    {
      match request.mode
      {
        PredictionMode::SingleBest => self.predict_single_best( &request ).await,
        PredictionMode::Quorum => self.predict_quorum( &request ).await,
        PredictionMode::ByUid { miner_uid } => self.predict_by_uid( &request, miner_uid ).await,
      }
    }

    /// Converts a request into the event document agents receive as
    /// `input.json`, minting a fresh event id per call.
    fn build_event_data( &self, request: &PredictionRequest ) -> serde_json::Value
    {
      serde_json::json!(
      {
        "event_id": uuid::Uuid::new_v4().to_string(),
        "title": request.question,
        "description": request.resolution_criteria,
        "cutoff": request.resolution_date,
        "event_metadata": { "topics": request.categories },
      } )
    }

    /// Runs only the top-ranked miner's agent.
    async fn predict_single_best( &self, request: &PredictionRequest ) -> PredictionResponse
    {
      tracing::info!( "running single-best prediction" );

      let entry = match self.registry.miner_by_rank( 0 ).await
      {
        Ok( Some( entry ) ) => entry,
        Ok( None ) => return PredictionResponse::error( "No miners available in leaderboard" ),
        Err( e ) => return PredictionResponse::error( e.to_string() ),
      };

      let event_data = self.build_event_data( request );
      self.single_agent_response( entry.miner_uid, 0, &event_data ).await
    }

    /// Runs a single caller-specified miner's agent.
    async fn predict_by_uid( &self, request: &PredictionRequest, miner_uid: u64 ) -> PredictionResponse
    {
      tracing::info!( miner_uid, "running by-uid prediction" );

      let entry = match self.registry.miner_by_uid( miner_uid ).await
      {
        Ok( Some( entry ) ) => entry,
        Ok( None ) => return PredictionResponse::error( "Miner not found" ),
        Err( e ) => return PredictionResponse::error( e.to_string() ),
      };

      let event_data = self.build_event_data( request );
      self.single_agent_response( entry.miner_uid, entry.rank, &event_data ).await
    }

    async fn single_agent_response( &self, miner_uid: u64, rank: u32, event_data: &serde_json::Value ) -> PredictionResponse
    {
      match run_single_agent( self.registry.clone(), self.scheduler.clone(), self.config.deadline, miner_uid, rank, event_data.clone() ).await
      {
        Ok( result ) => PredictionResponse
        {
          status: PredictionStatus::Success,
          prediction: Some( result.prediction ),
          total_cost: result.cost,
          agent_predictions: vec![ result ],
          failures: Vec::new(),
          error: None,
        },
        Err( failure ) =>
        {
          let mut response = PredictionResponse::error( failure.error.clone() );
          response.failures = vec![ failure ];
          response
        }
      }
    }

    /// Runs the top-3 miners' agents in parallel and averages the successes.
    /// Requires at least two miners to even attempt, and at least two
    /// successes to return a prediction.
    async fn predict_quorum( &self, request: &PredictionRequest ) -> PredictionResponse
    {
      tracing::info!( "running quorum prediction (top 3 agents)" );

      let mut agents = Vec::new();
      for rank in 0..3u32
      {
        match self.registry.miner_by_rank( rank ).await
        {
          Ok( Some( entry ) ) => agents.push( entry ),
          Ok( None ) => break,
          Err( e ) => return PredictionResponse::error( e.to_string() ),
        }
      }

      if agents.len() < 2
      {
        return PredictionResponse::error( format!(
          "Not enough miners available (found {}, need at least 2)",
          agents.len()
        ) );
      }

      let event_data = self.build_event_data( request );

      // Fan out and wait for every agent, regardless of individual outcome —
      // a slow or failing agent must not short-circuit the others.
      let handles: Vec< _ > = agents
        .into_iter()
        .map( | entry |
        {
          let registry = self.registry.clone();
          let scheduler = self.scheduler.clone();
          let deadline = self.config.deadline;
          let event_data = event_data.clone();
          tokio::spawn( async move { run_single_agent( registry, scheduler, deadline, entry.miner_uid, entry.rank, event_data ).await } )
        } )
        .collect();

      let mut successes = Vec::new();
      let mut failures = Vec::new();
      for handle in handles
      {
        match handle.await
        {
          Ok( Ok( result ) ) => successes.push( result ),
          Ok( Err( failure ) ) => failures.push( failure ),
          Err( join_error ) =>
          {
            tracing::error!( error = %join_error, "agent task panicked" );
          }
        }
      }

      let total_cost: f64 = successes.iter().map( | r | r.cost ).sum();

      if successes.len() < 2
      {
        return PredictionResponse
        {
          status: PredictionStatus::Error,
          prediction: None,
          error: Some( format!(
            "Not enough successful predictions ({}/3, need at least 2)",
            successes.len()
          ) ),
          total_cost,
          agent_predictions: successes,
          failures,
        };
      }

      let mean = successes.iter().map( | r | r.prediction ).sum::< f64 >() / successes.len() as f64;

      PredictionResponse
      {
        status: PredictionStatus::Success,
        prediction: Some( mean ),
        agent_predictions: successes,
        failures,
        total_cost,
        error: None,
      }
    }
  }

  /// Runs one miner's agent end to end: registry lookup, job submission,
  /// classification into a result or a failure. Never returns both or
  /// neither. Free-standing (rather than a method) so quorum mode can fan
  /// this out via `tokio::spawn`, which requires `'static` arguments.
  async fn run_single_agent(
    registry: Arc< dyn RegistryClient >,
    scheduler: Arc< Scheduler >,
    deadline: Duration,
    miner_uid: u64,
    rank: u32,
    event_data: serde_json::Value,
  ) -> Result< AgentResult, AgentFailure >
  {
    let agent = match registry.latest_runnable_agent( miner_uid ).await
    {
      Ok( Some( agent ) ) => agent,
      Ok( None ) =>
      {
        tracing::warn!( miner_uid, "no agent code available" );
        return Err( AgentFailure { miner_uid, rank, error: format!( "No agent code available for miner {miner_uid}" ), kind: None } );
      }
      Err( e ) =>
      {
        return Err( AgentFailure { miner_uid, rank, error: e.to_string(), kind: None } );
      }
    };

    let version_id = agent.version_id;
    let job = AgentJob
    {
      run_id: RunId::generate(),
      code: agent.code,
      input: event_data,
      deadline_secs: deadline.as_secs_f64(),
      extra_env: std::collections::HashMap::new(),
    };

    match scheduler.submit( job ).await
    {
      JobOutcome::Success { output, total_cost } =>
      {
        Ok( AgentResult { miner_uid, rank, version_id, prediction: output.prediction, reasoning: output.reasoning, cost: total_cost } )
      }
      JobOutcome::Failure { kind, message, .. } => Err( AgentFailure { miner_uid, rank, error: message, kind: Some( kind ) } ),
    }
  }
}

#[cfg(feature = "enabled")]
pub use implementation::{OrchestratorConfig, PredictionOrchestrator};
