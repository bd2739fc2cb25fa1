//! Integration tests for the sandbox scheduler against a fake isolation
//! runtime, so these never depend on a real Python interpreter being
//! present on the test host.

use async_trait::async_trait;
use iron_cost::CostLedger;
use iron_scheduler::isolation::{IsolationRuntime, ResourceCaps, RuntimeOutcome};
use iron_scheduler::{Scheduler, SchedulerConfig};
use iron_types::{AgentJob, BudgetSpec, JobOutcome, RunId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Writes a fixed `output.json` and optionally blocks until released, so
/// tests can hold jobs "running" for as long as they need to observe
/// concurrency bounds.
struct FakeRuntime
{
  output: String,
  hold: Option< tokio::sync::Notify >,
  started: Arc< AtomicUsize >,
}

#[async_trait]
impl IsolationRuntime for FakeRuntime
{
  async fn run(
    &self,
    workspace: &Path,
    _env: &HashMap< String, String >,
    _caps: ResourceCaps,
    _deadline: Duration,
  ) -> Result< RuntimeOutcome, iron_types::Error >
  {
    self.started.fetch_add( 1, Ordering::SeqCst );
    if let Some( ref notify ) = self.hold
    {
      notify.notified().await;
    }
    std::fs::write( workspace.join( "output.json" ), &self.output ).unwrap();
    Ok( RuntimeOutcome { timed_out: false, elapsed: Duration::from_millis( 1 ), stdout: String::new() } )
  }
}

fn success_output( prediction: f64 ) -> String
{
  format!( r#"{{"status":"success","output":{{"event_id":"e1","prediction":{prediction}}}}}"# )
}

fn job() -> AgentJob
{
  AgentJob
  {
    run_id: RunId::generate(),
    code: "def agent_main(event): return {}".to_string(),
    input: serde_json::json!({ "event_id": "e1" }),
    deadline_secs: 5.0,
    extra_env: HashMap::new(),
  }
}

fn scheduler( config: SchedulerConfig, runtime: Arc< dyn IsolationRuntime > ) -> Scheduler
{
  let ledger = Arc::new( CostLedger::new( BudgetSpec::default() ) );
  Scheduler::new( config, ledger, runtime, "http://127.0.0.1:0".to_string() )
}

#[tokio::test]
async fn successful_job_reports_prediction_and_releases_ledger()
{
  let runtime = Arc::new( FakeRuntime { output: success_output( 0.75 ), hold: None, started: Arc::new( AtomicUsize::new( 0 ) ) } );
  let scheduler = scheduler( SchedulerConfig::default(), runtime );

  match scheduler.submit( job() ).await
  {
    JobOutcome::Success { output, total_cost } =>
    {
      assert_eq!( output.prediction, 0.75 );
      assert_eq!( total_cost, 0.0 );
    }
    other => panic!( "expected success, got {other:?}" ),
  }
}

#[tokio::test]
async fn queue_full_is_rejected_without_consuming_a_running_slot()
{
  let started = Arc::new( AtomicUsize::new( 0 ) );
  let hold = tokio::sync::Notify::new();
  let runtime = Arc::new( FakeRuntime { output: success_output( 0.5 ), hold: Some( hold ), started: started.clone() } );

  let config = SchedulerConfig { max_concurrent: 1, max_queued: 1, ..SchedulerConfig::default() };
  let scheduler = Arc::new( scheduler( config, runtime ) );

  // Fill the one running slot and the one queue slot with long-blocked jobs.
  let s1 = scheduler.clone();
  let h1 = tokio::spawn( async move { s1.submit( job() ).await } );
  let s2 = scheduler.clone();
  let h2 = tokio::spawn( async move { s2.submit( job() ).await } );

  // Give both a moment to reach "running" / "queued".
  tokio::time::sleep( Duration::from_millis( 50 ) ).await;

  // A third submission must be rejected immediately, not queued.
  let outcome = scheduler.submit( job() ).await;
  match outcome
  {
    JobOutcome::Failure { kind, .. } => assert_eq!( kind, iron_types::FailureKind::QueueFull ),
    other => panic!( "expected QueueFull, got {other:?}" ),
  }

  drop( h1 );
  drop( h2 );
}

#[tokio::test]
async fn semaphore_is_not_leaked_after_a_failing_job()
{
  struct FailingRuntime;

  #[async_trait]
  impl IsolationRuntime for FailingRuntime
  {
    async fn run(
      &self,
      _workspace: &Path,
      _env: &HashMap< String, String >,
      _caps: ResourceCaps,
      _deadline: Duration,
    ) -> Result< RuntimeOutcome, iron_types::Error >
    {
      Err( iron_types::Error::ContainerError( "boom".to_string() ) )
    }
  }

  let config = SchedulerConfig { max_concurrent: 1, max_queued: 0, ..SchedulerConfig::default() };
  let scheduler = scheduler( config, Arc::new( FailingRuntime ) );

  for _ in 0..5
  {
    match scheduler.submit( job() ).await
    {
      JobOutcome::Failure { kind, .. } => assert_eq!( kind, iron_types::FailureKind::ContainerError ),
      other => panic!( "expected failure, got {other:?}" ),
    }
  }
}

#[tokio::test]
async fn invalid_output_json_is_reported_as_invalid_output()
{
  let runtime = Arc::new( FakeRuntime { output: "not json".to_string(), hold: None, started: Arc::new( AtomicUsize::new( 0 ) ) } );
  let scheduler = scheduler( SchedulerConfig::default(), runtime );

  match scheduler.submit( job() ).await
  {
    JobOutcome::Failure { kind, .. } => assert_eq!( kind, iron_types::FailureKind::InvalidOutput ),
    other => panic!( "expected InvalidOutput, got {other:?}" ),
  }
}

#[tokio::test]
async fn empty_code_blob_is_rejected_without_invoking_the_runtime()
{
  let started = Arc::new( AtomicUsize::new( 0 ) );
  let runtime = Arc::new( FakeRuntime { output: success_output( 0.5 ), hold: None, started: started.clone() } );
  let scheduler = scheduler( SchedulerConfig::default(), runtime );

  let mut j = job();
  j.code = String::new();

  match scheduler.submit( j ).await
  {
    JobOutcome::Failure { kind, .. } => assert_eq!( kind, iron_types::FailureKind::InvalidOutput ),
    other => panic!( "expected InvalidOutput, got {other:?}" ),
  }
  assert_eq!( started.load( Ordering::SeqCst ), 0, "runtime must not be invoked for an empty code blob" );
}
