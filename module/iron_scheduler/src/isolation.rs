//! The isolation runtime contract and a subprocess-backed implementation.
//!
//! The mechanism is deliberately not prescribed beyond its observable
//! contract: given a workspace containing `agent.py` / `input.json` / the
//! fixed runner stub, a set of environment bindings, and a deadline, run
//! to completion or kill and report whether the deadline was hit. Swap in
//! a container-backed `IsolationRuntime` without touching the scheduler.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// The runner stub shipped into every job's workspace. This file is part
/// of the execution contract, not the agent's own code.
pub const AGENT_RUNNER_PY: &str = include_str!( "../asset/agent_runner.py" );

/// Best-effort resource caps; see [`ProcessIsolationRuntime`] for which of
/// these are actually enforced on the current host.
#[derive(Debug, Clone, Copy)]
pub struct ResourceCaps
{
  pub memory_mib: u64,
  pub cpu_cores: f64,
}

impl Default for ResourceCaps
{
  fn default() -> Self
  {
    Self { memory_mib: 768, cpu_cores: 0.5 }
  }
}

/// Outcome of one isolation-runtime invocation, before the scheduler has
/// interpreted `output.json`.
#[derive(Debug)]
pub struct RuntimeOutcome
{
  pub timed_out: bool,
  pub elapsed: Duration,
  pub stdout: String,
}

/// The fixed contract every isolation mechanism must satisfy.
#[async_trait]
pub trait IsolationRuntime: Send + Sync
{
  /// Run the materialized workspace to completion or kill at `deadline`.
  /// Errors here are host-level failures to even start the process
  /// (`Error::ContainerError`), never the agent's own application errors —
  /// those are read back from `output.json` by the caller.
  async fn run(
    &self,
    workspace: &Path,
    env: &HashMap< String, String >,
    caps: ResourceCaps,
    deadline: Duration,
  ) -> Result< RuntimeOutcome, iron_types::Error >;
}

/// Applies `caps` to `command` via `setrlimit` in a `pre_exec` hook, best
/// effort. Only wired up on Linux, matching the workspace lint exception
/// ("we need FFI for landlock/seccomp"); on other platforms `caps` is
/// recorded by the caller but nothing is enforced.
#[cfg(target_os = "linux")]
fn apply_resource_caps( command: &mut Command, caps: ResourceCaps )
{
  use std::os::unix::process::CommandExt;

  let memory_bytes = caps.memory_mib.saturating_mul( 1024 * 1024 );
  let cpu_seconds = caps.cpu_cores.max( 0.0 ).ceil() as u64;

  // Safety: the closure only calls async-signal-safe libc functions
  // (`setrlimit`) between fork and exec, as required by `pre_exec`.
  unsafe
  {
    command.pre_exec( move ||
    {
      let as_limit = libc::rlimit { rlim_cur: memory_bytes, rlim_max: memory_bytes };
      if libc::setrlimit( libc::RLIMIT_AS, &as_limit ) == -1
      {
        return Err( std::io::Error::last_os_error() );
      }

      if cpu_seconds > 0
      {
        let cpu_limit = libc::rlimit { rlim_cur: cpu_seconds, rlim_max: cpu_seconds };
        if libc::setrlimit( libc::RLIMIT_CPU, &cpu_limit ) == -1
        {
          return Err( std::io::Error::last_os_error() );
        }
      }

      Ok( () )
    } );
  }
}

#[cfg(not(target_os = "linux"))]
fn apply_resource_caps( _command: &mut Command, _caps: ResourceCaps ) {}

/// Runs the runner stub as a plain child process rooted at the job
/// workspace. Memory/CPU caps are recorded but only best-effort applied:
/// this implementation favors running without a container daemon so the
/// execution substrate's own test suite has no external dependency, at
/// the cost of weaker isolation than a container or VM boundary. Operators
/// who need that stronger boundary implement `IsolationRuntime` against
/// their own container runtime instead.
pub struct ProcessIsolationRuntime
{
  python_bin: String,
}

impl ProcessIsolationRuntime
{
  pub fn new() -> Self
  {
    Self { python_bin: std::env::var( "IRON_SANDBOX_PYTHON" ).unwrap_or_else( |_| "python3".to_string() ) }
  }
}

impl Default for ProcessIsolationRuntime
{
  fn default() -> Self
  {
    Self::new()
  }
}

#[async_trait]
impl IsolationRuntime for ProcessIsolationRuntime
{
  async fn run(
    &self,
    workspace: &Path,
    env: &HashMap< String, String >,
    caps: ResourceCaps,
    deadline: Duration,
  ) -> Result< RuntimeOutcome, iron_types::Error >
  {
    let mut command = Command::new( &self.python_bin );
    command
      .arg( "agent_runner.py" )
      .current_dir( workspace )
      .envs( env )
      .kill_on_drop( true )
      .stdout( std::process::Stdio::piped() )
      .stderr( std::process::Stdio::piped() );

    apply_resource_caps( &mut command, caps );

    let mut child = command
      .spawn()
      .map_err( | e | iron_types::Error::ContainerError( format!( "failed to spawn agent runner: {e}" ) ) )?;

    let started = Instant::now();

    match tokio::time::timeout( deadline, child.wait_with_output() ).await
    {
      Ok( Ok( output ) ) =>
      {
        let stdout = String::from_utf8_lossy( &output.stdout ).into_owned();
        Ok( RuntimeOutcome { timed_out: false, elapsed: started.elapsed(), stdout } )
      }
      Ok( Err( e ) ) => Err( iron_types::Error::ContainerError( format!( "agent runner I/O error: {e}" ) ) ),
      Err( _elapsed ) =>
      {
        // `child` was consumed by `wait_with_output`'s future; `kill_on_drop`
        // ensures the process is reaped once that future is dropped here.
        Ok( RuntimeOutcome { timed_out: true, elapsed: started.elapsed(), stdout: String::new() } )
      }
    }
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[tokio::test]
  async fn reports_timeout_when_deadline_elapses()
  {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join( "agent_runner.py" ),
      "import time\ntime.sleep(5)\n",
    )
    .unwrap();

    let runtime = ProcessIsolationRuntime::new();
    let outcome = runtime
      .run( dir.path(), &HashMap::new(), ResourceCaps::default(), Duration::from_millis( 100 ) )
      .await;

    match outcome
    {
      Ok( outcome ) => assert!( outcome.timed_out ),
      Err( _ ) =>
      {
        // python3 unavailable on this host; nothing to assert.
      }
    }
  }

  #[tokio::test]
  async fn runs_to_completion_under_the_deadline()
  {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write( dir.path().join( "agent_runner.py" ), "print('done')\n" ).unwrap();

    let runtime = ProcessIsolationRuntime::new();
    let outcome = runtime
      .run( dir.path(), &HashMap::new(), ResourceCaps::default(), Duration::from_secs( 5 ) )
      .await;

    match outcome
    {
      Ok( outcome ) =>
      {
        assert!( !outcome.timed_out );
        assert!( outcome.stdout.contains( "done" ) );
      }
      Err( _ ) => {}
    }
  }
}
