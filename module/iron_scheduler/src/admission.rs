//! Admission control: a single mutex-guarded counter pair plus a
//! [`tokio::sync::Notify`] standing in for a condition variable.
//!
//! ## Known pitfall
//!
//! Two independent atomics (one for "queued", one for "running") invite a
//! TOCTOU window between "am I under the cap?" and "acquire a slot" — a
//! burst of submissions can all observe room and all proceed, blowing past
//! `MAX_CONCURRENT`. Both counts live behind one [`std::sync::Mutex`]
//! instead, and the admission decision and the queued-count increment
//! happen atomically under that same lock.

use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default, Clone, Copy)]
struct Counts
{
  running: usize,
  queued: usize,
}

/// Couples the combined admission cap (`running + queued`) with the
/// running-only concurrency cap behind one lock.
pub struct AdmissionGate
{
  counts: Mutex< Counts >,
  notify: Notify,
  max_concurrent: usize,
  max_queued: usize,
}

/// Returned by [`AdmissionGate::try_admit`]; dropping it without calling
/// [`Self::enter`] leaks neither the queued slot nor a running permit,
/// since `Drop` always decrements whichever count the ticket still holds.
pub struct AdmissionTicket< 'g >
{
  gate: &'g AdmissionGate,
  state: TicketState,
}

#[derive(PartialEq)]
enum TicketState
{
  Queued,
  Running,
  Released,
}

impl AdmissionGate
{
  pub fn new( max_concurrent: usize, max_queued: usize ) -> Self
  {
    Self
    {
      counts: Mutex::new( Counts::default() ),
      notify: Notify::new(),
      max_concurrent,
      max_queued,
    }
  }

  pub fn max_concurrent( &self ) -> usize
  {
    self.max_concurrent
  }

  pub fn max_queued( &self ) -> usize
  {
    self.max_queued
  }

  /// Atomically test "running + queued < cap" and, if there is room,
  /// reserve a queued slot. `None` means immediate rejection: the caller
  /// never touched a running slot and should return `QueueFull` without
  /// waiting.
  pub fn try_admit( &self ) -> Option< AdmissionTicket< '_ > >
  {
    let mut counts = self.counts.lock().unwrap();
    if counts.running + counts.queued >= self.max_concurrent + self.max_queued
    {
      return None;
    }
    counts.queued += 1;
    Some( AdmissionTicket { gate: self, state: TicketState::Queued } )
  }

  /// Blocks until a running permit is free, then transitions the ticket
  /// from queued to running. Safe to call even if another task raced this
  /// one onto the wait path; each waiter re-checks under the lock on wake.
  async fn acquire_running_slot( &self )
  {
    loop
    {
      {
        let mut counts = self.counts.lock().unwrap();
        if counts.running < self.max_concurrent
        {
          counts.running += 1;
          counts.queued -= 1;
          return;
        }
      }
      self.notify.notified().await;
    }
  }

  fn release_running( &self )
  {
    {
      let mut counts = self.counts.lock().unwrap();
      counts.running -= 1;
    }
    self.notify.notify_waiters();
  }

  #[cfg(test)]
  fn snapshot( &self ) -> ( usize, usize )
  {
    let counts = self.counts.lock().unwrap();
    ( counts.running, counts.queued )
  }
}

impl< 'g > AdmissionTicket< 'g >
{
  /// Wait for a running slot. On every exit path — including the caller
  /// dropping the returned guard early, or a panic unwinding through it —
  /// the running permit is released exactly once.
  pub async fn enter( mut self ) -> RunningGuard< 'g >
  {
    self.gate.acquire_running_slot().await;
    self.state = TicketState::Running;
    RunningGuard { gate: self.gate }
  }
}

impl< 'g > Drop for AdmissionTicket< 'g >
{
  fn drop( &mut self )
  {
    if self.state == TicketState::Queued
    {
      let mut counts = self.gate.counts.lock().unwrap();
      counts.queued -= 1;
    }
  }
}

/// Held for the duration of a running job; releases its permit on drop.
pub struct RunningGuard< 'g >
{
  gate: &'g AdmissionGate,
}

impl< 'g > Drop for RunningGuard< 'g >
{
  fn drop( &mut self )
  {
    self.gate.release_running();
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn try_admit_rejects_once_combined_cap_reached()
  {
    let gate = AdmissionGate::new( 1, 1 );
    let t1 = gate.try_admit();
    assert!( t1.is_some() );
    let t2 = gate.try_admit();
    assert!( t2.is_some() );
    let t3 = gate.try_admit();
    assert!( t3.is_none(), "third admission should be rejected as QueueFull" );
  }

  #[tokio::test]
  async fn running_permit_is_released_on_guard_drop()
  {
    let gate = AdmissionGate::new( 1, 0 );
    {
      let ticket = gate.try_admit().expect( "room for one" );
      let _guard = ticket.enter().await;
      assert_eq!( gate.snapshot(), ( 1, 0 ) );
    }
    assert_eq!( gate.snapshot(), ( 0, 0 ) );

    // A further submission now succeeds — no leaked permit.
    let ticket = gate.try_admit().expect( "permit was released" );
    let _guard = ticket.enter().await;
  }

  #[test]
  fn dropping_a_queued_ticket_without_entering_frees_its_slot()
  {
    let gate = AdmissionGate::new( 1, 1 );
    let t1 = gate.try_admit().unwrap();
    let t2 = gate.try_admit().unwrap();
    drop( t2 );
    assert_eq!( gate.snapshot(), ( 0, 1 ) );
    drop( t1 );
    assert_eq!( gate.snapshot(), ( 0, 0 ) );
  }

  #[tokio::test]
  async fn queued_job_proceeds_once_a_running_slot_frees()
  {
    let gate = AdmissionGate::new( 1, 1 );
    let ticket1 = gate.try_admit().unwrap();
    let guard1 = ticket1.enter().await;

    let ticket2 = gate.try_admit().unwrap();
    let entered = tokio::spawn( async move {
      let _guard2 = ticket2.enter().await;
    } );

    tokio::task::yield_now().await;
    drop( guard1 );

    tokio::time::timeout( std::time::Duration::from_secs( 1 ), entered )
      .await
      .expect( "second job should have entered after the first released its slot" )
      .unwrap();
  }
}
