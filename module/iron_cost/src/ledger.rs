//! Per-run, per-service cost ledger backing the Interception Proxy's
//! budget enforcement.
//!
//! Mirrors the pitfall documented at the crate root: DashMap entry locks
//! must never be held while another call walks a different shard. Each row
//! is an `Arc` of three atomics, cloned out from under the map's shard lock
//! immediately, so `charge`/`is_over`/`snapshot` never hold a DashMap guard
//! while touching a row's counters.

use dashmap::DashMap;
use iron_types::{BudgetSpec, RunId, ServiceClass, ServiceCostSnapshot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const MICROS_PER_USD: f64 = 1_000_000.0;

#[derive(Default)]
struct CostRow([AtomicU64; 3]);

impl CostRow
{
  fn index( service: ServiceClass ) -> usize
  {
    match service
    {
      ServiceClass::Chutes => 0,
      ServiceClass::Desearch => 1,
      ServiceClass::Other => 2,
    }
  }
}

/// Thread-safe mapping from run to per-service accumulated cost, keyed in
/// integer microdollars internally to avoid floating-point drift across
/// many small charges from a long-lived agent run.
pub struct CostLedger
{
  budgets: BudgetSpec,
  rows: DashMap< RunId, Arc< CostRow > >,
}

impl CostLedger
{
  pub fn new( budgets: BudgetSpec ) -> Self
  {
    Self { budgets, rows: DashMap::new() }
  }

  fn row( &self, run_id: &RunId ) -> Arc< CostRow >
  {
    self.rows
      .entry( run_id.clone() )
      .or_insert_with( || Arc::new( CostRow::default() ) )
      .clone()
  }

  /// Record `amount` (USD, expected `>= 0`) against `(run_id, service)`,
  /// creating the run's entry lazily. Returns the new per-service total.
  pub fn charge( &self, run_id: &RunId, service: ServiceClass, amount: f64 ) -> f64
  {
    let row = self.row( run_id );
    let micros = ( amount.max( 0.0 ) * MICROS_PER_USD ).round() as u64;
    let idx = CostRow::index( service );
    let new_total = row.0[ idx ].fetch_add( micros, Ordering::SeqCst ) + micros;
    new_total as f64 / MICROS_PER_USD
  }

  /// Per-service total, or the sum across all services if `service` is
  /// `None`. Unknown runs return zero without creating an entry.
  pub fn total( &self, run_id: &RunId, service: Option< ServiceClass > ) -> f64
  {
    let Some( row ) = self.rows.get( run_id ).map( | r | r.clone() ) else { return 0.0 };
    match service
    {
      Some( s ) => row.0[ CostRow::index( s ) ].load( Ordering::SeqCst ) as f64 / MICROS_PER_USD,
      None => row.0.iter().map( | a | a.load( Ordering::SeqCst ) ).sum::< u64 >() as f64 / MICROS_PER_USD,
    }
  }

  /// True iff the named service (or, with `None`, any service) has exceeded
  /// its budget. Unknown runs are never over budget.
  pub fn is_over( &self, run_id: &RunId, service: Option< ServiceClass > ) -> bool
  {
    let Some( row ) = self.rows.get( run_id ).map( | r | r.clone() ) else { return false };
    let over = | s: ServiceClass |
    {
      let spent = row.0[ CostRow::index( s ) ].load( Ordering::SeqCst ) as f64 / MICROS_PER_USD;
      spent > self.budgets.get( s )
    };
    match service
    {
      Some( s ) => over( s ),
      None => ServiceClass::all().into_iter().any( over ),
    }
  }

  /// Per-service cost/budget/over snapshot, used for diagnostics and the
  /// proxy's budget-exceeded response body.
  pub fn snapshot( &self, run_id: &RunId ) -> BTreeMap< ServiceClass, ServiceCostSnapshot >
  {
    ServiceClass::all()
      .into_iter()
      .map( | service |
      {
        let current_cost = self.total( run_id, Some( service ) );
        let budget = self.budgets.get( service );
        ( service, ServiceCostSnapshot { current_cost, budget, over: current_cost > budget } )
      } )
      .collect()
  }

  /// Drop the run's entry entirely. Idempotent.
  pub fn release( &self, run_id: &RunId )
  {
    self.rows.remove( run_id );
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  fn ledger() -> CostLedger
  {
    CostLedger::new( BudgetSpec { chutes: 0.01, desearch: 0.10, other: 1.0 } )
  }

  #[test]
  fn charge_is_additive_per_service()
  {
    let ledger = ledger();
    let run = RunId::generate();
    ledger.charge( &run, ServiceClass::Chutes, 0.003 );
    ledger.charge( &run, ServiceClass::Chutes, 0.004 );
    ledger.charge( &run, ServiceClass::Desearch, 0.02 );

    assert!( ( ledger.total( &run, Some( ServiceClass::Chutes ) ) - 0.007 ).abs() < 1e-9 );
    assert!( ( ledger.total( &run, None ) - 0.027 ).abs() < 1e-9 );
  }

  #[test]
  fn unknown_run_is_zero_and_not_over()
  {
    let ledger = ledger();
    let run = RunId::generate();
    assert_eq!( ledger.total( &run, None ), 0.0 );
    assert!( !ledger.is_over( &run, None ) );
  }

  #[test]
  fn is_over_flips_once_budget_exceeded_and_stays_flipped()
  {
    let ledger = ledger();
    let run = RunId::generate();
    assert!( !ledger.is_over( &run, Some( ServiceClass::Chutes ) ) );

    ledger.charge( &run, ServiceClass::Chutes, 0.006 );
    assert!( !ledger.is_over( &run, Some( ServiceClass::Chutes ) ) );

    ledger.charge( &run, ServiceClass::Chutes, 0.006 );
    assert!( ledger.is_over( &run, Some( ServiceClass::Chutes ) ) );

    // stays over even if later charges are zero
    ledger.charge( &run, ServiceClass::Chutes, 0.0 );
    assert!( ledger.is_over( &run, Some( ServiceClass::Chutes ) ) );
  }

  #[test]
  fn release_clears_the_run()
  {
    let ledger = ledger();
    let run = RunId::generate();
    ledger.charge( &run, ServiceClass::Other, 0.5 );
    ledger.release( &run );
    assert_eq!( ledger.total( &run, None ), 0.0 );
  }

  #[test]
  fn snapshot_reports_all_three_services()
  {
    let ledger = ledger();
    let run = RunId::generate();
    ledger.charge( &run, ServiceClass::Desearch, 0.2 );
    let snap = ledger.snapshot( &run );
    assert_eq!( snap.len(), 3 );
    assert!( snap[ &ServiceClass::Desearch ].over );
    assert!( !snap[ &ServiceClass::Chutes ].over );
  }
}
