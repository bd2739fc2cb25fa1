//! Cost control module: per-run, per-service budget accounting.
//!
//! ## Known Pitfalls
//!
//! ### DashMap Lock-Iteration Incompatibility
//!
//! DashMap is NOT a drop-in replacement for Mutex-wrapped HashMap. Never hold DashMap entry
//! locks while calling methods that iterate the same map, as this causes deadlock.
//!
//! **Why:** DashMap uses internal sharding with RwLocks. An exclusive write lock on one
//! shard prevents global iteration operations, even for entries in other shards.
//! [`CostLedger`] avoids this class of bug entirely by keeping a small struct of atomics
//! as the per-run row, rather than a second nested map that would need iterating.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod ledger;

#[cfg(feature = "enabled")]
pub use ledger::CostLedger;
