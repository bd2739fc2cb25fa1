//! Agent leaderboard and code registry: the ambient supplement the
//! distilled spec left implicit. A prediction orchestrator needs to turn
//! "rank 0" or "miner uid 42" into runnable agent source; this crate is
//! where that lookup, and its caching, lives.
//!
//! Two implementations ship: [`InMemoryRegistry`] for tests and local
//! development, and (behind the `http-client` feature) [`HttpRegistryClient`]
//! talking to an upstream leaderboard API with the same cache-until-11pm-UTC
//! policy as the agent collector this crate is modeled on.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod client;
#[cfg(feature = "enabled")]
mod in_memory;
#[cfg(all(feature = "enabled", feature = "http-client"))]
mod http;

#[cfg(feature = "enabled")]
pub use client::RegistryClient;
#[cfg(feature = "enabled")]
pub use in_memory::InMemoryRegistry;
#[cfg(all(feature = "enabled", feature = "http-client"))]
pub use http::HttpRegistryClient;
