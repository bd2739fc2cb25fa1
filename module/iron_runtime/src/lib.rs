//! Cost-intercepting sandbox proxy.
//!
//! Every outbound call a sandboxed agent makes to the shared upstream
//! gateway is routed through [`sandbox::run_proxy`] instead of hitting the
//! gateway directly — see the module doc there for the wire contract.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod sandbox;
