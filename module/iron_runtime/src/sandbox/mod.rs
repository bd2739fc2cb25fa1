//! The cost-intercepting proxy: the one choke point every sandboxed
//! agent's outbound gateway calls pass through.

mod error;
mod proxy;

pub use error::ProxyError;
pub use proxy::{run_proxy, ProxyConfig, ProxyState};
