//! Error type for the sandbox proxy server itself (binding, startup). Per
//! request failures never reach this type — they become ordinary proxy
//! HTTP responses instead, per the wire contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError
{
  #[error("failed to bind proxy listener: {0}")]
  Bind(String),

  #[error("proxy server error: {0}")]
  Serve(String),
}
