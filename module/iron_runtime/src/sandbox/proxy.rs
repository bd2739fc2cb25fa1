//! Cost-intercepting HTTP proxy.
//!
//! Every outbound call an agent makes to the gateway is routed through
//! this server instead. Classification, admission, forwarding, cost
//! extraction and charging, and relay all happen in [`handle_proxy`]; see
//! the module doc on [`crate::sandbox`] for the wire contract this
//! implements.

use axum::{
  body::Body,
  extract::{Request, State},
  http::{header, HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  routing::any,
  Json, Router,
};
use iron_cost::CostLedger;
use iron_types::{RunId, ServiceClass};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::error::ProxyError;

/// Headers that must never be copied verbatim between the agent and the
/// upstream gateway in either direction; `Content-Length` is recomputed by
/// the HTTP stack from the relayed body instead of being forwarded.
const HOP_BY_HOP: &[ &str ] = &[ "transfer-encoding", "connection", "keep-alive", "content-encoding", "content-length" ];

/// Shared state for proxy handlers.
#[derive(Clone)]
pub struct ProxyState
{
  pub ledger: Arc< CostLedger >,
  pub upstream_base_url: String,
  pub http_client: Client,
}

/// Proxy server configuration.
pub struct ProxyConfig
{
  pub port: u16,
  pub upstream_base_url: String,
  pub upstream_timeout: Duration,
}

impl Default for ProxyConfig
{
  fn default() -> Self
  {
    Self
    {
      port: 8888,
      upstream_base_url: "http://localhost:9000".to_string(),
      upstream_timeout: Duration::from_secs(120),
    }
  }
}

/// Run the proxy server until `shutdown_rx` fires, charging against
/// `ledger`. The ledger is taken by reference to the caller rather than
/// built internally so a scheduler sharing the same run accounting can
/// hold its own clone from the moment the server starts, not just after
/// it stops.
pub async fn run_proxy(
  config: ProxyConfig,
  ledger: Arc< CostLedger >,
  shutdown_rx: oneshot::Receiver< () >,
) -> Result< (), ProxyError >
{
  let http_client = Client::builder()
    .timeout( config.upstream_timeout )
    .redirect( reqwest::redirect::Policy::none() )
    .build()
    .map_err( | e | ProxyError::Bind( e.to_string() ) )?;

  let state = ProxyState
  {
    ledger: ledger.clone(),
    upstream_base_url: config.upstream_base_url,
    http_client,
  };

  let app = Router::new()
    .route( "/", any( handle_proxy ) )
    .route( "/*path", any( handle_proxy ) )
    .with_state( state );

  let addr = std::net::SocketAddr::from( ( [ 0, 0, 0, 0 ], config.port ) );
  let listener = tokio::net::TcpListener::bind( addr )
    .await
    .map_err( | e | ProxyError::Bind( e.to_string() ) )?;

  tracing::info!( %addr, "sandbox proxy listening" );

  axum::serve( listener, app )
    .with_graceful_shutdown( async {
      let _ = shutdown_rx.await;
      tracing::info!( "sandbox proxy shutting down" );
    } )
    .await
    .map_err( | e | ProxyError::Serve( e.to_string() ) )?;

  Ok( () )
}

/// Best-effort JSON `run_id` extraction; absent or malformed bodies are
/// untagged, not errors (per spec, untagged requests skip accounting).
fn extract_run_id( body: &[ u8 ] ) -> Option< RunId >
{
  let value: serde_json::Value = serde_json::from_slice( body ).ok()?;
  let raw = value.get( "run_id" )?.as_str()?;
  RunId::parse( raw ).ok()
}

fn extract_cost( body: &[ u8 ] ) -> f64
{
  serde_json::from_slice::< serde_json::Value >( body )
    .ok()
    .and_then( | v | v.get( "cost" )?.as_f64() )
    .unwrap_or( 0.0 )
}

fn strip_hop_by_hop( headers: &HeaderMap ) -> HeaderMap
{
  let mut out = HeaderMap::new();
  for ( name, value ) in headers
  {
    if HOP_BY_HOP.iter().any( | h | name.as_str().eq_ignore_ascii_case( h ) ) || name == header::HOST
    {
      continue;
    }
    out.append( name.clone(), value.clone() );
  }
  out
}

fn budget_exceeded_response(
  ledger: &CostLedger,
  run_id: &RunId,
  service: ServiceClass,
) -> Response
{
  let snapshot = ledger.snapshot( run_id );
  let current_cost = snapshot.get( &service ).map( | s | s.current_cost ).unwrap_or( 0.0 );
  let budget = snapshot.get( &service ).map( | s | s.budget ).unwrap_or( 0.0 );

  let body = json!({
    "error": "Budget exceeded",
    "detail": format!(
      "Service '{}' has spent ${:.4}, exceeding its ${:.4} budget for this run.",
      service, current_cost, budget
    ),
    "service": service.as_str(),
    "current_cost": current_cost,
    "budget": budget,
    "all_services": snapshot,
  });

  ( StatusCode::PAYMENT_REQUIRED, Json( body ) ).into_response()
}

async fn handle_proxy( State(state): State< ProxyState >, request: Request ) -> Response
{
  let method = request.method().clone();
  let path = request.uri().path().to_string();
  let query = request.uri().query().map( | q | format!( "?{q}" ) ).unwrap_or_default();
  let inbound_headers = request.headers().clone();

  let body_bytes = match axum::body::to_bytes( request.into_body(), 10 * 1024 * 1024 ).await
  {
    Ok( bytes ) => bytes,
    Err( e ) => return ( StatusCode::BAD_REQUEST, format!( "Body read error: {e}" ) ).into_response(),
  };

  let service = ServiceClass::classify( &path );
  let run_id = extract_run_id( &body_bytes );

  if let Some( ref run_id ) = run_id
  {
    if state.ledger.is_over( run_id, Some( service ) )
    {
      return budget_exceeded_response( &state.ledger, run_id, service );
    }
  }

  let target_url = format!( "{}{}{}", state.upstream_base_url, path, query );

  let mut req_builder = state.http_client.request( method, &target_url );
  for ( name, value ) in strip_hop_by_hop( &inbound_headers )
  {
    if let Some( name ) = name.as_ref()
    {
      req_builder = req_builder.header( name, value );
    }
  }

  let upstream_response = match req_builder.body( body_bytes.to_vec() ).send().await
  {
    Ok( resp ) => resp,
    Err( e ) if e.is_connect() || e.is_timeout() =>
    {
      tracing::debug!( error = %e, path = %path, "upstream unreachable" );
      return ( StatusCode::INTERNAL_SERVER_ERROR, format!( "Proxy error: {e}" ) ).into_response();
    }
    Err( e ) =>
    {
      tracing::debug!( error = %e, path = %path, "client or upstream disconnected" );
      return ( StatusCode::INTERNAL_SERVER_ERROR, format!( "Proxy error: {e}" ) ).into_response();
    }
  };

  let status = upstream_response.status();
  let resp_headers = upstream_response.headers().clone();
  let resp_body = match upstream_response.bytes().await
  {
    Ok( bytes ) => bytes,
    Err( e ) => return ( StatusCode::INTERNAL_SERVER_ERROR, format!( "Proxy error: {e}" ) ).into_response(),
  };

  let cost = extract_cost( &resp_body );
  if let Some( ref run_id ) = run_id
  {
    if cost > 0.0
    {
      state.ledger.charge( run_id, service, cost );
    }
  }

  let mut response = Response::builder().status( status );
  for ( name, value ) in strip_hop_by_hop( &resp_headers )
  {
    if let Some( name ) = name
    {
      response = response.header( name, value );
    }
  }

  match response.body( Body::from( resp_body ) )
  {
    Ok( response ) => response,
    Err( e ) => ( StatusCode::INTERNAL_SERVER_ERROR, e.to_string() ).into_response(),
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn extract_run_id_ignores_malformed_bodies()
  {
    assert!( extract_run_id( b"not json" ).is_none() );
    assert!( extract_run_id( b"{}" ).is_none() );
    assert!( extract_run_id( br#"{"run_id":"not-a-run-id"}"# ).is_none() );
  }

  #[test]
  fn extract_run_id_parses_valid_id()
  {
    let run_id = RunId::generate();
    let body = format!( r#"{{"run_id":"{}"}}"#, run_id.as_str() );
    assert_eq!( extract_run_id( body.as_bytes() ), Some( run_id ) );
  }

  #[test]
  fn extract_cost_defaults_to_zero()
  {
    assert_eq!( extract_cost( b"not json" ), 0.0 );
    assert_eq!( extract_cost( b"{}" ), 0.0 );
    assert_eq!( extract_cost( br#"{"cost":"oops"}"# ), 0.0 );
    assert_eq!( extract_cost( br#"{"cost":0.05}"# ), 0.05 );
  }

  #[test]
  fn strip_hop_by_hop_removes_the_fixed_list()
  {
    let mut headers = HeaderMap::new();
    headers.insert( header::CONTENT_LENGTH, "123".parse().unwrap() );
    headers.insert( header::CONNECTION, "keep-alive".parse().unwrap() );
    headers.insert( header::CONTENT_TYPE, "application/json".parse().unwrap() );
    headers.insert( header::HOST, "example.com".parse().unwrap() );

    let stripped = strip_hop_by_hop( &headers );
    assert!( stripped.get( header::CONTENT_LENGTH ).is_none() );
    assert!( stripped.get( header::CONNECTION ).is_none() );
    assert!( stripped.get( header::HOST ).is_none() );
    assert!( stripped.get( header::CONTENT_TYPE ).is_some() );
  }
}
