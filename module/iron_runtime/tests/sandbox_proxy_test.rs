//! Integration tests for the cost-intercepting sandbox proxy.

use iron_cost::CostLedger;
use iron_runtime::sandbox::{run_proxy, ProxyConfig};
use iron_types::{BudgetSpec, RunId};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_proxy( upstream_base_url: String, budgets: BudgetSpec ) -> ( String, tokio::sync::oneshot::Sender< () > )
{
  let port = {
    let listener = std::net::TcpListener::bind( "127.0.0.1:0" ).unwrap();
    listener.local_addr().unwrap().port()
  };

  let ( shutdown_tx, shutdown_rx ) = tokio::sync::oneshot::channel();
  let config = ProxyConfig { port, upstream_base_url, upstream_timeout: Duration::from_secs(5) };
  let ledger = Arc::new( CostLedger::new( budgets ) );

  tokio::spawn( async move {
    let _ = run_proxy( config, ledger, shutdown_rx ).await;
  } );

  // give the listener a moment to bind
  tokio::time::sleep( Duration::from_millis( 50 ) ).await;

  ( format!( "http://127.0.0.1:{port}" ), shutdown_tx )
}

#[tokio::test]
async fn forwards_and_charges_cost_for_known_run()
{
  let gateway = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/chutes/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( serde_json::json!({ "cost": 0.004, "reply": "ok" }) ) )
    .mount( &gateway )
    .await;

  let ( proxy_url, _shutdown ) = start_proxy( gateway.uri(), BudgetSpec { chutes: 0.01, desearch: 0.10, other: 1.0 } ).await;

  let run_id = RunId::generate();
  let client = reqwest::Client::new();
  let resp = client
    .post( format!( "{proxy_url}/chutes/chat/completions" ) )
    .json( &serde_json::json!({ "run_id": run_id.as_str(), "prompt": "hi" }) )
    .send()
    .await
    .unwrap();

  assert_eq!( resp.status(), 200 );
  let body: serde_json::Value = resp.json().await.unwrap();
  assert_eq!( body[ "reply" ], "ok" );
}

#[tokio::test]
async fn rejects_with_402_once_service_budget_exhausted()
{
  let gateway = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/chutes/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( serde_json::json!({ "cost": 0.006 }) ) )
    .mount( &gateway )
    .await;

  let ( proxy_url, _shutdown ) = start_proxy( gateway.uri(), BudgetSpec { chutes: 0.01, desearch: 0.10, other: 1.0 } ).await;

  let run_id = RunId::generate();
  let client = reqwest::Client::new();
  let body = serde_json::json!({ "run_id": run_id.as_str() });

  // Two calls land at 0.012, over the 0.01 chutes budget.
  for _ in 0..2
  {
    let resp = client.post( format!( "{proxy_url}/chutes/chat/completions" ) ).json( &body ).send().await.unwrap();
    assert_eq!( resp.status(), 200 );
  }

  // The third is rejected before reaching the gateway.
  let resp = client.post( format!( "{proxy_url}/chutes/chat/completions" ) ).json( &body ).send().await.unwrap();
  assert_eq!( resp.status(), 402 );
  let rejected: serde_json::Value = resp.json().await.unwrap();
  assert_eq!( rejected[ "error" ], "Budget exceeded" );
  assert_eq!( rejected[ "service" ], "chutes" );
}

#[tokio::test]
async fn untagged_requests_are_forwarded_without_accounting()
{
  let gateway = MockServer::start().await;
  Mock::given( method( "GET" ) )
    .and( path( "/health" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_string( "ok" ) )
    .mount( &gateway )
    .await;

  let ( proxy_url, _shutdown ) = start_proxy( gateway.uri(), BudgetSpec::default() ).await;

  let resp = reqwest::get( format!( "{proxy_url}/health" ) ).await.unwrap();
  assert_eq!( resp.status(), 200 );
}

#[tokio::test]
async fn classifies_service_by_path_substring()
{
  let gateway = MockServer::start().await;
  Mock::given( method( "GET" ) ).and( path( "/api/gateway/desearch/web/search" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( serde_json::json!({ "cost": 0.05 }) ) )
    .mount( &gateway ).await;

  let ( proxy_url, _shutdown ) = start_proxy( gateway.uri(), BudgetSpec { chutes: 0.01, desearch: 0.001, other: 1.0 } ).await;

  let run_id = RunId::generate();
  let client = reqwest::Client::new();
  // First call succeeds (gets forwarded) and pushes desearch over its tiny budget.
  let resp = client
    .get( format!( "{proxy_url}/api/gateway/desearch/web/search" ) )
    .json( &serde_json::json!({ "run_id": run_id.as_str() }) )
    .send()
    .await
    .unwrap();
  assert_eq!( resp.status(), 200 );

  // Second desearch call for the same run is now rejected.
  let resp = client
    .get( format!( "{proxy_url}/api/gateway/desearch/web/search" ) )
    .json( &serde_json::json!({ "run_id": run_id.as_str() }) )
    .send()
    .await
    .unwrap();
  assert_eq!( resp.status(), 402 );
  let rejected: serde_json::Value = resp.json().await.unwrap();
  assert_eq!( rejected[ "service" ], "desearch" );
}
