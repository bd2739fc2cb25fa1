//! Iron Cage Sandbox Server
//!
//! Starts the three pieces of the binary-prediction execution substrate as
//! one process: the cost-intercepting proxy every sandboxed agent talks to,
//! the admission-controlled job scheduler, and the prediction orchestrator
//! that turns a question into scheduled agent runs.
//!
//! # Configuration
//!
//! `iron_config_loader`'s layered config stack ships without a crate root
//! in this snapshot, so configuration here is read directly from the
//! environment, the same way `ProcessIsolationRuntime` reads
//! `IRON_SANDBOX_PYTHON` — see DESIGN.md.
//!
//! - **IRON_SANDBOX_BIND_ADDR**: prediction API bind address (default `0.0.0.0:8080`)
//! - **IRON_SANDBOX_PROXY_PORT**: cost-intercepting proxy port (default `8888`)
//! - **IRON_SANDBOX_GATEWAY_URL**: upstream LLM gateway the proxy forwards to
//!   (default `http://localhost:9000`)
//! - **IRON_SANDBOX_REGISTRY_URL**: upstream leaderboard/agent registry; if unset,
//!   an empty in-memory registry is used (fine for local testing, not for serving
//!   real predictions)
//! - **IRON_SANDBOX_AGENTS_DIR**: filesystem cache for fetched agent code
//!   (default `./agents_cache`)
//! - **IRON_SANDBOX_MAX_CONCURRENT** / **IRON_SANDBOX_MAX_QUEUED**: scheduler
//!   admission caps (defaults 6 / 6)
//! - **IRON_SANDBOX_BUDGET_CHUTES** / **_DESEARCH** / **_OTHER**: per-service
//!   USD budgets charged against by the proxy (defaults 0.02 / 0.10 / 1.00)
//!
//! # Endpoints
//!
//! - `POST /predict` - run a `PredictionRequest`, returns a `PredictionResponse`
//! - `GET /health` - liveness check

use axum::{routing::{get, post}, Json, Router};
use iron_cost::CostLedger;
use iron_orchestrator::{OrchestratorConfig, PredictionOrchestrator};
use iron_registry::{InMemoryRegistry, RegistryClient};
use iron_runtime::sandbox::{run_proxy, ProxyConfig};
use iron_scheduler::{ProcessIsolationRuntime, Scheduler, SchedulerConfig};
use iron_types::{BudgetSpec, PredictionRequest, PredictionResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState
{
  orchestrator: Arc< PredictionOrchestrator >,
}

fn env_usize( key: &str, default: usize ) -> usize
{
  std::env::var( key ).ok().and_then( | v | v.parse().ok() ).unwrap_or( default )
}

fn env_f64( key: &str, default: f64 ) -> f64
{
  std::env::var( key ).ok().and_then( | v | v.parse().ok() ).unwrap_or( default )
}

fn budgets_from_env() -> BudgetSpec
{
  let defaults = BudgetSpec::default();
  BudgetSpec
  {
    chutes: env_f64( "IRON_SANDBOX_BUDGET_CHUTES", defaults.chutes ),
    desearch: env_f64( "IRON_SANDBOX_BUDGET_DESEARCH", defaults.desearch ),
    other: env_f64( "IRON_SANDBOX_BUDGET_OTHER", defaults.other ),
  }
}

fn build_registry() -> Arc< dyn RegistryClient >
{
  match std::env::var( "IRON_SANDBOX_REGISTRY_URL" )
  {
    Ok( url ) =>
    {
      let agents_dir = std::env::var( "IRON_SANDBOX_AGENTS_DIR" ).unwrap_or_else( |_| "./agents_cache".to_string() );
      match iron_registry::HttpRegistryClient::new( url, agents_dir )
      {
        Ok( client ) => Arc::new( client ),
        Err( e ) =>
        {
          tracing::error!( error = %e, "failed to initialize http registry client, falling back to an empty in-memory registry" );
          Arc::new( InMemoryRegistry::new() )
        }
      }
    }
    Err( _ ) =>
    {
      tracing::warn!( "IRON_SANDBOX_REGISTRY_URL not set, serving predictions from an empty in-memory registry" );
      Arc::new( InMemoryRegistry::new() )
    }
  }
}

async fn health() -> &'static str
{
  "ok"
}

async fn predict(
  axum::extract::State( state ): axum::extract::State< AppState >,
  Json( request ): Json< PredictionRequest >,
) -> Json< PredictionResponse >
{
  Json( state.orchestrator.predict( request ).await )
}

#[tokio::main]
async fn main() -> Result< (), Box< dyn std::error::Error > >
{
  let dotenv_result = dotenvy::dotenv();
  tracing_subscriber::fmt::init();

  match dotenv_result
  {
    Ok( path ) => tracing::debug!( "loaded .env from: {:?}", path ),
    Err( _ ) => tracing::debug!( "no .env file loaded (not required)" ),
  }

  let proxy_port = env_usize( "IRON_SANDBOX_PROXY_PORT", 8888 ) as u16;
  let gateway_url = std::env::var( "IRON_SANDBOX_GATEWAY_URL" ).unwrap_or_else( |_| "http://localhost:9000".to_string() );
  let ledger = Arc::new( CostLedger::new( budgets_from_env() ) );

  let ( _shutdown_tx, shutdown_rx ) = tokio::sync::oneshot::channel();
  let proxy_config = ProxyConfig { port: proxy_port, upstream_base_url: gateway_url, ..ProxyConfig::default() };
  let proxy_ledger = ledger.clone();
  tokio::spawn( async move {
    if let Err( e ) = run_proxy( proxy_config, proxy_ledger, shutdown_rx ).await
    {
      tracing::error!( error = %e, "sandbox proxy exited" );
    }
  } );

  let scheduler_config = SchedulerConfig
  {
    max_concurrent: env_usize( "IRON_SANDBOX_MAX_CONCURRENT", 6 ),
    max_queued: env_usize( "IRON_SANDBOX_MAX_QUEUED", 6 ),
    ..SchedulerConfig::default()
  };
  let scheduler = Arc::new( Scheduler::new(
    scheduler_config,
    ledger,
    Arc::new( ProcessIsolationRuntime::new() ),
    format!( "http://127.0.0.1:{proxy_port}" ),
  ) );

  let registry = build_registry();
  let orchestrator = Arc::new( PredictionOrchestrator::new( registry, scheduler, OrchestratorConfig::default() ) );

  let app = Router::new()
    .route( "/health", get( health ) )
    .route( "/predict", post( predict ) )
    .with_state( AppState { orchestrator } )
    .layer( CorsLayer::permissive() );

  let bind_addr: SocketAddr = std::env::var( "IRON_SANDBOX_BIND_ADDR" )
    .unwrap_or_else( |_| "0.0.0.0:8080".to_string() )
    .parse()?;

  tracing::info!( %bind_addr, %proxy_port, "sandbox server listening" );
  tracing::info!( "  GET  /health" );
  tracing::info!( "  POST /predict" );

  let listener = tokio::net::TcpListener::bind( bind_addr ).await?;
  axum::serve( listener, app ).await?;

  Ok( () )
}
