//! Upstream-API-backed registry client.
//!
//! Ported from the collector this crate supplements the spec with: a
//! leaderboard cache and a per-miner agent-list cache, both valid until the
//! first 11 PM UTC boundary after they were fetched, plus a filesystem cache
//! for agent code keyed by version id (agent source rarely changes once
//! published, so once fetched it never needs re-fetching).

use crate::RegistryClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use iron_types::{AgentVersion, Error, LeaderboardEntry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(serde::Deserialize)]
struct RawLeaderboardEntry
{
  miner_uid: u64,
  hotkey: String,
}

#[derive(serde::Deserialize)]
struct RawAgentEntry
{
  version_id: String,
}

pub struct HttpRegistryClient
{
  client: reqwest::Client,
  base_url: String,
  agents_dir: PathBuf,
  leaderboard_cache: Mutex< Option< ( Vec< LeaderboardEntry >, DateTime< Utc > ) > >,
  agents_cache: Mutex< HashMap< u64, ( Vec< AgentVersion >, DateTime< Utc > ) > >,
  unavailable_codes: Mutex< HashMap< String, DateTime< Utc > > >,
}

impl HttpRegistryClient
{
  /// `agents_dir` is created if missing; fetched agent code is written
  /// there as `<version_id>.py` and treated as a permanent cache.
  pub fn new( base_url: impl Into< String >, agents_dir: impl Into< PathBuf > ) -> std::io::Result< Self >
  {
    let agents_dir = agents_dir.into();
    std::fs::create_dir_all( &agents_dir )?;
    Ok( Self
    {
      client: reqwest::Client::new(),
      base_url: base_url.into(),
      agents_dir,
      leaderboard_cache: Mutex::new( None ),
      agents_cache: Mutex::new( HashMap::new() ),
      unavailable_codes: Mutex::new( HashMap::new() ),
    } )
  }

  fn code_path( &self, version_id: &str ) -> PathBuf
  {
    self.agents_dir.join( format!( "{version_id}.py" ) )
  }

  /// The first 11 PM UTC strictly after `cached_at`.
  fn cache_expiry_for( cached_at: DateTime< Utc > ) -> DateTime< Utc >
  {
    let same_day_11pm = cached_at.date_naive().and_hms_opt( 23, 0, 0 ).unwrap().and_utc();
    if cached_at >= same_day_11pm
    {
      same_day_11pm + ChronoDuration::days( 1 )
    }
    else
    {
      same_day_11pm
    }
  }

  fn is_cache_valid( cached_at: DateTime< Utc > ) -> bool
  {
    Utc::now() < Self::cache_expiry_for( cached_at )
  }

  async fn fetch_leaderboard( &self ) -> Result< Vec< LeaderboardEntry >, Error >
  {
    let url = format!( "{}/leaderboard", self.base_url );
    let raw: Vec< RawLeaderboardEntry > = self
      .client
      .get( &url )
      .send()
      .await
      .map_err( | e | Error::Config( format!( "leaderboard fetch failed: {e}" ) ) )?
      .error_for_status()
      .map_err( | e | Error::Config( format!( "leaderboard fetch failed: {e}" ) ) )?
      .json()
      .await
      .map_err( | e | Error::Config( format!( "leaderboard response malformed: {e}" ) ) )?;

    Ok(
      raw
        .into_iter()
        .enumerate()
        .map( | ( rank, e ) | LeaderboardEntry { miner_uid: e.miner_uid, rank: rank as u32, hotkey: e.hotkey } )
        .collect(),
    )
  }

  async fn fetch_miner_agents( &self, miner_uid: u64 ) -> Result< Vec< AgentVersion >, Error >
  {
    let url = format!( "{}/miners/{miner_uid}/agents", self.base_url );
    let raw: Vec< RawAgentEntry > = self
      .client
      .get( &url )
      .send()
      .await
      .map_err( | e | Error::Config( format!( "agent list fetch failed: {e}" ) ) )?
      .error_for_status()
      .map_err( | e | Error::Config( format!( "agent list fetch failed: {e}" ) ) )?
      .json()
      .await
      .map_err( | e | Error::Config( format!( "agent list response malformed: {e}" ) ) )?;

    Ok( raw.into_iter().map( | e | AgentVersion { version_id: e.version_id, miner_uid, code: String::new() } ).collect() )
  }

  async fn fetch_agent_code( &self, miner_uid: u64, version_id: &str ) -> Result< Option< String >, Error >
  {
    let url = format!( "{}/miners/{miner_uid}/agents/{version_id}/code", self.base_url );
    let response = self
      .client
      .get( &url )
      .send()
      .await
      .map_err( | e | Error::Config( format!( "agent code fetch failed: {e}" ) ) )?;

    if response.status() == reqwest::StatusCode::NOT_FOUND
    {
      return Ok( None );
    }

    let code = response
      .error_for_status()
      .map_err( | e | Error::Config( format!( "agent code fetch failed: {e}" ) ) )?
      .text()
      .await
      .map_err( | e | Error::Config( format!( "agent code response malformed: {e}" ) ) )?;

    Ok( Some( code ) )
  }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient
{
  async fn leaderboard( &self ) -> Result< Vec< LeaderboardEntry >, Error >
  {
    if let Some( ( entries, cached_at ) ) = self.leaderboard_cache.lock().unwrap().clone()
    {
      if Self::is_cache_valid( cached_at )
      {
        tracing::debug!( "leaderboard cache hit" );
        return Ok( entries );
      }
    }

    tracing::info!( "fetching leaderboard from registry API" );
    let entries = self.fetch_leaderboard().await?;
    *self.leaderboard_cache.lock().unwrap() = Some( ( entries.clone(), Utc::now() ) );
    Ok( entries )
  }

  async fn miner_agents( &self, miner_uid: u64 ) -> Result< Vec< AgentVersion >, Error >
  {
    if let Some( ( versions, cached_at ) ) = self.agents_cache.lock().unwrap().get( &miner_uid ).cloned()
    {
      if Self::is_cache_valid( cached_at )
      {
        tracing::debug!( miner_uid, "agent list cache hit" );
        return Ok( versions );
      }
    }

    tracing::info!( miner_uid, "fetching agent list from registry API" );
    let versions = self.fetch_miner_agents( miner_uid ).await?;
    self.agents_cache.lock().unwrap().insert( miner_uid, ( versions.clone(), Utc::now() ) );
    Ok( versions )
  }

  async fn agent_code( &self, miner_uid: u64, version_id: &str ) -> Result< Option< String >, Error >
  {
    let path = self.code_path( version_id );
    if let Ok( code ) = std::fs::read_to_string( &path )
    {
      tracing::debug!( version_id, "agent code cache hit (filesystem)" );
      return Ok( Some( code ) );
    }

    if let Some( cached_at ) = self.unavailable_codes.lock().unwrap().get( version_id ).copied()
    {
      if Self::is_cache_valid( cached_at )
      {
        return Ok( None );
      }
    }

    tracing::info!( version_id, "fetching agent code from registry API" );
    let code = self.fetch_agent_code( miner_uid, version_id ).await?;

    match code
    {
      None =>
      {
        self.unavailable_codes.lock().unwrap().insert( version_id.to_string(), Utc::now() );
        Ok( None )
      }
      Some( code ) =>
      {
        if !code.trim().is_empty()
        {
          if let Err( e ) = std::fs::write( &path, &code )
          {
            tracing::warn!( version_id, error = %e, "failed to persist agent code to filesystem cache" );
          }
        }
        Ok( Some( code ) )
      }
    }
  }
}
