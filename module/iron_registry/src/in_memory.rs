//! An in-process `RegistryClient` for tests and local development: no
//! network calls, no cache expiry, plain `RwLock`-guarded maps.

use crate::RegistryClient;
use async_trait::async_trait;
use iron_types::{AgentVersion, Error, LeaderboardEntry};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryRegistry
{
  leaderboard: RwLock< Vec< LeaderboardEntry > >,
  agents: RwLock< HashMap< u64, Vec< AgentVersion > > >,
  code: RwLock< HashMap< String, String > >,
}

impl InMemoryRegistry
{
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Replace the leaderboard wholesale. Entries are expected to already be
  /// sorted by rank ascending.
  pub fn set_leaderboard( &self, entries: Vec< LeaderboardEntry > )
  {
    *self.leaderboard.write().unwrap() = entries;
  }

  /// Register a miner's agent versions, newest first.
  pub fn set_agents( &self, miner_uid: u64, versions: Vec< AgentVersion > )
  {
    self.agents.write().unwrap().insert( miner_uid, versions );
  }

  /// Seed the code for a version id. Omitting a version here models "code
  /// unavailable", which `RegistryClient::agent_code` reports as `Ok(None)`.
  pub fn set_code( &self, version_id: impl Into< String >, code: impl Into< String > )
  {
    self.code.write().unwrap().insert( version_id.into(), code.into() );
  }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry
{
  async fn leaderboard( &self ) -> Result< Vec< LeaderboardEntry >, Error >
  {
    Ok( self.leaderboard.read().unwrap().clone() )
  }

  async fn miner_agents( &self, miner_uid: u64 ) -> Result< Vec< AgentVersion >, Error >
  {
    Ok( self.agents.read().unwrap().get( &miner_uid ).cloned().unwrap_or_default() )
  }

  async fn agent_code( &self, _miner_uid: u64, version_id: &str ) -> Result< Option< String >, Error >
  {
    Ok( self.code.read().unwrap().get( version_id ).cloned() )
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  fn entry( uid: u64, rank: u32 ) -> LeaderboardEntry
  {
    LeaderboardEntry { miner_uid: uid, rank, hotkey: format!( "hotkey-{uid}" ) }
  }

  #[tokio::test]
  async fn miner_by_rank_and_uid_find_the_right_entry()
  {
    let registry = InMemoryRegistry::new();
    registry.set_leaderboard( vec![ entry( 10, 0 ), entry( 20, 1 ), entry( 30, 2 ) ] );

    assert_eq!( registry.miner_by_rank( 1 ).await.unwrap().unwrap().miner_uid, 20 );
    assert_eq!( registry.miner_by_uid( 30 ).await.unwrap().unwrap().rank, 2 );
    assert!( registry.miner_by_rank( 5 ).await.unwrap().is_none() );
    assert!( registry.miner_by_uid( 999 ).await.unwrap().is_none() );
  }

  #[tokio::test]
  async fn latest_runnable_agent_skips_versions_with_unavailable_code()
  {
    let registry = InMemoryRegistry::new();
    registry.set_agents(
      10,
      vec![
        AgentVersion { version_id: "v2".into(), miner_uid: 10, code: String::new() },
        AgentVersion { version_id: "v1".into(), miner_uid: 10, code: String::new() },
      ],
    );
    // v2's code is never seeded; only v1's is.
    registry.set_code( "v1", "def agent_main(event): return {}" );

    let agent = registry.latest_runnable_agent( 10 ).await.unwrap().unwrap();
    assert_eq!( agent.version_id, "v1" );
    assert_eq!( agent.code, "def agent_main(event): return {}" );
  }

  #[tokio::test]
  async fn latest_runnable_agent_is_none_when_no_code_is_available()
  {
    let registry = InMemoryRegistry::new();
    registry.set_agents( 10, vec![ AgentVersion { version_id: "v1".into(), miner_uid: 10, code: String::new() } ] );
    assert!( registry.latest_runnable_agent( 10 ).await.unwrap().is_none() );
  }
}
