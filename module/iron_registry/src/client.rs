//! The fixed contract a prediction orchestrator depends on.

use async_trait::async_trait;
use iron_types::{AgentVersion, Error, LeaderboardEntry};

/// Rank- and uid-indexed access to the current leaderboard and to runnable
/// agent source code.
#[async_trait]
pub trait RegistryClient: Send + Sync
{
  /// Current leaderboard, ordered by rank ascending (rank 0 is first).
  async fn leaderboard( &self ) -> Result< Vec< LeaderboardEntry >, Error >;

  /// A miner's visible agent versions, newest first. Empty, not an error,
  /// if the miner has never activated an agent.
  async fn miner_agents( &self, miner_uid: u64 ) -> Result< Vec< AgentVersion >, Error >;

  /// Source code for one agent version. `Ok(None)` means the registry knows
  /// about the version but its code is not (yet, or ever) available —
  /// distinct from `Err`, which means the lookup itself failed.
  async fn agent_code( &self, miner_uid: u64, version_id: &str ) -> Result< Option< String >, Error >;

  /// Convenience built on [`Self::leaderboard`]: the entry at a given
  /// 0-indexed rank, or `None` if the leaderboard is shorter.
  async fn miner_by_rank( &self, rank: u32 ) -> Result< Option< LeaderboardEntry >, Error >
  {
    let board = self.leaderboard().await?;
    Ok( board.into_iter().find( | e | e.rank == rank ) )
  }

  /// Convenience built on [`Self::leaderboard`]: the entry for a given uid.
  async fn miner_by_uid( &self, miner_uid: u64 ) -> Result< Option< LeaderboardEntry >, Error >
  {
    let board = self.leaderboard().await?;
    Ok( board.into_iter().find( | e | e.miner_uid == miner_uid ) )
  }

  /// The newest agent version for a miner with available code, trying
  /// versions newest-to-oldest until one resolves. `Ok(None)` if the miner
  /// has visible agents but none of their code could be fetched.
  async fn latest_runnable_agent( &self, miner_uid: u64 ) -> Result< Option< AgentVersion >, Error >
  {
    let versions = self.miner_agents( miner_uid ).await?;
    for version in versions
    {
      if let Some( code ) = self.agent_code( miner_uid, &version.version_id ).await?
      {
        if !code.trim().is_empty()
        {
          return Ok( Some( AgentVersion { code, ..version } ) );
        }
      }
    }
    Ok( None )
  }
}
