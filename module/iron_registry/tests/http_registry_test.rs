use iron_registry::{HttpRegistryClient, RegistryClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn leaderboard_is_fetched_and_ranked_by_response_order()
{
  let server = MockServer::start().await;
  Mock::given( method( "GET" ) )
    .and( path( "/leaderboard" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( serde_json::json!( [
      { "miner_uid": 7, "hotkey": "hk7" },
      { "miner_uid": 3, "hotkey": "hk3" },
    ] ) ) )
    .mount( &server )
    .await;

  let dir = tempfile::tempdir().unwrap();
  let client = HttpRegistryClient::new( server.uri(), dir.path() ).unwrap();

  let board = client.leaderboard().await.unwrap();
  assert_eq!( board[ 0 ].miner_uid, 7 );
  assert_eq!( board[ 0 ].rank, 0 );
  assert_eq!( board[ 1 ].miner_uid, 3 );
  assert_eq!( board[ 1 ].rank, 1 );
}

#[tokio::test]
async fn agent_code_missing_upstream_is_reported_as_none_not_an_error()
{
  let server = MockServer::start().await;
  Mock::given( method( "GET" ) )
    .and( path( "/miners/9/agents/v1/code" ) )
    .respond_with( ResponseTemplate::new( 404 ) )
    .mount( &server )
    .await;

  let dir = tempfile::tempdir().unwrap();
  let client = HttpRegistryClient::new( server.uri(), dir.path() ).unwrap();

  assert!( client.agent_code( 9, "v1" ).await.unwrap().is_none() );
}

#[tokio::test]
async fn agent_code_is_cached_to_the_filesystem_after_first_fetch()
{
  let server = MockServer::start().await;
  Mock::given( method( "GET" ) )
    .and( path( "/miners/9/agents/v1/code" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_string( "def agent_main(event): return {}" ) )
    .expect( 1 )
    .mount( &server )
    .await;

  let dir = tempfile::tempdir().unwrap();
  let client = HttpRegistryClient::new( server.uri(), dir.path() ).unwrap();

  let first = client.agent_code( 9, "v1" ).await.unwrap().unwrap();
  assert_eq!( first, "def agent_main(event): return {}" );
  assert!( dir.path().join( "v1.py" ).exists() );

  // Second call must hit the filesystem cache, not the mock server — the
  // `expect(1)` above fails the test on teardown if this call re-fetches.
  let second = client.agent_code( 9, "v1" ).await.unwrap().unwrap();
  assert_eq!( second, first );
}
