//! Integration tests for `Connection` against a fixture server over TCP.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

mod common;

use std::time::Duration;

use common::{FixtureServer, Reply};
use rcon_core::{ReassemblyMode, ServerConfig};
use rcond::{Connection, ConnectionState, RconError};

#[tokio::test]
async fn test_open_and_execute() {
    let server = FixtureServer::spawn().await;

    let mut connection = Connection::open(server.config()).await.unwrap();
    assert!(connection.is_authenticated());
    assert_eq!(connection.state(), ConnectionState::Ready);

    let reply = connection.execute("status").await.unwrap();
    assert_eq!(reply, "echo:status");
    assert_eq!(server.commands(), vec!["status"]);
}

#[tokio::test]
async fn test_wrong_password() {
    let server = FixtureServer::spawn().await;

    let mut connection = Connection::new(server.config_with_password("wrong"));
    connection.connect().await.unwrap();
    let err = connection.authenticate().await.unwrap_err();

    assert!(matches!(err, RconError::Authentication(_)));
    assert!(!connection.is_authenticated());
    assert!(!connection.is_open());
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_connect_refused() {
    let server = FixtureServer::spawn().await;
    let config = server.config();
    server.stop().await;

    let err = Connection::open(config).await.unwrap_err();
    assert!(matches!(err, RconError::Connect { .. }));
}

#[tokio::test]
async fn test_oversized_command_sends_nothing() {
    let server = FixtureServer::spawn().await;
    let mut connection = Connection::open(server.config()).await.unwrap();

    let err = connection.execute(&"x".repeat(511)).await.unwrap_err();
    assert_eq!(err, RconError::CommandTooLarge { len: 511, max: 510 });

    // Still usable, and the server never saw the oversized command.
    assert_eq!(connection.execute("ping").await.unwrap(), "echo:ping");
    assert_eq!(server.exec_count(), 1);
}

#[tokio::test]
async fn test_split_reply_is_concatenated_in_order() {
    let server = FixtureServer::with_handler(|_| {
        Reply::Packets(vec!["alpha ".to_string(), "beta ".to_string(), "gamma".to_string()])
    })
    .await;
    let mut connection = Connection::open(server.config()).await.unwrap();

    assert_eq!(connection.execute("cvarlist").await.unwrap(), "alpha beta gamma");
}

#[tokio::test]
async fn test_large_reply_spanning_packets() {
    let big: String = (0..10_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let expected = big.clone();
    let server = FixtureServer::with_handler(move |_| Reply::Text(big.clone())).await;
    let mut connection = Connection::open(server.config()).await.unwrap();

    assert_eq!(connection.execute("cvarlist").await.unwrap(), expected);
}

#[tokio::test]
async fn test_sentinel_mode_over_tcp() {
    let server = FixtureServer::with_handler(|_| {
        Reply::Packets(vec!["one ".to_string(), "two".to_string()])
    })
    .await;
    let config = server.config().with_mode(ReassemblyMode::Sentinel);
    let mut connection = Connection::open(config).await.unwrap();

    assert_eq!(connection.execute("status").await.unwrap(), "one two");
    assert_eq!(connection.execute("status").await.unwrap(), "one two");
}

#[tokio::test]
async fn test_single_mode_reads_one_packet() {
    let server = FixtureServer::spawn().await;
    let config = server.config().with_mode(ReassemblyMode::Single);
    let mut connection = Connection::open(config).await.unwrap();

    assert_eq!(connection.execute("users").await.unwrap(), "echo:users");
}

#[tokio::test]
async fn test_mid_read_drop_is_network_error() {
    let server = FixtureServer::with_handler(|cmd| match cmd {
        "crash" => Reply::Drop,
        other => Reply::Text(other.to_string()),
    })
    .await;
    let mut connection = Connection::open(server.config()).await.unwrap();

    let err = connection.execute("crash").await.unwrap_err();
    assert!(err.is_network(), "unexpected error: {err:?}");
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let server = FixtureServer::with_handler(|_| Reply::Silence).await;
    let config = server.config().with_timeout(Duration::from_millis(100));
    let mut connection = Connection::open(config).await.unwrap();

    let err = connection.execute("status").await.unwrap_err();
    assert!(err.is_network());
    assert!(!connection.is_open());
}

#[tokio::test]
async fn test_script_executes_every_line() {
    let server = FixtureServer::spawn().await;
    let mut connection = Connection::open(server.config()).await.unwrap();

    let reply = connection
        .execute("say one\n// skipped\n\nsay two")
        .await
        .unwrap();
    assert_eq!(reply, "echo:say oneecho:say two");
    assert_eq!(server.commands(), vec!["say one", "say two"]);
}

#[tokio::test]
async fn test_unresolvable_host() {
    let config = ServerConfig::new("host.invalid", 27015, "pw")
        .with_timeout(Duration::from_secs(2));
    let err = Connection::open(config).await.unwrap_err();
    assert!(matches!(err, RconError::Connect { .. }));
}
