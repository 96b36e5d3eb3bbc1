//! Background polling through the shared queue

mod common;

use common::{connected, quiet_config, MockTransport, Reply};
use regulink_core::protocol::{Command, Connection, ConnectionConfig};
use std::time::Duration;

const GET_PARAMETERS: u8 = 0x01;
const GET_PROTECTION_STATUS: u8 = 0x07;

fn fast_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::for_port("mock0");
    config.port.polling_interval_ms = 500;
    config.protection_poll_interval_ms = 5000;
    config
}

#[tokio::test(start_paused = true)]
async fn test_polls_at_configured_interval() {
    let (conn, mock) = connected(fast_config()).await;

    tokio::time::sleep(Duration::from_millis(2100)).await;
    conn.disconnect().await;

    // ticks at 0, 500, 1000, 1500 and 2000ms
    assert_eq!(mock.writes_of(GET_PARAMETERS).len(), 5);
    assert_eq!(mock.writes_of(GET_PROTECTION_STATUS).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_polling_while_disconnected() {
    let mock = MockTransport::new();
    let conn = Connection::new(fast_config(), mock.clone());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(mock.writes().is_empty());

    conn.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    conn.disconnect().await;
    let written = mock.writes().len();
    assert!(written > 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(mock.writes().len(), written);
}

#[tokio::test(start_paused = true)]
async fn test_slow_device_does_not_grow_queue() {
    let (conn, mock) = connected(fast_config()).await;
    mock.script(GET_PARAMETERS, std::iter::repeat(Reply::Silent).take(1000));

    // Every GetParameters now costs three timed-out attempts
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(conn.queue_len() <= 2, "queue grew to {}", conn.queue_len());
    }

    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_polls_interleave_with_commands() {
    let (conn, mock) = connected(fast_config()).await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(conn.set_engine_speed(1100).await);
    tokio::time::sleep(Duration::from_millis(700)).await;
    conn.disconnect().await;

    let codes: Vec<u8> = mock.writes().iter().map(|w| w[2]).collect();
    let setter = codes
        .iter()
        .position(|c| *c == Command::SetEngineSpeed(0).code())
        .expect("setter written");
    assert!(codes[..setter].contains(&GET_PARAMETERS));
    assert!(codes[setter + 1..].contains(&GET_PARAMETERS));
}

#[tokio::test(start_paused = true)]
async fn test_quiet_config_polls_once_on_connect() {
    let (conn, mock) = connected(quiet_config()).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    conn.disconnect().await;
    assert_eq!(mock.writes_of(GET_PARAMETERS).len(), 1);
    assert_eq!(mock.writes_of(GET_PROTECTION_STATUS).len(), 1);
}
