//! Bounded reconnection after transport faults

mod common;

use common::{quiet_config, wait_for, MockTransport, Reply};
use pretty_assertions::assert_eq;
use regulink_core::events::RegulatorEvent;
use regulink_core::protocol::{Command, Connection, ConnectionState, EngineMode, TransportError};
use std::time::Duration;

const SET_ENGINE_MODE: u8 = 0x04;

fn io_fault() -> Reply {
    Reply::WriteFault(TransportError::Io("device removed".into()))
}

fn unplugged() -> TransportError {
    TransportError::Io("device removed".into())
}

#[tokio::test(start_paused = true)]
async fn test_fault_then_successful_reconnect() {
    let mock = MockTransport::new();
    let conn = Connection::new(quiet_config(), mock.clone());
    let mut events = conn.subscribe();
    conn.connect().await.unwrap();
    mock.script(SET_ENGINE_MODE, [io_fault()]);

    // The command in flight when the port dies fails without retry
    assert!(!conn.send(Command::SetEngineMode(EngineMode::Idle)).await);
    assert_eq!(mock.writes_of(SET_ENGINE_MODE).len(), 1);

    wait_for(&mut events, |e| *e == RegulatorEvent::ConnectionStatusChanged(false)).await;
    wait_for(&mut events, |e| *e == RegulatorEvent::ConnectionStatusChanged(true)).await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(mock.open_calls(), 2);

    assert!(conn.send(Command::SetEngineMode(EngineMode::Idle)).await);
    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_header_read_fault_reconnects() {
    let mock = MockTransport::new();
    let conn = Connection::new(quiet_config(), mock.clone());
    let mut events = conn.subscribe();
    conn.connect().await.unwrap();
    mock.script(SET_ENGINE_MODE, [Reply::ReadFault(unplugged())]);

    assert!(!conn.send(Command::SetEngineMode(EngineMode::Idle)).await);
    assert_eq!(mock.writes_of(SET_ENGINE_MODE).len(), 1);

    wait_for(&mut events, |e| {
        matches!(e, RegulatorEvent::ErrorOccurred(m) if m.starts_with("Connection lost"))
    })
    .await;
    wait_for(&mut events, |e| *e == RegulatorEvent::ConnectionStatusChanged(true)).await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(mock.open_calls(), 2);

    assert!(conn.send(Command::SetEngineMode(EngineMode::Idle)).await);
    assert_eq!(mock.writes_of(SET_ENGINE_MODE).len(), 2);
    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_body_read_fault_reconnects() {
    let mock = MockTransport::new();
    let conn = Connection::new(quiet_config(), mock.clone());
    let mut events = conn.subscribe();
    conn.connect().await.unwrap();
    mock.script(SET_ENGINE_MODE, [Reply::BodyReadFault(unplugged())]);

    // A valid header does not make the fault retryable
    assert!(!conn.send(Command::SetEngineMode(EngineMode::Idle)).await);
    assert_eq!(mock.writes_of(SET_ENGINE_MODE).len(), 1);

    wait_for(&mut events, |e| *e == RegulatorEvent::ConnectionStatusChanged(false)).await;
    wait_for(&mut events, |e| *e == RegulatorEvent::ConnectionStatusChanged(true)).await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(mock.open_calls(), 2);

    assert!(conn.send(Command::SetEngineMode(EngineMode::Idle)).await);
    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_waits_between_attempts() {
    let mock = MockTransport::new();
    let conn = Connection::new(quiet_config(), mock.clone());
    conn.connect().await.unwrap();
    mock.fail_opens(1);
    mock.script(SET_ENGINE_MODE, [io_fault()]);

    let start = tokio::time::Instant::now();
    conn.post(Command::SetEngineMode(EngineMode::Idle));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert_eq!(mock.open_calls(), 1);

    // 2s delay, failed attempt, 2s delay, success
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(mock.open_calls(), 3);
    assert!(start.elapsed() >= Duration::from_secs(4));

    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_max_attempts() {
    let mock = MockTransport::new();
    let conn = Connection::new(quiet_config(), mock.clone());
    let mut events = conn.subscribe();
    conn.connect().await.unwrap();
    mock.fail_opens(5);
    mock.script(SET_ENGINE_MODE, [io_fault()]);

    assert!(!conn.send(Command::SetEngineMode(EngineMode::Idle)).await);
    wait_for(&mut events, |e| {
        matches!(e, RegulatorEvent::ErrorOccurred(m) if m.starts_with("Reconnect failed"))
    })
    .await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    // initial connect + 3 reconnect attempts
    assert_eq!(mock.open_calls(), 4);

    // Commands are refused until the next explicit connect
    assert!(!conn.reset_protection().await);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.open_calls(), 4);

    mock.fail_opens(0);
    conn.connect().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert!(conn.reset_protection().await);
    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_failed_during_reconnect() {
    let mock = MockTransport::new();
    let conn = Connection::new(quiet_config(), mock.clone());
    conn.connect().await.unwrap();
    mock.fail_opens(1);
    mock.script(SET_ENGINE_MODE, [io_fault()]);

    let in_flight = conn.submit(Command::SetEngineMode(EngineMode::Idle));
    let queued = conn.submit(Command::ResetProtection);
    assert!(!in_flight.wait().await);
    assert!(!queued.wait().await);

    // Submitted while reconnecting
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert!(!conn.reset_protection().await);

    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_aborts_reconnect() {
    let mock = MockTransport::new();
    let conn = Connection::new(quiet_config(), mock.clone());
    conn.connect().await.unwrap();
    mock.fail_opens(10);
    mock.script(SET_ENGINE_MODE, [io_fault()]);

    conn.post(Command::SetEngineMode(EngineMode::Idle));
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(conn.state(), ConnectionState::Connecting);

    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    let calls = mock.open_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.open_calls(), calls);
}
