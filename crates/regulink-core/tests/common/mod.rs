//! Scriptable in-memory transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use regulink_core::events::RegulatorEvent;
use regulink_core::protocol::{Connection, ConnectionConfig, Frame, Transport, TransportError};
use regulink_core::settings::ComPortSettings;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

/// What the mock does with one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Valid response for the command (zeroed telemetry, accepted ack)
    Auto,
    /// Response frame around this payload
    Payload(Vec<u8>),
    /// Raw bytes, delivered as-is
    Raw(Vec<u8>),
    /// No answer at all
    Silent,
    /// Write fails with this error
    WriteFault(TransportError),
    /// Write succeeds, the header read fails with this error
    ReadFault(TransportError),
    /// A valid header arrives, the body read fails with this error
    BodyReadFault(TransportError),
}

#[derive(Default)]
struct MockState {
    open: bool,
    open_calls: u32,
    open_failures: u32,
    scripts: HashMap<u8, VecDeque<Reply>>,
    pending: Option<Reply>,
    pending_code: u8,
    rx: VecDeque<u8>,
    /// Raised by the next read that finds nothing buffered
    read_fault: Option<TransportError>,
    writes: Vec<Vec<u8>>,
}

/// Transport double; clones share state so tests can script and inspect
/// while the connection owns a clone
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue replies for requests carrying `code`
    pub fn script(&self, code: u8, replies: impl IntoIterator<Item = Reply>) {
        self.lock()
            .scripts
            .entry(code)
            .or_default()
            .extend(replies);
    }

    pub fn fail_opens(&self, count: u32) {
        self.lock().open_failures = count;
    }

    pub fn open_calls(&self) -> u32 {
        self.lock().open_calls
    }

    pub fn is_open_now(&self) -> bool {
        self.lock().open
    }

    /// Every request frame written, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Request frames written for `code`, in order
    pub fn writes_of(&self, code: u8) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.get(2) == Some(&code))
            .cloned()
            .collect()
    }

    fn auto_reply(code: u8) -> Frame {
        match code {
            0x01 => Frame::response(&[0; 12]),
            0x07 => Frame::response(&[0, 1]),
            _ => Frame::response(&[0]),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, settings: &ComPortSettings) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.open_calls += 1;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(TransportError::PortUnavailable(settings.port_name.clone()));
        }
        state.open = true;
        state.pending = None;
        state.read_fault = None;
        state.rx.clear();
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.lock();
        state.open = false;
        state.pending = None;
        state.read_fault = None;
        state.rx.clear();
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    async fn discard_buffers(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.rx.clear();
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        let code = bytes[2];
        state.writes.push(bytes.to_vec());
        let reply = state
            .scripts
            .get_mut(&code)
            .and_then(|q| q.pop_front())
            .unwrap_or(Reply::Auto);
        if let Reply::WriteFault(e) = reply {
            state.open = false;
            return Err(e);
        }
        state.pending = Some(reply);
        state.pending_code = code;
        Ok(())
    }

    async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let received = {
            let mut state = self.lock();
            if !state.open {
                return Err(TransportError::NotOpen);
            }
            if let Some(reply) = state.pending.take() {
                let bytes = match reply {
                    Reply::Auto => Self::auto_reply(state.pending_code).into_bytes(),
                    Reply::Payload(p) => Frame::response(&p).into_bytes(),
                    Reply::Raw(raw) => raw,
                    Reply::Silent | Reply::WriteFault(_) => Vec::new(),
                    Reply::ReadFault(e) => {
                        state.open = false;
                        return Err(e);
                    }
                    Reply::BodyReadFault(e) => {
                        state.read_fault = Some(e);
                        let mut frame = Self::auto_reply(state.pending_code).into_bytes();
                        frame.truncate(4);
                        frame
                    }
                };
                state.rx.extend(bytes);
            }
            if state.rx.is_empty() {
                if let Some(e) = state.read_fault.take() {
                    state.open = false;
                    return Err(e);
                }
            }
            let take = n.min(state.rx.len());
            state.rx.drain(..take).collect::<Vec<u8>>()
        };
        if received.len() == n {
            return Ok(received);
        }
        tokio::time::sleep(timeout).await;
        if received.is_empty() {
            Err(TransportError::Timeout { expected: n })
        } else {
            Err(TransportError::ShortRead { expected: n, received })
        }
    }
}

/// Config with a slow poll so scripted commands are not crowded out
pub fn quiet_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::for_port("mock0");
    config.port.polling_interval_ms = 60_000;
    config.protection_poll_interval_ms = 60_000;
    config
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows frames
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn connected(config: ConnectionConfig) -> (Connection, MockTransport) {
    init_tracing();
    let mock = MockTransport::new();
    let conn = Connection::new(config, mock.clone());
    conn.connect().await.unwrap();
    (conn, mock)
}

/// Wait (in virtual time) for the first event matching `pred`
pub async fn wait_for(
    rx: &mut broadcast::Receiver<RegulatorEvent>,
    pred: impl Fn(&RegulatorEvent) -> bool,
) -> RegulatorEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
