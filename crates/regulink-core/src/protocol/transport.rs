//! Transport abstraction
//!
//! The core only needs a half-duplex byte channel it can open, close, flush,
//! write to and read an exact number of bytes from. The serial port, the
//! simulated regulator and test doubles all implement [`Transport`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::TransportError;
use crate::settings::ComPortSettings;

/// Half-duplex byte channel to the regulator
#[async_trait]
pub trait Transport: Send {
    /// Open (or reopen) the channel with a settings snapshot
    async fn open(&mut self, settings: &ComPortSettings) -> Result<(), TransportError>;

    /// Close the channel; closing a closed channel is a no-op
    async fn close(&mut self);

    /// Whether `open` has succeeded and `close` has not been called since
    fn is_open(&self) -> bool;

    /// Drop anything buffered in either direction
    async fn discard_buffers(&mut self) -> Result<(), TransportError>;

    /// Write all bytes
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read exactly `n` bytes.
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrived and
    /// [`TransportError::ShortRead`] when fewer than `n` bytes arrived before
    /// the timeout; both are distinct from a hard I/O failure.
    async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

/// Transport shared between the dispatcher (I/O) and the supervisor (open/close)
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Box a transport for sharing
pub fn shared(transport: impl Transport + 'static) -> SharedTransport {
    Arc::new(Mutex::new(Box::new(transport)))
}
