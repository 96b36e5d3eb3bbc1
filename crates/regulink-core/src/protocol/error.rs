//! Protocol errors

use thiserror::Error;

use super::CommandKind;

/// Failures reported by a [`Transport`](super::Transport)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The port could not be opened
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    /// The device went away mid-exchange
    #[error("I/O fault: {0}")]
    Io(String),

    /// Operation on a closed transport
    #[error("Transport is not open")]
    NotOpen,

    /// Nothing arrived before the read timeout
    #[error("No response within timeout ({expected} bytes expected)")]
    Timeout {
        /// Bytes the read asked for
        expected: usize,
    },

    /// Some bytes arrived, but not enough
    #[error("Short read: got {} of {expected} bytes", received.len())]
    ShortRead {
        /// Bytes the read asked for
        expected: usize,
        /// What arrived before the timeout
        received: Vec<u8>,
    },
}

impl TransportError {
    /// Whether the fault invalidates the connection.
    ///
    /// Timeouts and short reads mean "no response" and are retried by the
    /// dispatcher; everything else hands control to the reconnection
    /// supervisor.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TransportError::Timeout { .. } | TransportError::ShortRead { .. }
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Frame decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// First two bytes are not the start marker
    #[error("Malformed header: expected start marker aa 55, got {found:02x?}")]
    MalformedHeader {
        /// The two bytes read instead
        found: Vec<u8>,
    },

    /// Declared payload length outside `1..=1024`
    #[error("Payload length {0} out of range")]
    LengthOutOfRange(usize),

    /// Checksum byte does not cancel the frame sum
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum byte received
        actual: u8,
    },

    /// Fewer bytes than the header declares
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Full frame length
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// More bytes than the header declares
    #[error("Trailing bytes after checksum: expected {expected} bytes, got {actual}")]
    TrailingBytes {
        /// Full frame length
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Frame is intact but too short for the command it answers
    #[error("{kind:?} response needs at least {expected} payload bytes, got {actual}")]
    PayloadTooShort {
        /// Command the response answers
        kind: CommandKind,
        /// Minimum payload length for `kind`
        expected: usize,
        /// Payload length received
        actual: usize,
    },
}

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Port-level failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Response frame rejected
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// `connect` while not `Disconnected`
    #[error("Already connected")]
    AlreadyConnected,

    /// Configuration failed validation
    #[error("Invalid settings: {0}")]
    Settings(String),

    /// Config file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file contents
    #[error("Settings file error: {0}")]
    Json(#[from] serde_json::Error),
}
