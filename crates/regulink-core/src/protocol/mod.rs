//! Serial Protocol Communication
//!
//! Implements the regulator's half-duplex binary request/response protocol:
//! framing and checksums, a serialized command dispatcher, bounded
//! reconnection and background telemetry polling.

pub mod commands;
mod completion;
mod connection;
mod dispatcher;
mod error;
mod packet;
mod poller;
pub mod serial;
mod state;
mod supervisor;
pub mod transport;

pub use commands::{Command, CommandKind, EngineMode, LoadType, ProtectionThresholds};
pub use completion::{CommandHandle, Completion, PendingCommand};
pub use connection::{Connection, ConnectionConfig, ReconnectPolicy, RetryPolicy};
pub use dispatcher::CommandQueue;
pub use error::{DecodeError, ProtocolError, TransportError};
pub use packet::{
    checksum, decode, encode, parse_header, Ack, Frame, FrameBuilder, ParsedResponse,
    TelemetryFrame,
};
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use state::ConnectionState;
pub use transport::Transport;

/// Two-byte start marker opening every frame
pub const START_MARKER: [u8; 2] = [0xAA, 0x55];

/// Inbound header: marker + 16-bit little-endian length
pub const RESPONSE_HEADER_LEN: usize = 4;

/// Sanity bound on a response payload
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// Baud rate fixed by the regulator protocol
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-call read/write timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default telemetry polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Turnaround delay before the first response read in milliseconds
pub const DEFAULT_RESPONSE_DELAY_MS: u64 = 50;
