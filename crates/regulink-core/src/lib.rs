//! # Regulink Core Library
//!
//! Core functionality for talking to diesel engine speed regulators over a
//! serial line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding/decoding with checksums
//! - A serialized command queue with retries and completion handles
//! - Bounded automatic reconnection after transport faults
//! - Background telemetry and protection-status polling
//! - Projection of responses into engine parameters and events
//! - A simulated regulator for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use regulink_core::prelude::*;
//!
//! let conn = Connection::serial(ConnectionConfig::for_port("/dev/ttyUSB0"));
//! let mut events = conn.subscribe();
//! conn.connect().await?;
//!
//! conn.set_engine_speed(1200).await;
//! while let Ok(event) = events.recv().await {
//!     if let RegulatorEvent::DataReceived(params) = event {
//!         println!("RPM: {}", params.engine_speed());
//!     }
//! }
//! ```

pub mod demo;
pub mod engine;
pub mod events;
pub mod protocol;
pub mod settings;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::SimulatedRegulator;
    pub use crate::engine::{EngineParameters, ProtectionStatus};
    pub use crate::events::{EventBus, RegulatorEvent};
    pub use crate::protocol::{
        Command, CommandHandle, Connection, ConnectionConfig, ConnectionState, EngineMode,
        LoadType, ProtectionThresholds, ProtocolError, Transport,
    };
    pub use crate::settings::ComPortSettings;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
