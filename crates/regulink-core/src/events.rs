//! Collaborator-facing events
//!
//! Events are pushed to subscribers over a broadcast channel. Delivery order
//! across different subscribers is not guaranteed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::engine::{EngineParameters, ProtectionStatus};
use crate::protocol::Command;

/// Default capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something collaborators (UI, logging, simulation) may want to know about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegulatorEvent {
    /// `true` when the link became connected, `false` when it dropped
    ConnectionStatusChanged(bool),
    /// Fresh telemetry snapshot
    DataReceived(EngineParameters),
    /// Protection trip flags read back
    ProtectionStatusUpdated(ProtectionStatus),
    /// Human-readable failure description
    ErrorOccurred(String),
    /// A command arrived at a simulated regulator
    CommandReceived(Command),
    /// Setter acknowledged by the regulator
    CommandAcknowledged {
        /// The setter sent
        command: Command,
        /// Status byte was zero
        accepted: bool,
        /// Raw status byte
        code: u8,
    },
}

/// Publish/subscribe handle; clones share the same channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RegulatorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Bus whose slow subscribers lag after `capacity` unread events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receiver for every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RegulatorEvent> {
        self.tx.subscribe()
    }

    /// Publish to every current subscriber; having none is fine
    pub fn publish(&self, event: RegulatorEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }
}
