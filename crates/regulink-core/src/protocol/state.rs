//! Connection state

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

use crate::events::{EventBus, RegulatorEvent};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the transport (initial connect or reconnect attempt)
    Connecting,
    /// Connected and exchanging frames
    Connected,
}

impl ConnectionState {
    /// `true` only in `Connected`
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Shared state flag. A transition and its `ConnectionStatusChanged`
/// notification happen under the same lock.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<ConnectionState>,
    events: EventBus,
}

impl StateCell {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            events,
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&self, next: ConnectionState) -> ConnectionState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let previous = *state;
        *state = next;
        if previous.is_connected() != next.is_connected() {
            info!("connection state {:?} -> {:?}", previous, next);
            self.events
                .publish(RegulatorEvent::ConnectionStatusChanged(next.is_connected()));
        }
        previous
    }

    /// Transition only if the current state is `from`
    pub fn compare_and_transition(&self, from: ConnectionState, next: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return false;
        }
        *state = next;
        if from.is_connected() != next.is_connected() {
            info!("connection state {:?} -> {:?}", from, next);
            self.events
                .publish(RegulatorEvent::ConnectionStatusChanged(next.is_connected()));
        }
        true
    }
}
