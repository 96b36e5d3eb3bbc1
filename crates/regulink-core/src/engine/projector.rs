//! Response projection
//!
//! Turns a decoded response into the domain event collaborators receive,
//! keeping the latest [`EngineParameters`] snapshot along the way.

use chrono::Utc;

use super::EngineParameters;
use crate::events::RegulatorEvent;
use crate::protocol::{Command, ParsedResponse, ProtectionThresholds};

/// Outcome of projecting one response
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Event to publish
    pub event: RegulatorEvent,
    /// What the pending command resolves to
    pub success: bool,
}

/// Holds the current engine snapshot and maps responses to events
#[derive(Debug, Default)]
pub struct Projector {
    parameters: EngineParameters,
}

impl Projector {
    /// Empty snapshot judged against `thresholds`
    pub fn new(thresholds: ProtectionThresholds) -> Self {
        Self {
            parameters: EngineParameters::new(thresholds),
        }
    }

    /// Latest snapshot
    pub fn parameters(&self) -> &EngineParameters {
        &self.parameters
    }

    /// Project a response to the command that produced it
    pub fn project(&mut self, command: &Command, response: ParsedResponse) -> Projection {
        match response {
            ParsedResponse::Telemetry(telemetry) => {
                self.parameters.apply_telemetry(&telemetry, Utc::now());
                Projection {
                    event: RegulatorEvent::DataReceived(self.parameters.clone()),
                    success: true,
                }
            }
            ParsedResponse::Protection(status) => Projection {
                event: RegulatorEvent::ProtectionStatusUpdated(status),
                success: true,
            },
            ParsedResponse::Ack(ack) => {
                if ack.accepted() {
                    if let Command::SetProtectionThresholds(thresholds) = command {
                        self.parameters.set_thresholds(*thresholds);
                    }
                }
                Projection {
                    event: RegulatorEvent::CommandAcknowledged {
                        command: *command,
                        accepted: ack.accepted(),
                        code: ack.status,
                    },
                    success: ack.accepted(),
                }
            }
        }
    }
}
