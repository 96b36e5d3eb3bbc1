//! Protocol commands
//!
//! Defines the commands understood by the regulator and their request payloads.

use serde::{Deserialize, Serialize};

use super::FrameBuilder;

/// Fixed-point factor for pressures and rack position (two decimals)
pub const HUNDREDTHS: f64 = 100.0;

/// Fixed-point factor for temperatures (one decimal)
pub const TENTHS: f64 = 10.0;

/// Engine operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    /// Engine shut down
    Stop,
    /// Idle speed, no load control
    Idle,
    /// Speed regulation under load
    Power,
}

impl EngineMode {
    /// Wire byte
    pub fn to_byte(self) -> u8 {
        match self {
            EngineMode::Stop => 0,
            EngineMode::Idle => 1,
            EngineMode::Power => 2,
        }
    }

    /// Parse a wire byte; `None` for unknown modes
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(EngineMode::Stop),
            1 => Some(EngineMode::Idle),
            2 => Some(EngineMode::Power),
            _ => None,
        }
    }
}

/// Kind of load driven by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadType {
    /// Decoupled
    NoLoad,
    /// Constant-speed generator set
    Generator,
    /// Propeller curve, load rises with speed
    Propeller,
}

impl LoadType {
    /// Wire byte
    pub fn to_byte(self) -> u8 {
        match self {
            LoadType::NoLoad => 0,
            LoadType::Generator => 1,
            LoadType::Propeller => 2,
        }
    }

    /// Parse a wire byte; `None` for unknown load types
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(LoadType::NoLoad),
            1 => Some(LoadType::Generator),
            2 => Some(LoadType::Propeller),
            _ => None,
        }
    }
}

/// Protection trip points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectionThresholds {
    /// Oil pressure below this is critical (bar)
    pub min_oil_pressure: f64,
    /// Engine speed above this is critical (rpm)
    pub max_engine_speed: u16,
    /// Boost pressure above this is critical (bar)
    pub max_boost_pressure: f64,
    /// Oil temperature above this is critical (°C)
    pub max_oil_temperature: f64,
}

impl Default for ProtectionThresholds {
    fn default() -> Self {
        Self {
            min_oil_pressure: 1.5,
            max_engine_speed: 1900,
            max_boost_pressure: 2.5,
            max_oil_temperature: 110.0,
        }
    }
}

/// Fieldless command discriminant, used to interpret the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// `0x01`, answered with telemetry
    GetParameters,
    /// `0x02`
    SetEngineSpeed,
    /// `0x03`
    SetRackPosition,
    /// `0x04`
    SetEngineMode,
    /// `0x05`
    SetLoadType,
    /// `0x06`
    SetEquipmentPosition,
    /// `0x07`, answered with two status bytes
    GetProtectionStatus,
    /// `0x08`
    SetProtectionThresholds,
    /// `0x09`
    ResetProtection,
}

impl CommandKind {
    /// Command code byte on the wire
    pub fn code(self) -> u8 {
        match self {
            CommandKind::GetParameters => 0x01,
            CommandKind::SetEngineSpeed => 0x02,
            CommandKind::SetRackPosition => 0x03,
            CommandKind::SetEngineMode => 0x04,
            CommandKind::SetLoadType => 0x05,
            CommandKind::SetEquipmentPosition => 0x06,
            CommandKind::GetProtectionStatus => 0x07,
            CommandKind::SetProtectionThresholds => 0x08,
            CommandKind::ResetProtection => 0x09,
        }
    }

    /// Inverse of [`code`](Self::code)
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => CommandKind::GetParameters,
            0x02 => CommandKind::SetEngineSpeed,
            0x03 => CommandKind::SetRackPosition,
            0x04 => CommandKind::SetEngineMode,
            0x05 => CommandKind::SetLoadType,
            0x06 => CommandKind::SetEquipmentPosition,
            0x07 => CommandKind::GetProtectionStatus,
            0x08 => CommandKind::SetProtectionThresholds,
            0x09 => CommandKind::ResetProtection,
            _ => return None,
        })
    }
}

/// Commands for regulator communication
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Request a telemetry snapshot
    GetParameters,
    /// Target engine speed in rpm
    SetEngineSpeed(u16),
    /// Fuel rack position in mm
    SetRackPosition(f64),
    /// Operating mode
    SetEngineMode(EngineMode),
    /// Load the engine drives
    SetLoadType(LoadType),
    /// Equipment position index
    SetEquipmentPosition(u8),
    /// Request the protection trip flags
    GetProtectionStatus,
    /// Replace the protection trip points
    SetProtectionThresholds(ProtectionThresholds),
    /// Clear latched trips
    ResetProtection,
}

impl Command {
    /// Fieldless discriminant
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::GetParameters => CommandKind::GetParameters,
            Command::SetEngineSpeed(_) => CommandKind::SetEngineSpeed,
            Command::SetRackPosition(_) => CommandKind::SetRackPosition,
            Command::SetEngineMode(_) => CommandKind::SetEngineMode,
            Command::SetLoadType(_) => CommandKind::SetLoadType,
            Command::SetEquipmentPosition(_) => CommandKind::SetEquipmentPosition,
            Command::GetProtectionStatus => CommandKind::GetProtectionStatus,
            Command::SetProtectionThresholds(_) => CommandKind::SetProtectionThresholds,
            Command::ResetProtection => CommandKind::ResetProtection,
        }
    }

    /// Command code byte on the wire
    pub fn code(&self) -> u8 {
        self.kind().code()
    }

    /// Build the request payload (empty for queries)
    pub fn payload(&self) -> Vec<u8> {
        let builder = FrameBuilder::new();
        match *self {
            Command::GetParameters | Command::GetProtectionStatus | Command::ResetProtection => {
                builder
            }
            Command::SetEngineSpeed(rpm) => builder.u16_le(rpm),
            Command::SetRackPosition(mm) => builder.u16_le(to_fixed(mm, HUNDREDTHS)),
            Command::SetEngineMode(mode) => builder.byte(mode.to_byte()),
            Command::SetLoadType(kind) => builder.byte(kind.to_byte()),
            Command::SetEquipmentPosition(pos) => builder.byte(pos),
            Command::SetProtectionThresholds(t) => builder
                .u16_le(to_fixed(t.min_oil_pressure, HUNDREDTHS))
                .u16_le(t.max_engine_speed)
                .u16_le(to_fixed(t.max_boost_pressure, HUNDREDTHS))
                .u16_le(to_fixed(t.max_oil_temperature, TENTHS)),
        }
        .into_payload()
    }

    /// Parse a request payload back into a command (used by the simulator)
    pub fn from_request(code: u8, payload: &[u8]) -> Option<Self> {
        let u16_at = |i: usize| -> Option<u16> {
            payload
                .get(i..i + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
        };
        let kind = CommandKind::from_code(code)?;
        Some(match kind {
            CommandKind::GetParameters => Command::GetParameters,
            CommandKind::GetProtectionStatus => Command::GetProtectionStatus,
            CommandKind::ResetProtection => Command::ResetProtection,
            CommandKind::SetEngineSpeed => Command::SetEngineSpeed(u16_at(0)?),
            CommandKind::SetRackPosition => {
                Command::SetRackPosition(from_fixed(u16_at(0)?, HUNDREDTHS))
            }
            CommandKind::SetEngineMode => {
                Command::SetEngineMode(EngineMode::from_byte(*payload.first()?)?)
            }
            CommandKind::SetLoadType => Command::SetLoadType(LoadType::from_byte(*payload.first()?)?),
            CommandKind::SetEquipmentPosition => Command::SetEquipmentPosition(*payload.first()?),
            CommandKind::SetProtectionThresholds => {
                Command::SetProtectionThresholds(ProtectionThresholds {
                    min_oil_pressure: from_fixed(u16_at(0)?, HUNDREDTHS),
                    max_engine_speed: u16_at(2)?,
                    max_boost_pressure: from_fixed(u16_at(4)?, HUNDREDTHS),
                    max_oil_temperature: from_fixed(u16_at(6)?, TENTHS),
                })
            }
        })
    }
}

/// Scale a physical value into a u16 fixed-point field, saturating at the range ends
pub fn to_fixed(value: f64, factor: f64) -> u16 {
    let scaled = (value * factor).round();
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= f64::from(u16::MAX) {
        u16::MAX
    } else {
        scaled as u16
    }
}

/// Recover a physical value from a u16 fixed-point field
pub fn from_fixed(raw: u16, factor: f64) -> f64 {
    f64::from(raw) / factor
}
