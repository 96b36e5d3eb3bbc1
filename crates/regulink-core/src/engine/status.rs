//! Protection and regulator status flags

use serde::{Deserialize, Serialize};

/// Which protections are currently tripped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionStatus {
    /// Low oil pressure trip
    pub oil_pressure: bool,
    /// Overspeed trip
    pub engine_speed: bool,
    /// Overboost trip
    pub boost_pressure: bool,
    /// Oil overtemperature trip
    pub oil_temperature: bool,
    /// Every protection is armed
    pub all_enabled: bool,
}

impl ProtectionStatus {
    /// Bytes needed in a `GetProtectionStatus` response
    pub const PAYLOAD_LEN: usize = 2;

    /// Decode from the two status bytes: flags in the low nibble of the
    /// first, the "all enabled" bit in bit 0 of the second.
    pub fn from_status_bytes(flags: u8, enabled: u8) -> Self {
        Self {
            oil_pressure: flags & 0x01 != 0,
            engine_speed: flags & 0x02 != 0,
            boost_pressure: flags & 0x04 != 0,
            oil_temperature: flags & 0x08 != 0,
            all_enabled: enabled & 0x01 != 0,
        }
    }

    /// Inverse of [`from_status_bytes`](Self::from_status_bytes)
    pub fn to_payload(&self) -> Vec<u8> {
        let flags = u8::from(self.oil_pressure)
            | u8::from(self.engine_speed) << 1
            | u8::from(self.boost_pressure) << 2
            | u8::from(self.oil_temperature) << 3;
        vec![flags, u8::from(self.all_enabled)]
    }

    /// Any protection tripped
    pub fn any_tripped(&self) -> bool {
        self.oil_pressure || self.engine_speed || self.boost_pressure || self.oil_temperature
    }
}

/// Status bytes carried by the extended telemetry layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatorFlags {
    /// Fuel limited by boost pressure
    pub boost_limited: bool,
    /// Engine at standstill
    pub stopped: bool,
    /// Overspeed latch
    pub overspeed: bool,
    /// Raw oil alarm bit field
    pub oil_alarm: u8,
    /// Speed the regulator is steering towards (rpm)
    pub target_speed: u16,
}
