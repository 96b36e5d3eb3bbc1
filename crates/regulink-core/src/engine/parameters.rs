//! Engine telemetry snapshot with critical-threshold flags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RegulatorFlags;
use crate::protocol::{ProtectionThresholds, TelemetryFrame};

/// Per-field comparison against the protection thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalFlags {
    /// Below `min_oil_pressure`
    pub oil_pressure_low: bool,
    /// Above `max_engine_speed`
    pub engine_speed_high: bool,
    /// Above `max_boost_pressure`
    pub boost_pressure_high: bool,
    /// Above `max_oil_temperature`
    pub oil_temperature_high: bool,
}

impl CriticalFlags {
    /// At least one value is past its threshold
    pub fn any(&self) -> bool {
        self.oil_pressure_low
            || self.engine_speed_high
            || self.boost_pressure_high
            || self.oil_temperature_high
    }
}

/// Latest engine parameters.
///
/// Values and thresholds are only reachable through setters, and every
/// setter recomputes [`CriticalFlags`], so the flags always agree with the
/// current value and threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParameters {
    engine_speed: u16,
    turbo_speed: u16,
    oil_pressure: f64,
    boost_pressure: f64,
    oil_temperature: f64,
    rack_position: f64,
    timestamp: DateTime<Utc>,
    thresholds: ProtectionThresholds,
    critical: CriticalFlags,
    flags: Option<RegulatorFlags>,
}

impl Default for EngineParameters {
    fn default() -> Self {
        Self::new(ProtectionThresholds::default())
    }
}

impl EngineParameters {
    /// Zeroed parameters with the given thresholds
    pub fn new(thresholds: ProtectionThresholds) -> Self {
        let mut params = Self {
            engine_speed: 0,
            turbo_speed: 0,
            oil_pressure: 0.0,
            boost_pressure: 0.0,
            oil_temperature: 0.0,
            rack_position: 0.0,
            timestamp: Utc::now(),
            thresholds,
            critical: CriticalFlags::default(),
            flags: None,
        };
        params.recompute();
        params
    }

    /// Replace all measured values from a telemetry frame
    pub fn apply_telemetry(&mut self, telemetry: &TelemetryFrame, at: DateTime<Utc>) {
        self.engine_speed = telemetry.engine_speed;
        self.turbo_speed = telemetry.turbo_speed;
        self.oil_pressure = telemetry.oil_pressure;
        self.boost_pressure = telemetry.boost_pressure;
        self.oil_temperature = telemetry.oil_temperature;
        self.rack_position = telemetry.rack_position;
        self.flags = telemetry.flags;
        self.timestamp = at;
        self.recompute();
    }

    /// rpm
    pub fn set_engine_speed(&mut self, rpm: u16) {
        self.engine_speed = rpm;
        self.recompute();
    }

    /// rpm; no threshold applies
    pub fn set_turbo_speed(&mut self, rpm: u16) {
        self.turbo_speed = rpm;
    }

    /// bar
    pub fn set_oil_pressure(&mut self, bar: f64) {
        self.oil_pressure = bar;
        self.recompute();
    }

    /// bar
    pub fn set_boost_pressure(&mut self, bar: f64) {
        self.boost_pressure = bar;
        self.recompute();
    }

    /// °C
    pub fn set_oil_temperature(&mut self, celsius: f64) {
        self.oil_temperature = celsius;
        self.recompute();
    }

    /// mm; no threshold applies
    pub fn set_rack_position(&mut self, mm: f64) {
        self.rack_position = mm;
    }

    /// Replace the thresholds and re-evaluate every flag
    pub fn set_thresholds(&mut self, thresholds: ProtectionThresholds) {
        self.thresholds = thresholds;
        self.recompute();
    }

    fn recompute(&mut self) {
        let t = &self.thresholds;
        self.critical = CriticalFlags {
            oil_pressure_low: self.oil_pressure < t.min_oil_pressure,
            engine_speed_high: self.engine_speed > t.max_engine_speed,
            boost_pressure_high: self.boost_pressure > t.max_boost_pressure,
            oil_temperature_high: self.oil_temperature > t.max_oil_temperature,
        };
    }

    /// Engine speed (rpm)
    pub fn engine_speed(&self) -> u16 {
        self.engine_speed
    }

    /// Turbocharger speed (rpm)
    pub fn turbo_speed(&self) -> u16 {
        self.turbo_speed
    }

    /// Oil pressure (bar)
    pub fn oil_pressure(&self) -> f64 {
        self.oil_pressure
    }

    /// Boost pressure (bar)
    pub fn boost_pressure(&self) -> f64 {
        self.boost_pressure
    }

    /// Oil temperature (°C)
    pub fn oil_temperature(&self) -> f64 {
        self.oil_temperature
    }

    /// Fuel rack position (mm)
    pub fn rack_position(&self) -> f64 {
        self.rack_position
    }

    /// When the last telemetry frame arrived
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Thresholds the flags are computed against
    pub fn thresholds(&self) -> &ProtectionThresholds {
        &self.thresholds
    }

    /// Current critical-value flags
    pub fn critical(&self) -> CriticalFlags {
        self.critical
    }

    /// Status bytes from the extended layout, if the regulator sent them
    pub fn regulator_flags(&self) -> Option<RegulatorFlags> {
        self.flags
    }
}
