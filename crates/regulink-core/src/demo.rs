//! Demo Mode - simulated regulator for testing without hardware
//!
//! [`SimulatedRegulator`] is a [`Transport`] that speaks the regulator's
//! frame protocol. Telemetry drifts realistically around the commanded
//! state, setters are applied and acknowledged, and protections trip when
//! a value crosses its threshold. Clones share the same simulated device,
//! so a test can keep one clone for scripting while the connection owns
//! another.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::engine::{ProtectionStatus, RegulatorFlags};
use crate::events::{EventBus, RegulatorEvent};
use crate::protocol::{
    checksum, Command, CommandKind, EngineMode, Frame, LoadType, ProtectionThresholds,
    TelemetryFrame, Transport, TransportError, START_MARKER,
};
use crate::settings::ComPortSettings;

/// Ack status for a setter the simulated regulator refuses
pub const STATUS_REJECTED: u8 = 0x01;

/// Engine speed at idle (rpm)
const IDLE_SPEED: f64 = 600.0;

/// Commanded speed after power-up (rpm)
const DEFAULT_TARGET_SPEED: u16 = 1500;

/// How fast the engine follows its target (fraction per second)
const SPEED_RESPONSE: f64 = 0.8;

/// Turbocharger rpm per bar of boost
const TURBO_RPM_PER_BAR: f64 = 15_000.0;

/// Turbocharger overspeed limit (rpm)
const MAX_TURBO_SPEED: f64 = 60_000.0;

struct Engine {
    mode: EngineMode,
    load: LoadType,
    equipment_position: u8,
    target_speed: u16,
    speed: f64,
    rack: f64,
    oil_temperature: f64,
    thresholds: ProtectionThresholds,
    /// Latched until ResetProtection
    tripped: ProtectionStatus,
    last_update: Option<Instant>,
}

impl Engine {
    fn new() -> Self {
        Self {
            mode: EngineMode::Idle,
            load: LoadType::NoLoad,
            equipment_position: 0,
            target_speed: DEFAULT_TARGET_SPEED,
            speed: IDLE_SPEED,
            rack: 4.0,
            oil_temperature: 40.0,
            thresholds: ProtectionThresholds::default(),
            tripped: ProtectionStatus {
                all_enabled: true,
                ..ProtectionStatus::default()
            },
            last_update: None,
        }
    }

    fn target(&self) -> f64 {
        match self.mode {
            EngineMode::Stop => 0.0,
            EngineMode::Idle => IDLE_SPEED,
            EngineMode::Power => f64::from(self.target_speed),
        }
    }

    fn load_factor(&self) -> f64 {
        match self.load {
            LoadType::NoLoad => 0.2,
            LoadType::Generator => 0.6,
            LoadType::Propeller => (self.speed / 2000.0).powi(2).min(1.0),
        }
    }

    fn oil_pressure(&self) -> f64 {
        if self.speed < 50.0 {
            0.0
        } else {
            1.2 + self.speed / 600.0
        }
    }

    fn boost_pressure(&self) -> f64 {
        (self.speed / 1000.0 * self.load_factor() * 2.0).max(0.0)
    }

    fn turbo_speed(&self) -> f64 {
        (self.boost_pressure() * TURBO_RPM_PER_BAR).min(MAX_TURBO_SPEED)
    }

    /// Advance the model to `now` with some noise
    fn update(&mut self, now: Instant, rng: &mut StdRng) {
        let dt = self
            .last_update
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0)
            .min(5.0);
        self.last_update = Some(now);

        let target = self.target();
        let step = (SPEED_RESPONSE * dt).min(1.0);
        self.speed += (target - self.speed) * step;
        if self.mode != EngineMode::Stop {
            self.speed += rng.gen_range(-5.0..5.0);
        }
        self.speed = self.speed.max(0.0);

        let rack_target = 2.0 + 10.0 * self.load_factor();
        self.rack += (rack_target - self.rack) * step + rng.gen_range(-0.02..0.02);
        self.rack = self.rack.clamp(0.0, 20.0);

        let temp_target = 40.0 + 45.0 * self.load_factor() + self.speed / 100.0;
        self.oil_temperature += (temp_target - self.oil_temperature) * (0.05 * dt).min(1.0);

        self.check_protections();
    }

    fn check_protections(&mut self) {
        let t = self.thresholds;
        if self.mode != EngineMode::Stop && self.oil_pressure() < t.min_oil_pressure {
            self.tripped.oil_pressure = true;
        }
        if self.speed > f64::from(t.max_engine_speed) {
            self.tripped.engine_speed = true;
        }
        if self.boost_pressure() > t.max_boost_pressure {
            self.tripped.boost_pressure = true;
        }
        if self.oil_temperature > t.max_oil_temperature {
            self.tripped.oil_temperature = true;
        }
    }

    fn telemetry(&self, extended: bool) -> TelemetryFrame {
        let flags = extended.then(|| RegulatorFlags {
            boost_limited: self.boost_pressure() >= self.thresholds.max_boost_pressure,
            stopped: self.mode == EngineMode::Stop,
            overspeed: self.tripped.engine_speed,
            oil_alarm: u8::from(self.tripped.oil_pressure) | u8::from(self.tripped.oil_temperature) << 1,
            target_speed: self.target() as u16,
        });
        TelemetryFrame {
            engine_speed: self.speed.round() as u16,
            turbo_speed: self.turbo_speed().round() as u16,
            oil_pressure: self.oil_pressure(),
            boost_pressure: self.boost_pressure(),
            oil_temperature: self.oil_temperature,
            rack_position: self.rack,
            flags,
        }
    }

    /// Apply a setter, returning the ack status
    fn apply(&mut self, command: &Command) -> u8 {
        match *command {
            Command::SetEngineSpeed(rpm) => {
                if rpm > self.thresholds.max_engine_speed {
                    return STATUS_REJECTED;
                }
                self.target_speed = rpm;
                if self.mode == EngineMode::Idle {
                    self.mode = EngineMode::Power;
                }
            }
            Command::SetRackPosition(mm) => self.rack = mm,
            Command::SetEngineMode(mode) => self.mode = mode,
            Command::SetLoadType(load) => self.load = load,
            Command::SetEquipmentPosition(position) => self.equipment_position = position,
            Command::SetProtectionThresholds(thresholds) => self.thresholds = thresholds,
            Command::ResetProtection => {
                self.tripped = ProtectionStatus {
                    all_enabled: true,
                    ..ProtectionStatus::default()
                };
            }
            Command::GetParameters | Command::GetProtectionStatus => {}
        }
        0
    }
}

struct Device {
    open: bool,
    engine: Engine,
    rng: StdRng,
    extended: bool,
    /// Request waiting to be answered on the next read
    request: Option<Command>,
    rx: VecDeque<u8>,
    events: Option<EventBus>,
    /// Scripted faults
    failing_opens: u32,
    silent_replies: u32,
    rejections: HashMap<CommandKind, u8>,
    open_calls: u32,
    writes: u32,
}

impl Device {
    fn answer(&mut self, command: Command) -> Frame {
        self.engine.update(Instant::now(), &mut self.rng);

        match command {
            Command::GetParameters => {
                Frame::response(&self.engine.telemetry(self.extended).to_payload())
            }
            Command::GetProtectionStatus => Frame::response(&self.engine.tripped.to_payload()),
            setter => {
                let status = match self.rejections.get(&setter.kind()) {
                    Some(status) => *status,
                    None => self.engine.apply(&setter),
                };
                Frame::response(&[status])
            }
        }
    }
}

/// Simulated regulator speaking the frame protocol
#[derive(Clone)]
pub struct SimulatedRegulator {
    device: Arc<Mutex<Device>>,
}

impl Default for SimulatedRegulator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRegulator {
    /// Create a simulator answering with the extended telemetry layout
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic noise
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        let device = Device {
            open: false,
            engine: Engine::new(),
            rng,
            extended: true,
            request: None,
            rx: VecDeque::new(),
            events: None,
            failing_opens: 0,
            silent_replies: 0,
            rejections: HashMap::new(),
            open_calls: 0,
            writes: 0,
        };
        Self {
            device: Arc::new(Mutex::new(device)),
        }
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `CommandReceived` for every decoded request
    pub fn with_events(self, events: EventBus) -> Self {
        self.device().events = Some(events);
        self
    }

    /// Answer telemetry with the 12-byte compact layout
    pub fn compact(self) -> Self {
        self.device().extended = false;
        self
    }

    /// Fail the next `count` open calls
    pub fn fail_opens(&self, count: u32) {
        self.device().failing_opens = count;
    }

    /// Swallow the next `count` requests without replying
    pub fn drop_replies(&self, count: u32) {
        self.device().silent_replies = count;
    }

    /// Answer every setter of `kind` with `status` instead of applying it
    pub fn reject(&self, kind: CommandKind, status: u8) {
        self.device().rejections.insert(kind, status);
    }

    /// Simulate the cable being pulled
    pub fn unplug(&self) {
        let mut device = self.device();
        device.open = false;
        device.request = None;
        device.rx.clear();
    }

    /// Times `open` was called, failed attempts included
    pub fn open_calls(&self) -> u32 {
        self.device().open_calls
    }

    /// Request frames received
    pub fn writes(&self) -> u32 {
        self.device().writes
    }

    /// Current operating mode
    pub fn mode(&self) -> EngineMode {
        self.device().engine.mode
    }

    /// Current load
    pub fn load_type(&self) -> LoadType {
        self.device().engine.load
    }

    /// Last accepted speed setpoint (rpm)
    pub fn target_speed(&self) -> u16 {
        self.device().engine.target_speed
    }

    /// Current rack position (mm)
    pub fn rack_position(&self) -> f64 {
        self.device().engine.rack
    }

    /// Last accepted equipment position
    pub fn equipment_position(&self) -> u8 {
        self.device().engine.equipment_position
    }

    /// Thresholds the simulated protections trip on
    pub fn thresholds(&self) -> ProtectionThresholds {
        self.device().engine.thresholds
    }

    /// Latched protection trips
    pub fn protection(&self) -> ProtectionStatus {
        self.device().engine.tripped
    }
}

/// Split a request frame into command code and payload
fn parse_request(bytes: &[u8]) -> Option<(u8, &[u8])> {
    if bytes.len() < 6 || bytes[..2] != START_MARKER {
        return None;
    }
    let code = bytes[2];
    let length = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
    if bytes.len() != 5 + length + 1 {
        return None;
    }
    let (body, ck) = bytes[2..].split_at(bytes.len() - 3);
    if checksum(body) != ck[0] {
        return None;
    }
    Some((code, &bytes[5..5 + length]))
}

#[async_trait]
impl Transport for SimulatedRegulator {
    async fn open(&mut self, settings: &ComPortSettings) -> Result<(), TransportError> {
        let mut device = self.device();
        device.open_calls += 1;
        if device.failing_opens > 0 {
            device.failing_opens -= 1;
            return Err(TransportError::PortUnavailable(format!(
                "{}: simulated open failure",
                settings.port_name
            )));
        }
        debug!("simulated regulator opened as {}", settings.port_name);
        device.open = true;
        device.request = None;
        device.rx.clear();
        Ok(())
    }

    async fn close(&mut self) {
        let mut device = self.device();
        device.open = false;
        device.request = None;
        device.rx.clear();
    }

    fn is_open(&self) -> bool {
        self.device().open
    }

    async fn discard_buffers(&mut self) -> Result<(), TransportError> {
        let mut device = self.device();
        if !device.open {
            return Err(TransportError::NotOpen);
        }
        // The reply is produced on the first read, so nothing pending survives
        device.rx.clear();
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut device = self.device();
        if !device.open {
            return Err(TransportError::NotOpen);
        }
        device.writes += 1;

        let Some(command) = parse_request(bytes).and_then(|(code, payload)| Command::from_request(code, payload)) else {
            debug!("simulated regulator ignoring invalid request {:02x?}", bytes);
            device.request = None;
            return Ok(());
        };

        trace!("simulated regulator received {:?}", command);
        if let Some(events) = &device.events {
            events.publish(RegulatorEvent::CommandReceived(command));
        }
        if device.silent_replies > 0 {
            device.silent_replies -= 1;
            device.request = None;
        } else {
            device.request = Some(command);
        }
        Ok(())
    }

    async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let received = {
            let mut device = self.device();
            if !device.open {
                return Err(TransportError::NotOpen);
            }
            if let Some(command) = device.request.take() {
                let reply = device.answer(command);
                device.rx.extend(reply.as_bytes());
            }
            let take = n.min(device.rx.len());
            device.rx.drain(..take).collect::<Vec<u8>>()
        };

        if received.len() == n {
            return Ok(received);
        }
        tokio::time::sleep(timeout).await;
        if received.is_empty() {
            Err(TransportError::Timeout { expected: n })
        } else {
            Err(TransportError::ShortRead { expected: n, received })
        }
    }
}
