//! Connection management
//!
//! Handles the connection lifecycle and command submission. A [`Connection`]
//! is an explicitly constructed context: it owns the transport, the command
//! queue and the event bus, and hands them to the dispatcher, poller and
//! supervisor it starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::completion::CommandHandle;
use super::state::StateCell;
use super::supervisor::Supervisor;
use super::transport::{shared, SharedTransport};
use super::{
    Command, CommandQueue, ConnectionState, EngineMode, LoadType, ParsedResponse, ProtocolError,
    ProtectionThresholds, SerialTransport, Transport,
};
use crate::engine::{EngineParameters, Projection, Projector};
use crate::events::{EventBus, RegulatorEvent};
use crate::settings::ComPortSettings;

/// Per-command retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per command, first one included
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// How long the dispatcher sleeps on an empty queue in milliseconds
    pub idle_wait_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 100,
            idle_wait_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay between attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Empty-queue wait
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// Bounded reconnection after a transport fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Wait before each reopen attempt in milliseconds
    pub delay_ms: u64,
    /// Reopen attempts before settling in `Disconnected`
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 2000,
            max_attempts: 3,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before each reopen attempt
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port settings snapshot used on every (re)connect
    pub port: ComPortSettings,
    /// Per-command retries
    pub retry: RetryPolicy,
    /// Reconnection after a hard fault
    pub reconnect: ReconnectPolicy,
    /// Protection status poll period in milliseconds
    pub protection_poll_interval_ms: u64,
    /// Initial thresholds for the critical-value flags
    pub thresholds: ProtectionThresholds,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: ComPortSettings::default(),
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            protection_poll_interval_ms: 5000,
            thresholds: ProtectionThresholds::default(),
        }
    }
}

impl ConnectionConfig {
    /// Default configuration for the named port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port: ComPortSettings::for_port(port_name),
            ..Self::default()
        }
    }

    /// Protection status poll period
    pub fn protection_poll_interval(&self) -> Duration {
        Duration::from_millis(self.protection_poll_interval_ms)
    }

    /// Check the port settings and every period and attempt count the
    /// background tasks run with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.port.validate()?;
        if self.protection_poll_interval_ms == 0 {
            return Err(ProtocolError::Settings(
                "protection poll interval must be non-zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ProtocolError::Settings(
                "retry attempts must be at least 1".into(),
            ));
        }
        if self.retry.idle_wait_ms == 0 {
            return Err(ProtocolError::Settings("idle wait must be non-zero".into()));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ProtocolError::Settings(
                "reconnect attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ProtocolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Shared resources handed to the background activities
pub(crate) struct Link {
    pub transport: SharedTransport,
    pub queue: CommandQueue,
    pub state: StateCell,
    pub events: EventBus,
    config: RwLock<ConnectionConfig>,
    projector: Mutex<Projector>,
}

impl Link {
    /// Disconnected link with a closed queue
    pub fn new(config: ConnectionConfig, transport: impl Transport + 'static, events: EventBus) -> Self {
        Self {
            transport: shared(transport),
            queue: CommandQueue::closed(),
            state: StateCell::new(events.clone()),
            events,
            projector: Mutex::new(Projector::new(config.thresholds)),
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> ConnectionConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn port_settings(&self) -> ComPortSettings {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .port
            .clone()
    }

    fn set_port_settings(&self, settings: ComPortSettings) {
        self.config.write().unwrap_or_else(|e| e.into_inner()).port = settings;
    }

    pub fn project(&self, command: &Command, response: ParsedResponse) -> Projection {
        self.projector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .project(command, response)
    }

    fn parameters(&self) -> EngineParameters {
        self.projector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .parameters()
            .clone()
    }
}

/// Running background session
struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Regulator connection
pub struct Connection {
    link: Arc<Link>,
    /// Serializes connect/disconnect
    session: tokio::sync::Mutex<Option<Session>>,
}

impl Connection {
    /// Create a new connection over a transport (not yet connected)
    pub fn new(config: ConnectionConfig, transport: impl Transport + 'static) -> Self {
        Self::with_events(config, transport, EventBus::default())
    }

    /// Create a connection publishing on an existing event bus
    pub fn with_events(
        config: ConnectionConfig,
        transport: impl Transport + 'static,
        events: EventBus,
    ) -> Self {
        Self {
            link: Arc::new(Link::new(config, transport, events)),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Connection over the serial port named in `config`
    pub fn serial(config: ConnectionConfig) -> Self {
        Self::new(config, SerialTransport::new())
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.link.state.get()
    }

    /// `true` only in `Connected`
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The bus this connection publishes on
    pub fn events(&self) -> EventBus {
        self.link.events.clone()
    }

    /// Receiver for every event published from now on
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RegulatorEvent> {
        self.link.events.subscribe()
    }

    /// Latest engine parameters snapshot
    pub fn parameters(&self) -> EngineParameters {
        self.link.parameters()
    }

    /// Current configuration snapshot
    pub fn config(&self) -> ConnectionConfig {
        self.link.config()
    }

    /// Current port settings
    pub fn settings(&self) -> ComPortSettings {
        self.link.port_settings()
    }

    /// Commands waiting behind the one in flight
    pub fn queue_len(&self) -> usize {
        self.link.queue.len()
    }

    /// Open the transport and start dispatching and polling
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        let mut session = self.session.lock().await;
        if !self
            .link
            .state
            .compare_and_transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(ProtocolError::AlreadyConnected);
        }

        // A previous session that gave up on reconnecting has already finished
        if let Some(old) = session.take() {
            old.cancel.cancel();
            let _ = old.task.await;
        }

        let config = self.link.config();
        if let Err(e) = config.validate() {
            self.link.state.transition(ConnectionState::Disconnected);
            return Err(e);
        }

        let opened = self.link.transport.lock().await.open(&config.port).await;
        if let Err(e) = opened {
            warn!("failed to open {}: {}", config.port.port_name, e);
            self.link.state.transition(ConnectionState::Disconnected);
            self.link
                .events
                .publish(RegulatorEvent::ErrorOccurred(format!("Connection failed: {}", e)));
            return Err(e.into());
        }

        self.link.queue.reopen();
        self.link.state.transition(ConnectionState::Connected);
        info!("connected to {}", config.port.port_name);

        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(self.link.clone(), config);
        let task = tokio::spawn(supervisor.supervise(cancel.clone()));
        *session = Some(Session { cancel, task });
        Ok(())
    }

    /// Stop all background activity, fail every outstanding command and
    /// close the transport
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(running) = session.take() {
            running.cancel.cancel();
            let _ = running.task.await;
        }

        let failed = self.link.queue.close();
        if failed > 0 {
            info!("{} pending commands failed by disconnect", failed);
        }
        self.link.transport.lock().await.close().await;
        self.link.state.transition(ConnectionState::Disconnected);
    }

    /// Replace the port settings; a live connection is dropped first
    pub async fn apply_settings(&self, settings: ComPortSettings) -> Result<(), ProtocolError> {
        settings.validate()?;
        if self.state() != ConnectionState::Disconnected {
            info!("settings changed while connected, disconnecting");
            self.disconnect().await;
        }
        self.link.set_port_settings(settings);
        Ok(())
    }

    /// Queue a command; the handle resolves once it completes or fails
    pub fn submit(&self, command: Command) -> CommandHandle {
        self.link.queue.submit(command)
    }

    /// Queue a command without waiting for its outcome
    pub fn post(&self, command: Command) {
        self.link.queue.post(command);
    }

    /// Queue a command and wait for its outcome
    pub async fn send(&self, command: Command) -> bool {
        self.submit(command).wait().await
    }

    /// Request a telemetry frame
    pub async fn get_parameters(&self) -> bool {
        self.send(Command::GetParameters).await
    }

    /// Request the protection trip flags
    pub async fn get_protection_status(&self) -> bool {
        self.send(Command::GetProtectionStatus).await
    }

    /// Set the target engine speed in rpm
    pub async fn set_engine_speed(&self, rpm: u16) -> bool {
        self.send(Command::SetEngineSpeed(rpm)).await
    }

    /// Set the fuel rack position in millimetres
    pub async fn set_rack_position(&self, mm: f64) -> bool {
        self.send(Command::SetRackPosition(mm)).await
    }

    /// Switch the regulator's operating mode
    pub async fn set_engine_mode(&self, mode: EngineMode) -> bool {
        self.send(Command::SetEngineMode(mode)).await
    }

    /// Select the load the engine drives
    pub async fn set_load_type(&self, kind: LoadType) -> bool {
        self.send(Command::SetLoadType(kind)).await
    }

    /// Set the equipment position index
    pub async fn set_equipment_position(&self, position: u8) -> bool {
        self.send(Command::SetEquipmentPosition(position)).await
    }

    /// Send new protection thresholds; the critical flags follow once acked
    pub async fn set_protection_thresholds(&self, thresholds: ProtectionThresholds) -> bool {
        self.send(Command::SetProtectionThresholds(thresholds)).await
    }

    /// Clear latched protection trips
    pub async fn reset_protection(&self) -> bool {
        self.send(Command::ResetProtection).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Ok(session) = self.session.try_lock() {
            if let Some(running) = session.as_ref() {
                running.cancel.cancel();
            }
        }
        self.link.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::SimulatedRegulator;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.port.baud_rate, 9600);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.retry_delay(), Duration::from_millis(100));
        assert_eq!(config.reconnect.delay(), Duration::from_millis(2000));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.protection_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_connection_state() {
        let conn = Connection::new(ConnectionConfig::default(), SimulatedRegulator::new());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_submit_while_disconnected_fails() {
        let conn = Connection::new(ConnectionConfig::default(), SimulatedRegulator::new());
        assert!(!conn.set_engine_speed(1000).await);
        assert_eq!(conn.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let conn = Connection::new(ConnectionConfig::default(), SimulatedRegulator::new());
        let mut settings = ComPortSettings::for_port("sim");
        settings.polling_interval_ms = 0;
        assert!(matches!(
            conn.apply_settings(settings).await,
            Err(ProtocolError::Settings(_))
        ));
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("regulink.json");
        let mut config = ConnectionConfig::for_port("/dev/ttyUSB1");
        config.retry.max_attempts = 5;
        config.save(&path).unwrap();
        assert_eq!(ConnectionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_config_validate_rejects_zero_periods_and_attempts() {
        assert!(ConnectionConfig::default().validate().is_ok());

        let mut config = ConnectionConfig::default();
        config.protection_poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ProtocolError::Settings(_))));

        let mut config = ConnectionConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ProtocolError::Settings(_))));

        let mut config = ConnectionConfig::default();
        config.retry.idle_wait_ms = 0;
        assert!(matches!(config.validate(), Err(ProtocolError::Settings(_))));

        let mut config = ConnectionConfig::default();
        config.reconnect.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ProtocolError::Settings(_))));
    }

    #[test]
    fn test_config_load_rejects_zero_protection_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regulink.json");
        std::fs::write(
            &path,
            r#"{ "port": { "port_name": "mock0" }, "protection_poll_interval_ms": 0 }"#,
        )
        .unwrap();
        assert!(matches!(
            ConnectionConfig::load(&path),
            Err(ProtocolError::Settings(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let sim = SimulatedRegulator::new();
        let mut config = ConnectionConfig::for_port("sim");
        config.protection_poll_interval_ms = 0;
        let conn = Connection::new(config, sim.clone());
        assert!(matches!(
            conn.connect().await,
            Err(ProtocolError::Settings(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(sim.open_calls(), 0);
    }

    #[test]
    fn test_config_json_roundtrip_with_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{ "reconnect": { "max_attempts": 5 } }"#).unwrap();
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay_ms, 2000);
        assert_eq!(config.retry, RetryPolicy::default());
    }
}
