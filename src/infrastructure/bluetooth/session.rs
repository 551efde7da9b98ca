//! GATT Session State Machine
//!
//! ```text
//!  Idle ──match──▶ Connecting ──link up──▶ ServicesDiscovering ──NUS found──▶ Ready
//!   ▲                  │                          │                            │
//!   │                  └──────── non-success ─────┴──────────▶ Failed          │ link lost
//!   │                                                             │            ▼
//!   └──────────────── disconnect / re-scan ───────────────────────┴──── Disconnected
//! ```
//!
//! [`SessionMachine`] is the single writer of session state. Every input, be
//! it a user command, a radio completion or a timer, goes through
//! [`SessionMachine::handle`] one at a time.

use crate::domain::error::{BleError, TimeoutStage};
use crate::domain::event_log::EventLog;
use crate::domain::matcher::matches_target;
use crate::domain::models::{
    LogDirection, PeripheralIdentity, SessionId, SessionSnapshot, SessionState, UserCommand,
    DEFAULT_MTU,
};
use crate::domain::settings::{Settings, TimeoutSettings};
use crate::infrastructure::bluetooth::protocol::{
    self, CCCD_UUID, ENABLE_NOTIFICATION_VALUE, UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID,
};
use crate::infrastructure::bluetooth::provider::{
    CharacteristicRef, DiscoveredService, GattProvider, GattStatus, LinkState,
    ProviderCapabilities, RadioEvent, WriteMode,
};
use crate::infrastructure::platform::PlatformAccess;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Everything the session actor consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Command(UserCommand),
    Radio(RadioEvent),
    Timeout { stage: TimeoutStage, key: TimerKey },
    Shutdown,
}

/// Identifies which scan round or session a timer was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKey {
    Scan(u64),
    Session(SessionId),
}

/// A timer the actor must arm on the machine's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub stage: TimeoutStage,
    pub key: TimerKey,
    pub after: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device_name_filter: String,
    pub mtu_target: u16,
    pub timeouts: TimeoutSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name_filter: protocol::DEFAULT_DEVICE_NAME.to_string(),
            mtu_target: protocol::MTU_TARGET,
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            device_name_filter: settings.device_name_filter.clone(),
            mtu_target: settings.mtu_target,
            timeouts: settings.timeouts.clone(),
        }
    }
}

/// The live connection.
#[derive(Debug)]
struct OpenSession {
    id: SessionId,
    device_name: Option<String>,
    rx: Option<CharacteristicRef>,
    tx: Option<CharacteristicRef>,
    mtu: u16,
    descriptor_pending: bool,
    mtu_pending: bool,
}

impl OpenSession {
    fn new(id: SessionId, device_name: Option<String>) -> Self {
        Self {
            id,
            device_name,
            rx: None,
            tx: None,
            mtu: DEFAULT_MTU,
            descriptor_pending: false,
            mtu_pending: false,
        }
    }
}

pub struct SessionMachine<P, A> {
    provider: P,
    access: A,
    log: Arc<EventLog>,
    config: SessionConfig,
    capabilities: ProviderCapabilities,
    state: SessionState,
    scanning: bool,
    scan_round: u64,
    session: Option<OpenSession>,
    last_session_id: u64,
    timers: Vec<TimerRequest>,
}

impl<P: GattProvider, A: PlatformAccess> SessionMachine<P, A> {
    /// Create an idle machine; provider capabilities are read once here.
    pub fn new(provider: P, access: A, log: Arc<EventLog>, config: SessionConfig) -> Self {
        let capabilities = provider.capabilities();
        debug!("Provider capabilities: {:?}", capabilities);
        Self {
            provider,
            access,
            log,
            config,
            capabilities,
            state: SessionState::Idle,
            scanning: false,
            scan_round: 0,
            session: None,
            last_session_id: 0,
            timers: Vec::new(),
        }
    }

    /// Apply one input
    pub fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::Command(command) => self.handle_command(command),
            SessionInput::Radio(event) => self.handle_radio(event),
            SessionInput::Timeout { stage, key } => self.handle_timeout(stage, key),
            SessionInput::Shutdown => self.shutdown(),
        }
    }

    /// Current session state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether a scan is running
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// State for the display layer
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            scanning: self.scanning,
            connected: self.state == SessionState::Ready,
            device_name: self.session.as_ref().and_then(|s| s.device_name.clone()),
            mtu: self.session.as_ref().map_or(DEFAULT_MTU, |s| s.mtu),
        }
    }

    /// Timers requested since the last call.
    pub fn take_timers(&mut self) -> Vec<TimerRequest> {
        std::mem::take(&mut self.timers)
    }

    /// The radio in use
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn current_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    fn schedule(&mut self, stage: TimeoutStage, key: TimerKey, after: Option<Duration>) {
        if let Some(after) = after {
            self.timers.push(TimerRequest { stage, key, after });
        }
    }

    fn handle_command(&mut self, command: UserCommand) {
        match command {
            UserCommand::StartScan => {
                if let Err(e) = self.start_scan() {
                    debug!("Scan not started: {}", e);
                }
            }
            UserCommand::StopScan => self.stop_scan(),
            UserCommand::Disconnect => self.disconnect(),
            UserCommand::SendText(text) => {
                let _ = self.send_text(&text);
            }
            UserCommand::SendByte(value) => {
                let _ = self.send_byte(value);
            }
            UserCommand::ClearLog => self.log.clear(),
        }
    }

    /* ---------------- Scan ---------------- */

    /// Start scanning for the configured name filter
    pub fn start_scan(&mut self) -> Result<(), BleError> {
        if self.state.is_open() {
            warn!("Scan rejected while session is {}", self.state);
            return Err(BleError::SessionBusy);
        }
        if self.scanning {
            return Ok(());
        }

        if !self.access.has_required_permissions() {
            self.access.request_permissions();
            self.log.warn("Bluetooth permissions missing; requested them");
            return Err(BleError::PermissionDenied);
        }
        if self.access.location_service_required() && !self.access.is_location_service_enabled() {
            self.access.prompt_enable_location();
            self.log.warn("Location services are off; BLE scanning needs them");
            return Err(BleError::LocationDisabled);
        }
        if let Err(e) = self.provider.check_adapter() {
            error!("Adapter check failed: {}", e);
            self.report(&e);
            return Err(e);
        }

        if !matches!(self.state, SessionState::Idle) {
            debug!("Re-arming from {}", self.state);
            self.state = SessionState::Idle;
        }

        let filter = self.config.device_name_filter.clone();
        if let Err(e) = self.provider.start_scan(&filter) {
            error!("Failed to start scan: {}", e);
            self.report(&e);
            return Err(e);
        }

        self.scanning = true;
        self.scan_round += 1;
        info!("Scanning for name containing '{}'", filter);
        self.log
            .info(format!("Scanning… looking for name containing '{}'", filter));
        let round = self.scan_round;
        let after = self.config.timeouts.scan();
        self.schedule(TimeoutStage::Scan, TimerKey::Scan(round), after);
        Ok(())
    }

    /// Stop scanning
    pub fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        if let Err(e) = self.provider.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
        info!("Scanning stopped");
        self.log.info("Scanning stopped.");
    }

    fn on_device_discovered(&mut self, peripheral: PeripheralIdentity) {
        if !self.scanning {
            trace!("Discovery outside a scan ignored: {}", peripheral.handle);
            return;
        }
        debug!(
            "Found: addr={} rssi={} name(dev)={} name(rec)={}",
            peripheral.handle,
            peripheral.rssi,
            peripheral.device_name.as_deref().unwrap_or("-"),
            peripheral.advertised_name.as_deref().unwrap_or("-"),
        );

        let filter = &self.config.device_name_filter;
        if !matches_target(
            peripheral.device_name.as_deref(),
            peripheral.advertised_name.as_deref(),
            filter,
        ) {
            return;
        }

        info!("Match '{}' → {}", filter, peripheral.handle);
        self.log.info(format!(
            "Match '{}' → connecting to {}",
            filter,
            peripheral.display_name().unwrap_or("(unknown)")
        ));
        // The radio never scans and connects at the same time.
        self.stop_scan();
        self.connect(peripheral);
    }

    fn on_scan_failed(&mut self, code: i32) {
        error!("Scan failed: {}", code);
        self.scanning = false;
        self.report(&BleError::ScanFailed(code));
    }

    /* ---------------- GATT + NUS ---------------- */

    fn connect(&mut self, peripheral: PeripheralIdentity) {
        if !self.state.accepts_connect() {
            warn!("Connect rejected while session is {}", self.state);
            return;
        }

        self.last_session_id += 1;
        let id = SessionId(self.last_session_id);
        self.session = Some(OpenSession::new(
            id,
            peripheral.display_name().map(str::to_string),
        ));
        self.state = SessionState::Connecting;
        info!("Connecting session {} to {}", id, peripheral.handle);

        match self.provider.connect(id, peripheral.handle) {
            Ok(()) => {
                let after = self.config.timeouts.connect();
                self.schedule(TimeoutStage::Connect, TimerKey::Session(id), after);
            }
            Err(e) => self.fail(e),
        }
    }

    fn handle_radio(&mut self, event: RadioEvent) {
        if let Some(id) = event.session() {
            if self.current_id() != Some(id) {
                debug!("Ignoring stale event for session {}: {:?}", id, event);
                return;
            }
        }

        match event {
            RadioEvent::DeviceDiscovered(peripheral) => self.on_device_discovered(peripheral),
            RadioEvent::ScanFailed { code } => self.on_scan_failed(code),
            RadioEvent::ConnectionChanged {
                session,
                status,
                link,
                device_name,
            } => self.on_connection_changed(session, status, link, device_name),
            RadioEvent::ServicesDiscovered {
                session,
                status,
                services,
            } => self.on_services_discovered(session, status, services),
            RadioEvent::DescriptorWritten { status, .. } => self.on_descriptor_written(status),
            RadioEvent::CharacteristicWritten {
                characteristic,
                status,
                ..
            } => {
                if status.is_success() {
                    trace!("Write to {} acknowledged", characteristic);
                } else {
                    self.fail(BleError::WriteFailed(status.0));
                }
            }
            RadioEvent::MtuChanged { mtu, status, .. } => self.on_mtu_changed(mtu, status),
            RadioEvent::Notification {
                characteristic,
                value,
                ..
            } => self.on_notification(characteristic, &value),
        }
    }

    fn on_connection_changed(
        &mut self,
        id: SessionId,
        status: GattStatus,
        link: LinkState,
        device_name: Option<String>,
    ) {
        if !status.is_success() {
            self.fail(BleError::ConnectionError(status.0));
            return;
        }

        match link {
            LinkState::Connected => {
                if self.state != SessionState::Connecting {
                    debug!("Duplicate connect event in {}", self.state);
                    return;
                }
                if let (Some(session), Some(name)) = (self.session.as_mut(), device_name) {
                    session.device_name = Some(name);
                }
                self.state = SessionState::ServicesDiscovering;
                info!("Session {} connected", id);
                self.log.info("Connected → discovering services…");

                match self.provider.discover_services(id) {
                    Ok(()) => {
                        let after = self.config.timeouts.discovery();
                        self.schedule(TimeoutStage::ServiceDiscovery, TimerKey::Session(id), after);
                    }
                    Err(e) => self.fail(e),
                }
            }
            LinkState::Disconnected => self.on_link_lost(),
        }
    }

    fn on_link_lost(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Session {} disconnected", session.id);
            self.provider.close(session.id);
        }
        self.state = SessionState::Disconnected;
        self.log.info("Disconnected");
    }

    fn on_services_discovered(
        &mut self,
        id: SessionId,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    ) {
        if self.state != SessionState::ServicesDiscovering {
            debug!("Service list ignored in {}", self.state);
            return;
        }
        if !status.is_success() {
            self.fail(BleError::ServiceDiscoveryFailed(status.0));
            return;
        }

        let Some(service) = services.iter().find(|s| s.uuid == UART_SERVICE_UUID) else {
            self.fail(BleError::RequiredServiceMissing);
            return;
        };
        let resolve = |uuid| {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .map(|c| CharacteristicRef {
                    service: service.uuid,
                    uuid: c.uuid,
                    descriptors: c.descriptors.clone(),
                })
        };

        let (rx, tx) = match (resolve(UART_RX_UUID), resolve(UART_TX_UUID)) {
            (Some(rx), Some(tx)) => (rx, tx),
            (None, _) => {
                self.fail(BleError::RequiredCharacteristicMissing(UART_RX_UUID));
                return;
            }
            (_, None) => {
                self.fail(BleError::RequiredCharacteristicMissing(UART_TX_UUID));
                return;
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.rx = Some(rx);
            session.tx = Some(tx.clone());
        }
        self.state = SessionState::Ready;
        info!("Session {} ready", id);
        self.enter_ready(id, &tx);
    }

    fn enter_ready(&mut self, id: SessionId, tx: &CharacteristicRef) {
        if let Err(e) = self.provider.set_notify(id, tx, true) {
            warn!("set_notify failed: {}", e);
            self.log.warn(format!("Enabling notifications failed: {}", e));
        }

        if tx.has_descriptor(CCCD_UUID) {
            match self
                .provider
                .write_descriptor(id, tx, CCCD_UUID, &ENABLE_NOTIFICATION_VALUE)
            {
                Ok(()) => {
                    if let Some(session) = self.session.as_mut() {
                        session.descriptor_pending = true;
                    }
                    let after = self.config.timeouts.notify_enable();
                    self.schedule(TimeoutStage::NotificationEnable, TimerKey::Session(id), after);
                }
                Err(e) => self.log.warn(format!("CCCD write failed: {}", e)),
            }
        } else {
            warn!("TX characteristic has no CCCD");
            self.report(&BleError::DescriptorMissing);
        }

        let target = self.config.mtu_target;
        if !self.capabilities.explicit_mtu_request {
            self.log.info("UART ready; MTU negotiated by the platform");
            return;
        }
        self.log.info(format!("UART ready; requesting MTU {}", target));
        match self.provider.request_mtu(id, target) {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.mtu_pending = true;
                }
                let after = self.config.timeouts.mtu();
                self.schedule(TimeoutStage::MtuNegotiation, TimerKey::Session(id), after);
            }
            Err(e) => self.log.warn(format!("MTU request failed: {}", e)),
        }
    }

    fn on_descriptor_written(&mut self, status: GattStatus) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.descriptor_pending = false;
        if status.is_success() {
            self.log.info("Notifications enabled");
        } else {
            warn!("CCCD write returned status {}", status);
            self.log
                .warn(format!("Enabling notifications failed: status {}", status));
        }
    }

    fn on_mtu_changed(&mut self, mtu: u16, status: GattStatus) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.mtu_pending = false;
        if status.is_success() {
            session.mtu = mtu;
        }
        info!("MTU={} status={}", mtu, status);
        self.log.info(format!("MTU={} status={}", mtu, status));
        if !status.is_success() {
            self.report(&BleError::MtuNegotiationFailed(status.0));
        }
    }

    fn on_notification(&mut self, characteristic: uuid::Uuid, value: &[u8]) {
        if self.state != SessionState::Ready || characteristic != UART_TX_UUID {
            debug!("Notification on {} ignored in {}", characteristic, self.state);
            return;
        }
        self.log
            .record(LogDirection::Inbound, protocol::decode_notification(value));
    }

    fn handle_timeout(&mut self, stage: TimeoutStage, key: TimerKey) {
        match key {
            TimerKey::Scan(round) => {
                if self.scanning && round == self.scan_round {
                    warn!("Scan timed out");
                    self.log.warn(format!(
                        "No device matching '{}' found; stopping scan",
                        self.config.device_name_filter
                    ));
                    self.stop_scan();
                }
            }
            TimerKey::Session(id) if self.current_id() == Some(id) => {
                let (descriptor_pending, mtu_pending) = self
                    .session
                    .as_ref()
                    .map_or((false, false), |s| (s.descriptor_pending, s.mtu_pending));
                match stage {
                    TimeoutStage::Connect if self.state == SessionState::Connecting => {
                        self.fail(BleError::Timeout(stage))
                    }
                    TimeoutStage::ServiceDiscovery
                        if self.state == SessionState::ServicesDiscovering =>
                    {
                        self.fail(BleError::Timeout(stage))
                    }
                    TimeoutStage::NotificationEnable if descriptor_pending => {
                        if let Some(session) = self.session.as_mut() {
                            session.descriptor_pending = false;
                        }
                        self.report(&BleError::Timeout(stage));
                    }
                    TimeoutStage::MtuNegotiation if mtu_pending => {
                        if let Some(session) = self.session.as_mut() {
                            session.mtu_pending = false;
                        }
                        self.report(&BleError::Timeout(stage));
                    }
                    _ => trace!("{} timer expired after completion", stage),
                }
            }
            TimerKey::Session(id) => debug!("Ignoring {} timeout of stale session {}", stage, id),
        }
    }

    /// Record an error under ERR when it ends the session, WARN otherwise.
    fn report(&self, error: &BleError) {
        if error.is_terminal() {
            self.log.error(error.to_string());
        } else {
            self.log.warn(error.to_string());
        }
    }

    /// Terminal error: release the connection and keep the error visible.
    /// Logged under ERR whatever the severity of the error itself.
    fn fail(&mut self, error: BleError) {
        error!("Session failed: {}", error);
        self.log.error(error.to_string());
        if let Some(session) = self.session.take() {
            self.provider.close(session.id);
        }
        self.state = SessionState::Failed(error);
    }

    /// Operator teardown; valid in every state.
    pub fn disconnect(&mut self) {
        self.stop_scan();
        if let Some(session) = self.session.take() {
            info!("Closing session {}", session.id);
            self.provider.close(session.id);
        }
        self.state = SessionState::Idle;
        self.log.info("Closed GATT");
    }

    fn shutdown(&mut self) {
        if self.scanning || self.session.is_some() {
            self.disconnect();
        }
    }

    /* ---------------- UART ---------------- */

    /// Send a newline-terminated text line
    pub fn send_text(&mut self, text: &str) -> Result<(), BleError> {
        self.write_rx(&protocol::encode_text(text))?;
        self.log.record(LogDirection::Outbound, text);
        Ok(())
    }

    /// Send one raw byte
    pub fn send_byte(&mut self, value: u8) -> Result<(), BleError> {
        self.write_rx(&protocol::encode_byte(value))?;
        self.log
            .record(LogDirection::Outbound, protocol::describe_byte(value));
        Ok(())
    }

    fn writable(&self) -> Result<(SessionId, CharacteristicRef), BleError> {
        if self.state != SessionState::Ready {
            return Err(BleError::NotConnected);
        }
        let session = self.session.as_ref().ok_or(BleError::NotConnected)?;
        let rx = session
            .rx
            .clone()
            .ok_or(BleError::CharacteristicUnavailable)?;
        Ok((session.id, rx))
    }

    fn write_rx(&mut self, bytes: &[u8]) -> Result<(), BleError> {
        let (id, rx) = match self.writable() {
            Ok(target) => target,
            Err(e) => {
                warn!("Write dropped: {}", e);
                self.report(&e);
                return Err(e);
            }
        };
        if let Err(e) = self
            .provider
            .write_characteristic(id, &rx, bytes, WriteMode::WithResponse)
        {
            self.fail(e.clone());
            return Err(e);
        }
        Ok(())
    }
}
