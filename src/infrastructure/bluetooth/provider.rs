//! Radio/GATT Provider Interface
//!
//! The session machine issues requests through [`GattProvider`]; each request
//! returns as soon as it is handed to the platform, and its completion comes
//! back later as a [`RadioEvent`] through the [`RadioEventSink`] the provider
//! was built with.

use crate::domain::error::BleError;
use crate::domain::models::{DeviceHandle, PeripheralIdentity, SessionId};
use crate::infrastructure::bluetooth::session::SessionInput;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Platform status code; zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for GattStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Write type for characteristic writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Acknowledged by the link layer ("default" write type)
    WithResponse,
    WithoutResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// A characteristic resolved during service discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicRef {
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// What a provider can do, queried once when the session machine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// `request_mtu` is meaningful; otherwise the platform negotiates itself
    pub explicit_mtu_request: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            explicit_mtu_request: true,
        }
    }
}

/// Completion and unsolicited events from the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    DeviceDiscovered(PeripheralIdentity),
    ScanFailed {
        code: i32,
    },
    ConnectionChanged {
        session: SessionId,
        status: GattStatus,
        link: LinkState,
        device_name: Option<String>,
    },
    ServicesDiscovered {
        session: SessionId,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    },
    DescriptorWritten {
        session: SessionId,
        descriptor: Uuid,
        status: GattStatus,
    },
    CharacteristicWritten {
        session: SessionId,
        characteristic: Uuid,
        status: GattStatus,
    },
    MtuChanged {
        session: SessionId,
        mtu: u16,
        status: GattStatus,
    },
    Notification {
        session: SessionId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// Session the event belongs to; scan events belong to none.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Self::DeviceDiscovered(_) | Self::ScanFailed { .. } => None,
            Self::ConnectionChanged { session, .. }
            | Self::ServicesDiscovered { session, .. }
            | Self::DescriptorWritten { session, .. }
            | Self::CharacteristicWritten { session, .. }
            | Self::MtuChanged { session, .. }
            | Self::Notification { session, .. } => Some(*session),
        }
    }
}

/// Handle providers use to deliver [`RadioEvent`]s to the session actor.
#[derive(Debug, Clone)]
pub struct RadioEventSink {
    sender: mpsc::UnboundedSender<SessionInput>,
}

impl RadioEventSink {
    pub fn new(sender: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { sender }
    }

    /// Deliver an event; dropped silently once the actor has stopped.
    pub fn emit(&self, event: RadioEvent) {
        let _ = self.sender.send(SessionInput::Radio(event));
    }
}

/// Asynchronous BLE central operations.
pub trait GattProvider: Send {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    /// Fails when no adapter exists or Bluetooth is switched off.
    fn check_adapter(&mut self) -> Result<(), BleError>;

    fn start_scan(&mut self, name_filter: &str) -> Result<(), BleError>;

    fn stop_scan(&mut self) -> Result<(), BleError>;

    fn connect(&mut self, session: SessionId, device: DeviceHandle) -> Result<(), BleError>;

    fn discover_services(&mut self, session: SessionId) -> Result<(), BleError>;

    fn set_notify(
        &mut self,
        session: SessionId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) -> Result<(), BleError>;

    fn write_descriptor(
        &mut self,
        session: SessionId,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError>;

    fn write_characteristic(
        &mut self,
        session: SessionId,
        characteristic: &CharacteristicRef,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), BleError>;

    fn request_mtu(&mut self, session: SessionId, mtu: u16) -> Result<(), BleError>;

    /// Release the platform connection. Never fails; errors are only traced.
    fn close(&mut self, session: SessionId);
}
