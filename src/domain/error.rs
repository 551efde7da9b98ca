use thiserror::Error;
use uuid::Uuid;

/// Stage of the connection lifecycle a timeout fired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Scan,
    Connect,
    ServiceDiscovery,
    NotificationEnable,
    MtuNegotiation,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Connect => "connect",
            Self::ServiceDiscovery => "service discovery",
            Self::NotificationEnable => "notification enable",
            Self::MtuNegotiation => "MTU negotiation",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the BLE UART session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BleError {
    #[error("Scan failed: {0}")]
    ScanFailed(i32),

    #[error("GATT error: {0}")]
    ConnectionError(i32),

    #[error("Service discovery failed: {0}")]
    ServiceDiscoveryFailed(i32),

    #[error("UART service not found")]
    RequiredServiceMissing,

    #[error("UART characteristic missing: {0}")]
    RequiredCharacteristicMissing(Uuid),

    #[error("Not connected")]
    NotConnected,

    #[error("RX characteristic missing")]
    CharacteristicUnavailable,

    #[error("CCCD not found – some firmwares still notify")]
    DescriptorMissing,

    #[error("MTU negotiation failed: status {0}")]
    MtuNegotiationFailed(i32),

    #[error("Write failed: {0}")]
    WriteFailed(i32),

    #[error("Timed out during {0}")]
    Timeout(TimeoutStage),

    #[error("a session is already open")]
    SessionBusy,

    #[error("missing Bluetooth permissions")]
    PermissionDenied,

    #[error("location services are disabled")]
    LocationDisabled,

    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("not supported by this platform: {0}")]
    Unsupported(&'static str),

    #[error("platform error: {0}")]
    Platform(String),
}

impl BleError {
    /// Whether the error ends the current session.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::DescriptorMissing
                | Self::MtuNegotiationFailed(_)
                | Self::NotConnected
                | Self::CharacteristicUnavailable
                | Self::Timeout(TimeoutStage::NotificationEnable)
                | Self::Timeout(TimeoutStage::MtuNegotiation)
                | Self::Timeout(TimeoutStage::Scan)
        )
    }
}
