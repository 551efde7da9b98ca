use crate::domain::error::BleError;
use std::fmt;
use time::OffsetDateTime;

/// ATT default MTU, in effect until negotiation completes.
pub const DEFAULT_MTU: u16 = 23;

/// Opaque platform handle for a discovered peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#014X}", self.0)
    }
}

/// A peripheral seen in a scan result.
#[derive(Debug, Clone, PartialEq)]
pub struct PeripheralIdentity {
    pub handle: DeviceHandle,
    /// Name reported by the device object
    pub device_name: Option<String>,
    /// Name carried in the advertisement record
    pub advertised_name: Option<String>,
    pub rssi: i16,
}

impl PeripheralIdentity {
    pub fn display_name(&self) -> Option<&str> {
        self.device_name
            .as_deref()
            .or(self.advertised_name.as_deref())
    }
}

/// Generation number of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    ServicesDiscovering,
    Ready,
    Disconnected,
    Failed(BleError),
}

impl SessionState {
    /// A connect attempt may start from this state.
    pub fn accepts_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed(_))
    }

    /// A platform connection is held in this state.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServicesDiscovering | Self::Ready
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Connecting => f.write_str("Connecting"),
            Self::ServicesDiscovering => f.write_str("Discovering services"),
            Self::Ready => f.write_str("Ready"),
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Failed(e) => write!(f, "Failed ({})", e),
        }
    }
}

/// State published to the display layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub scanning: bool,
    pub connected: bool,
    pub device_name: Option<String>,
    pub mtu: u16,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            scanning: false,
            connected: false,
            device_name: None,
            mtu: DEFAULT_MTU,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
    Outbound,
    Inbound,
    Info,
    Warning,
    Error,
}

impl LogDirection {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Outbound => "→",
            Self::Inbound => "←",
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERR",
        }
    }
}

/// One immutable event log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: OffsetDateTime,
    pub direction: LogDirection,
    pub payload: String,
}

impl LogEntry {
    /// `<tag> <payload>` without the timestamp.
    pub fn message(&self) -> String {
        format!("{} {}", self.direction.tag(), self.payload)
    }

    /// `[HH:MM:SS.mmm] <tag> <payload>`
    pub fn line(&self) -> String {
        let t = self.timestamp;
        format!(
            "[{:02}:{:02}:{:02}.{:03}] {}",
            t.hour(),
            t.minute(),
            t.second(),
            t.millisecond(),
            self.message()
        )
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

/// Operations the display layer can invoke.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    StartScan,
    StopScan,
    Disconnect,
    SendText(String),
    SendByte(u8),
    ClearLog,
}
