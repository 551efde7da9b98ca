//! Nordic UART Service Protocol
//!
//! UUIDs, framing and the single-byte command set understood by the
//! peripheral firmware.

use std::str::FromStr;
use uuid::Uuid;

/// NUS service UUID
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// RX characteristic - the central writes here
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// TX characteristic - the peripheral notifies here
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Client Characteristic Configuration Descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// CCCD value enabling notifications (little-endian 0x0001)
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Peripheral name substring looked for while scanning
pub const DEFAULT_DEVICE_NAME: &str = "Zobo";

/// MTU requested once the UART is ready
pub const MTU_TARGET: u16 = 247;

/// Line terminator appended to outbound text
pub const LINE_TERMINATOR: u8 = b'\n';

/// Discrete commands sent as one raw byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartCommand {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    Blue,
    Red,
    Green,
    Light,
}

impl UartCommand {
    pub const ALL: [UartCommand; 9] = [
        Self::Forward,
        Self::Backward,
        Self::Left,
        Self::Right,
        Self::Stop,
        Self::Blue,
        Self::Red,
        Self::Green,
        Self::Light,
    ];

    /// Wire value of this command
    pub fn value(&self) -> u8 {
        match self {
            Self::Forward => 1,
            Self::Backward => 0,
            Self::Left => 3,
            Self::Right => 4,
            Self::Stop => 2,
            Self::Blue => 30,
            Self::Red => 20,
            Self::Green => 10,
            Self::Light => 40,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stop => "stop",
            Self::Blue => "blue",
            Self::Red => "red",
            Self::Green => "green",
            Self::Light => "light",
        }
    }
}

impl FromStr for UartCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.name() == lower)
            .ok_or_else(|| format!("unknown command: {}", s))
    }
}

/// Frame a text line: UTF-8 bytes followed by one terminator.
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(LINE_TERMINATOR);
    bytes
}

/// A single-byte command, unframed.
pub fn encode_byte(value: u8) -> Vec<u8> {
    vec![value]
}

/// Decode one notification payload; invalid UTF-8 becomes U+FFFD.
pub fn decode_notification(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Log rendering of a single-byte command, e.g. `[byte] 30 (0x1e)`.
pub fn describe_byte(value: u8) -> String {
    format!("[byte] {} (0x{:x})", value, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            UART_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(UART_RX_UUID.to_string(), "6e400002-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(UART_TX_UUID.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_encode_text_appends_one_newline() {
        assert_eq!(encode_text("ping"), vec![0x70, 0x69, 0x6E, 0x67, 0x0A]);
        assert_eq!(encode_text(""), vec![0x0A]);
        assert_eq!(encode_text("a\n"), vec![b'a', b'\n', b'\n']);
        assert_eq!(encode_text("é"), vec![0xC3, 0xA9, 0x0A]);
    }

    #[test]
    fn test_encode_byte() {
        assert_eq!(encode_byte(1), vec![1]);
        assert_eq!(encode_byte(0), vec![0]);
        assert_eq!(encode_byte(255), vec![255]);
    }

    #[test]
    fn test_decode_notification() {
        assert_eq!(decode_notification(&[0x4F, 0x4B]), "OK");
        assert_eq!(decode_notification(&[]), "");
        assert_eq!(decode_notification(&[0x4F, 0xFF]), "O\u{FFFD}");
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(UartCommand::Forward.value(), 1);
        assert_eq!(UartCommand::Backward.value(), 0);
        assert_eq!(UartCommand::Left.value(), 3);
        assert_eq!(UartCommand::Right.value(), 4);
        assert_eq!(UartCommand::Stop.value(), 2);
        assert_eq!(UartCommand::Blue.value(), 30);
        assert_eq!(UartCommand::Red.value(), 20);
        assert_eq!(UartCommand::Green.value(), 10);
        assert_eq!(UartCommand::Light.value(), 40);
    }

    #[test]
    fn test_command_from_str() {
        assert_eq!("Forward".parse::<UartCommand>(), Ok(UartCommand::Forward));
        assert_eq!("light".parse::<UartCommand>(), Ok(UartCommand::Light));
        assert!("jump".parse::<UartCommand>().is_err());
    }

    #[test]
    fn test_describe_byte() {
        assert_eq!(describe_byte(30), "[byte] 30 (0x1e)");
        assert_eq!(describe_byte(1), "[byte] 1 (0x1)");
    }
}
