//! Terminal display: prints the event log and session state as they change
//! and turns stdin lines into session commands.

use crate::domain::event_log::LogUpdate;
use crate::domain::models::SessionSnapshot;
use crate::infrastructure::bluetooth::protocol::UartCommand;
use crate::infrastructure::bluetooth::UartService;
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Scan,
    Stop,
    Disconnect,
    Clear,
    Log,
    Status,
    Help,
    Quit,
    Byte(u8),
    Uart(UartCommand),
    Text(String),
    Empty,
}

/// Parse a byte in decimal or `0x` hex.
fn parse_byte(arg: &str) -> Result<u8, String> {
    let arg = arg.trim();
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => arg.parse::<u8>(),
    };
    parsed.map_err(|_| format!("not a byte value: '{}'", arg))
}

/// Interpret one input line. `//` escapes a text line that starts with a slash.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(ConsoleCommand::Empty);
    }
    if let Some(text) = line.strip_prefix("//") {
        return Ok(ConsoleCommand::Text(format!("/{}", text)));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ConsoleCommand::Text(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name.to_lowercase().as_str() {
        "scan" => ConsoleCommand::Scan,
        "stop" => ConsoleCommand::Stop,
        "disconnect" => ConsoleCommand::Disconnect,
        "clear" => ConsoleCommand::Clear,
        "log" => ConsoleCommand::Log,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "byte" if arg.is_empty() => return Err("usage: /byte <0-255>".to_string()),
        "byte" => ConsoleCommand::Byte(parse_byte(arg)?),
        // `/stop` belongs to the scanner, so the UART stop byte needs `/cmd stop`
        "cmd" => ConsoleCommand::Uart(arg.parse::<UartCommand>()?),
        other => ConsoleCommand::Uart(other.parse::<UartCommand>()?),
    };
    Ok(command)
}

pub fn status_line(snapshot: &SessionSnapshot) -> String {
    format!(
        "[status] {} | scanning={} | device={} | MTU={}",
        snapshot.state,
        if snapshot.scanning { "yes" } else { "no" },
        snapshot.device_name.as_deref().unwrap_or("-"),
        snapshot.mtu
    )
}

pub fn help_text() -> String {
    let commands: Vec<_> = UartCommand::ALL
        .iter()
        .map(|c| format!("{} ({})", c.name(), c.value()))
        .collect();
    format!(
        "Commands:\n  \
         /scan  /stop  /disconnect  /clear  /log  /status  /help  /quit\n  \
         /byte <n>   send one raw byte\n  \
         /cmd <name> or /<name>   send a command byte: {}\n\
         Any other line is sent as text followed by a newline.",
        commands.join("  ")
    )
}

pub struct Console {
    service: UartService,
}

impl Console {
    pub fn new(service: UartService) -> Self {
        Self { service }
    }

    /// Run until `/quit`, end of input, or the session actor stops.
    pub async fn run(self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut log_feed = self.service.log().subscribe();
        let mut state = self.service.subscribe_state();

        println!("{}", help_text());
        println!("{}", status_line(&state.borrow()));

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("stdin closed");
                        break;
                    };
                    if !self.dispatch(&line)? {
                        break;
                    }
                }
                update = log_feed.recv() => match update {
                    Ok(LogUpdate::Appended(entry)) => println!("{}", entry.line()),
                    Ok(LogUpdate::Cleared) => println!("-- log cleared --"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Display fell behind by {} log entries", skipped);
                        println!("-- {} entries skipped, /log shows all --", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = state.borrow_and_update().clone();
                    println!("{}", status_line(&snapshot));
                }
            }
        }
        Ok(())
    }

    /// Returns false when the console should exit.
    fn dispatch(&self, line: &str) -> Result<bool> {
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(message) => {
                println!("{} (try /help)", message);
                return Ok(true);
            }
        };
        match command {
            ConsoleCommand::Scan => self.service.start_scan()?,
            ConsoleCommand::Stop => self.service.stop_scan()?,
            ConsoleCommand::Disconnect => self.service.disconnect()?,
            ConsoleCommand::Clear => self.service.clear_log()?,
            ConsoleCommand::Log => {
                for entry in self.service.log().snapshot() {
                    println!("{}", entry.line());
                }
            }
            ConsoleCommand::Status => println!("{}", status_line(&self.service.state())),
            ConsoleCommand::Help => println!("{}", help_text()),
            ConsoleCommand::Quit => return Ok(false),
            ConsoleCommand::Byte(value) => self.service.send_byte(value)?,
            ConsoleCommand::Uart(command) => self.service.send_command(command)?,
            ConsoleCommand::Text(text) => self.service.send_text(text)?,
            ConsoleCommand::Empty => {}
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::BleError;
    use crate::domain::models::SessionState;

    #[test]
    fn test_parse_session_commands() {
        assert_eq!(parse_line("/scan"), Ok(ConsoleCommand::Scan));
        assert_eq!(parse_line("/STOP"), Ok(ConsoleCommand::Stop));
        assert_eq!(parse_line("/disconnect\r\n"), Ok(ConsoleCommand::Disconnect));
        assert_eq!(parse_line("/clear"), Ok(ConsoleCommand::Clear));
        assert_eq!(parse_line("/exit"), Ok(ConsoleCommand::Quit));
        assert_eq!(parse_line("   "), Ok(ConsoleCommand::Empty));
    }

    #[test]
    fn test_parse_bytes_and_uart_commands() {
        assert_eq!(parse_line("/byte 30"), Ok(ConsoleCommand::Byte(30)));
        assert_eq!(parse_line("/byte 0x1e"), Ok(ConsoleCommand::Byte(30)));
        assert!(parse_line("/byte 256").is_err());
        assert!(parse_line("/byte").is_err());
        assert_eq!(parse_line("/blue"), Ok(ConsoleCommand::Uart(UartCommand::Blue)));
        assert_eq!(parse_line("/Forward"), Ok(ConsoleCommand::Uart(UartCommand::Forward)));
        assert_eq!(parse_line("/cmd stop"), Ok(ConsoleCommand::Uart(UartCommand::Stop)));
        assert_eq!(parse_line("/stop"), Ok(ConsoleCommand::Stop));
        assert!(parse_line("/warp").is_err());
    }

    #[test]
    fn test_parse_text_lines() {
        assert_eq!(parse_line("ping"), Ok(ConsoleCommand::Text("ping".to_string())));
        assert_eq!(
            parse_line("  hello world"),
            Ok(ConsoleCommand::Text("  hello world".to_string()))
        );
        assert_eq!(
            parse_line("//scan"),
            Ok(ConsoleCommand::Text("/scan".to_string()))
        );
        assert_eq!(
            parse_line("  /scan"),
            Ok(ConsoleCommand::Text("  /scan".to_string()))
        );
    }

    #[test]
    fn test_status_line() {
        let mut snapshot = SessionSnapshot::default();
        assert_eq!(
            status_line(&snapshot),
            format!("[status] {} | scanning=no | device=- | MTU=23", SessionState::Idle)
        );

        snapshot.state = SessionState::Failed(BleError::RequiredServiceMissing);
        snapshot.device_name = Some("ZoboCar-01".to_string());
        snapshot.mtu = 247;
        let line = status_line(&snapshot);
        assert!(line.contains("UART service not found"));
        assert!(line.contains("device=ZoboCar-01 | MTU=247"));
    }

    #[test]
    fn test_help_lists_every_uart_command() {
        let help = help_text();
        for command in UartCommand::ALL {
            assert!(help.contains(&format!("{} ({})", command.name(), command.value())));
        }
    }
}
