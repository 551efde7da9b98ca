use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_serial".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Per-stage timeouts in milliseconds. Zero disables a timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_scan_ms")]
    pub scan_ms: u64,
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_discovery_ms")]
    pub discovery_ms: u64,
    #[serde(default = "default_notify_ms")]
    pub notify_enable_ms: u64,
    #[serde(default = "default_mtu_ms")]
    pub mtu_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            scan_ms: default_scan_ms(),
            connect_ms: default_connect_ms(),
            discovery_ms: default_discovery_ms(),
            notify_enable_ms: default_notify_ms(),
            mtu_ms: default_mtu_ms(),
        }
    }
}

impl TimeoutSettings {
    fn duration(ms: u64) -> Option<Duration> {
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    pub fn scan(&self) -> Option<Duration> {
        Self::duration(self.scan_ms)
    }
    pub fn connect(&self) -> Option<Duration> {
        Self::duration(self.connect_ms)
    }
    pub fn discovery(&self) -> Option<Duration> {
        Self::duration(self.discovery_ms)
    }
    pub fn notify_enable(&self) -> Option<Duration> {
        Self::duration(self.notify_enable_ms)
    }
    pub fn mtu(&self) -> Option<Duration> {
        Self::duration(self.mtu_ms)
    }

    /// All timeouts disabled.
    pub fn disabled() -> Self {
        Self {
            scan_ms: 0,
            connect_ms: 0,
            discovery_ms: 0,
            notify_enable_ms: 0,
            mtu_ms: 0,
        }
    }
}

fn default_scan_ms() -> u64 {
    30_000
}
fn default_connect_ms() -> u64 {
    10_000
}
fn default_discovery_ms() -> u64 {
    10_000
}
fn default_notify_ms() -> u64 {
    5_000
}
fn default_mtu_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Substring a peripheral's name must contain
    #[serde(default = "default_device_name")]
    pub device_name_filter: String,

    #[serde(default = "default_mtu_target")]
    pub mtu_target: u16,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Maximum retained event log entries (None = unbounded)
    #[serde(default)]
    pub log_capacity: Option<usize>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name_filter: default_device_name(),
            mtu_target: default_mtu_target(),
            timeouts: TimeoutSettings::default(),
            log_capacity: None,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_device_name() -> String {
    "Zobo".to_string()
}
fn default_mtu_target() -> u16 {
    247
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load from `path`, falling back to defaults when it is missing or invalid.
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleSerial");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.device_name_filter, "Zobo");
        assert_eq!(settings.mtu_target, 247);
        assert_eq!(settings.timeouts, TimeoutSettings::default());
        assert_eq!(settings.log_capacity, None);
        assert_eq!(settings.log_settings.rotation, "daily");
    }

    #[test]
    fn test_partial_timeouts() {
        let settings: Settings =
            serde_json::from_str(r#"{"timeouts": {"scan_ms": 0, "mtu_ms": 750}}"#).unwrap();
        assert_eq!(settings.timeouts.scan(), None);
        assert_eq!(settings.timeouts.mtu(), Some(Duration::from_millis(750)));
        assert_eq!(settings.timeouts.connect(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("ble_serial_settings_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");

        let mut service = SettingsService::load(path.clone());
        service.get_mut().device_name_filter = "Thingy".to_string();
        service.get_mut().log_capacity = Some(500);
        service.save().unwrap();

        let reloaded = SettingsService::load(path);
        assert_eq!(reloaded.get().device_name_filter, "Thingy");
        assert_eq!(reloaded.get().log_capacity, Some(500));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("ble_serial_invalid_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::load(path);
        assert_eq!(service.get().device_name_filter, "Zobo");
        fs::remove_dir_all(&dir).unwrap();
    }
}
