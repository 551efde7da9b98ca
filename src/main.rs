use anyhow::Result;
use ble_serial::domain::event_log::EventLog;
use ble_serial::domain::settings::SettingsService;
use ble_serial::infrastructure::bluetooth::session::SessionConfig;
use ble_serial::infrastructure::bluetooth::simulated::SimulatedProvider;
use ble_serial::infrastructure::bluetooth::UartService;
use ble_serial::infrastructure::logging::init_logger;
use ble_serial::infrastructure::platform::DesktopAccess;
use ble_serial::presentation::console::Console;
use std::sync::Arc;
use tracing::{error, info};

fn main() -> Result<()> {
    let simulate = std::env::args().skip(1).any(|arg| arg == "--simulate");

    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    // Held until exit so the file writer flushes
    let _logging_guard = match init_logger(&settings.log_settings) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };
    info!(
        "Starting BLE serial console (settings: {})",
        settings_service.path().display()
    );

    let log = Arc::new(EventLog::with_capacity(settings.log_capacity));
    let config = SessionConfig::from(&settings);

    let (service, actor) = if simulate {
        info!("Using the simulated radio");
        UartService::spawn_on_thread(config, log, DesktopAccess, SimulatedProvider::demo)?
    } else {
        spawn_platform(config, log)?
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = rt.block_on(Console::new(service.clone()).run());
    if let Err(e) = &result {
        error!("Console stopped: {:#}", e);
    }

    if service.shutdown().is_ok() && actor.join().is_err() {
        error!("Session thread panicked");
    }
    info!("Exiting");
    result
}

#[cfg(windows)]
fn spawn_platform(
    config: SessionConfig,
    log: Arc<EventLog>,
) -> Result<(UartService, std::thread::JoinHandle<()>)> {
    use ble_serial::infrastructure::bluetooth::winrt::WinRtProvider;
    UartService::spawn_on_thread(config, log, DesktopAccess, WinRtProvider::new)
}

#[cfg(not(windows))]
fn spawn_platform(
    config: SessionConfig,
    log: Arc<EventLog>,
) -> Result<(UartService, std::thread::JoinHandle<()>)> {
    tracing::warn!("No Bluetooth backend for this platform; using the simulated radio");
    UartService::spawn_on_thread(config, log, DesktopAccess, SimulatedProvider::demo)
}
