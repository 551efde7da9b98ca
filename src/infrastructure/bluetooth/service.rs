//! UART Service Module
//!
//! Public handle for the display layer. Commands are queued to the session
//! actor, which owns the [`SessionMachine`] and applies user commands, radio
//! completions and timer expiries strictly one at a time.

use crate::domain::event_log::EventLog;
use crate::domain::models::{SessionSnapshot, UserCommand};
use crate::infrastructure::bluetooth::protocol::UartCommand;
use crate::infrastructure::bluetooth::provider::{GattProvider, RadioEventSink};
use crate::infrastructure::bluetooth::session::{SessionConfig, SessionInput, SessionMachine};
use crate::infrastructure::platform::PlatformAccess;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Cloneable handle to a running session actor.
#[derive(Clone)]
pub struct UartService {
    inputs: mpsc::UnboundedSender<SessionInput>,
    state: watch::Receiver<SessionSnapshot>,
    log: Arc<EventLog>,
}

impl UartService {
    /// Spawn the actor on the current tokio runtime.
    pub fn spawn<P, A, F>(
        config: SessionConfig,
        log: Arc<EventLog>,
        access: A,
        make_provider: F,
    ) -> (Self, tokio::task::JoinHandle<()>)
    where
        P: GattProvider + 'static,
        A: PlatformAccess + 'static,
        F: FnOnce(RadioEventSink) -> P,
    {
        let (service, actor) = Self::build(config, log, access, make_provider);
        (service, tokio::spawn(actor.run()))
    }

    /// Run the actor on a dedicated thread with its own current-thread runtime.
    pub fn spawn_on_thread<P, A, F>(
        config: SessionConfig,
        log: Arc<EventLog>,
        access: A,
        make_provider: F,
    ) -> Result<(Self, std::thread::JoinHandle<()>)>
    where
        P: GattProvider + 'static,
        A: PlatformAccess + 'static,
        F: FnOnce(RadioEventSink) -> P + Send + 'static,
    {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
        let actor_log = log.clone();
        let actor_inputs = inputs_tx.clone();

        let handle = std::thread::Builder::new()
            .name("ble-session".to_string())
            .spawn(move || {
                rt.block_on(async move {
                    let provider = make_provider(RadioEventSink::new(actor_inputs.clone()));
                    let machine = SessionMachine::new(provider, access, actor_log, config);
                    SessionActor {
                        machine,
                        inputs: inputs_rx,
                        timers: actor_inputs,
                        state: state_tx,
                    }
                    .run()
                    .await;
                })
            })?;

        let service = Self {
            inputs: inputs_tx,
            state: state_rx,
            log,
        };
        Ok((service, handle))
    }

    fn build<P, A, F>(
        config: SessionConfig,
        log: Arc<EventLog>,
        access: A,
        make_provider: F,
    ) -> (Self, SessionActor<P, A>)
    where
        P: GattProvider,
        A: PlatformAccess,
        F: FnOnce(RadioEventSink) -> P,
    {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
        let provider = make_provider(RadioEventSink::new(inputs_tx.clone()));
        let machine = SessionMachine::new(provider, access, log.clone(), config);

        let actor = SessionActor {
            machine,
            inputs: inputs_rx,
            timers: inputs_tx.clone(),
            state: state_tx,
        };
        let service = Self {
            inputs: inputs_tx,
            state: state_rx,
            log,
        };
        (service, actor)
    }

    fn send(&self, input: SessionInput) -> Result<()> {
        self.inputs
            .send(input)
            .map_err(|_| anyhow::anyhow!("Session actor stopped"))
    }

    fn command(&self, command: UserCommand) -> Result<()> {
        self.send(SessionInput::Command(command))
    }

    /// Start scanning for a matching device
    pub fn start_scan(&self) -> Result<()> {
        self.command(UserCommand::StartScan)
    }

    /// Stop scanning
    pub fn stop_scan(&self) -> Result<()> {
        self.command(UserCommand::StopScan)
    }

    /// Disconnect from the current device
    pub fn disconnect(&self) -> Result<()> {
        self.command(UserCommand::Disconnect)
    }

    /// Send a text line over the UART
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.command(UserCommand::SendText(text.into()))
    }

    /// Send one raw byte
    pub fn send_byte(&self, value: u8) -> Result<()> {
        self.command(UserCommand::SendByte(value))
    }

    /// Send a command byte
    pub fn send_command(&self, command: UartCommand) -> Result<()> {
        self.send_byte(command.value())
    }

    /// Clear the event log
    pub fn clear_log(&self) -> Result<()> {
        self.command(UserCommand::ClearLog)
    }

    /// Close any session and stop the actor.
    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionInput::Shutdown)
    }

    /// Latest published session state.
    pub fn state(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Shared event log
    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }
}

struct SessionActor<P, A> {
    machine: SessionMachine<P, A>,
    inputs: mpsc::UnboundedReceiver<SessionInput>,
    timers: mpsc::UnboundedSender<SessionInput>,
    state: watch::Sender<SessionSnapshot>,
}

impl<P: GattProvider, A: PlatformAccess> SessionActor<P, A> {
    async fn run(mut self) {
        info!("Session actor started");
        while let Some(input) = self.inputs.recv().await {
            let stop = input == SessionInput::Shutdown;
            self.machine.handle(input);
            self.arm_timers();
            self.publish();
            if stop {
                break;
            }
        }
        info!("Session actor stopped");
    }

    fn arm_timers(&mut self) {
        for timer in self.machine.take_timers() {
            debug!("Arming {} timer for {:?}", timer.stage, timer.after);
            let tx = self.timers.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timer.after).await;
                let _ = tx.send(SessionInput::Timeout {
                    stage: timer.stage,
                    key: timer.key,
                });
            });
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.state.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LogDirection, SessionState};
    use crate::domain::settings::TimeoutSettings;
    use crate::domain::event_log::LogUpdate;
    use crate::infrastructure::bluetooth::protocol::{UART_RX_UUID, UART_TX_UUID};
    use crate::infrastructure::bluetooth::provider::WriteMode;
    use crate::infrastructure::bluetooth::simulated::{
        Reply, SimulatedPeripheral, SimulatedProvider, WireLog,
    };
    use crate::infrastructure::platform::DesktopAccess;
    use crate::domain::error::BleError;
    use std::time::Duration;

    fn start(peripherals: Vec<SimulatedPeripheral>) -> (UartService, WireLog) {
        let config = SessionConfig {
            timeouts: TimeoutSettings::disabled(),
            ..SessionConfig::default()
        };
        let mut wire = None;
        let (service, _actor) =
            UartService::spawn(config, Arc::new(EventLog::new()), DesktopAccess, |sink| {
                let provider = SimulatedProvider::new(sink, peripherals);
                wire = Some(provider.wire());
                provider
            });
        (service, wire.unwrap())
    }

    async fn wait_for<F>(service: &UartService, mut predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = service.subscribe_state();
        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| predicate(s)))
            .await
            .expect("state not reached in time")
            .expect("actor stopped")
            .clone();
        snapshot
    }

    async fn wait_for_log(service: &UartService, message: &str) {
        let log = service.log().clone();
        let message = message.to_string();
        tokio::time::timeout(Duration::from_secs(2), async move {
            loop {
                if log.snapshot().iter().any(|e| e.message() == message) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("log entry not recorded in time");
    }

    #[tokio::test]
    async fn test_end_to_end_over_actor() {
        let car = SimulatedPeripheral::nus(0xC0FFEE, "ZoboCar-01").with_reply(Reply::Fixed(b"OK".to_vec()));
        let (service, wire) = start(vec![SimulatedPeripheral::nus(1, "Thingy"), car]);

        service.start_scan().unwrap();
        let ready = wait_for(&service, |s| s.connected).await;
        assert_eq!(ready.state, SessionState::Ready);
        assert_eq!(ready.device_name.as_deref(), Some("ZoboCar-01"));
        assert!(!ready.scanning);

        service.send_text("ping").unwrap();
        wait_for_log(&service, "← OK").await;

        let writes = wire.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].characteristic, UART_RX_UUID);
        assert_eq!(writes[0].bytes, vec![0x70, 0x69, 0x6E, 0x67, 0x0A]);
        assert_eq!(writes[0].mode, WriteMode::WithResponse);

        let log = service.log().snapshot();
        let sent = log.iter().position(|e| e.message() == "→ ping").unwrap();
        let received = log.iter().position(|e| e.message() == "← OK").unwrap();
        assert!(sent < received);
        assert_eq!(log[received].direction, LogDirection::Inbound);

        wait_for_log(&service, "INFO MTU=247 status=0").await;
        assert_eq!(service.state().mtu, 247);
    }

    #[tokio::test]
    async fn test_command_bytes_over_actor() {
        let (service, wire) = start(vec![SimulatedPeripheral::nus(7, "Zobo")]);
        service.start_scan().unwrap();
        wait_for(&service, |s| s.connected).await;

        service.send_command(UartCommand::Blue).unwrap();
        service.send_command(UartCommand::Forward).unwrap();
        wait_for_log(&service, "→ [byte] 1 (0x1)").await;

        let bytes: Vec<_> = wire.writes().into_iter().map(|w| w.bytes).collect();
        assert_eq!(bytes, vec![vec![30], vec![1]]);
    }

    #[tokio::test]
    async fn test_missing_tx_fails_over_actor() {
        let broken = SimulatedPeripheral::nus(3, "ZoboCar-02").without_characteristic(UART_TX_UUID);
        let (service, wire) = start(vec![broken]);

        service.start_scan().unwrap();
        let failed = wait_for(&service, |s| matches!(s.state, SessionState::Failed(_))).await;
        assert_eq!(
            failed.state,
            SessionState::Failed(BleError::RequiredCharacteristicMissing(UART_TX_UUID))
        );
        assert_eq!(failed.device_name, None);

        service.send_byte(1).unwrap();
        wait_for_log(&service, "WARN Not connected").await;
        assert!(wire.writes().is_empty());
    }

    #[tokio::test]
    async fn test_adapter_off_reported_over_actor() {
        let (service, _actor) = UartService::spawn(
            SessionConfig::default(),
            Arc::new(EventLog::new()),
            DesktopAccess,
            |sink| SimulatedProvider::demo(sink).with_adapter_enabled(false),
        );

        service.start_scan().unwrap();
        wait_for_log(&service, "ERR Bluetooth adapter unavailable: Bluetooth is OFF").await;

        let snapshot = service.state();
        assert!(!snapshot.scanning);
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(service.log().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_and_clear_log() {
        let (service, _wire) = start(vec![SimulatedPeripheral::nus(7, "Zobo")]);
        let mut feed = service.log().subscribe();
        service.start_scan().unwrap();
        wait_for(&service, |s| s.connected).await;

        service.disconnect().unwrap();
        let idle = wait_for(&service, |s| s.state == SessionState::Idle && !s.connected).await;
        assert_eq!(idle.device_name, None);
        wait_for_log(&service, "INFO Closed GATT").await;

        service.clear_log().unwrap();
        let log = service.log().clone();
        tokio::time::timeout(Duration::from_secs(2), async move {
            while !log.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut saw_clear = false;
        while let Ok(update) = feed.try_recv() {
            if update == LogUpdate::Cleared {
                saw_clear = true;
            }
        }
        assert!(saw_clear);
    }

    #[tokio::test]
    async fn test_shutdown_stops_actor() {
        let (service, _wire) = start(vec![]);
        service.shutdown().unwrap();
        let mut rx = service.subscribe_state();
        // The watch sender is dropped once the actor exits.
        tokio::time::timeout(Duration::from_secs(2), async {
            while rx.changed().await.is_ok() {}
        })
        .await
        .unwrap();
        assert!(service.start_scan().is_err());
    }

    #[test]
    fn test_spawn_on_thread_handles_commands() {
        let (service, handle) = UartService::spawn_on_thread(
            SessionConfig::default(),
            Arc::new(EventLog::new()),
            DesktopAccess,
            SimulatedProvider::demo,
        )
        .unwrap();
        service.start_scan().unwrap();
        service.shutdown().unwrap();
        handle.join().unwrap();

        let messages: Vec<_> = service.log().snapshot().iter().map(|e| e.message()).collect();
        assert!(messages.contains(&"INFO Closed GATT".to_string()));
    }
}
