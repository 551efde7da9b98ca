//! Simulated Radio
//!
//! A scripted NUS peripheral that answers every request through the event
//! sink, the same way a real radio would. Used by the tests and by the
//! `--simulate` console mode.

use crate::domain::error::BleError;
use crate::domain::models::{DeviceHandle, PeripheralIdentity, SessionId};
use crate::infrastructure::bluetooth::protocol::{
    CCCD_UUID, LINE_TERMINATOR, UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID,
};
use crate::infrastructure::bluetooth::provider::{
    CharacteristicRef, DiscoveredCharacteristic, DiscoveredService, GattProvider, GattStatus,
    LinkState, RadioEvent, RadioEventSink, WriteMode,
};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Android's GATT_ERROR, reported for unknown devices.
const GATT_ERROR: i32 = 133;

/// How the simulated firmware answers RX writes.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Silent,
    /// Notify the written payload back, minus its line terminator
    Echo,
    /// Notify a fixed payload after every write
    Fixed(Vec<u8>),
}

/// One scripted peripheral.
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub identity: PeripheralIdentity,
    pub services: Vec<DiscoveredService>,
    pub reply: Reply,
    pub max_mtu: u16,
}

impl SimulatedPeripheral {
    /// A complete NUS peripheral with a CCCD on TX.
    pub fn nus(handle: u64, name: &str) -> Self {
        Self {
            identity: PeripheralIdentity {
                handle: DeviceHandle(handle),
                device_name: Some(name.to_string()),
                advertised_name: Some(name.to_string()),
                rssi: -55,
            },
            services: vec![DiscoveredService {
                uuid: UART_SERVICE_UUID,
                characteristics: vec![
                    DiscoveredCharacteristic {
                        uuid: UART_RX_UUID,
                        descriptors: vec![],
                    },
                    DiscoveredCharacteristic {
                        uuid: UART_TX_UUID,
                        descriptors: vec![CCCD_UUID],
                    },
                ],
            }],
            reply: Reply::Echo,
            max_mtu: 247,
        }
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    pub fn without_characteristic(mut self, uuid: Uuid) -> Self {
        for service in &mut self.services {
            service.characteristics.retain(|c| c.uuid != uuid);
        }
        self
    }
}

/// A write observed on the simulated link.
#[derive(Debug, Clone, PartialEq)]
pub struct WireWrite {
    pub session: SessionId,
    pub characteristic: Uuid,
    pub bytes: Vec<u8>,
    pub mode: WriteMode,
}

/// Shared view of the writes that reached the simulated link.
#[derive(Debug, Clone, Default)]
pub struct WireLog {
    writes: Arc<Mutex<Vec<WireWrite>>>,
}

impl WireLog {
    fn push(&self, write: WireWrite) {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(write);
    }

    pub fn writes(&self) -> Vec<WireWrite> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct Link {
    session: SessionId,
    peripheral: SimulatedPeripheral,
    notifying: bool,
}

pub struct SimulatedProvider {
    sink: RadioEventSink,
    peripherals: Vec<SimulatedPeripheral>,
    adapter_enabled: bool,
    link: Option<Link>,
    wire: WireLog,
}

impl SimulatedProvider {
    pub fn new(sink: RadioEventSink, peripherals: Vec<SimulatedPeripheral>) -> Self {
        Self {
            sink,
            peripherals,
            adapter_enabled: true,
            link: None,
            wire: WireLog::default(),
        }
    }

    /// The demo setup: one unrelated advertiser and one Zobo car.
    pub fn demo(sink: RadioEventSink) -> Self {
        let mut stranger = SimulatedPeripheral::nus(0xD1_5E_A5_E0_00_01, "Thingy");
        stranger.services.clear();
        Self::new(
            sink,
            vec![
                stranger,
                SimulatedPeripheral::nus(0xC2_A0_B0_00_00_01, "ZoboCar-01"),
            ],
        )
    }

    pub fn with_adapter_enabled(mut self, enabled: bool) -> Self {
        self.adapter_enabled = enabled;
        self
    }

    pub fn wire(&self) -> WireLog {
        self.wire.clone()
    }

    fn link_for(&mut self, session: SessionId) -> Result<&mut Link, BleError> {
        match self.link.as_mut() {
            Some(link) if link.session == session => Ok(link),
            _ => Err(BleError::NotConnected),
        }
    }
}

impl GattProvider for SimulatedProvider {
    fn check_adapter(&mut self) -> Result<(), BleError> {
        if self.adapter_enabled {
            Ok(())
        } else {
            Err(BleError::AdapterUnavailable("Bluetooth is OFF".to_string()))
        }
    }

    fn start_scan(&mut self, name_filter: &str) -> Result<(), BleError> {
        debug!("Simulated scan for '{}'", name_filter);
        for peripheral in &self.peripherals {
            self.sink
                .emit(RadioEvent::DeviceDiscovered(peripheral.identity.clone()));
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        debug!("Simulated scan stopped");
        Ok(())
    }

    fn connect(&mut self, session: SessionId, device: DeviceHandle) -> Result<(), BleError> {
        let Some(peripheral) = self
            .peripherals
            .iter()
            .find(|p| p.identity.handle == device)
            .cloned()
        else {
            self.sink.emit(RadioEvent::ConnectionChanged {
                session,
                status: GattStatus(GATT_ERROR),
                link: LinkState::Disconnected,
                device_name: None,
            });
            return Ok(());
        };

        let device_name = peripheral.identity.device_name.clone();
        self.link = Some(Link {
            session,
            peripheral,
            notifying: false,
        });
        self.sink.emit(RadioEvent::ConnectionChanged {
            session,
            status: GattStatus::SUCCESS,
            link: LinkState::Connected,
            device_name,
        });
        Ok(())
    }

    fn discover_services(&mut self, session: SessionId) -> Result<(), BleError> {
        let services = self.link_for(session)?.peripheral.services.clone();
        self.sink.emit(RadioEvent::ServicesDiscovered {
            session,
            status: GattStatus::SUCCESS,
            services,
        });
        Ok(())
    }

    fn set_notify(
        &mut self,
        session: SessionId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) -> Result<(), BleError> {
        let link = self.link_for(session)?;
        if characteristic.uuid == UART_TX_UUID {
            link.notifying = enabled;
        }
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        session: SessionId,
        _characteristic: &CharacteristicRef,
        descriptor: Uuid,
        _value: &[u8],
    ) -> Result<(), BleError> {
        self.link_for(session)?;
        self.sink.emit(RadioEvent::DescriptorWritten {
            session,
            descriptor,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        session: SessionId,
        characteristic: &CharacteristicRef,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), BleError> {
        let link = self.link_for(session)?;
        let notifying = link.notifying;
        let reply = match &link.peripheral.reply {
            Reply::Silent => None,
            Reply::Echo => Some(
                value
                    .strip_suffix(&[LINE_TERMINATOR])
                    .unwrap_or(value)
                    .to_vec(),
            ),
            Reply::Fixed(bytes) => Some(bytes.clone()),
        };

        self.wire.push(WireWrite {
            session,
            characteristic: characteristic.uuid,
            bytes: value.to_vec(),
            mode,
        });
        self.sink.emit(RadioEvent::CharacteristicWritten {
            session,
            characteristic: characteristic.uuid,
            status: GattStatus::SUCCESS,
        });

        if let (true, Some(value)) = (notifying, reply) {
            self.sink.emit(RadioEvent::Notification {
                session,
                characteristic: UART_TX_UUID,
                value,
            });
        }
        Ok(())
    }

    fn request_mtu(&mut self, session: SessionId, mtu: u16) -> Result<(), BleError> {
        let granted = mtu.min(self.link_for(session)?.peripheral.max_mtu);
        self.sink.emit(RadioEvent::MtuChanged {
            session,
            mtu: granted,
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    fn close(&mut self, session: SessionId) {
        if self.link.as_ref().is_some_and(|l| l.session == session) {
            debug!("Simulated link {} closed", session);
            self.link = None;
        }
    }
}
