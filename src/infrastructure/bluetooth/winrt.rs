//! WinRT Radio
//!
//! [`GattProvider`] backed by the Windows Bluetooth LE APIs. Every request
//! is handed to a blocking task that waits on the WinRT async operation and
//! reports the outcome through the event sink.

use crate::domain::error::BleError;
use crate::domain::models::{DeviceHandle, PeripheralIdentity, SessionId};
use crate::infrastructure::bluetooth::protocol::{CCCD_UUID, ENABLE_NOTIFICATION_VALUE};
use crate::infrastructure::bluetooth::provider::{
    CharacteristicRef, DiscoveredCharacteristic, DiscoveredService, GattProvider, GattStatus,
    LinkState, ProviderCapabilities, RadioEvent, RadioEventSink, WriteMode,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEAdvertisementWatcherStoppedEventArgs, BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothError,
    BluetoothLEDevice,
};
use windows::Devices::Radios::RadioState;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn status_of(status: GattCommunicationStatus) -> GattStatus {
    GattStatus(status.0)
}

fn hresult(e: &windows::core::Error) -> GattStatus {
    GattStatus(e.code().0)
}

fn platform(e: windows::core::Error) -> BleError {
    BleError::Platform(e.message().to_string())
}

/// An open connection and the handler registrations hanging off it.
struct WinLink {
    session: SessionId,
    device: BluetoothLEDevice,
    gatt_session: GattSession,
    status_token: i64,
    mtu_token: i64,
    characteristics: HashMap<Uuid, GattCharacteristic>,
    notify_tokens: HashMap<Uuid, i64>,
}

impl WinLink {
    fn release(self) {
        for (uuid, token) in &self.notify_tokens {
            if let Some(c) = self.characteristics.get(uuid) {
                let _ = c.RemoveValueChanged(*token);
            }
        }
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
        let _ = self.gatt_session.RemoveMaxPduSizeChanged(self.mtu_token);
        if let Err(e) = self.gatt_session.Close() {
            warn!("GattSession close failed: {}", e);
        }
        if let Err(e) = self.device.Close() {
            warn!("Device close failed: {}", e);
        }
        info!("Session {} released", self.session);
    }
}

#[derive(Default)]
struct Shared {
    /// Session a connect was issued for and not yet closed
    active: Option<SessionId>,
    link: Option<WinLink>,
}

pub struct WinRtProvider {
    sink: RadioEventSink,
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    shared: Arc<Mutex<Shared>>,
}

impl WinRtProvider {
    pub fn new(sink: RadioEventSink) -> Self {
        Self {
            sink,
            watcher: None,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
        shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn characteristic(
        &self,
        session: SessionId,
        uuid: Uuid,
    ) -> Result<GattCharacteristic, BleError> {
        let shared = Self::lock(&self.shared);
        let link = shared
            .link
            .as_ref()
            .filter(|l| l.session == session)
            .ok_or(BleError::NotConnected)?;
        link.characteristics
            .get(&uuid)
            .cloned()
            .ok_or(BleError::CharacteristicUnavailable)
    }

    fn device(&self, session: SessionId) -> Result<BluetoothLEDevice, BleError> {
        let shared = Self::lock(&self.shared);
        shared
            .link
            .as_ref()
            .filter(|l| l.session == session)
            .map(|l| l.device.clone())
            .ok_or(BleError::NotConnected)
    }
}

fn open_link(
    session: SessionId,
    address: u64,
    sink: &RadioEventSink,
) -> windows::core::Result<WinLink> {
    let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.get()?;

    // Keeps Windows from dropping the link between GATT operations
    let gatt_session = GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.get()?;
    gatt_session.SetMaintainConnection(true)?;

    let status_sink = sink.clone();
    let status_token = device.ConnectionStatusChanged(&TypedEventHandler::new(
        move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    status_sink.emit(RadioEvent::ConnectionChanged {
                        session,
                        status: GattStatus::SUCCESS,
                        link: LinkState::Disconnected,
                        device_name: None,
                    });
                }
            }
            Ok(())
        },
    ))?;

    let mtu_sink = sink.clone();
    let mtu_token = gatt_session.MaxPduSizeChanged(&TypedEventHandler::new(
        move |s: windows::core::Ref<GattSession>, _| {
            if let Some(s) = s.as_ref() {
                mtu_sink.emit(RadioEvent::MtuChanged {
                    session,
                    mtu: s.MaxPduSize()?,
                    status: GattStatus::SUCCESS,
                });
            }
            Ok(())
        },
    ))?;

    Ok(WinLink {
        session,
        device,
        gatt_session,
        status_token,
        mtu_token,
        characteristics: HashMap::new(),
        notify_tokens: HashMap::new(),
    })
}

type Enumerated = (Vec<DiscoveredService>, HashMap<Uuid, GattCharacteristic>);

fn enumerate(device: &BluetoothLEDevice) -> windows::core::Result<Result<Enumerated, GattStatus>> {
    let services_result = device
        .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
        .get()?;
    if services_result.Status()? != GattCommunicationStatus::Success {
        return Ok(Err(status_of(services_result.Status()?)));
    }

    let mut discovered = Vec::new();
    let mut handles = HashMap::new();
    let services = services_result.Services()?;
    for i in 0..services.Size()? {
        let service = services.GetAt(i)?;
        let service_uuid = to_uuid(service.Uuid()?);

        let chars_result = service
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .get()?;
        if chars_result.Status()? != GattCommunicationStatus::Success {
            debug!("Characteristics of {} unavailable", service_uuid);
            discovered.push(DiscoveredService {
                uuid: service_uuid,
                characteristics: Vec::new(),
            });
            continue;
        }

        let mut characteristics = Vec::new();
        let chars = chars_result.Characteristics()?;
        for j in 0..chars.Size()? {
            let c = chars.GetAt(j)?;
            let uuid = to_uuid(c.Uuid()?);

            let mut descriptors = Vec::new();
            let desc_result = c.GetDescriptorsAsync()?.get()?;
            if desc_result.Status()? == GattCommunicationStatus::Success {
                let list = desc_result.Descriptors()?;
                for k in 0..list.Size()? {
                    descriptors.push(to_uuid(list.GetAt(k)?.Uuid()?));
                }
            }

            characteristics.push(DiscoveredCharacteristic { uuid, descriptors });
            handles.insert(uuid, c);
        }
        discovered.push(DiscoveredService {
            uuid: service_uuid,
            characteristics,
        });
    }
    Ok(Ok((discovered, handles)))
}

fn read_buffer(args: &GattValueChangedEventArgs) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(&args.CharacteristicValue()?)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

impl GattProvider for WinRtProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        // Windows negotiates the MTU itself and reports MaxPduSize changes
        ProviderCapabilities {
            explicit_mtu_request: false,
        }
    }

    fn check_adapter(&mut self) -> Result<(), BleError> {
        let adapter = BluetoothAdapter::GetDefaultAsync()
            .and_then(|op| op.get())
            .map_err(|_| BleError::AdapterUnavailable("Bluetooth adapter == null".to_string()))?;
        if !adapter.IsLowEnergySupported().map_err(platform)? {
            return Err(BleError::AdapterUnavailable(
                "Bluetooth LE not supported".to_string(),
            ));
        }
        let radio = adapter.GetRadioAsync().and_then(|op| op.get()).map_err(platform)?;
        if radio.State().map_err(platform)? != RadioState::On {
            return Err(BleError::AdapterUnavailable("Bluetooth is OFF".to_string()));
        }
        Ok(())
    }

    fn start_scan(&mut self, name_filter: &str) -> Result<(), BleError> {
        self.stop_scan()?;
        info!("Starting BLE scan for name containing '{}'", name_filter);

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(platform)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(platform)?;

        let sender = self.sink.clone();
        let received = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    sender.emit(RadioEvent::DeviceDiscovered(PeripheralIdentity {
                        handle: DeviceHandle(args.BluetoothAddress()?),
                        device_name: None,
                        advertised_name: (!name.is_empty()).then_some(name),
                        rssi: args.RawSignalStrengthInDBm()?,
                    }));
                }
                Ok(())
            },
        );

        let sender = self.sink.clone();
        let stopped = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementWatcherStoppedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let error = args.Error()?;
                    if error != BluetoothError::Success {
                        sender.emit(RadioEvent::ScanFailed { code: error.0 });
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&received).map_err(platform)?;
        watcher.Stopped(&stopped).map_err(platform)?;
        watcher
            .Start()
            .map_err(|e| BleError::ScanFailed(e.code().0))?;
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            watcher.Stop().map_err(platform)?;
        }
        Ok(())
    }

    fn connect(&mut self, session: SessionId, device: DeviceHandle) -> Result<(), BleError> {
        Self::lock(&self.shared).active = Some(session);
        info!("Connecting to Bluetooth device: {}", device);

        let sink = self.sink.clone();
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || match open_link(session, device.0, &sink) {
            Ok(link) => {
                let name = link
                    .device
                    .Name()
                    .ok()
                    .map(|n| n.to_string())
                    .filter(|n| !n.is_empty());
                let mtu = link.gatt_session.MaxPduSize().ok();

                let mut guard = Self::lock(&shared);
                if guard.active != Some(session) {
                    drop(guard);
                    debug!("Session {} closed while connecting", session);
                    link.release();
                    return;
                }
                if let Some(previous) = guard.link.replace(link) {
                    previous.release();
                }
                drop(guard);

                sink.emit(RadioEvent::ConnectionChanged {
                    session,
                    status: GattStatus::SUCCESS,
                    link: LinkState::Connected,
                    device_name: name,
                });
                if let Some(mtu) = mtu {
                    sink.emit(RadioEvent::MtuChanged {
                        session,
                        mtu,
                        status: GattStatus::SUCCESS,
                    });
                }
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                sink.emit(RadioEvent::ConnectionChanged {
                    session,
                    status: hresult(&e),
                    link: LinkState::Disconnected,
                    device_name: None,
                });
            }
        });
        Ok(())
    }

    fn discover_services(&mut self, session: SessionId) -> Result<(), BleError> {
        let device = self.device(session)?;
        let sink = self.sink.clone();
        let shared = self.shared.clone();

        tokio::task::spawn_blocking(move || {
            let (status, services) = match enumerate(&device) {
                Ok(Ok((services, handles))) => {
                    let mut guard = Self::lock(&shared);
                    match guard.link.as_mut().filter(|l| l.session == session) {
                        Some(link) => link.characteristics = handles,
                        None => return,
                    }
                    (GattStatus::SUCCESS, services)
                }
                Ok(Err(status)) => (status, Vec::new()),
                Err(e) => (hresult(&e), Vec::new()),
            };
            info!("Found {} services", services.len());
            sink.emit(RadioEvent::ServicesDiscovered {
                session,
                status,
                services,
            });
        });
        Ok(())
    }

    fn set_notify(
        &mut self,
        session: SessionId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) -> Result<(), BleError> {
        let c = self.characteristic(session, characteristic.uuid)?;
        let mut shared = Self::lock(&self.shared);
        let link = shared
            .link
            .as_mut()
            .filter(|l| l.session == session)
            .ok_or(BleError::NotConnected)?;

        if let Some(token) = link.notify_tokens.remove(&characteristic.uuid) {
            c.RemoveValueChanged(token).map_err(platform)?;
        }
        if !enabled {
            return Ok(());
        }

        let sink = self.sink.clone();
        let uuid = characteristic.uuid;
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    sink.emit(RadioEvent::Notification {
                        session,
                        characteristic: uuid,
                        value: read_buffer(args)?,
                    });
                }
                Ok(())
            },
        );
        let token = c.ValueChanged(&handler).map_err(platform)?;
        link.notify_tokens.insert(uuid, token);
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        session: SessionId,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        if descriptor != CCCD_UUID {
            return Err(BleError::Unsupported("descriptor writes other than the CCCD"));
        }
        let cccd_value = if value == ENABLE_NOTIFICATION_VALUE {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else {
            GattClientCharacteristicConfigurationDescriptorValue::None
        };

        let c = self.characteristic(session, characteristic.uuid)?;
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || {
            let status = match c
                .WriteClientCharacteristicConfigurationDescriptorAsync(cccd_value)
                .and_then(|op| op.get())
            {
                Ok(status) => status_of(status),
                Err(e) => {
                    warn!("Notification subscription failed: {}", e);
                    hresult(&e)
                }
            };
            sink.emit(RadioEvent::DescriptorWritten {
                session,
                descriptor,
                status,
            });
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
        let c = self.characteristic(session, characteristic.uuid)?;
        let writer = DataWriter::new().map_err(platform)?;
        writer.WriteBytes(value).map_err(platform)?;
        let buffer = writer.DetachBuffer().map_err(platform)?;
        let option = match mode {
            WriteMode::WithResponse => GattWriteOption::WriteWithResponse,
            WriteMode::WithoutResponse => GattWriteOption::WriteWithoutResponse,
        };

        let sink = self.sink.clone();
        let uuid = characteristic.uuid;
        tokio::task::spawn_blocking(move || {
            let status = match c
                .WriteValueWithOptionAsync(&buffer, option)
                .and_then(|op| op.get())
            {
                Ok(status) => status_of(status),
                Err(e) => hresult(&e),
            };
            sink.emit(RadioEvent::CharacteristicWritten {
                session,
                characteristic: uuid,
                status,
            });
        });
        Ok(())
    }

    fn request_mtu(&mut self, _session: SessionId, _mtu: u16) -> Result<(), BleError> {
        Err(BleError::Unsupported("explicit MTU requests"))
    }

    fn close(&mut self, session: SessionId) {
        let link = {
            let mut shared = Self::lock(&self.shared);
            if shared.active == Some(session) {
                shared.active = None;
            }
            match shared.link.take() {
                Some(link) if link.session == session => Some(link),
                other => {
                    shared.link = other;
                    None
                }
            }
        };
        if let Some(link) = link {
            link.release();
        }
    }
}

impl Drop for WinRtProvider {
    fn drop(&mut self) {
        let _ = self.stop_scan();
    }
}
