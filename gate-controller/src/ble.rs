//! BLE transport for the gate controller
//!
//! A driver task owns the `btleplug` peripheral. [`BleTransport`] only queues
//! requests for it, so every `Transport` call returns immediately and the
//! outcome arrives on the event channel.

use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ConfigError, DeviceIdentity};
use crate::transport::{EventSender, Transport, TransportError, TransportEvent};

#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("bluetooth: {0}")]
    Btle(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("characteristic {0} not found on device")]
    MissingCharacteristic(Uuid),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A discovered BLE device
#[derive(Debug, Clone)]
pub struct GateDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_gate: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, BleError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(BleError::NoAdapter)
}

/// Scan for BLE devices
///
/// Devices advertising `gate_name` have `is_gate = true`.
pub async fn scan(duration: Duration, gate_name: &str) -> Result<Vec<GateDevice>, BleError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_gate = name == gate_name;

            devices.push(GateDevice { name, address, rssi: props.rssi, is_gate });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find a device by address or advertised name
async fn find_device(
    adapter: &Adapter,
    target: &str,
    duration: Duration,
) -> Result<Option<Peripheral>, BleError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        let address = peripheral.address().to_string();
        let name = peripheral
            .properties()
            .await?
            .and_then(|p| p.local_name)
            .unwrap_or_default();

        if address.eq_ignore_ascii_case(target) || name == target {
            adapter.stop_scan().await?;
            tracing::debug!(%address, %name, "found device");
            return Ok(Some(peripheral));
        }
    }

    adapter.stop_scan().await?;
    Ok(None)
}

enum Request {
    Connect(String),
    Disconnect,
    Write(String),
}

/// `Transport` backed by a BLE serial characteristic
pub struct BleTransport {
    requests: mpsc::UnboundedSender<Request>,
    driver: JoinHandle<()>,
}

impl BleTransport {
    /// Start the driver task. Must be called inside a tokio runtime.
    pub fn spawn(
        identity: &DeviceIdentity,
        scan_duration: Duration,
        events: EventSender,
    ) -> Result<Self, BleError> {
        let characteristic_uuid = identity.characteristic()?;
        let (requests, rx) = mpsc::unbounded_channel();

        let driver = Driver {
            characteristic_uuid,
            scan_duration,
            events,
            adapter: None,
            link: None,
        };
        let driver = tokio::spawn(driver.run(rx));

        Ok(Self { requests, driver })
    }

    /// Stop accepting requests and wait until the driver has worked through
    /// the ones already queued, including a final disconnect.
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(e) = self.driver.await {
            tracing::warn!("BLE driver task failed: {e}");
        }
    }

    fn request(&self, request: Request) -> Result<(), TransportError> {
        self.requests.send(request).map_err(|_| TransportError::Closed)
    }
}

impl Transport for BleTransport {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        self.request(Request::Connect(address.to_string()))
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.request(Request::Disconnect)
    }

    fn write_characteristic(&mut self, payload: &str) -> Result<(), TransportError> {
        self.request(Request::Write(payload.to_string()))
    }
}

struct Link {
    peripheral: Peripheral,
    characteristic: Characteristic,
    /// Forwards notifications; finishes once the link is gone
    watcher: JoinHandle<()>,
}

struct Driver {
    characteristic_uuid: Uuid,
    scan_duration: Duration,
    events: EventSender,
    adapter: Option<Adapter>,
    link: Option<Link>,
}

impl Driver {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = requests.recv().await {
            match request {
                Request::Connect(address) => self.connect(&address).await,
                Request::Disconnect => self.disconnect().await,
                Request::Write(payload) => self.write(&payload).await,
            }
        }

        // transport handle dropped
        if self.link.is_some() {
            self.disconnect().await;
        }
    }

    fn emit(&self, event: TransportEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.events.send(event);
    }

    /// Forget a link whose watcher already reported it gone
    async fn discard_dead_link(&mut self) {
        if self.link.as_ref().is_some_and(|l| l.watcher.is_finished()) {
            tracing::debug!("discarding dead link");
            self.drop_link().await;
        }
    }

    async fn connect(&mut self, address: &str) {
        self.discard_dead_link().await;
        if let Some(link) = &self.link {
            if link.peripheral.is_connected().await.unwrap_or(false) {
                tracing::debug!("already connected");
                self.emit(TransportEvent::Connected);
                return;
            }
            self.drop_link().await;
        }

        self.emit(TransportEvent::Connecting);
        match self.try_connect(address).await {
            Ok(Some(link)) => {
                self.link = Some(link);
                self.emit(TransportEvent::Connected);
            }
            Ok(None) => self.emit(TransportEvent::NoDeviceFound),
            Err(e) => {
                tracing::warn!("connect to {address} failed: {e}");
                self.emit(TransportEvent::Error(e.to_string()));
            }
        }
    }

    async fn adapter(&mut self) -> Result<Adapter, BleError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let adapter = get_adapter().await?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    async fn try_connect(&mut self, address: &str) -> Result<Option<Link>, BleError> {
        let adapter = self.adapter().await?;
        let Some(peripheral) = find_device(&adapter, address, self.scan_duration).await? else {
            return Ok(None);
        };

        peripheral.connect().await?;
        match self.open_characteristic(&adapter, &peripheral).await {
            Ok((characteristic, watcher)) => Ok(Some(Link {
                peripheral,
                characteristic,
                watcher,
            })),
            Err(e) => {
                let _ = peripheral.disconnect().await;
                Err(e)
            }
        }
    }

    async fn open_characteristic(
        &self,
        adapter: &Adapter,
        peripheral: &Peripheral,
    ) -> Result<(Characteristic, JoinHandle<()>), BleError> {
        // subscribe first so a drop during discovery is not missed
        let disconnects = adapter.events().await?.filter_map(|event| {
            futures::future::ready(match event {
                CentralEvent::DeviceDisconnected(id) => Some(id),
                _ => None,
            })
        });
        peripheral.discover_services().await?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.characteristic_uuid)
            .ok_or(BleError::MissingCharacteristic(self.characteristic_uuid))?;

        peripheral.subscribe(&characteristic).await?;
        let notifications = peripheral.notifications().await?;
        let task = tokio::spawn(watch_link(
            notifications,
            Box::pin(disconnects),
            peripheral.id(),
            characteristic.uuid,
            self.events.clone(),
        ));

        Ok((characteristic, task))
    }

    async fn disconnect(&mut self) {
        self.drop_link().await;
        self.emit(TransportEvent::Disconnected);
    }

    async fn drop_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        link.watcher.abort();
        if let Err(e) = link.peripheral.disconnect().await {
            tracing::warn!("disconnect failed: {e}");
        }
    }

    async fn write(&mut self, payload: &str) {
        self.discard_dead_link().await;
        let Some(link) = &self.link else {
            self.emit(TransportEvent::Error(TransportError::NotConnected.to_string()));
            return;
        };

        let write_type = if link
            .characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        let result = link
            .peripheral
            .write(&link.characteristic, payload.as_bytes(), write_type)
            .await;

        if let Err(e) = result {
            tracing::warn!("write failed: {e}");
            self.drop_link().await;
            self.emit(TransportEvent::Error(e.to_string()));
        }
    }
}

/// Turn characteristic notifications into `DataAvailable` events until the
/// link goes away.
///
/// The link is gone when the notification stream ends or the adapter reports
/// `peripheral` disconnected; either way `Disconnected` is sent once.
async fn watch_link<N, D, I>(
    mut notifications: N,
    mut disconnects: D,
    peripheral: I,
    uuid: Uuid,
    events: EventSender,
) where
    N: Stream<Item = ValueNotification> + Unpin,
    D: Stream<Item = I> + Unpin,
    I: PartialEq + std::fmt::Debug,
{
    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(n) if n.uuid == uuid => {
                    if events.send(TransportEvent::DataAvailable(payload(&n.value))).is_err() {
                        return;
                    }
                }
                Some(_) => {}
                None => break,
            },
            Some(id) = disconnects.next() => {
                if id == peripheral {
                    tracing::info!(?id, "device dropped the link");
                    break;
                }
            }
        }
    }
    let _ = events.send(TransportEvent::Disconnected);
}

/// The serial module terminates answers with CR/LF; strip it so the codec
/// sees the bare answer
fn payload(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn notification(uuid: Uuid, value: &[u8]) -> ValueNotification {
        ValueNotification {
            uuid,
            value: value.to_vec(),
        }
    }

    fn drain(events: &mut crate::transport::EventReceiver) -> Vec<TransportEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[test]
    fn payload_strips_line_endings() {
        assert_eq!(payload(b"ok:m:1\r\n"), "ok:m:1");
        assert_eq!(payload(b"ok:m:0\n"), "ok:m:0");
        assert_eq!(payload(b"err:secure\r"), "err:secure");
        assert_eq!(payload(b""), "");
        assert_eq!(payload(b"\r\n"), "");
    }

    #[test]
    fn payload_is_lossy() {
        let text = payload(&[b'o', b'k', 0xff, b'\n']);
        assert_eq!(text, "ok\u{fffd}");
        assert_eq!(
            gate_proto::decode(&text),
            gate_proto::Response::Unrecognized { raw: text.clone() }
        );
    }

    #[tokio::test]
    async fn forwards_answers_until_stream_ends() {
        let uuid = Uuid::from_u128(0xffe1);
        let other = Uuid::from_u128(0xffe2);
        let (tx, mut rx) = crate::transport::event_channel();

        let notifications = stream::iter(vec![
            notification(uuid, b"ok:m:1\r\n"),
            notification(other, b"ignored"),
            notification(uuid, b"ok:m:0\n"),
        ]);
        watch_link(notifications, stream::pending::<u8>(), 1, uuid, tx).await;

        assert_eq!(
            drain(&mut rx),
            [
                TransportEvent::DataAvailable("ok:m:1".to_string()),
                TransportEvent::DataAvailable("ok:m:0".to_string()),
                TransportEvent::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn adapter_disconnect_ends_the_link() {
        let uuid = Uuid::from_u128(0xffe1);
        let (tx, mut rx) = crate::transport::event_channel();

        // another device dropping out is not our link
        let disconnects = stream::iter(vec![7u8, 3]);
        watch_link(stream::pending::<ValueNotification>(), disconnects, 3, uuid, tx).await;

        assert_eq!(drain(&mut rx), [TransportEvent::Disconnected]);
    }

    #[tokio::test]
    async fn shutdown_finishes_queued_disconnect() {
        let (tx, mut rx) = crate::transport::event_channel();
        let mut transport =
            BleTransport::spawn(&DeviceIdentity::default(), Duration::from_secs(1), tx).unwrap();

        transport.disconnect().unwrap();
        transport.shutdown().await;

        assert_eq!(drain(&mut rx), [TransportEvent::Disconnected]);
        // driver is gone, so is its sender
        assert_eq!(rx.recv().await, None);
    }
}
