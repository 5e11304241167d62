//! BLE implementation of the transport boundary.
//!
//! The BMS advertises a primary service carrying two characteristics: `ff01`
//! notifies response bytes, `ff02` accepts command writes. Which service they
//! hang off varies between firmware revisions, so discovery walks every
//! service rather than assuming one.

use crate::error::SetupError;
use crate::transport::{Transport, WriteChannel};
use anyhow::{anyhow, Context, Result};
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::stream::BoxStream;
use futures_util::{pin_mut, stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

/// BLE transport backed by the system's default adapter.
pub struct BleTransport {
    adapter: Adapter,
    device: Option<Device>,
    device_name: String,
}

impl BleTransport {
    const READ_CHARACTERISTIC_ID: &'static str = "0000ff01-0000-1000-8000-00805f9b34fb";
    const WRITE_CHARACTERISTIC_ID: &'static str = "0000ff02-0000-1000-8000-00805f9b34fb";
    const SCAN_TIMEOUT_S: u64 = 30;

    /// Create a transport on the default adapter, waiting for it to power
    /// on.
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        Ok(Self {
            adapter,
            device: None,
            device_name: String::new(),
        })
    }

    async fn discover_device(&self, name: &str) -> Result<Device> {
        let adapter_events = self.adapter.scan(&[]).await?;
        pin_mut!(adapter_events);
        while let Some(discovered) = adapter_events.next().await {
            let device_name = discovered.device.name_async().await.unwrap_or_default();
            trace!("saw device {device_name:?}");
            if device_name == name {
                return Ok(discovered.device);
            }
        }

        Err(anyhow!("Scan ended before device {name} was discovered"))
    }

    fn read_characteristic_id() -> Uuid {
        Uuid::parse_str(Self::READ_CHARACTERISTIC_ID).unwrap()
    }

    fn write_characteristic_id() -> Uuid {
        Uuid::parse_str(Self::WRITE_CHARACTERISTIC_ID).unwrap()
    }
}

impl Transport for BleTransport {
    type Data = BoxStream<'static, Result<Vec<u8>>>;
    type Writer = BleWriter;

    async fn scan_for(&mut self, device_name: &str) -> Result<()> {
        self.device_name = device_name.to_string();

        let device = timeout(
            Duration::from_secs(Self::SCAN_TIMEOUT_S),
            self.discover_device(device_name),
        )
        .await
        .map_err(|_| anyhow!("Device {device_name} not found"))??;

        self.device = Some(device);
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let device = self
            .device
            .as_ref()
            .ok_or(anyhow!("No device discovered"))?;
        self.adapter.connect_device(device).await?;
        Ok(())
    }

    async fn open_channels(&mut self) -> Result<(Self::Data, Self::Writer)> {
        let device = self
            .device
            .as_ref()
            .ok_or(anyhow!("No device discovered"))?;

        let mut read: Option<Characteristic> = None;
        let mut write: Option<Characteristic> = None;
        for service in device.discover_services().await? {
            if read.is_none() {
                read = service
                    .discover_characteristics_with_uuid(Self::read_characteristic_id())
                    .await?
                    .first()
                    .cloned();
            }
            if write.is_none() {
                write = service
                    .discover_characteristics_with_uuid(Self::write_characteristic_id())
                    .await?
                    .first()
                    .cloned();
            }
        }

        let read = read.ok_or_else(|| SetupError::MissingReadChannel(self.device_name.clone()))?;
        let write =
            write.ok_or_else(|| SetupError::MissingWriteChannel(self.device_name.clone()))?;
        debug!("found read and write characteristics");

        // The notification stream borrows its characteristic, so a forwarding
        // task owns both and the session gets the receiving end. Subscription
        // success is confirmed before returning.
        let (data_tx, mut data_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(async move {
            let notifications = match read.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    notifications
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            pin_mut!(notifications);
            while let Some(item) = notifications.next().await {
                if data_tx.send(item.map_err(Into::into)).is_err() {
                    // receiver dropped, session is gone
                    break;
                }
            }
        });
        ready_rx
            .await
            .context("notification task terminated before subscribing")??;

        let data = stream::poll_fn(move |cx| data_rx.poll_recv(cx)).boxed();
        Ok((data, BleWriter(write)))
    }
}

/// Write half of the BLE link.
pub struct BleWriter(Characteristic);

impl WriteChannel for BleWriter {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        // The device expects unacknowledged writes
        self.0.write_without_response(bytes).await?;
        Ok(())
    }
}
