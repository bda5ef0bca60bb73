use std::fmt;
use std::time::Duration;
use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{future, stream, StreamExt};
use log::{debug, info};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::device::constants::SCAN_POLL_DELAY;
use crate::device::transport::{Link, LinkEvent, LinkEvents, Transport};
use crate::error::DeviceError;

/// Where a peripheral was seen: which adapter, and under which id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtleAddress {
    adapter: usize,
    id: PeripheralId,
    address: BDAddr,
}

impl fmt::Display for BtleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (adapter {})", self.address, self.adapter)
    }
}

/// Transport backed by the platform bluetooth stack.
///
/// Adapters are looked up lazily and scanning is started once for all of them; every
/// session scans through the same running discovery. If scanning fails the adapters are
/// dropped and looked up again on the next `find`.
pub struct BtleplugTransport {
    manager: Manager,
    adapters: Mutex<Option<Vec<Adapter>>>,
}

impl BtleplugTransport {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        Ok(BtleplugTransport { manager, adapters: Mutex::new(None) })
    }

    async fn start_scanning(&self) -> Result<Vec<Adapter>, DeviceError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(DeviceError::NoAdapters);
        }

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(ScanFilter::default()).await?;
        }

        Ok(adapters)
    }

    async fn scanning_adapters(&self) -> Result<Vec<Adapter>, DeviceError> {
        let mut adapters = self.adapters.lock().await;

        if let Some(adapters) = adapters.as_ref() {
            return Ok(adapters.clone());
        }

        let started = self.start_scanning().await?;
        *adapters = Some(started.clone());
        Ok(started)
    }

    async fn forget_adapters(&self) {
        *self.adapters.lock().await = None;
    }

    async fn find_by_name(adapters: &[Adapter], name: &str) -> Result<Option<BtleAddress>, DeviceError> {
        for (index, adapter) in adapters.iter().enumerate() {
            let peripherals = adapter.peripherals().await?;

            for peripheral in peripherals {
                let properties = match peripheral.properties().await {
                    Ok(Some(properties)) => properties,
                    Ok(None) => continue,
                    Err(err) => {
                        debug!("Could not query peripheral for properties: {:?}", err);
                        continue;
                    },
                };

                if properties.local_name.as_deref() == Some(name) {
                    info!("Found {} at {} {:?}", name, properties.address, properties.address_type);
                    return Ok(Some(BtleAddress {
                        adapter: index,
                        id: peripheral.id(),
                        address: properties.address,
                    }));
                }
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Address = BtleAddress;
    type Link = BtleLink;

    async fn find(&self, name: &str, window: Duration) -> Result<Option<BtleAddress>, DeviceError> {
        let adapters = self.scanning_adapters().await?;
        let deadline = Instant::now() + window;

        loop {
            match Self::find_by_name(&adapters, name).await {
                Ok(Some(address)) => return Ok(Some(address)),
                Ok(None) => {},
                Err(err) => {
                    // the adapter might have been removed or powered off
                    self.forget_adapters().await;
                    return Err(err);
                },
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(Duration::from_millis(SCAN_POLL_DELAY)).await;
        }
    }

    async fn connect(&self, address: &BtleAddress) -> Result<BtleLink, DeviceError> {
        let adapters = self.scanning_adapters().await?;
        let adapter = adapters.get(address.adapter).ok_or(DeviceError::UnknownAddress)?.clone();
        let peripheral = adapter.peripheral(&address.id).await?;

        info!("Connecting to peripheral {}...", address);
        peripheral.connect().await?;

        info!("Connected; Discovering services...");
        peripheral.discover_services().await?;

        Ok(BtleLink { adapter, peripheral })
    }

    /// Stops scanning on every adapter that was started.
    async fn close(&self) {
        if let Some(adapters) = self.adapters.lock().await.take() {
            for adapter in adapters {
                if let Err(err) = adapter.stop_scan().await {
                    debug!("Failed to stop adapter scan cleanly: {:?}", err);
                }
            }
        }
    }
}

pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleLink {
    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Characteristic, DeviceError> {
        self.peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.into_iter())
            .find(|c| c.uuid == characteristic)
            .ok_or(DeviceError::MissingCharacteristic)
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> Result<LinkEvents, DeviceError> {
        let data_char = self.characteristic(service, characteristic)?;

        // open the stream first so that no notification sent right after subscribing is lost
        let notifications = self.peripheral.notifications().await?;
        let central_events = self.adapter.events().await?;

        info!("Subscribing to characteristic {:?} {:?}", service, characteristic);
        self.peripheral.subscribe(&data_char).await?;

        let notifications = notifications
            .filter_map(move |data| future::ready(
                if data.uuid == characteristic { Some(LinkEvent::Notification(data.value)) } else { None }
            ))
            .chain(stream::once(future::ready(LinkEvent::Disconnected)));

        let peripheral_id = self.peripheral.id();
        let disconnects = central_events.filter_map(move |event| future::ready(match event {
            CentralEvent::DeviceDisconnected(id) if id == peripheral_id => Some(LinkEvent::Disconnected),
            _ => None,
        }));

        Ok(stream::select(notifications, disconnects).boxed())
    }

    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> Result<(), DeviceError> {
        let data_char = self.characteristic(service, characteristic)?;
        self.peripheral.unsubscribe(&data_char).await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
