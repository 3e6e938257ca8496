use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use macaddr::MacAddr6;
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt as _;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::greenbox::{CharacteristicId, DeviceAddress};
use crate::transport::{NotificationHandler, Subscription, Transport};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Transport over the host's first Bluetooth adapter.
pub struct BleTransport {
    _manager: Manager,
    adapter: Adapter,
}

pub struct BleLink {
    peripheral: Peripheral,
}

impl BleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        Ok(Self {
            _manager: manager,
            adapter,
        })
    }

    async fn known_peripheral(
        &self,
        address: DeviceAddress,
    ) -> Result<Option<Peripheral>, TransportError> {
        let peripherals = self.adapter.peripherals().await?;

        Ok(peripherals.into_iter().find(|p| {
            let mac_address: MacAddr6 = p.address().into_inner().into();
            mac_address == address
        }))
    }

    /// Waits for `address` to show up, scanning only if the adapter has not
    /// already seen it.
    async fn find_peripheral(
        &self,
        address: DeviceAddress,
        timeout: Duration,
    ) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        self.adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + timeout;

        let found = loop {
            match self.known_peripheral(address).await {
                Ok(Some(peripheral)) => break Ok(peripheral),
                Ok(None) if Instant::now() >= deadline => {
                    break Err(TransportError::DeviceNotFound(address));
                }
                Ok(None) => sleep(SCAN_POLL_INTERVAL).await,
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = self.adapter.stop_scan().await {
            warn!(%err, "failed to stop BLE scan");
        }

        found
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    uuid: CharacteristicId,
) -> Result<Characteristic, TransportError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(TransportError::CharacteristicNotFound(uuid))
}

#[async_trait]
impl Transport for BleTransport {
    type Link = BleLink;

    async fn connect(
        &self,
        address: DeviceAddress,
        timeout: Duration,
    ) -> Result<BleLink, TransportError> {
        let peripheral = self.find_peripheral(address, timeout).await?;

        peripheral.connect().await?;

        if let Err(err) = peripheral.discover_services().await {
            if let Err(err) = peripheral.disconnect().await {
                warn!(%err, %address, "failed to disconnect after service discovery failed");
            }
            return Err(err.into());
        }

        Ok(BleLink { peripheral })
    }

    async fn subscribe(
        &self,
        link: &BleLink,
        characteristic: CharacteristicId,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<Subscription, TransportError> {
        let target = find_characteristic(&link.peripheral, characteristic)?;

        // Take the streams before enabling notifications so the first frames
        // are not missed.
        let mut notifications = link.peripheral.notifications().await?;
        let mut events = self.adapter.events().await?;

        link.peripheral.subscribe(&target).await?;

        let subscription = Subscription::new(characteristic);
        let cancel = subscription.cancellation();
        let peripheral_id = link.peripheral.id();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = notifications.next() => match notification {
                        Some(n) => handler.on_notification(n.uuid, &n.value),
                        None => {
                            handler.on_link_lost();
                            break;
                        }
                    },
                    Some(event) = events.next() => {
                        if let CentralEvent::DeviceDisconnected(id) = event
                            && id == peripheral_id
                        {
                            handler.on_link_lost();
                            break;
                        }
                    }
                }
            }
            debug!(%characteristic, "notification forwarding stopped");
        });

        Ok(subscription)
    }

    async fn write(
        &self,
        link: &BleLink,
        characteristic: CharacteristicId,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let target = find_characteristic(&link.peripheral, characteristic)?;

        tokio::time::timeout(
            timeout,
            link.peripheral
                .write(&target, bytes, WriteType::WithoutResponse),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "write",
            timeout,
        })??;

        Ok(())
    }

    async fn unsubscribe(
        &self,
        link: &BleLink,
        subscription: Subscription,
    ) -> Result<(), TransportError> {
        subscription.cancel();

        let target = find_characteristic(&link.peripheral, subscription.characteristic())?;
        link.peripheral.unsubscribe(&target).await?;

        Ok(())
    }

    async fn disconnect(&self, link: BleLink) -> Result<(), TransportError> {
        link.peripheral.disconnect().await?;

        Ok(())
    }
}
