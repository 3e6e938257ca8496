//! The minimal BLE capability set the session depends on.

pub mod ble;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::greenbox::{CharacteristicId, DeviceAddress};

pub use ble::{BleLink, BleTransport};
pub use mock::{MockCall, MockLink, MockTransport};

/// Receives everything the transport pushes for one subscription.
///
/// Called from the transport's delivery path; implementations must return
/// quickly and must not block.
pub trait NotificationHandler: Send + Sync + 'static {
    fn on_notification(&self, characteristic: CharacteristicId, bytes: &[u8]);

    fn on_link_lost(&self) {}
}

/// Handle for an enabled notification stream.
#[derive(Debug)]
pub struct Subscription {
    characteristic: CharacteristicId,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(characteristic: CharacteristicId) -> Self {
        Self {
            characteristic,
            cancel: CancellationToken::new(),
        }
    }

    pub fn characteristic(&self) -> CharacteristicId {
        self.characteristic
    }

    /// Cancelled when the subscription is torn down; delivery tasks watch it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: Send + Sync + 'static;

    /// Opens a link to `address`. `timeout` is the budget for locating and
    /// connecting to the device.
    async fn connect(
        &self,
        address: DeviceAddress,
        timeout: Duration,
    ) -> Result<Self::Link, TransportError>;

    async fn subscribe(
        &self,
        link: &Self::Link,
        characteristic: CharacteristicId,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<Subscription, TransportError>;

    async fn write(
        &self,
        link: &Self::Link,
        characteristic: CharacteristicId,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(
        &self,
        link: &Self::Link,
        subscription: Subscription,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self, link: Self::Link) -> Result<(), TransportError>;
}
