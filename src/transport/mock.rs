use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::greenbox::{CharacteristicId, DeviceAddress};
use crate::transport::{NotificationHandler, Subscription, Transport};

/// Everything the session asked the mock transport to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect(DeviceAddress),
    Subscribe(CharacteristicId),
    Write {
        characteristic: CharacteristicId,
        bytes: Vec<u8>,
    },
    Unsubscribe(CharacteristicId),
    Disconnect(DeviceAddress),
}

#[derive(Debug)]
pub struct MockLink {
    address: DeviceAddress,
}

/// In-memory transport that records calls and lets the caller push
/// notifications as if they came from a device.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<MockCall>,
    handler: Option<Arc<dyn NotificationHandler>>,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_writes: bool,
    hang_connect: bool,
    hang_subscribe: bool,
    hang_writes: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_connect(&self) {
        self.inner().fail_connect = true;
    }

    pub fn fail_subscribe(&self) {
        self.inner().fail_subscribe = true;
    }

    pub fn fail_writes(&self) {
        self.inner().fail_writes = true;
    }

    /// Connect never completes; only the caller's timeout ends it.
    pub fn hang_connect(&self) {
        self.inner().hang_connect = true;
    }

    pub fn hang_subscribe(&self) {
        self.inner().hang_subscribe = true;
    }

    pub fn hang_writes(&self) {
        self.inner().hang_writes = true;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.inner().calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Write { bytes, .. } => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner().handler.is_some()
    }

    /// Delivers a notification to the current subscriber. Returns `false` if
    /// nobody is subscribed.
    pub fn notify(&self, characteristic: CharacteristicId, bytes: &[u8]) -> bool {
        let handler = self.inner().handler.clone();
        match handler {
            Some(handler) => {
                handler.on_notification(characteristic, bytes);
                true
            }
            None => false,
        }
    }

    /// Simulates the device going out of range.
    pub fn drop_link(&self) {
        let handler = self.inner().handler.take();
        if let Some(handler) = handler {
            handler.on_link_lost();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn connect(
        &self,
        address: DeviceAddress,
        _timeout: Duration,
    ) -> Result<MockLink, TransportError> {
        let (fail, hang) = {
            let mut inner = self.inner();
            inner.calls.push(MockCall::Connect(address));
            (inner.fail_connect, inner.hang_connect)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(TransportError::DeviceNotFound(address));
        }

        Ok(MockLink { address })
    }

    async fn subscribe(
        &self,
        _link: &MockLink,
        characteristic: CharacteristicId,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<Subscription, TransportError> {
        let (fail, hang) = {
            let mut inner = self.inner();
            inner.calls.push(MockCall::Subscribe(characteristic));
            (inner.fail_subscribe, inner.hang_subscribe)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }

        self.inner().handler = Some(handler);

        Ok(Subscription::new(characteristic))
    }

    async fn write(
        &self,
        _link: &MockLink,
        characteristic: CharacteristicId,
        bytes: &[u8],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let (fail, hang) = {
            let mut inner = self.inner();
            inner.calls.push(MockCall::Write {
                characteristic,
                bytes: bytes.to_vec(),
            });
            (inner.fail_writes, inner.hang_writes)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(TransportError::WriteRejected("mock write failure".to_owned()));
        }

        Ok(())
    }

    async fn unsubscribe(
        &self,
        _link: &MockLink,
        subscription: Subscription,
    ) -> Result<(), TransportError> {
        subscription.cancel();

        let mut inner = self.inner();
        inner
            .calls
            .push(MockCall::Unsubscribe(subscription.characteristic()));
        inner.handler = None;

        Ok(())
    }

    async fn disconnect(&self, link: MockLink) -> Result<(), TransportError> {
        let mut inner = self.inner();
        inner.calls.push(MockCall::Disconnect(link.address));
        inner.handler = None;

        Ok(())
    }
}
