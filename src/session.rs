//! Lifecycle wrapper binding one device address to one BLE link.
//!
//! ```text
//! Disconnected -> Connecting -> Subscribing -> Ready -> Disconnected
//! ```
//!
//! Only `Ready` accepts commands; queries in any other state report every
//! field as unknown.

mod diagnostics;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{Decoded, FrameCodec};
use crate::error::{Error, Result, TransportError};
use crate::greenbox::{CharacteristicId, Command, DeviceAddress, FieldKind, ProtocolTable};
use crate::notifier::{ChangeNotifier, FieldChange, SubscriptionId};
use crate::state::{DeviceSnapshot, DeviceStateStore, Reading};
use crate::transport::{NotificationHandler, Subscription, Transport};

pub use diagnostics::{Diagnostics, FrameLogEntry};
use diagnostics::{Counters, FrameLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribing,
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Subscribing => "subscribing",
            SessionState::Ready => "ready",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,

    pub subscribe_timeout: Duration,

    pub write_timeout: Duration,

    /// Distinct raw payloads kept for inspection; 0 disables the log.
    pub frame_log_capacity: usize,

    pub protocol: ProtocolTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            subscribe_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            frame_log_capacity: 256,
            protocol: ProtocolTable::default(),
        }
    }
}

struct ActiveLink<L> {
    link: L,
    subscription: Option<Subscription>,
}

/// State reachable from the transport's delivery path.
struct Shared {
    address: DeviceAddress,
    codec: FrameCodec,
    store: DeviceStateStore,
    state: Mutex<SessionState>,
    // Replaced on every open; cancelling it aborts outstanding writes.
    cancel: Mutex<CancellationToken>,
    counters: Counters,
    frame_log: Mutex<FrameLog>,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Moves to `to` only if still in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reset_cancel_token(&self) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
    }

    /// Forgets everything learned over the previous link. Diagnostics and the
    /// frame log are kept for the lifetime of the session object.
    fn reset_link_state(&self) {
        self.store.clear();
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Drops all cached state and aborts anything waiting on the link.
    fn mark_disconnected(&self) {
        self.set_state(SessionState::Disconnected);
        self.cancel_token().cancel();
        self.store.clear();
    }

    fn ingest(&self, characteristic: CharacteristicId, bytes: &[u8]) {
        if self.state() == SessionState::Disconnected {
            trace!(address = %self.address, "dropping frame received while disconnected");
            return;
        }

        let now = Utc::now();
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);

        let decoded = self.codec.classify(characteristic, bytes);
        self.counters.record(&decoded);
        self.frame_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(bytes, decoded, now);

        let Decoded::Field(kind, value) = decoded else {
            trace!(?decoded, ?bytes, "ignoring frame");
            return;
        };

        let report = self.store.merge(kind, value, now);

        if let Some(change) = &report.change {
            self.counters.record_change();
            debug!(field = %change.kind, value = %change.value, "field changed");
        }

        for failure in report.failures {
            self.counters.record_subscriber_failure();
            warn!(
                field = %failure.kind,
                subscription = ?failure.subscription,
                error = %failure.error,
                "change subscriber failed"
            );
        }
    }
}

impl NotificationHandler for Shared {
    fn on_notification(&self, characteristic: CharacteristicId, bytes: &[u8]) {
        self.ingest(characteristic, bytes);
    }

    fn on_link_lost(&self) {
        if self.state() != SessionState::Disconnected {
            warn!(address = %self.address, "link to device lost");
        }
        self.mark_disconnected();
    }
}

/// A GreenBox reached over one BLE link.
pub struct DeviceSession<T: Transport> {
    address: DeviceAddress,
    transport: Arc<T>,
    config: SessionConfig,
    shared: Arc<Shared>,
    // Also serialises writes: the device drops interleaved frames.
    link: tokio::sync::Mutex<Option<ActiveLink<T::Link>>>,
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(transport: Arc<T>, address: DeviceAddress, config: SessionConfig) -> Self {
        let shared = Shared {
            address,
            codec: FrameCodec::new(config.protocol.clone()),
            store: DeviceStateStore::new(Arc::new(ChangeNotifier::new())),
            state: Mutex::new(SessionState::Disconnected),
            cancel: Mutex::new(CancellationToken::new()),
            counters: Counters::default(),
            frame_log: Mutex::new(FrameLog::new(config.frame_log_capacity)),
            last_activity: Mutex::new(None),
        };

        Self {
            address,
            transport,
            config,
            shared: Arc::new(shared),
            link: tokio::sync::Mutex::new(None),
        }
    }

    /// Opens a session, runs `f` with it and closes it again, whether `f`
    /// returns normally or not. A failed close is logged, not returned.
    pub async fn scoped<F, Fut, R>(
        transport: Arc<T>,
        address: DeviceAddress,
        config: SessionConfig,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(Arc<DeviceSession<T>>) -> Fut,
        Fut: Future<Output = R>,
    {
        let session = Arc::new(Self::new(transport, address, config));
        session.open().await?;

        // If `f` panics or this future is dropped, `Drop` tears the link down.
        let output = f(Arc::clone(&session)).await;

        if let Err(err) = session.close().await {
            warn!(%err, %address, "failed to close session cleanly");
        }

        Ok(output)
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Connects and enables notifications. Anything opened along the way is
    /// released again if a later step fails.
    pub async fn open(&self) -> Result<()> {
        let mut slot = self.link.lock().await;

        if let Some(active) = slot.take() {
            if self.state() == SessionState::Ready {
                *slot = Some(active);
                return Ok(());
            }
            // The previous link was lost; release it before reconnecting.
            if let Err(err) = teardown(&*self.transport, self.address, active).await {
                warn!(%err, address = %self.address, "failed to release lost link");
            }
        }

        self.shared.reset_link_state();
        self.shared.reset_cancel_token();
        self.shared.set_state(SessionState::Connecting);
        info!(address = %self.address, "connecting");

        let limit = self.config.connect_timeout;
        let connected =
            bounded("connect", limit, self.transport.connect(self.address, limit)).await;
        let link = match connected {
            Ok(link) => link,
            Err(err) => {
                self.shared.set_state(SessionState::Disconnected);
                return Err(err.into());
            }
        };

        if !self
            .shared
            .transition(SessionState::Connecting, SessionState::Subscribing)
        {
            let active = ActiveLink {
                link,
                subscription: None,
            };
            if let Err(err) = teardown(&*self.transport, self.address, active).await {
                warn!(%err, address = %self.address, "failed to release link after it was lost");
            }
            return Err(TransportError::LinkLost.into());
        }

        let characteristic = self.config.protocol.characteristic;
        debug!(address = %self.address, %characteristic, "enabling notifications");

        let handler: Arc<dyn NotificationHandler> = self.shared.clone();
        let subscribed = bounded(
            "subscribe",
            self.config.subscribe_timeout,
            self.transport.subscribe(&link, characteristic, handler),
        )
        .await;

        let mut active = ActiveLink {
            link,
            subscription: None,
        };

        let setup = match subscribed {
            Ok(subscription) => {
                active.subscription = Some(subscription);
                if self
                    .shared
                    .transition(SessionState::Subscribing, SessionState::Ready)
                {
                    Ok(())
                } else {
                    Err(TransportError::LinkLost)
                }
            }
            Err(err) => Err(err),
        };

        if let Err(err) = setup {
            self.shared.mark_disconnected();
            if let Err(err) = teardown(&*self.transport, self.address, active).await {
                warn!(%err, address = %self.address, "failed to release link after setup failure");
            }
            return Err(err.into());
        }

        *slot = Some(active);
        info!(address = %self.address, "session ready");

        Ok(())
    }

    /// Cancels any outstanding write, unsubscribes and disconnects. Safe to
    /// call repeatedly.
    pub async fn close(&self) -> Result<()> {
        // Abort outstanding writes first so the link lock is released.
        self.shared.cancel_token().cancel();

        let active = self.link.lock().await.take();
        self.shared.mark_disconnected();

        match active {
            Some(active) => Ok(teardown(&*self.transport, self.address, active).await?),
            None => Ok(()),
        }
    }

    /// Entry point for inbound notifications. Never fails and never waits.
    pub fn on_notification(&self, characteristic: CharacteristicId, bytes: &[u8]) {
        self.shared.ingest(characteristic, bytes);
    }

    pub fn get(&self, kind: FieldKind) -> Option<Reading> {
        if !self.is_ready() {
            return None;
        }
        self.shared.store.get(kind)
    }

    pub fn brightness(&self, lamp: u8) -> Option<u8> {
        self.get(FieldKind::LampBrightness(lamp))?.value.as_percent()
    }

    pub fn wake_time(&self, lamp: u8) -> Option<NaiveTime> {
        self.get(FieldKind::WakeTime(lamp))?.value.as_time()
    }

    pub fn water_level(&self) -> Option<u8> {
        self.get(FieldKind::WaterLevel)?.value.as_percent()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        if !self.is_ready() {
            return DeviceSnapshot::default();
        }
        self.shared.store.snapshot()
    }

    /// Registers `callback` for every field change, in merge order.
    ///
    /// Callbacks run on the ingestion path while it is held, so they must
    /// return quickly and must not feed notifications back into this session
    /// through [`DeviceSession::on_notification`]; doing so deadlocks.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&FieldChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.store.notifier().subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.store.notifier().unsubscribe(id)
    }

    /// Counters since the session object was created, across reconnects.
    pub fn diagnostics(&self) -> Diagnostics {
        self.shared.counters.snapshot()
    }

    /// Distinct payloads seen since the session object was created, across
    /// reconnects.
    pub fn frame_log(&self) -> Vec<FrameLogEntry> {
        self.shared
            .frame_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
    }

    /// When the last frame of any kind arrived on the current link. Reset on
    /// every `open`.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self
            .shared
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` if nothing has arrived within `max_age`. The device publishes
    /// continuously, so a quiet link usually means it is out of range.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let Some(last) = self.last_activity() else {
            return true;
        };
        let Ok(max_age) = chrono::TimeDelta::from_std(max_age) else {
            return false;
        };

        Utc::now() - last > max_age
    }

    pub async fn light_on(&self) -> Result<()> {
        self.send(Command::SetPower(true)).await
    }

    pub async fn light_off(&self) -> Result<()> {
        self.send(Command::SetPower(false)).await
    }

    /// Turns the lights off if they are known to be on, on otherwise.
    pub async fn toggle_light(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let lit = snapshot
            .lights_on_at(Utc::now())
            .or_else(|| snapshot.any_lamp_lit())
            .unwrap_or(false);
        self.send(Command::SetPower(!lit)).await
    }

    pub async fn set_brightness(&self, lamp: u8, level: u8) -> Result<()> {
        self.send(Command::SetBrightness { lamp, level }).await
    }

    /// `hour` and `minute` are UTC.
    pub async fn set_wake_time(&self, lamp: u8, hour: u8, minute: u8) -> Result<()> {
        self.send(Command::SetWakeTime { lamp, hour, minute }).await
    }

    pub async fn set_weekend_wake_time(&self, hour: u8, minute: u8) -> Result<()> {
        self.send(Command::SetWeekendWakeTime { hour, minute }).await
    }

    /// Encodes and writes `command`. Cached state is left alone; it changes
    /// once the device republishes the affected field.
    pub async fn send(&self, command: Command) -> Result<()> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(Error::SessionNotReady(state));
        }

        let frame = self.shared.codec.encode_command(command)?;
        let cancel = self.shared.cancel_token();

        let slot = tokio::select! {
            slot = self.link.lock() => slot,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled.into()),
        };
        let Some(active) = slot.as_ref() else {
            return Err(Error::SessionNotReady(self.state()));
        };

        debug!(command = command.as_str(), bytes = ?frame.bytes, "writing command");

        let limit = self.config.write_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled.into()),
            written = bounded(
                "write",
                limit,
                self.transport.write(&active.link, frame.characteristic, &frame.bytes, limit),
            ) => Ok(written?),
        }
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        let Some(active) = self.link.get_mut().take() else {
            return;
        };
        self.shared.mark_disconnected();

        let transport = Arc::clone(&self.transport);
        let address = self.address;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = teardown(&*transport, address, active).await {
                        warn!(%err, %address, "failed to release link of dropped session");
                    }
                });
            }
            Err(_) => warn!(%address, "session dropped outside a runtime; link not released"),
        }
    }
}

impl<T: Transport> fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

async fn bounded<F, V>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<V, TransportError>
where
    F: Future<Output = Result<V, TransportError>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout {
            operation,
            timeout: limit,
        })?
}

/// Unsubscribes (best effort) and disconnects. Reports the disconnect
/// failure if there is one, otherwise the unsubscribe failure.
async fn teardown<T: Transport>(
    transport: &T,
    address: DeviceAddress,
    active: ActiveLink<T::Link>,
) -> Result<(), TransportError> {
    let ActiveLink { link, subscription } = active;

    let mut unsubscribed = Ok(());
    if let Some(subscription) = subscription {
        unsubscribed = transport.unsubscribe(&link, subscription).await;
        if let Err(err) = &unsubscribed {
            warn!(%err, %address, "failed to disable notifications");
        }
    }

    transport.disconnect(link).await?;
    info!(%address, "disconnected");

    unsubscribed
}
