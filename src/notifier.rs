use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use chrono::{DateTime, Utc};

use crate::greenbox::{FieldKind, FieldValue};

/// A field that was seen for the first time or changed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub kind: FieldKind,
    pub value: FieldValue,
    pub previous: Option<FieldValue>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A subscriber that returned an error or panicked while handling a change.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub subscription: SubscriptionId,
    pub kind: FieldKind,
    pub error: anyhow::Error,
}

type Callback = Arc<dyn Fn(&FieldChange) -> anyhow::Result<()> + Send + Sync>;

/// Fans field changes out to any number of subscribers, synchronously and in
/// the order they are handed in.
#[derive(Default)]
pub struct ChangeNotifier {
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&FieldChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `change` to every subscriber. One subscriber failing does not
    /// keep the others from seeing the change.
    pub fn notify(&self, change: &FieldChange) -> Vec<DeliveryFailure> {
        // Callbacks run without the lock held so they may (un)subscribe.
        let subscribers: Vec<(SubscriptionId, Callback)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = Vec::new();
        for (id, callback) in subscribers {
            let error = match panic::catch_unwind(AssertUnwindSafe(|| callback(change))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(_) => anyhow!("subscriber panicked"),
            };

            failures.push(DeliveryFailure {
                subscription: id,
                kind: change.kind,
                error,
            });
        }

        failures
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
