use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

use crate::greenbox::{FieldKind, FieldValue, LightStatus};
use crate::notifier::{ChangeNotifier, DeliveryFailure, FieldChange};

/// Latest value of a field and when it was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub value: FieldValue,

    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MergeReport {
    /// `None` when the merge only refreshed an unchanged value.
    pub change: Option<FieldChange>,

    pub failures: Vec<DeliveryFailure>,
}

/// Per-field, last-write-wins view of the device.
///
/// The device publishes one data point per notification in rotation, so the
/// store converges over a few cycles; there is no notion of a complete
/// snapshot and nothing waits for one.
#[derive(Debug)]
pub struct DeviceStateStore {
    fields: Mutex<BTreeMap<FieldKind, Reading>>,

    // Held across merge and delivery so events leave in merge order. Readers
    // never take it.
    ingest: Mutex<()>,

    notifier: Arc<ChangeNotifier>,
}

impl DeviceStateStore {
    pub fn new(notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            fields: Mutex::new(BTreeMap::new()),
            ingest: Mutex::new(()),
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Stores `value` and notifies subscribers if the field is new or changed.
    ///
    /// Subscribers must not call `merge` themselves.
    pub fn merge(&self, kind: FieldKind, value: FieldValue, at: DateTime<Utc>) -> MergeReport {
        let _ingest = self.ingest.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self
            .fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                kind,
                Reading {
                    value,
                    updated_at: at,
                },
            )
            .map(|r| r.value);

        if previous == Some(value) {
            return MergeReport::default();
        }

        let change = FieldChange {
            kind,
            value,
            previous,
            updated_at: at,
        };
        let failures = self.notifier.notify(&change);

        MergeReport {
            change: Some(change),
            failures,
        }
    }

    pub fn get(&self, kind: FieldKind) -> Option<Reading> {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            fields: self
                .fields
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub fn clear(&self) {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point-in-time copy of every known field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub fields: BTreeMap<FieldKind, Reading>,
}

impl DeviceSnapshot {
    pub fn get(&self, kind: FieldKind) -> Option<FieldValue> {
        self.fields.get(&kind).map(|r| r.value)
    }

    pub fn brightness(&self, lamp: u8) -> Option<u8> {
        self.get(FieldKind::LampBrightness(lamp))?.as_percent()
    }

    /// Known lamp levels, ordered by lamp index.
    pub fn lamp_levels(&self) -> Vec<(u8, u8)> {
        self.fields
            .iter()
            .filter_map(|(kind, reading)| match kind {
                FieldKind::LampBrightness(lamp) => Some((*lamp, reading.value.as_percent()?)),
                _ => None,
            })
            .collect()
    }

    /// `Some(true)` if any known lamp is above zero, `None` if no lamp level
    /// has been received yet.
    pub fn any_lamp_lit(&self) -> Option<bool> {
        let levels = self.lamp_levels();
        if levels.is_empty() {
            return None;
        }

        Some(levels.iter().any(|(_, level)| *level > 0))
    }

    pub fn water_level(&self) -> Option<u8> {
        self.get(FieldKind::WaterLevel)?.as_percent()
    }

    pub fn wake_time(&self, lamp: u8) -> Option<NaiveTime> {
        self.get(FieldKind::WakeTime(lamp))?.as_time()
    }

    pub fn wake_duration(&self) -> Option<u8> {
        self.get(FieldKind::WakeDuration)?.as_hours()
    }

    pub fn weekend_wake_time(&self) -> Option<NaiveTime> {
        self.get(FieldKind::WeekendWakeTime)?.as_time()
    }

    pub fn weekend_wake_duration(&self) -> Option<u8> {
        self.get(FieldKind::WeekendWakeDuration)?.as_hours()
    }

    pub fn weekend_program_enabled(&self) -> Option<bool> {
        self.weekend_wake_duration().map(|hours| hours > 0)
    }

    pub fn light_status(&self) -> Option<LightStatus> {
        self.get(FieldKind::LightStatus)?.as_light_status()
    }

    /// Whether the lamps should be lit at `now` according to the light status
    /// register, evaluating the wake program when the device follows it.
    ///
    /// Wake times are UTC on the device.
    pub fn lights_on_at(&self, now: DateTime<Utc>) -> Option<bool> {
        match self.light_status()? {
            LightStatus::Off => Some(false),
            LightStatus::On => Some(true),
            LightStatus::Scheduled => {
                let hours = self.wake_duration()?;
                let wake_times: Vec<NaiveTime> = self
                    .fields
                    .iter()
                    .filter_map(|(kind, reading)| match kind {
                        FieldKind::WakeTime(_) => reading.value.as_time(),
                        _ => None,
                    })
                    .collect();

                if wake_times.is_empty() {
                    return None;
                }

                Some(
                    wake_times
                        .into_iter()
                        .any(|wake| in_wake_window(now, wake, hours)),
                )
            }
        }
    }

    /// Most recent update across all fields.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.fields.values().map(|r| r.updated_at).max()
    }
}

fn in_wake_window(now: DateTime<Utc>, wake: NaiveTime, hours: u8) -> bool {
    let mut start = now.date_naive().and_time(wake).and_utc();
    if start > now {
        start -= TimeDelta::days(1);
    }
    let end = start + TimeDelta::hours(i64::from(hours));

    start <= now && now < end
}
