use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::codec::Decoded;

/// Counts of what the ingestion path has seen since the session was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub frames_received: u64,
    pub fields_decoded: u64,
    pub fields_changed: u64,
    pub foreign_characteristic: u64,
    pub truncated: u64,
    pub oversized: u64,
    pub unknown_register: u64,
    pub out_of_range: u64,
    pub subscriber_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_received: AtomicU64,
    fields_decoded: AtomicU64,
    fields_changed: AtomicU64,
    foreign_characteristic: AtomicU64,
    truncated: AtomicU64,
    oversized: AtomicU64,
    unknown_register: AtomicU64,
    out_of_range: AtomicU64,
    subscriber_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn record(&self, decoded: &Decoded) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);

        let counter = match decoded {
            Decoded::Field(..) => &self.fields_decoded,
            Decoded::ForeignCharacteristic => &self.foreign_characteristic,
            Decoded::Truncated { .. } => &self.truncated,
            Decoded::Oversized { .. } => &self.oversized,
            Decoded::UnknownRegister(_) => &self.unknown_register,
            Decoded::OutOfRange { .. } => &self.out_of_range,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_change(&self) {
        self.fields_changed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_subscriber_failure(&self) {
        self.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Diagnostics {
        Diagnostics {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            fields_decoded: self.fields_decoded.load(Ordering::Relaxed),
            fields_changed: self.fields_changed.load(Ordering::Relaxed),
            foreign_characteristic: self.foreign_characteristic.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            unknown_register: self.unknown_register.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
        }
    }
}

/// One distinct payload seen on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLogEntry {
    pub bytes: Vec<u8>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
    pub decoded: Decoded,
}

impl FrameLogEntry {
    pub fn hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Distinct raw payloads in first-seen order, for working out what the
/// not-yet-understood frames mean.
#[derive(Debug)]
pub(crate) struct FrameLog {
    capacity: usize,
    entries: IndexMap<Vec<u8>, FrameLogEntry>,
}

impl FrameLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::new(),
        }
    }

    pub(crate) fn record(&mut self, bytes: &[u8], decoded: Decoded, at: DateTime<Utc>) {
        if self.capacity == 0 {
            return;
        }

        if let Some(entry) = self.entries.get_mut(bytes) {
            entry.last_seen = at;
            entry.count += 1;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }

        self.entries.insert(
            bytes.to_vec(),
            FrameLogEntry {
                bytes: bytes.to_vec(),
                first_seen: at,
                last_seen: at,
                count: 1,
                decoded,
            },
        );
    }

    pub(crate) fn entries(&self) -> Vec<FrameLogEntry> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::greenbox::{FieldKind, FieldValue};

    #[test]
    fn counts_by_outcome() {
        let counters = Counters::default();
        counters.record(&Decoded::Field(FieldKind::WaterLevel, FieldValue::WaterLevel(1)));
        counters.record(&Decoded::Truncated { len: 2 });
        counters.record(&Decoded::UnknownRegister(0x7f));
        counters.record(&Decoded::UnknownRegister(0x7e));
        counters.record_subscriber_failure();

        let d = counters.snapshot();
        assert_eq!(d.frames_received, 4);
        assert_eq!(d.fields_decoded, 1);
        assert_eq!(d.truncated, 1);
        assert_eq!(d.unknown_register, 2);
        assert_eq!(d.subscriber_failures, 1);
    }

    #[test]
    fn frame_log_deduplicates_and_evicts_oldest() {
        let mut log = FrameLog::new(2);
        let t0 = Utc::now();
        let t1 = t0 + chrono::TimeDelta::seconds(1);

        log.record(&[1, 2], Decoded::UnknownRegister(2), t0);
        log.record(&[1, 2], Decoded::UnknownRegister(2), t1);
        log.record(&[3], Decoded::Truncated { len: 1 }, t1);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].count, 2);
        assert_eq!(entries[0].first_seen, t0);
        assert_eq!(entries[0].last_seen, t1);
        assert_eq!(entries[0].hex(), "0102");

        log.record(&[4], Decoded::Truncated { len: 1 }, t1);
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].bytes, vec![3]);
        assert_eq!(entries[1].bytes, vec![4]);
    }

    #[test]
    fn zero_capacity_disables_log() {
        let mut log = FrameLog::new(0);
        log.record(&[1], Decoded::Truncated { len: 1 }, Utc::now());
        assert!(log.entries().is_empty());
    }
}
