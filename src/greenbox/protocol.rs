use uuid::{Uuid, uuid};

use crate::greenbox::{CharacteristicId, FieldKind};

/// Serial-style characteristic the base model both notifies on and accepts
/// writes on.
pub const DEFAULT_CHARACTERISTIC: Uuid = uuid!("0000ffe1-0000-1000-8000-00805f9b34fb");

/// Byte layout and register numbering of one firmware revision.
///
/// Everything here was reverse-engineered from traffic captures, so nothing is
/// hard-coded in the codec: a firmware that numbers its registers differently
/// gets its own table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolTable {
    pub characteristic: CharacteristicId,

    pub frame_start: u8,

    pub frame_end: u8,

    /// Writes are ignored by the device unless
    /// `checksum == checksum_base - (register + hi + lo)` (mod 256).
    pub checksum_base: u8,

    /// Offset of the register byte in a notification; the big-endian value
    /// follows it.
    pub register_offset: usize,

    pub min_notification_len: usize,

    /// A few rare notifications are longer than this; their layout is not
    /// understood.
    pub max_notification_len: usize,

    pub registers: Registers,
}

/// Register ids, one per decodable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    /// Indexed by lamp; its length is the device's lamp count.
    pub lamp_brightness: Vec<u8>,

    /// Indexed by lamp, same length as `lamp_brightness`.
    pub wake_time: Vec<u8>,

    pub wake_duration: u8,

    pub weekend_wake_time: u8,

    pub weekend_wake_duration: u8,

    pub water_level: u8,

    pub light_status: u8,
}

impl ProtocolTable {
    pub fn lamp_count(&self) -> u8 {
        self.registers.lamp_brightness.len() as u8
    }

    pub fn field_for_register(&self, register: u8) -> Option<FieldKind> {
        let r = &self.registers;

        if let Some(lamp) = r.lamp_brightness.iter().position(|&id| id == register) {
            return Some(FieldKind::LampBrightness(lamp as u8));
        }
        if let Some(lamp) = r.wake_time.iter().position(|&id| id == register) {
            return Some(FieldKind::WakeTime(lamp as u8));
        }

        match register {
            id if id == r.water_level => Some(FieldKind::WaterLevel),
            id if id == r.wake_duration => Some(FieldKind::WakeDuration),
            id if id == r.weekend_wake_time => Some(FieldKind::WeekendWakeTime),
            id if id == r.weekend_wake_duration => Some(FieldKind::WeekendWakeDuration),
            id if id == r.light_status => Some(FieldKind::LightStatus),
            _ => None,
        }
    }

    pub fn register_for_field(&self, kind: FieldKind) -> Option<u8> {
        let r = &self.registers;

        match kind {
            FieldKind::LampBrightness(lamp) => r.lamp_brightness.get(lamp as usize).copied(),
            FieldKind::WakeTime(lamp) => r.wake_time.get(lamp as usize).copied(),
            FieldKind::WaterLevel => Some(r.water_level),
            FieldKind::WakeDuration => Some(r.wake_duration),
            FieldKind::WeekendWakeTime => Some(r.weekend_wake_time),
            FieldKind::WeekendWakeDuration => Some(r.weekend_wake_duration),
            FieldKind::LightStatus => Some(r.light_status),
        }
    }
}

impl Default for ProtocolTable {
    /// Base model, three lamps.
    fn default() -> Self {
        Self {
            characteristic: DEFAULT_CHARACTERISTIC,
            frame_start: 0xee,
            frame_end: 0xef,
            checksum_base: 0xd9,
            register_offset: 1,
            min_notification_len: 4,
            max_notification_len: 7,
            registers: Registers {
                lamp_brightness: vec![0x21, 0x22, 0x23],
                wake_time: vec![0x31, 0x32, 0x33],
                wake_duration: 0x34,
                weekend_wake_time: 0x35,
                weekend_wake_duration: 0x36,
                water_level: 0x41,
                light_status: 0x11,
            },
        }
    }
}
