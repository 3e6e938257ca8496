//! Translation between raw characteristic payloads and typed fields/commands.
//!
//! All knowledge of the byte layout lives behind [`ProtocolTable`]; the
//! functions here only apply it. Nothing in this module does I/O or keeps
//! state between calls.

use chrono::NaiveTime;

use crate::error::EncodingError;
use crate::greenbox::{
    CharacteristicId, Command, FieldKind, FieldValue, LightStatus, MAX_BRIGHTNESS,
    MAX_WAKE_HOURS, MAX_WATER_LEVEL, ProtocolTable,
};

/// A payload bound to the characteristic it travels on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub characteristic: CharacteristicId,
    pub bytes: Vec<u8>,
}

/// Outcome of inspecting one notification.
///
/// Everything except `Field` is an expected steady-state condition: the device
/// cycles through many frame types and only some of them are understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Field(FieldKind, FieldValue),
    ForeignCharacteristic,
    Truncated { len: usize },
    Oversized { len: usize },
    UnknownRegister(u8),
    OutOfRange { kind: FieldKind, raw: u16 },
}

impl Decoded {
    pub fn field(self) -> Option<(FieldKind, FieldValue)> {
        match self {
            Decoded::Field(kind, value) => Some((kind, value)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    table: ProtocolTable,
}

impl FrameCodec {
    pub fn new(table: ProtocolTable) -> Self {
        Self { table }
    }

    pub fn decode_notification(
        &self,
        characteristic: CharacteristicId,
        bytes: &[u8],
    ) -> Option<(FieldKind, FieldValue)> {
        self.classify(characteristic, bytes).field()
    }

    pub fn classify(&self, characteristic: CharacteristicId, bytes: &[u8]) -> Decoded {
        let table = &self.table;

        if characteristic != table.characteristic {
            return Decoded::ForeignCharacteristic;
        }

        let len = bytes.len();
        if len > table.max_notification_len {
            return Decoded::Oversized { len };
        }

        let offset = table.register_offset;
        if len < table.min_notification_len.max(offset + 3) {
            return Decoded::Truncated { len };
        }

        let register = bytes[offset];
        let raw = u16::from_be_bytes([bytes[offset + 1], bytes[offset + 2]]);

        let Some(kind) = table.field_for_register(register) else {
            return Decoded::UnknownRegister(register);
        };

        match decode_value(kind, raw) {
            Some(value) => Decoded::Field(kind, value),
            None => Decoded::OutOfRange { kind, raw },
        }
    }

    pub fn encode_command(&self, command: Command) -> Result<RawFrame, EncodingError> {
        let registers = &self.table.registers;

        let (register, value) = match command {
            Command::SetPower(on) => (registers.light_status, u16::from(on)),
            Command::SetBrightness { lamp, level } => {
                let register = self.lamp_register(FieldKind::LampBrightness(lamp))?;
                if level > MAX_BRIGHTNESS {
                    return Err(EncodingError::BrightnessOutOfRange(level));
                }
                (register, u16::from(level))
            }
            Command::SetWakeTime { lamp, hour, minute } => {
                let register = self.lamp_register(FieldKind::WakeTime(lamp))?;
                (register, encode_time(hour, minute)?)
            }
            Command::SetWeekendWakeTime { hour, minute } => {
                (registers.weekend_wake_time, encode_time(hour, minute)?)
            }
        };

        Ok(RawFrame {
            characteristic: self.table.characteristic,
            bytes: self.frame(register, value).to_vec(),
        })
    }

    fn lamp_register(&self, kind: FieldKind) -> Result<u8, EncodingError> {
        let lamp = kind.lamp().unwrap_or_default();

        self.table
            .register_for_field(kind)
            .ok_or(EncodingError::LampOutOfRange {
                lamp,
                count: self.table.lamp_count(),
            })
    }

    fn frame(&self, register: u8, value: u16) -> [u8; 6] {
        let [hi, lo] = value.to_be_bytes();
        let checksum = self
            .table
            .checksum_base
            .wrapping_sub(register)
            .wrapping_sub(hi)
            .wrapping_sub(lo);

        [
            self.table.frame_start,
            register,
            hi,
            lo,
            checksum,
            self.table.frame_end,
        ]
    }
}

fn decode_value(kind: FieldKind, raw: u16) -> Option<FieldValue> {
    match kind {
        FieldKind::LampBrightness(_) => {
            decode_percent(raw, MAX_BRIGHTNESS).map(FieldValue::Brightness)
        }
        FieldKind::WaterLevel => decode_percent(raw, MAX_WATER_LEVEL).map(FieldValue::WaterLevel),
        FieldKind::WakeTime(_) | FieldKind::WeekendWakeTime => {
            decode_time(raw).map(FieldValue::Time)
        }
        FieldKind::WakeDuration | FieldKind::WeekendWakeDuration => {
            decode_percent(raw, MAX_WAKE_HOURS).map(FieldValue::Hours)
        }
        FieldKind::LightStatus => LightStatus::from_register(raw).map(FieldValue::LightStatus),
    }
}

fn decode_percent(raw: u16, max: u8) -> Option<u8> {
    u8::try_from(raw).ok().filter(|v| *v <= max)
}

/// Times travel as `hour * 100 + minute`.
fn decode_time(raw: u16) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(u32::from(raw / 100), u32::from(raw % 100), 0)
}

fn encode_time(hour: u8, minute: u8) -> Result<u16, EncodingError> {
    if hour > 23 {
        return Err(EncodingError::HourOutOfRange(hour));
    }
    if minute > 59 {
        return Err(EncodingError::MinuteOutOfRange(minute));
    }

    Ok(u16::from(hour) * 100 + u16::from(minute))
}
