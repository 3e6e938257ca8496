use std::fmt;

use chrono::{NaiveTime, Timelike as _};
use macaddr::MacAddr6;
use uuid::Uuid;

/// Hardware address of a GreenBox, e.g. `C4:4F:33:0A:1B:2C`.
pub type DeviceAddress = MacAddr6;

/// GATT characteristic a frame was received on or is written to.
pub type CharacteristicId = Uuid;

/// Highest brightness a lamp accepts, in percent.
pub const MAX_BRIGHTNESS: u8 = 100;

/// Highest water level the tank reports, in percent.
pub const MAX_WATER_LEVEL: u8 = 100;

/// Longest wake period the device can be programmed for.
pub const MAX_WAKE_HOURS: u8 = 24;

/// Telemetry category carried by a single notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    LampBrightness(u8),
    WakeTime(u8),
    WaterLevel,
    WakeDuration,
    WeekendWakeTime,
    WeekendWakeDuration,
    LightStatus,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::LampBrightness(_) => "lamp_brightness",
            FieldKind::WakeTime(_) => "wake_time",
            FieldKind::WaterLevel => "water_level",
            FieldKind::WakeDuration => "wake_duration",
            FieldKind::WeekendWakeTime => "weekend_wake_time",
            FieldKind::WeekendWakeDuration => "weekend_wake_duration",
            FieldKind::LightStatus => "light_status",
        }
    }

    pub fn lamp(&self) -> Option<u8> {
        match self {
            FieldKind::LampBrightness(lamp) | FieldKind::WakeTime(lamp) => Some(*lamp),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lamp() {
            Some(lamp) => write!(f, "{}[{lamp}]", self.as_str()),
            None => f.write_str(self.as_str()),
        }
    }
}

/// What the light status register says the lamps are doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightStatus {
    Off,
    On,
    /// The device follows its wake program; whether the lamps are lit depends
    /// on the wake time and duration.
    Scheduled,
}

impl LightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightStatus::Off => "off",
            LightStatus::On => "on",
            LightStatus::Scheduled => "scheduled",
        }
    }

    pub fn from_register(v: u16) -> Option<Self> {
        match v {
            0 => Some(LightStatus::Off),
            1 => Some(LightStatus::On),
            3 => Some(LightStatus::Scheduled),
            _ => None,
        }
    }
}

/// A decoded, range-checked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Brightness(u8),
    Time(NaiveTime),
    WaterLevel(u8),
    Hours(u8),
    LightStatus(LightStatus),
}

impl FieldValue {
    pub fn as_percent(&self) -> Option<u8> {
        match self {
            FieldValue::Brightness(v) | FieldValue::WaterLevel(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            FieldValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_hours(&self) -> Option<u8> {
        match self {
            FieldValue::Hours(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_light_status(&self) -> Option<LightStatus> {
        match self {
            FieldValue::LightStatus(s) => Some(*s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Brightness(v) | FieldValue::WaterLevel(v) => write!(f, "{v}"),
            FieldValue::Time(t) => write!(f, "{:02}:{:02}", t.hour(), t.minute()),
            FieldValue::Hours(h) => write!(f, "{h}h"),
            FieldValue::LightStatus(s) => f.write_str(s.as_str()),
        }
    }
}
