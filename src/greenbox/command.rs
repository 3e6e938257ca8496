/// An instruction for the device, consumed once by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPower(bool),
    SetBrightness { lamp: u8, level: u8 },
    /// Wake time is interpreted by the device as UTC.
    SetWakeTime { lamp: u8, hour: u8, minute: u8 },
    SetWeekendWakeTime { hour: u8, minute: u8 },
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::SetPower(_) => "set_power",
            Command::SetBrightness { .. } => "set_brightness",
            Command::SetWakeTime { .. } => "set_wake_time",
            Command::SetWeekendWakeTime { .. } => "set_weekend_wake_time",
        }
    }
}
