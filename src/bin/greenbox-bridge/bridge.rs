use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context as _, Error, bail};
use greenbox::greenbox::{FieldKind, FieldValue};
use greenbox::notifier::FieldChange;
use greenbox::transport::Transport;
use greenbox::DeviceSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub water_level: String,
    pub light_on: String,
    pub command: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        Self {
            water_level: format!("{base}water_lvl"),
            light_on: format!("{base}light_on"),
            command: format!("{base}command"),
        }
    }
}

/// A value to put on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    WaterLevel(u8),
    LightOn(bool),
}

impl Publication {
    pub fn topic<'a>(&self, topics: &'a Topics) -> &'a str {
        match self {
            Publication::WaterLevel(_) => &topics.water_level,
            Publication::LightOn(_) => &topics.light_on,
        }
    }

    pub fn payload(&self) -> String {
        match self {
            Publication::WaterLevel(level) => level.to_string(),
            Publication::LightOn(true) => "ON".to_owned(),
            Publication::LightOn(false) => "OFF".to_owned(),
        }
    }
}

/// The two derived values the bus carries, rebuilt from field changes.
#[derive(Debug, Default)]
pub struct BridgeState {
    water_level: Option<u8>,
    lamps: BTreeMap<u8, u8>,
}

impl BridgeState {
    /// Folds `change` in and returns whatever published value it altered.
    pub fn apply(&mut self, change: &FieldChange) -> Vec<Publication> {
        match (change.kind, change.value) {
            (FieldKind::WaterLevel, FieldValue::WaterLevel(level)) => {
                if self.water_level.replace(level) == Some(level) {
                    return vec![];
                }
                vec![Publication::WaterLevel(level)]
            }
            (FieldKind::LampBrightness(lamp), FieldValue::Brightness(level)) => {
                let before = self.light_on();
                self.lamps.insert(lamp, level);
                let after = self.light_on();

                match after {
                    Some(on) if before != after => vec![Publication::LightOn(on)],
                    _ => vec![],
                }
            }
            _ => vec![],
        }
    }

    pub fn current(&self) -> Vec<Publication> {
        self.water_level
            .map(Publication::WaterLevel)
            .into_iter()
            .chain(self.light_on().map(Publication::LightOn))
            .collect()
    }

    fn light_on(&self) -> Option<bool> {
        if self.lamps.is_empty() {
            return None;
        }

        Some(self.lamps.values().any(|level| *level > 0))
    }
}

/// Commands accepted on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    On,
    Off,
    Toggle,
    Brightness { lamp: u8, level: u8 },
    Wake { lamp: u8, hour: u8, minute: u8 },
}

impl BridgeCommand {
    pub async fn execute<T: Transport>(self, session: &DeviceSession<T>) -> greenbox::Result<()> {
        match self {
            BridgeCommand::On => session.light_on().await,
            BridgeCommand::Off => session.light_off().await,
            BridgeCommand::Toggle => session.toggle_light().await,
            BridgeCommand::Brightness { lamp, level } => session.set_brightness(lamp, level).await,
            BridgeCommand::Wake { lamp, hour, minute } => {
                session.set_wake_time(lamp, hour, minute).await
            }
        }
    }
}

impl FromStr for BridgeCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        let lowered: Vec<String> = words.iter().map(|w| w.to_ascii_lowercase()).collect();
        let lowered: Vec<&str> = lowered.iter().map(String::as_str).collect();

        match lowered.as_slice() {
            ["on"] => Ok(BridgeCommand::On),
            ["off"] => Ok(BridgeCommand::Off),
            ["toggle"] => Ok(BridgeCommand::Toggle),
            ["brightness", lamp, level] => Ok(BridgeCommand::Brightness {
                lamp: lamp
                    .parse()
                    .with_context(|| format!("failed to parse lamp: {lamp}"))?,
                level: level
                    .parse()
                    .with_context(|| format!("failed to parse brightness: {level}"))?,
            }),
            ["wake", lamp, time] => {
                let (hour, minute) = time
                    .split_once(':')
                    .with_context(|| format!("expected HH:MM, got {time}"))?;
                Ok(BridgeCommand::Wake {
                    lamp: lamp
                        .parse()
                        .with_context(|| format!("failed to parse lamp: {lamp}"))?,
                    hour: hour
                        .parse()
                        .with_context(|| format!("failed to parse hour: {hour}"))?,
                    minute: minute
                        .parse()
                        .with_context(|| format!("failed to parse minute: {minute}"))?,
                })
            }
            _ => bail!("unknown command: {s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn change(kind: FieldKind, value: FieldValue) -> FieldChange {
        FieldChange {
            kind,
            value,
            previous: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn topics_follow_base() {
        let topics = Topics::new("home-assistant/greenbox/");
        assert_eq!(topics.water_level, "home-assistant/greenbox/water_lvl");
        assert_eq!(topics.light_on, "home-assistant/greenbox/light_on");
        assert_eq!(topics.command, "home-assistant/greenbox/command");
    }

    #[test]
    fn water_level_is_published_on_change() {
        let mut state = BridgeState::default();
        let c = change(FieldKind::WaterLevel, FieldValue::WaterLevel(42));

        assert_eq!(state.apply(&c), vec![Publication::WaterLevel(42)]);
        assert_eq!(state.apply(&c), vec![]);
    }

    #[test]
    fn light_on_is_derived_from_any_lamp() {
        let mut state = BridgeState::default();

        let published = state.apply(&change(
            FieldKind::LampBrightness(0),
            FieldValue::Brightness(0),
        ));
        assert_eq!(published, vec![Publication::LightOn(false)]);

        let published = state.apply(&change(
            FieldKind::LampBrightness(1),
            FieldValue::Brightness(40),
        ));
        assert_eq!(published, vec![Publication::LightOn(true)]);

        // Still lit through lamp 1.
        let published = state.apply(&change(
            FieldKind::LampBrightness(0),
            FieldValue::Brightness(70),
        ));
        assert_eq!(published, vec![]);

        assert_eq!(state.current(), vec![Publication::LightOn(true)]);
    }

    #[test]
    fn unrelated_fields_are_not_published() {
        let mut state = BridgeState::default();
        let published = state.apply(&change(FieldKind::WakeDuration, FieldValue::Hours(12)));
        assert!(published.is_empty());
        assert!(state.current().is_empty());
    }

    #[test]
    fn payloads() {
        assert_eq!(Publication::WaterLevel(7).payload(), "7");
        assert_eq!(Publication::LightOn(true).payload(), "ON");
        assert_eq!(Publication::LightOn(false).payload(), "OFF");
    }

    #[test]
    fn parses_commands() {
        assert_eq!("ON".parse::<BridgeCommand>().unwrap(), BridgeCommand::On);
        assert_eq!(" off ".parse::<BridgeCommand>().unwrap(), BridgeCommand::Off);
        assert_eq!(
            "toggle".parse::<BridgeCommand>().unwrap(),
            BridgeCommand::Toggle
        );
        assert_eq!(
            "brightness 2 55".parse::<BridgeCommand>().unwrap(),
            BridgeCommand::Brightness { lamp: 2, level: 55 }
        );
        assert_eq!(
            "wake 0 06:45".parse::<BridgeCommand>().unwrap(),
            BridgeCommand::Wake {
                lamp: 0,
                hour: 6,
                minute: 45
            }
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!("dance".parse::<BridgeCommand>().is_err());
        assert!("brightness one 55".parse::<BridgeCommand>().is_err());
        assert!("wake 0 0645".parse::<BridgeCommand>().is_err());
        assert!("".parse::<BridgeCommand>().is_err());
    }
}
