use std::time::Duration;

use thiserror::Error;

use crate::greenbox::{CharacteristicId, DeviceAddress};
use crate::session::SessionState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("session is not ready: {0}")]
    SessionNotReady(SessionState),
}

/// Failures of the BLE link. Never retried inside the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapters found")]
    NoAdapter,

    #[error("device not found: {0}")]
    DeviceNotFound(DeviceAddress),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(CharacteristicId),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("write cancelled because the session was closed")]
    Cancelled,

    #[error("link to the device was lost")]
    LinkLost,

    #[error("write rejected: {0}")]
    WriteRejected(String),

    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),
}

/// Out-of-range command arguments, caught before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("lamp index out of range: device has {count} lamps, got {lamp}")]
    LampOutOfRange { lamp: u8, count: u8 },

    #[error("brightness out of range: expected 0-100, got {0}")]
    BrightnessOutOfRange(u8),

    #[error("hour out of range: expected 0-23, got {0}")]
    HourOutOfRange(u8),

    #[error("minute out of range: expected 0-59, got {0}")]
    MinuteOutOfRange(u8),
}
