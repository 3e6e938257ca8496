//! Session and protocol engine for GreenBox lighting/irrigation appliances.
//!
//! The device streams its state over a single BLE characteristic, one data
//! point per notification in rotation. [`session::DeviceSession`] owns the
//! link, runs each notification through [`codec::FrameCodec`] into a
//! [`state::DeviceStateStore`] and fans changes out through
//! [`notifier::ChangeNotifier`].

pub mod codec;
pub mod config;
pub mod error;
pub mod greenbox;
pub mod notifier;
pub mod session;
pub mod state;
pub mod transport;

pub use error::{EncodingError, Error, Result, TransportError};
pub use session::{DeviceSession, SessionConfig, SessionState};
