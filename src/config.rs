use std::time::Duration;

use clap::Args;
use macaddr::MacAddr6;
use uuid::Uuid;

use crate::greenbox::ProtocolTable;
use crate::session::SessionConfig;

/// Device options shared by every binary.
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Hardware address of the GreenBox, e.g. C4:4F:33:0A:1B:2C.
    #[arg(long, env = "GREENBOX_ADDRESS")]
    pub address: MacAddr6,

    /// Override the telemetry characteristic for firmware that uses another one.
    #[arg(long, env = "GREENBOX_CHARACTERISTIC")]
    pub characteristic: Option<Uuid>,

    #[arg(long, default_value_t = 20)]
    pub connect_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub subscribe_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub write_timeout_secs: u64,

    #[arg(long, default_value_t = 256)]
    pub frame_log_capacity: usize,
}

impl DeviceArgs {
    pub fn session_config(&self) -> SessionConfig {
        let mut protocol = ProtocolTable::default();
        if let Some(characteristic) = self.characteristic {
            protocol.characteristic = characteristic;
        }

        SessionConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            subscribe_timeout: Duration::from_secs(self.subscribe_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            frame_log_capacity: self.frame_log_capacity,
            protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::greenbox::DEFAULT_CHARACTERISTIC;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        device: DeviceArgs,
    }

    #[test]
    fn defaults_produce_base_model_config() {
        let cli = Cli::parse_from(["greenbox", "--address", "C4:4F:33:0A:1B:2C"]);
        let config = cli.device.session_config();

        assert_eq!(
            cli.device.address,
            MacAddr6::new(0xc4, 0x4f, 0x33, 0x0a, 0x1b, 0x2c)
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.write_timeout, Duration::from_secs(5));
        assert_eq!(config.protocol.characteristic, DEFAULT_CHARACTERISTIC);
    }

    #[test]
    fn characteristic_override() {
        let cli = Cli::parse_from([
            "greenbox",
            "--address",
            "C4:4F:33:0A:1B:2C",
            "--characteristic",
            "0000fff4-0000-1000-8000-00805f9b34fb",
            "--write-timeout-secs",
            "2",
        ]);
        let config = cli.device.session_config();

        assert_eq!(
            config.protocol.characteristic,
            uuid::uuid!("0000fff4-0000-1000-8000-00805f9b34fb")
        );
        assert_eq!(config.write_timeout, Duration::from_secs(2));
    }
}
