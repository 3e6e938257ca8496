use chrono_tz::Tz;
use clap::Parser;
use greenbox::config::DeviceArgs;

#[derive(Debug, Parser)]
pub struct Args {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[arg(long, env = "TZ")]
    pub timezone: Tz,

    /// Also print every distinct frame seen so far.
    #[arg(long)]
    pub frames: bool,

    #[arg(long, default_value_t = 2)]
    pub interval_secs: u64,
}
