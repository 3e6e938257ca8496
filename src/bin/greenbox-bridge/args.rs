use clap::Parser;
use greenbox::config::DeviceArgs;

#[derive(Debug, Parser)]
pub struct Args {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub mqtt: MqttArgs,

    /// Seconds between full republishes of the current state.
    #[arg(long, default_value_t = 10)]
    pub publish_interval_secs: u64,

    /// Seconds without any frame after which the link is reported stale.
    #[arg(long, default_value_t = 20)]
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, clap::Args)]
pub struct MqttArgs {
    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "greenbox")]
    pub mqtt_client_id: String,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_KEEP_ALIVE_SECS", default_value_t = 30)]
    pub mqtt_keep_alive_secs: u64,

    #[arg(long, env = "MQTT_TOPIC_BASE", default_value = "home-assistant/greenbox/")]
    pub topic_base: String,
}
