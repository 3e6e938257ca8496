use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::args::MqttArgs;

const REQUEST_CAPACITY: usize = 250;
const COMMAND_CAPACITY: usize = 32;

pub struct Broker {
    pub client: AsyncClient,
    pub commands: mpsc::Receiver<String>,
    pub event_loop: JoinHandle<()>,
}

/// Connects to the broker and starts polling its event loop.
///
/// Payloads received on `command_topic` come out of `Broker::commands`. The
/// command topic is subscribed again on every ConnAck so a broker restart
/// does not silently drop it.
pub fn connect(args: &MqttArgs, command_topic: String) -> Broker {
    let mut options = MqttOptions::new(&args.mqtt_client_id, &args.mqtt_host, args.mqtt_port);
    options.set_keep_alive(Duration::from_secs(args.mqtt_keep_alive_secs));

    if let (Some(username), Some(password)) = (&args.mqtt_username, &args.mqtt_password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);

    let subscriber = client.clone();
    let event_loop = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic != command_topic {
                        continue;
                    }

                    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                    debug!(topic = %publish.topic, %payload, "received command");

                    if let Err(e) = tx.try_send(payload) {
                        warn!("dropping command: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to broker");

                    if let Err(e) = subscriber.try_subscribe(&command_topic, QoS::AtLeastOnce) {
                        error!("failed to subscribe to {command_topic}: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {e}");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    Broker {
        client,
        commands,
        event_loop,
    }
}
