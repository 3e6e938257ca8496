mod args;
mod bridge;
mod mqtt;

use std::{
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context as _, Result, anyhow, bail};
use args::Args;
use clap::Parser as _;
use greenbox::{DeviceSession, transport::BleTransport};
use rumqttc::{AsyncClient, QoS};
use tokio::{sync::mpsc, time::interval};
use tracing::{error, info, warn};

use crate::bridge::{BridgeCommand, BridgeState, Publication, Topics};

#[tokio::main]
async fn main() -> ExitCode {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "greenbox=info,greenbox_bridge=info".to_owned());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let topics = Topics::new(&args.mqtt.topic_base);

    let transport = Arc::new(
        BleTransport::new()
            .await
            .context("failed to initialize Bluetooth")?,
    );
    let session = DeviceSession::new(
        transport,
        args.device.address,
        args.device.session_config(),
    );

    let state = Arc::new(Mutex::new(BridgeState::default()));
    let (publish_tx, mut publish_rx) = mpsc::unbounded_channel();
    {
        let state = Arc::clone(&state);
        session.subscribe(move |change| {
            let publications = state
                .lock()
                .map_err(|_| anyhow!("bridge state lock poisoned"))?
                .apply(change);
            for publication in publications {
                publish_tx.send(publication)?;
            }
            Ok(())
        });
    }

    let mut broker = mqtt::connect(&args.mqtt, topics.command.clone());

    session
        .open()
        .await
        .with_context(|| format!("failed to open session with {}", args.device.address))?;
    info!(address = %args.device.address, "session ready");

    let result = serve(
        &args,
        &topics,
        &session,
        &state,
        &broker.client,
        &mut publish_rx,
        &mut broker.commands,
    )
    .await;

    broker.event_loop.abort();
    if let Err(e) = session.close().await {
        warn!("failed to close session: {e}");
    }

    result
}

async fn serve(
    args: &Args,
    topics: &Topics,
    session: &DeviceSession<BleTransport>,
    state: &Mutex<BridgeState>,
    client: &AsyncClient,
    publications: &mut mpsc::UnboundedReceiver<Publication>,
    commands: &mut mpsc::Receiver<String>,
) -> Result<()> {
    let stale_after = Duration::from_secs(args.stale_after_secs);
    let mut ticker = interval(Duration::from_secs(args.publish_interval_secs));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
            Some(publication) = publications.recv() => {
                publish(client, topics, publication).await;
            }
            Some(payload) = commands.recv() => {
                let command: BridgeCommand = match payload.parse() {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("ignoring command {payload:?}: {e:#}");
                        continue;
                    }
                };

                if let Err(e) = command.execute(session).await {
                    error!(?command, "failed to execute command: {e}");
                }
            }
            _ = ticker.tick() => {
                if !session.is_ready() {
                    bail!("session is {}, giving up", session.state());
                }

                if session.is_stale(stale_after) {
                    warn!(
                        last_activity = ?session.last_activity(),
                        "no frames from the device in {stale_after:?}"
                    );
                }

                let current = state
                    .lock()
                    .map_err(|_| anyhow!("bridge state lock poisoned"))?
                    .current();
                for publication in current {
                    publish(client, topics, publication).await;
                }
            }
        }
    }
}

async fn publish(client: &AsyncClient, topics: &Topics, publication: Publication) {
    let topic = publication.topic(topics);
    let payload = publication.payload();

    if let Err(e) = client
        .publish(topic, QoS::AtLeastOnce, true, payload.clone())
        .await
    {
        error!(topic, %payload, "failed to publish: {e}");
    }
}
