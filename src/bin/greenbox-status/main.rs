mod args;

use std::{fmt, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context as _, Result, bail};
use args::Args;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use clap::Parser as _;
use greenbox::{
    DeviceSession,
    greenbox::FieldKind,
    session::FrameLogEntry,
    state::DeviceSnapshot,
    transport::{BleTransport, Transport},
};
use tokio::time::interval;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[tokio::main]
async fn main() -> ExitCode {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "greenbox=info,greenbox_status=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let transport = Arc::new(
        BleTransport::new()
            .await
            .context("failed to initialize Bluetooth")?,
    );

    DeviceSession::scoped(
        transport,
        args.device.address,
        args.device.session_config(),
        |session| watch(session, &args),
    )
    .await
    .with_context(|| format!("failed to open session with {}", args.device.address))?
}

async fn watch<T: Transport>(session: Arc<DeviceSession<T>>, args: &Args) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(args.interval_secs));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = ticker.tick() => {}
        }

        if !session.is_ready() {
            bail!("lost connection to {}", session.address());
        }

        let frames = args.frames.then(|| session.frame_log());
        let mut out = String::from(CLEAR_SCREEN);
        render(
            &mut out,
            &session.snapshot(),
            Utc::now(),
            args.timezone,
            frames.as_deref(),
        )?;
        print!("{out}");
    }
}

fn render(
    out: &mut impl fmt::Write,
    snapshot: &DeviceSnapshot,
    now: DateTime<Utc>,
    tz: Tz,
    frames: Option<&[FrameLogEntry]>,
) -> fmt::Result {
    writeln!(
        out,
        "{}",
        now.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z")
    )?;
    writeln!(out)?;

    let lights = match snapshot.lights_on_at(now) {
        Some(true) => "on",
        Some(false) => "off",
        None => "unknown",
    };
    let status = snapshot.light_status().map_or("unknown", |s| s.as_str());
    writeln!(out, "lights:       {lights} ({status})")?;

    let lamps = snapshot.lamp_levels();
    if lamps.is_empty() {
        writeln!(out, "lamps:        unknown")?;
    }
    for (lamp, level) in lamps {
        writeln!(out, "lamp {lamp}:       {level}%")?;
    }

    match snapshot.water_level() {
        Some(level) => writeln!(out, "water level:  {level} / 100")?,
        None => writeln!(out, "water level:  unknown")?,
    }

    for (kind, reading) in &snapshot.fields {
        if let FieldKind::WakeTime(lamp) = kind
            && let Some(wake) = reading.value.as_time()
        {
            writeln!(out, "wake {lamp}:       {}", wake_time(wake, now, tz))?;
        }
    }

    if let Some(hours) = snapshot.wake_duration() {
        writeln!(out, "lit for:      {hours} h")?;
    }

    if let Some(wake) = snapshot.weekend_wake_time() {
        let hours = snapshot.weekend_wake_duration().unwrap_or(0);
        writeln!(
            out,
            "weekend:      {} for {hours} h",
            wake_time(wake, now, tz)
        )?;
    }

    match snapshot.last_updated() {
        Some(at) => writeln!(
            out,
            "updated:      {}",
            at.with_timezone(&tz).format("%H:%M:%S")
        )?,
        None => writeln!(out, "updated:      never")?,
    }

    if let Some(frames) = frames {
        writeln!(out)?;
        for entry in frames {
            writeln!(
                out,
                "{:<16} x{:<5} {} .. {}  {:?}",
                entry.hex(),
                entry.count,
                entry.first_seen.with_timezone(&tz).format("%H:%M:%S"),
                entry.last_seen.with_timezone(&tz).format("%H:%M:%S"),
                entry.decoded,
            )?;
        }
    }

    Ok(())
}

/// Device wake times are UTC; show both.
fn wake_time(wake: NaiveTime, now: DateTime<Utc>, tz: Tz) -> String {
    let utc = now.date_naive().and_time(wake).and_utc();
    format!(
        "{} UTC ({} local)",
        utc.format("%H:%M"),
        utc.with_timezone(&tz).format("%H:%M")
    )
}
