use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use log::{info, warn};

use neurosculpt::audio::{AudioCueController, LogAudioBackend};
use neurosculpt::channel::{ChannelConfig, WsConnector};
use neurosculpt::scene::SceneStore;
use neurosculpt::session::{ActuationSession, SessionContext, SessionSettings, SessionSnapshot};
use neurosculpt::simulate::{SimConfig, SimConnector};

/// Drive the sculpture from live EEG band powers.
#[derive(Parser, Debug)]
#[command(name = "neurosculpt", version)]
struct Args {
    /// Scene file: a JSON array of configurations.
    #[arg(long)]
    scene: PathBuf,

    /// Configuration id to play; defaults to the first one in the scene.
    #[arg(long)]
    config: Option<String>,

    /// Telemetry/control server address.
    #[arg(long, default_value = "http://192.168.1.224:5001")]
    server: String,

    /// Use the built-in telemetry simulator instead of a server.
    #[arg(long)]
    simulate: bool,

    /// Seconds between periodic re-sends.
    #[arg(long, default_value = "3", value_parser = parse_tick)]
    tick: Duration,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = 5)]
    attempts: u32,

    /// Send an EEG mirror command for every sample.
    #[arg(long)]
    mirror: bool,

    /// Send START once the channel is live.
    #[arg(long)]
    start: bool,

    /// List the scene's configurations and exit.
    #[arg(long)]
    list: bool,
}

/// `--tick` seconds as a positive, representable [`Duration`].
fn parse_tick(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        Ok(_) => Err("must be positive".into()),
        Err(e) => Err(format!("{s:?} is not a usable interval: {e}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=neurosculpt=debug cargo run -- --scene scenes.json
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    // ── Scene ─────────────────────────────────────────────────────────────────
    let store = SceneStore::load(&args.scene)?;
    if args.list {
        for c in store.configurations() {
            println!(
                "{:12} {:24} {}x{}  {} range(s)  {} audio set(s)",
                c.id,
                c.name,
                c.grid_x,
                c.grid_y,
                c.ranges.len(),
                c.audio.len()
            );
        }
        return Ok(());
    }
    let config = match &args.config {
        Some(id) => store.get(id)?,
        None => match store.configurations().first() {
            Some(c) => c,
            None => bail!("{} contains no configurations", args.scene.display()),
        },
    };
    info!(
        "Playing configuration {} ({}), grid {}x{}",
        config.id, config.name, config.grid_x, config.grid_y
    );

    // ── Session ───────────────────────────────────────────────────────────────
    let settings = SessionSettings {
        tick_interval: args.tick,
        connect_attempts: args.attempts,
        mirror_telemetry: args.mirror,
        send_start: args.start,
        ..SessionSettings::default()
    };
    let ctx = SessionContext::from_source(&store, config)?.with_settings(settings);
    let mut session = ActuationSession::new(ctx, AudioCueController::new(LogAudioBackend::default()));

    // Print Active Set changes as they happen.
    let mut snapshots = session.subscribe();
    tokio::spawn(async move {
        let mut shown: Option<SessionSnapshot> = None;
        while snapshots.changed().await.is_ok() {
            let snap = snapshots.borrow_and_update().clone();
            let changed = shown.as_ref().map_or(true, |s| {
                s.active != snap.active || s.status != snap.status || s.playing != snap.playing
            });
            if changed {
                println!(
                    "[{}] active: [{}]  playing: [{}]  sent: {}",
                    snap.status,
                    snap.active.join(", "),
                    snap.playing.join(", "),
                    snap.commands_sent
                );
            }
            shown = Some(snap);
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler failed: {e}");
            std::future::pending::<()>().await;
        }
        info!("Quit requested.");
    };

    // ── Run ───────────────────────────────────────────────────────────────────
    let result = if args.simulate {
        info!("Using the built-in telemetry simulator.");
        let mut connector = SimConnector::new(SimConfig::default());
        session.run(&mut connector, shutdown).await
    } else {
        let mut connector = WsConnector::new(ChannelConfig {
            server: args.server.clone(),
            ..ChannelConfig::default()
        });
        session.run(&mut connector, shutdown).await
    };

    match result {
        Ok(()) => info!("Session finished."),
        Err(e) => warn!("Session ended: {e}"),
    }
    let failures = session.audio().errors().len();
    if failures > 0 {
        warn!("{failures} audio error(s) during the session");
    }
    Ok(())
}
