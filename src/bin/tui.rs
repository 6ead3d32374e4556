//! Live dashboard for a sculpture play session.
//!
//! Usage:
//!   cargo run --bin tui -- --scene scenes.json              # connect to the telemetry server
//!   cargo run --bin tui -- --scene scenes.json --simulate   # use the built-in simulator
//!
//! Keys
//! ----
//!   s        start a session (ignored while one is running)
//!   x        stop the current session
//!   Tab      cycle through the scene's configurations (stops the session)
//!   q / Esc  quit

use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use neurosculpt::audio::{AudioCueController, LogAudioBackend};
use neurosculpt::channel::{ChannelConfig, WsConnector};
use neurosculpt::error::ChannelError;
use neurosculpt::matcher::band_of;
use neurosculpt::scene::{Configuration, SceneStore};
use neurosculpt::session::{ActuationSession, SessionContext, SessionSnapshot};
use neurosculpt::simulate::{SimConfig, SimConnector};
use neurosculpt::types::{Band, ConnectionStatus, SessionState};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Band power that fills a whole bar.  Larger values are clamped.
const BAR_FULL_SCALE: f64 = 30.0;

/// Width of a band bar in cells.
const BAR_WIDTH: usize = 30;

/// Per-band bar colours, in [`Band::ALL`] order.
const BAND_COLORS: [Color; 5] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::LightRed,
];

/// Braille spinner frames cycled at ~100 ms intervals while connecting.
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

// ── Arguments ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tui")]
struct Args {
    /// Scene file: a JSON array of configurations.
    #[arg(long)]
    scene: PathBuf,

    /// Configuration id to start with; defaults to the first one.
    #[arg(long)]
    config: Option<String>,

    /// Telemetry/control server address.
    #[arg(long, default_value = "http://192.168.1.224:5001")]
    server: String,

    /// Use the built-in telemetry simulator instead of a server.
    #[arg(long)]
    simulate: bool,
}

// ── Running session ───────────────────────────────────────────────────────────

/// Where a session gets its telemetry from.
#[derive(Clone)]
enum Source {
    Server(String),
    Simulated,
}

/// A session running on its own task.  Dropping it stops the session.
struct Running {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ChannelError>>,
}

impl Running {
    fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawn a session for `ctx`; its snapshots are forwarded into `view`.
fn start_session(ctx: SessionContext, source: Source, view: watch::Sender<SessionSnapshot>) -> Running {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut session = ActuationSession::new(ctx, AudioCueController::new(LogAudioBackend::default()));

        let mut snapshots = session.subscribe();
        let forward = tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snap = snapshots.borrow_and_update().clone();
                view.send_replace(snap);
            }
        });

        let shutdown = async {
            let _ = stop_rx.await;
        };
        let result = match source {
            Source::Server(server) => {
                let mut connector = WsConnector::new(ChannelConfig {
                    server,
                    ..ChannelConfig::default()
                });
                session.run(&mut connector, shutdown).await
            }
            Source::Simulated => {
                let mut connector = SimConnector::new(SimConfig::default());
                session.run(&mut connector, shutdown).await
            }
        };
        if let Err(e) = &result {
            log::warn!("session ended: {e}");
        }
        // The final snapshot is published before the sender goes away.
        drop(session);
        let _ = forward.await;
        result
    });
    Running {
        stop: Some(stop_tx),
        task,
    }
}

// ── App state ─────────────────────────────────────────────────────────────────

struct App {
    configs: Vec<Configuration>,
    selected: usize,
    source: Source,
    snapshot: SessionSnapshot,
    samples_seen: u64,
    last_timestamp: Option<f64>,
}

impl App {
    fn config(&self) -> &Configuration {
        &self.configs[self.selected]
    }

    fn absorb(&mut self, snap: SessionSnapshot) {
        if let Some(sample) = &snap.latest {
            if self.last_timestamp != Some(sample.timestamp) {
                self.samples_seen += 1;
                self.last_timestamp = Some(sample.timestamp);
            }
        }
        self.snapshot = snap;
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Top-level render callback handed to [`Terminal::draw`].
fn draw(frame: &mut Frame, app: &App) {
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(9),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .split(frame.area());

    draw_header(frame, root[0], app);

    let middle = Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)]).split(root[1]);
    draw_bands(frame, middle[0], app);
    draw_ranges(frame, middle[1], app);

    let lower = Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)]).split(root[2]);
    draw_log(frame, lower[0], app);
    draw_side(frame, lower[1], app);

    draw_footer(frame, root[3], app);
}

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

/// Dimmed vertical separator used between header fields.
#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

/// Status bar: title, connection status, configuration, counters.
fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let snap = &app.snapshot;
    let (label, color) = match (snap.state, snap.status) {
        (SessionState::Connecting, _) => (format!("{} Connecting…", spinner_str()), Color::Yellow),
        (SessionState::Live, _) => ("● Live".to_owned(), Color::Green),
        (SessionState::Idle, ConnectionStatus::Error) => ("✖ Error".to_owned(), Color::Red),
        (SessionState::Idle, status) => (format!("○ {status}"), Color::DarkGray),
    };
    let source = match &app.source {
        Source::Server(s) => s.clone(),
        Source::Simulated => "◆ Simulated".to_owned(),
    };
    let cfg = app.config();

    let line = Line::from(vec![
        Span::styled(
            " NeuroSculpt ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(source, Style::default().fg(Color::Cyan)),
        sep(),
        Span::styled(
            format!("{} ({}x{})", cfg.name, cfg.grid_x, cfg.grid_y),
            Style::default().fg(Color::White),
        ),
        sep(),
        Span::styled(
            format!("{} smp  {} cmd", app.samples_seen, snap.commands_sent),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw(" "),
    ]);
    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

/// Horizontal bar per band plus the PSD / PAF readout.
fn draw_bands(frame: &mut Frame, area: Rect, app: &App) {
    let mut lines: Vec<Line> = Vec::new();
    match &app.snapshot.latest {
        None => lines.push(Line::from(Span::styled(
            " waiting for telemetry…",
            Style::default().fg(Color::DarkGray),
        ))),
        Some(sample) => {
            for (band, color) in Band::ALL.iter().zip(BAND_COLORS) {
                let power = sample.power(*band);
                let filled = ((power / BAR_FULL_SCALE).clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
                let marker = if sample.dominant_band == Some(*band) { "▶" } else { " " };
                lines.push(Line::from(vec![
                    Span::raw(format!(" {marker}{:6}", band.keyword())),
                    Span::styled("█".repeat(filled), Style::default().fg(color)),
                    Span::styled(
                        "░".repeat(BAR_WIDTH - filled),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::raw(format!(" {power:7.2}")),
                ]));
            }
            lines.push(Line::from(Span::styled(
                format!(
                    "  PSD {:.2}   PAF {:.2} Hz   α/β {:.2}   α/δ {:.2}",
                    sample.psd, sample.peak_alpha_freq, sample.alpha_beta_ratio, sample.alpha_delta_ratio
                ),
                Style::default().fg(Color::White),
            )));
        }
    }
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Bands ")),
        area,
    );
}

/// The configuration's ranges, active ones highlighted.
fn draw_ranges(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .config()
        .ranges
        .iter()
        .map(|r| {
            let active = app.snapshot.active.contains(&r.id);
            let band = band_of(r).map(|b| b.keyword()).unwrap_or("?");
            let text = format!(
                "{} {:10} {:5} [{:.1}, {:.1}]  {}%  {} panel(s)",
                if active { "●" } else { "○" },
                r.id,
                band,
                r.lower_range,
                r.upper_range,
                r.brightness,
                r.selected_panels.len()
            );
            let style = if active {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            ListItem::new(Span::styled(text, style))
        })
        .collect();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title(" Ranges ")),
        area,
    );
}

/// The session's rolling sample log, newest first.
fn draw_log(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .snapshot
        .log
        .iter()
        .map(|l| ListItem::new(l.as_str()))
        .collect();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title(" Log ")),
        area,
    );
}

/// Playing clips, channel notices and audio errors.
fn draw_side(frame: &mut Frame, area: Rect, app: &App) {
    let snap = &app.snapshot;
    let mut lines = vec![Line::from(Span::styled(
        "Playing",
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    if snap.playing.is_empty() {
        lines.push(Line::from(Span::styled("  –", Style::default().fg(Color::DarkGray))));
    }
    for clip in &snap.playing {
        lines.push(Line::from(Span::styled(format!("  ♪ {clip}"), Style::default().fg(Color::Cyan))));
    }
    lines.push(Line::from(Span::styled(
        "Notices",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    for n in snap.notices.iter().chain(&snap.audio_errors) {
        lines.push(Line::from(Span::styled(format!("  {n}"), Style::default().fg(Color::Yellow))));
    }
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Audio / Notices ")),
        area,
    );
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let running = app.snapshot.state != SessionState::Idle;
    let keys = Line::from(vec![
        Span::raw(" "),
        key("[s]"),
        Span::styled(
            "Start  ",
            Style::default().fg(if running { Color::DarkGray } else { Color::White }),
        ),
        key("[x]"),
        Span::raw("Stop  "),
        key("[Tab]"),
        Span::raw("Next configuration  "),
        key("[q]"),
        Span::raw("Quit"),
    ]);
    frame.render_widget(
        Paragraph::new(keys).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

/// Styled keybinding label (bold yellow) used in the footer hint line.
#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: neurosculpt tui requires a real terminal (TTY).");
        eprintln!("Run it directly in a terminal emulator, not piped or redirected.");
        std::process::exit(1);
    }

    // ── Logging ─────────────────────────────────────────────────────────────
    // Write logs to a file so they never interfere with the TUI display.
    // Logs are written to neurosculpt-tui.log in the current directory.
    {
        use std::fs::File;
        if let Ok(file) = File::create("neurosculpt-tui.log") {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
    }

    let args = Args::parse();
    let store = SceneStore::load(&args.scene)?;
    if store.configurations().is_empty() {
        anyhow::bail!("{} contains no configurations", args.scene.display());
    }
    let selected = match &args.config {
        Some(id) => store
            .configurations()
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| anyhow::anyhow!("unknown configuration {id}"))?,
        None => 0,
    };

    let mut app = App {
        configs: store.configurations().to_vec(),
        selected,
        source: if args.simulate {
            Source::Simulated
        } else {
            Source::Server(args.server.clone())
        },
        snapshot: SessionSnapshot::default(),
        samples_seen: 0,
        last_timestamp: None,
    };
    let (view_tx, mut view_rx) = watch::channel(SessionSnapshot::default());
    let mut running: Option<Running> = None;

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(33); // ~30 FPS

    // ── Main loop ─────────────────────────────────────────────────────────────
    'main: loop {
        // ── 1. Pull the latest snapshot ──────────────────────────────────────
        if view_rx.has_changed().unwrap_or(false) {
            let snap = view_rx.borrow_and_update().clone();
            app.absorb(snap);
        }
        if running.as_ref().is_some_and(|r| r.task.is_finished()) {
            running = None;
        }

        // ── 2. Render ────────────────────────────────────────────────────────
        terminal.draw(|f| draw(f, &app))?;

        // ── 3. Handle keyboard ───────────────────────────────────────────────
        if !event::poll(tick)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        // In raw mode Ctrl+C arrives as a key event.
        let ctrl_c = key.modifiers.contains(KeyModifiers::CONTROL)
            && key.code == KeyCode::Char('c');
        if ctrl_c {
            break 'main;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break 'main,

            KeyCode::Char('s') if running.is_none() => {
                match SessionContext::from_source(&store, app.config()) {
                    Ok(ctx) => {
                        running = Some(start_session(ctx, app.source.clone(), view_tx.clone()));
                    }
                    Err(e) => log::warn!("cannot start: {e}"),
                }
            }

            KeyCode::Char('x') => {
                if let Some(r) = running.as_mut() {
                    r.stop();
                }
            }

            KeyCode::Tab => {
                if let Some(mut r) = running.take() {
                    r.stop();
                    let _ = r.task.await;
                }
                app.selected = (app.selected + 1) % app.configs.len();
                app.snapshot = SessionSnapshot::default();
                app.last_timestamp = None;
            }

            _ => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    if let Some(mut r) = running.take() {
        r.stop();
        let _ = r.task.await;
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
