//! The actuation session: one live "play" run against the sculpture.
//!
//! ```text
//!   begin_connect()         Connected event
//! Idle ────────────► Connecting ────────────► Live
//!  ▲                     │                     │
//!  └─────────────────────┴─────────────────────┘
//!     stop(), Error / Disconnected event, retries exhausted
//! ```
//!
//! While `Live`, every sample is logged, the Active Set is recomputed and
//! flushed to the controller, and the audio cues are reconciled.  A periodic
//! tick flushes again.  Flushing is idempotent: the encoded commands are
//! compared as a set against the last batch sent and an unchanged set sends
//! nothing.  Once any `CONFIG` has reached the controller, an Active Set that
//! drains empties out with a single `STOP`, even if the batch that switched
//! the panels on only went out in part.
//!
//! [`ActuationSession`] is a plain state machine; [`ActuationSession::run`]
//! drives it from a [`Connector`], a tick interval and a shutdown future on a
//! single task, so commands always leave in the order the samples arrived.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::audio::{AudioBackend, AudioCueController};
use crate::channel::{CommandSink, Connector, Subscription};
use crate::classify::format_log_line;
use crate::command::{encode, Command, START, STOP};
use crate::diagnostics::{RollingLog, LOG_CAPACITY};
use crate::error::{ChannelError, ConfigError};
use crate::matcher::match_live;
use crate::scene::{Configuration, RangeSource};
use crate::types::{
    AudioCueSet, ChannelEvent, ConnectionStatus, RangeConfiguration, SessionState, TelemetrySample,
};

/// Stand-in for "never" when a configured duration runs past the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `interval` rejects a zero period.
const MIN_TICK: Duration = Duration::from_millis(1);

/// `now + after`, saturating instead of overflowing.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Tunables for an [`ActuationSession`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Period of the re-send tick.  Default: 3 s.
    pub tick_interval: Duration,
    /// Connection attempts before giving up with [`ConnectionStatus::Error`].
    /// Default: `5`.
    pub connect_attempts: u32,
    /// Fixed pause between connection attempts.  Default: 1 s.
    pub retry_delay: Duration,
    /// Send an `EEG …` mirror command for every sample.  Default: `false`.
    pub mirror_telemetry: bool,
    /// Send `START` once the channel goes live.  Default: `false`.
    pub send_start: bool,
    /// How long a fresh subscription may wait for the server's connect
    /// acknowledgment.  Default: 20 s.
    pub connect_ack_timeout: Duration,
    /// Capacity of the rolling sample log.  Default: [`LOG_CAPACITY`].
    pub log_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(3),
            connect_attempts: 5,
            retry_delay: Duration::from_secs(1),
            mirror_telemetry: false,
            send_start: false,
            connect_ack_timeout: Duration::from_secs(20),
            log_capacity: LOG_CAPACITY,
        }
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything a session reads but never changes.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub config_id: String,
    pub grid_x: u32,
    pub grid_y: u32,
    pub ranges: Vec<RangeConfiguration>,
    pub cues: Vec<AudioCueSet>,
    pub settings: SessionSettings,
}

impl SessionContext {
    /// A context with no audio cues and default settings.
    pub fn new(grid_x: u32, grid_y: u32, ranges: Vec<RangeConfiguration>) -> Self {
        Self {
            config_id: String::new(),
            grid_x,
            grid_y,
            ranges,
            cues: Vec::new(),
            settings: SessionSettings::default(),
        }
    }

    pub fn with_cues(mut self, cues: Vec<AudioCueSet>) -> Self {
        self.cues = cues;
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build a context for `config`, reading its ranges through `source`.
    pub fn from_source(
        source: &impl RangeSource,
        config: &Configuration,
    ) -> Result<Self, ConfigError> {
        let ranges = source.ranges_for(&config.id)?;
        Ok(Self {
            config_id: config.id.clone(),
            ..Self::new(config.grid_x, config.grid_y, ranges).with_cues(config.audio.clone())
        })
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Point-in-time view of a session, published on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: ConnectionStatus,
    pub latest: Option<TelemetrySample>,
    /// Ids of the active range configurations, in configuration order.
    pub active: Vec<String>,
    /// Sample log, newest first.
    pub log: Vec<String>,
    /// Channel and emission problems, newest first.
    pub notices: Vec<String>,
    /// Clip ids currently playing.
    pub playing: Vec<String>,
    /// Audio failures, newest first.
    pub audio_errors: Vec<String>,
    /// Commands handed to the channel since the session was created.
    pub commands_sent: u64,
}

// ── ActuationSession ──────────────────────────────────────────────────────────

/// A single play session: owns the channel sink, the dedup state, the rolling
/// log and the audio controller.
pub struct ActuationSession<B: AudioBackend> {
    ctx: SessionContext,
    audio: AudioCueController<B>,
    state: SessionState,
    status: ConnectionStatus,
    sink: Option<Box<dyn CommandSink>>,
    last_emitted: BTreeSet<String>,
    /// A `CONFIG` reached the channel since the last `STOP` that did.
    panels_on: bool,
    latest: Option<TelemetrySample>,
    active: Vec<RangeConfiguration>,
    log: RollingLog,
    notices: RollingLog,
    commands_sent: u64,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl<B: AudioBackend> ActuationSession<B> {
    pub fn new(ctx: SessionContext, audio: AudioCueController<B>) -> Self {
        let log = RollingLog::new(ctx.settings.log_capacity);
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            ctx,
            audio,
            state: SessionState::Idle,
            status: ConnectionStatus::Disconnected,
            sink: None,
            last_emitted: BTreeSet::new(),
            panels_on: false,
            latest: None,
            active: Vec::new(),
            log,
            notices: RollingLog::default(),
            commands_sent: 0,
            snapshot_tx,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Sample log, newest first.
    pub fn log(&self) -> &RollingLog {
        &self.log
    }

    pub fn notices(&self) -> &RollingLog {
        &self.notices
    }

    /// The current Active Set.
    pub fn active(&self) -> &[RangeConfiguration] {
        &self.active
    }

    /// The last batch handed to the channel; empty after a `STOP`.
    pub fn last_emitted(&self) -> &BTreeSet<String> {
        &self.last_emitted
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.latest.as_ref()
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    pub fn audio(&self) -> &AudioCueController<B> {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioCueController<B> {
        &mut self.audio
    }

    /// Whether a `CONFIG` went out that no `STOP` has cancelled yet.
    pub fn panels_on(&self) -> bool {
        self.panels_on
    }

    /// Whether a channel sink is still held.
    pub fn holds_channel(&self) -> bool {
        self.sink.is_some()
    }

    /// Observe snapshots; the receiver sees the latest one on every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            status: self.status,
            latest: self.latest.clone(),
            active: self.active.iter().map(|r| r.id.clone()).collect(),
            log: self.log.to_vec(),
            notices: self.notices.to_vec(),
            playing: self.audio.playing().into_iter().collect(),
            audio_errors: self.audio.errors().to_vec(),
            commands_sent: self.commands_sent,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    /// `Idle → Connecting`.  Returns `false` (and changes nothing) when a
    /// session is already connecting or live.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != SessionState::Idle {
            warn!("start ignored: session is already {:?}", self.state);
            return false;
        }
        self.state = SessionState::Connecting;
        self.status = ConnectionStatus::Connecting;
        self.latest = None;
        self.log.clear();
        self.publish();
        true
    }

    /// Hand the session the outbound half of a fresh subscription.
    pub fn attach(&mut self, sink: Box<dyn CommandSink>) {
        if let Some(mut old) = self.sink.replace(sink) {
            if let Err(e) = old.close() {
                warn!("closing previous channel failed: {e}");
            }
        }
    }

    /// Record a failed connection attempt.  With `gave_up` the session falls
    /// back to `Idle` and shows [`ConnectionStatus::Error`].
    pub fn connect_failed(&mut self, error: &ChannelError, gave_up: bool) {
        warn!("connection failed: {error}");
        self.notices.push(format!("connect: {error}"));
        if gave_up {
            self.status = ConnectionStatus::Error;
            self.state = SessionState::Idle;
        }
        self.publish();
    }

    /// Apply one channel event.
    pub fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.on_connected(),
            ChannelEvent::Sample(sample) => {
                if self.state == SessionState::Live {
                    self.handle_sample(sample);
                } else {
                    debug!("sample ignored while {:?}", self.state);
                }
            }
            ChannelEvent::Error(msg) => {
                warn!("channel error: {msg}");
                self.notices.push(format!("channel: {msg}"));
                self.status = ConnectionStatus::Error;
                self.teardown();
            }
            ChannelEvent::Disconnected => {
                info!("channel disconnected");
                if self.status != ConnectionStatus::Error {
                    self.status = ConnectionStatus::Disconnected;
                }
                self.teardown();
            }
        }
    }

    fn on_connected(&mut self) {
        if self.state != SessionState::Connecting {
            debug!("connect acknowledgment ignored while {:?}", self.state);
            return;
        }
        info!("session live ({} range configuration(s))", self.ctx.ranges.len());
        self.state = SessionState::Live;
        self.status = ConnectionStatus::Connected;
        if self.ctx.settings.send_start {
            self.send(START);
        }
        self.publish();
    }

    /// Log the sample, recompute the Active Set, flush and reconcile audio.
    pub fn handle_sample(&mut self, sample: TelemetrySample) {
        self.log.push(format_log_line(&sample));
        self.active = match_live(
            &self.ctx.ranges,
            Some(&sample),
            self.state == SessionState::Live,
        );
        if self.ctx.settings.mirror_telemetry {
            self.send(&Command::eeg(&sample).to_string());
        }
        self.latest = Some(sample);
        self.flush();
        self.audio
            .update(&self.ctx.cues, self.latest.as_ref(), &self.active);
        self.publish();
    }

    /// Periodic re-send.
    pub fn tick(&mut self) {
        if self.state == SessionState::Live {
            self.flush();
            self.publish();
        }
    }

    /// Emit the commands for the Active Set unless they equal the last batch.
    ///
    /// An empty Active Set sends `STOP` whenever panels may still be on.
    /// Returns the number of commands handed to the channel.
    pub fn flush(&mut self) -> usize {
        if self.state != SessionState::Live || self.sink.is_none() {
            return 0;
        }
        let mut batch = Vec::with_capacity(self.active.len());
        let mut set = BTreeSet::new();
        for range in &self.active {
            let line = encode(range, self.ctx.grid_x, self.ctx.grid_y);
            if set.insert(line.clone()) {
                batch.push(line);
            }
        }
        let stop_owed = set.is_empty() && self.panels_on;
        if set == self.last_emitted && !stop_owed {
            return 0;
        }
        if batch.is_empty() {
            batch.push(STOP.to_owned());
        }

        let mut sent = 0;
        for line in &batch {
            if self.send(line) {
                sent += 1;
                self.panels_on = line != STOP;
            }
        }
        // A batch that did not go out completely is retried on the next tick.
        if sent == batch.len() {
            self.last_emitted = set;
        }
        sent
    }

    fn send(&mut self, line: &str) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        match sink.emit(line) {
            Ok(()) => {
                self.commands_sent += 1;
                true
            }
            Err(e) => {
                warn!("emit {line:?} failed: {e}");
                self.notices.push(format!("emit: {e}"));
                false
            }
        }
    }

    /// User stop.
    pub fn stop(&mut self) {
        info!("session stopped");
        self.teardown();
        self.status = ConnectionStatus::Disconnected;
        self.publish();
    }

    /// Release everything and return to `Idle`.
    ///
    /// A best-effort `STOP` goes out if panels are still on, then the channel
    /// is closed and every audio handle stopped and released.  Each step runs
    /// regardless of failures in the ones before it.  Calling this on an idle
    /// session is a no-op.
    pub fn teardown(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if self.panels_on {
                match sink.emit(STOP) {
                    Ok(()) => self.commands_sent += 1,
                    Err(e) => warn!("teardown STOP failed: {e}"),
                }
            }
            if let Err(e) = sink.close() {
                warn!("closing channel failed: {e}");
                self.notices.push(format!("close: {e}"));
            }
        }
        let failures = self.audio.stop_all();
        if failures > 0 {
            warn!("{failures} audio failure(s) while releasing clips");
        }
        self.last_emitted.clear();
        self.panels_on = false;
        self.active.clear();
        if self.status == ConnectionStatus::Connected || self.status == ConnectionStatus::Connecting {
            self.status = ConnectionStatus::Disconnected;
        }
        self.state = SessionState::Idle;
        self.publish();
    }

    // ── Driver ────────────────────────────────────────────────────────────────

    /// Connect through `connector` and run until the channel ends or
    /// `shutdown` resolves.
    ///
    /// Connection is retried `connect_attempts` times with a fixed delay.  A
    /// subscription whose server does not acknowledge within
    /// `connect_ack_timeout` counts as a failed connection and ends with
    /// [`ConnectionStatus::Error`].  Teardown runs on every exit path.  Returns `Ok(())` on shutdown and
    /// the reason otherwise.
    pub async fn run<C, F>(&mut self, connector: &mut C, shutdown: F) -> Result<(), ChannelError>
    where
        C: Connector,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if !self.begin_connect() {
            return Ok(());
        }

        let connected = tokio::select! {
            sub = self.connect_with_retry(connector) => sub,
            _ = &mut shutdown => {
                self.stop();
                return Ok(());
            }
        };
        let Subscription { mut events, sink } = connected?;
        self.attach(sink);

        let ack_timeout = self.ctx.settings.connect_ack_timeout;
        let ack_deadline = deadline_after(ack_timeout);
        let period = self.ctx.settings.tick_interval.max(MIN_TICK);
        let mut ticker = time::interval_at(deadline_after(period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.stop();
                    return Ok(());
                }
                event = events.recv() => {
                    let event = event.unwrap_or(ChannelEvent::Disconnected);
                    let failure = match &event {
                        ChannelEvent::Error(msg) => Some(ChannelError::Rejected(msg.clone())),
                        ChannelEvent::Disconnected => Some(ChannelError::Closed),
                        _ => None,
                    };
                    self.on_event(event);
                    if let Some(e) = failure {
                        return Err(e);
                    }
                }
                _ = time::sleep_until(ack_deadline), if self.state == SessionState::Connecting => {
                    let e = ChannelError::Unacknowledged(ack_timeout);
                    self.connect_failed(&e, true);
                    self.teardown();
                    return Err(e);
                }
                _ = ticker.tick() => self.tick(),
            }
        }
    }

    async fn connect_with_retry<C: Connector>(
        &mut self,
        connector: &mut C,
    ) -> Result<Subscription, ChannelError> {
        let attempts = self.ctx.settings.connect_attempts.max(1);
        for attempt in 1..=attempts {
            match connector.connect().await {
                Ok(sub) => return Ok(sub),
                Err(e) => {
                    let gave_up = attempt == attempts;
                    self.connect_failed(&e, gave_up);
                    if !gave_up {
                        info!("retrying in {:?} ({attempt}/{attempts})", self.ctx.settings.retry_delay);
                        time::sleep(self.ctx.settings.retry_delay).await;
                    }
                }
            }
        }
        Err(ChannelError::RetriesExhausted(attempts))
    }
}

impl<B: AudioBackend> Drop for ActuationSession<B> {
    fn drop(&mut self) {
        if self.state != SessionState::Idle || self.sink.is_some() {
            self.teardown();
        }
    }
}
