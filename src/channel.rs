//! Telemetry/control channel clients.
//!
//! A [`Connector`] opens a [`Subscription`]: a typed event receiver plus a
//! [`CommandSink`] for outbound actuator commands.  Connecting again yields a
//! fresh subscription, so a session can retry or restart without knowing
//! which transport it is talking to.
//!
//! | Connector | Transport | Used by |
//! |---|---|---|
//! | [`WsConnector`] | Socket.IO over WebSocket | the CLI and the TUI |
//! | [`MemoryConnector`] | in-process channels | the simulator and the tests |

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::classify::classify_value;
use crate::error::ChannelError;
use crate::protocol::{
    decode_packet, encode_control_command, websocket_url, Packet, CONNECT_DEFAULT_NAMESPACE,
    EEG_DATA_EVENT, PONG,
};
use crate::types::ChannelEvent;

/// Capacity of the inbound event queue.
const EVENT_BUFFER: usize = 256;

// ── Abstractions ──────────────────────────────────────────────────────────────

/// Outbound half of a subscription.  Emission is fire-and-forget.
pub trait CommandSink: Send {
    /// Queue one command string for the `control_command` event.
    fn emit(&mut self, command: &str) -> Result<(), ChannelError>;
    /// Disconnect and release the transport.  Safe to call more than once.
    fn close(&mut self) -> Result<(), ChannelError>;
}

/// A live connection: typed events in, commands out.
pub struct Subscription {
    pub events: mpsc::Receiver<ChannelEvent>,
    pub sink: Box<dyn CommandSink>,
}

/// Something that can open a [`Subscription`], any number of times.
pub trait Connector {
    fn connect(&mut self) -> impl Future<Output = Result<Subscription, ChannelError>> + Send;
}

// ── ChannelConfig ─────────────────────────────────────────────────────────────

/// Configuration for [`WsConnector`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Socket.IO server address, e.g. `http://192.168.1.224:5001`.
    /// See [`websocket_url`] for how it is turned into a WebSocket URL.
    pub server: String,
    /// Hard limit on the WebSocket handshake.  Default: `10`.
    pub connect_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            server: "http://192.168.1.224:5001".into(),
            connect_timeout_secs: 10,
        }
    }
}

// ── WsConnector ───────────────────────────────────────────────────────────────

/// Socket.IO client over a WebSocket transport.
///
/// Each successful [`Connector::connect`] spawns two tasks:
///
/// * a **reader** that answers Engine.IO pings, joins the default namespace
///   after the handshake, classifies `eeg_data` payloads and forwards typed
///   [`ChannelEvent`]s;
/// * a **writer** that serialises outbound frames onto the socket.
///
/// Both tasks are owned by the returned [`ChannelHandle`].
pub struct WsConnector {
    config: ChannelConfig,
}

impl WsConnector {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

impl Connector for WsConnector {
    fn connect(&mut self) -> impl Future<Output = Result<Subscription, ChannelError>> + Send {
        let config = self.config.clone();
        async move {
            let (events, handle) = open_websocket(&config).await?;
            Ok(Subscription {
                events,
                sink: Box::new(handle),
            })
        }
    }
}

/// Frames queued for the writer task.
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

async fn open_websocket(
    config: &ChannelConfig,
) -> Result<(mpsc::Receiver<ChannelEvent>, ChannelHandle), ChannelError> {
    let url = websocket_url(&config.server);
    info!("Connecting to {url} …");

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let (socket, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
        .await
        .map_err(|_| ChannelError::Timeout {
            url: url.clone(),
            secs: config.connect_timeout_secs,
        })?
        .map_err(|e| ChannelError::Connect {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    info!("WebSocket open: {url}");

    let (mut write, mut read) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (tx, rx) = mpsc::channel::<ChannelEvent>(EVENT_BUFFER);

    // ── Writer ────────────────────────────────────────────────────────────────
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let result = match frame {
                Outbound::Text(text) => {
                    debug!("→ {text}");
                    write.send(Message::Text(text)).await
                }
                Outbound::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = result {
                warn!("WebSocket write failed: {e}");
                break;
            }
        }
        let _ = write.close().await;
        debug!("writer task finished");
    });

    // ── Reader ────────────────────────────────────────────────────────────────
    let pong_tx = out_tx.clone();
    let reader = tokio::spawn(async move {
        let mut dropped: u64 = 0;
        while let Some(message) = read.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("WebSocket read failed: {e}");
                    let _ = tx.send(ChannelEvent::Error(e.to_string())).await;
                    return;
                }
            };
            match handle_frame(&text, &mut dropped) {
                FrameAction::Reply(frame) => {
                    let _ = pong_tx.send(Outbound::Text(frame.to_owned()));
                }
                FrameAction::Emit(event) => {
                    let terminal = matches!(event, ChannelEvent::Error(_) | ChannelEvent::Disconnected);
                    if tx.send(event).await.is_err() || terminal {
                        return;
                    }
                }
                FrameAction::Ignore => {}
            }
        }
        info!("Telemetry stream ended – server disconnected.");
        let _ = tx.send(ChannelEvent::Disconnected).await;
    });

    Ok((
        rx,
        ChannelHandle {
            out_tx,
            reader: Some(reader),
            writer: Some(writer),
        },
    ))
}

/// What the reader should do with one inbound frame.
#[derive(Debug, PartialEq)]
pub(crate) enum FrameAction {
    /// Send this frame back (handshake, heartbeat).
    Reply(&'static str),
    Emit(ChannelEvent),
    Ignore,
}

/// Decode and classify one inbound text frame.
///
/// Malformed frames and malformed samples are logged and ignored; `dropped`
/// counts the latter.
pub(crate) fn handle_frame(text: &str, dropped: &mut u64) -> FrameAction {
    let packet = match decode_packet(text) {
        Ok(p) => p,
        Err(e) => {
            warn!("Ignoring frame {text:?}: {e}");
            return FrameAction::Ignore;
        }
    };
    match packet {
        Packet::Open(handshake) => {
            debug!("engine.io handshake: {handshake}");
            FrameAction::Reply(CONNECT_DEFAULT_NAMESPACE)
        }
        Packet::Ping => FrameAction::Reply(PONG),
        Packet::Connect => FrameAction::Emit(ChannelEvent::Connected),
        Packet::ConnectError(msg) => {
            warn!("connect_error: {msg}");
            FrameAction::Emit(ChannelEvent::Error(msg))
        }
        Packet::Close | Packet::Disconnect => FrameAction::Emit(ChannelEvent::Disconnected),
        Packet::Event { name, payload } if name == EEG_DATA_EVENT => match classify_value(&payload) {
            Ok(sample) => FrameAction::Emit(ChannelEvent::Sample(sample)),
            Err(e) => {
                *dropped += 1;
                warn!("Dropping eeg_data sample #{dropped}: {e}");
                FrameAction::Ignore
            }
        },
        Packet::Event { name, .. } => {
            debug!("Ignoring event {name:?}");
            FrameAction::Ignore
        }
        Packet::Pong | Packet::Noop | Packet::Other => FrameAction::Ignore,
    }
}

// ── ChannelHandle ─────────────────────────────────────────────────────────────

/// Outbound handle of a WebSocket subscription.  Owns the I/O tasks.
pub struct ChannelHandle {
    out_tx: mpsc::UnboundedSender<Outbound>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl CommandSink for ChannelHandle {
    fn emit(&mut self, command: &str) -> Result<(), ChannelError> {
        info!("Sending command: {command}");
        self.out_tx
            .send(Outbound::Text(encode_control_command(command)))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        // The writer exits on its own once the close frame is flushed.
        let sent = self.out_tx.send(Outbound::Close);
        self.writer.take();
        sent.map_err(|_| ChannelError::Closed)
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

// ── MemoryConnector ───────────────────────────────────────────────────────────

/// Shared state between a [`MemorySink`] and its [`MemoryPeer`].
#[derive(Debug, Default)]
struct LinkState {
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_emit: AtomicBool,
    /// 1-based index of the one emit that fails; `0` for none.
    fail_emit_at: AtomicUsize,
    emits: AtomicUsize,
    fail_close: AtomicBool,
}

/// In-process connector.  Each `connect` consumes the next scripted attempt.
#[derive(Default)]
pub struct MemoryConnector {
    script: VecDeque<Result<Subscription, String>>,
    attempts: usize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next attempt to fail with `reason`.
    pub fn push_failure(&mut self, reason: impl Into<String>) {
        self.script.push_back(Err(reason.into()));
    }

    /// Script the next attempt to succeed; the returned peer plays the server.
    pub fn push_link(&mut self) -> MemoryPeer {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let state = Arc::new(LinkState::default());
        self.script.push_back(Ok(Subscription {
            events: events_rx,
            sink: Box::new(MemorySink {
                commands: commands_tx,
                state: Arc::clone(&state),
            }),
        }));
        MemoryPeer {
            events: events_tx,
            commands: commands_rx,
            state,
        }
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl Connector for MemoryConnector {
    fn connect(&mut self) -> impl Future<Output = Result<Subscription, ChannelError>> + Send {
        self.attempts += 1;
        let result = match self.script.pop_front() {
            Some(Ok(sub)) => Ok(sub),
            Some(Err(reason)) => Err(ChannelError::Connect {
                url: "memory://".into(),
                reason,
            }),
            None => Err(ChannelError::Connect {
                url: "memory://".into(),
                reason: "no link scripted".into(),
            }),
        };
        std::future::ready(result)
    }
}

/// Sink half of an in-memory link.
pub struct MemorySink {
    commands: mpsc::UnboundedSender<String>,
    state: Arc<LinkState>,
}

impl CommandSink for MemorySink {
    fn emit(&mut self, command: &str) -> Result<(), ChannelError> {
        let nth = self.state.emits.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.closed.load(Ordering::SeqCst)
            || self.state.fail_emit.load(Ordering::SeqCst)
            || self.state.fail_emit_at.load(Ordering::SeqCst) == nth
        {
            return Err(ChannelError::Closed);
        }
        self.commands
            .send(command.to_owned())
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        // Released even when the close itself reports a failure.
        self.state.closed.store(true, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }
}

/// Server side of an in-memory link.
pub struct MemoryPeer {
    pub events: mpsc::Sender<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<String>,
    state: Arc<LinkState>,
}

impl MemoryPeer {
    /// Push an event to the client; ignored once the client is gone.
    pub async fn send(&self, event: ChannelEvent) {
        let _ = self.events.send(event).await;
    }

    /// Commands emitted since the last call.
    pub fn drain_commands(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(c) = self.commands.try_recv() {
            out.push(c);
        }
        out
    }

    /// Whether the client has closed the sink.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Make every later `emit` fail.
    pub fn fail_emits(&self) {
        self.state.fail_emit.store(true, Ordering::SeqCst);
    }

    /// Make only the `n`th `emit` on this link fail, counting from 1.
    pub fn fail_nth_emit(&self, n: usize) {
        self.state.fail_emit_at.store(n, Ordering::SeqCst);
    }

    /// Make `close` report an error (the link is still released).
    pub fn fail_close(&self) {
        self.state.fail_close.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_and_heartbeat_are_answered() {
        let mut dropped = 0;
        assert_eq!(
            handle_frame(r#"0{"sid":"s","pingInterval":25000}"#, &mut dropped),
            FrameAction::Reply("40")
        );
        assert_eq!(handle_frame("2", &mut dropped), FrameAction::Reply("3"));
        assert_eq!(
            handle_frame(r#"40{"sid":"n"}"#, &mut dropped),
            FrameAction::Emit(ChannelEvent::Connected)
        );
    }

    #[test]
    fn samples_are_classified_and_bad_ones_dropped() {
        let mut dropped = 0;
        let ok = r#"42["eeg_data",{"alpha":10,"beta":5,"theta":2,"delta":1,"gamma":0.5}]"#;
        match handle_frame(ok, &mut dropped) {
            FrameAction::Emit(ChannelEvent::Sample(s)) => assert_eq!(s.alpha, 10.0),
            other => panic!("unexpected {other:?}"),
        }
        let bad = r#"42["eeg_data",{"alpha":10}]"#;
        assert_eq!(handle_frame(bad, &mut dropped), FrameAction::Ignore);
        assert_eq!(dropped, 1);
        assert_eq!(handle_frame("garbage", &mut dropped), FrameAction::Ignore);
        assert_eq!(
            handle_frame(r#"42["chat","hi"]"#, &mut dropped),
            FrameAction::Ignore
        );
    }

    #[test]
    fn close_and_refusal_end_the_stream() {
        let mut dropped = 0;
        assert_eq!(
            handle_frame("1", &mut dropped),
            FrameAction::Emit(ChannelEvent::Disconnected)
        );
        assert_eq!(
            handle_frame(r#"44{"message":"nope"}"#, &mut dropped),
            FrameAction::Emit(ChannelEvent::Error("nope".into()))
        );
    }

    #[tokio::test]
    async fn memory_connector_follows_its_script() {
        let mut connector = MemoryConnector::new();
        connector.push_failure("refused");
        let mut peer = connector.push_link();

        assert!(connector.connect().await.is_err());
        let mut sub = connector.connect().await.unwrap();
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.attempts(), 3);

        peer.send(ChannelEvent::Connected).await;
        assert_eq!(sub.events.recv().await, Some(ChannelEvent::Connected));

        sub.sink.emit("STOP").unwrap();
        assert_eq!(peer.drain_commands(), vec!["STOP".to_string()]);
        sub.sink.close().unwrap();
        assert!(peer.is_closed());
        assert!(sub.sink.emit("START").is_err());
    }
}
