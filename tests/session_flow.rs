//! End-to-end session behaviour over the in-memory channel.

use std::time::Duration;

use tokio::sync::oneshot;

use neurosculpt::prelude::*;
use neurosculpt::testing::{sample, ScriptedAudioBackend};

const SCENE: &str = r##"[
    {
        "id": "cfg-1",
        "name": "Atrium",
        "x": 4, "y": 3,
        "ranges": [
            { "id": "calm", "signal_name": "Alpha (8-12Hz)",
              "lower_range": 8, "upper_range": 12,
              "brightness": 80, "speed": 0.5, "direction": "up",
              "color": "#47313E", "selected_panels": ["0-0"] },
            { "id": "focus", "signal_name": "Beta (12-30Hz)",
              "lower_range": 4, "upper_range": 30,
              "brightness": 50, "speed": 1, "direction": "down",
              "color": "#00ff00", "selected_panels": ["2-3", "1-0"] }
        ],
        "audio": [
            { "id": "waves", "psd_low": 10, "psd_high": 40, "range_id": "calm",
              "clips": [
                { "id": "rain", "name": "Rain", "source": { "preset": "rain" } },
                { "id": "wind", "name": "Wind", "source": { "uri": "file:///sounds/wind.mp3" } }
              ] }
        ]
    }
]"##;

const CALM: &str = "CONFIG 80 0.5 1 71 49 62 1 1";
const FOCUS: &str = "CONFIG 50 1 0 0 255 0 2 12 5";

fn context(settings: SessionSettings) -> SessionContext {
    let store = SceneStore::from_json(SCENE).unwrap();
    let config = store.get("cfg-1").unwrap();
    SessionContext::from_source(&store, config)
        .unwrap()
        .with_settings(settings)
}

fn new_session(settings: SessionSettings) -> ActuationSession<ScriptedAudioBackend> {
    ActuationSession::new(
        context(settings),
        AudioCueController::new(ScriptedAudioBackend::new()),
    )
}

fn stamped(alpha: f64, beta: f64, psd: f64, ts: f64) -> TelemetrySample {
    let mut s = sample(alpha, beta, 2.0, 1.0, 0.5, psd);
    s.timestamp = ts;
    s
}

#[tokio::test(start_paused = true)]
async fn unchanged_active_set_is_sent_once_across_samples_and_ticks() {
    let mut session = new_session(SessionSettings::default());
    let mut connector = MemoryConnector::new();
    let mut peer = connector.push_link();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = async {
        peer.send(ChannelEvent::Connected).await;
        // beta = 2 keeps "focus" out.
        peer.send(ChannelEvent::Sample(stamped(10.0, 2.0, 0.0, 1.0))).await;
        peer.send(ChannelEvent::Sample(stamped(11.0, 2.0, 0.0, 2.0))).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        stop_tx.send(()).unwrap();
    };
    let shutdown = async {
        let _ = stop_rx.await;
    };
    let (result, ()) = tokio::join!(session.run(&mut connector, shutdown), server);

    assert!(result.is_ok());
    // One batch while live, then the teardown STOP.
    assert_eq!(peer.drain_commands(), vec![CALM.to_string(), "STOP".to_string()]);
    assert!(peer.is_closed());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(!session.holds_channel());
}

#[tokio::test]
async fn emptying_the_active_set_sends_exactly_one_stop() {
    let mut session = new_session(SessionSettings::default());
    let mut connector = MemoryConnector::new();
    let mut peer = connector.push_link();
    let sub = connector.connect().await.unwrap();
    session.begin_connect();
    session.attach(sub.sink);
    session.on_event(ChannelEvent::Connected);

    session.on_event(ChannelEvent::Sample(stamped(10.0, 2.0, 0.0, 1.0)));
    session.on_event(ChannelEvent::Sample(stamped(1.0, 2.0, 0.0, 2.0)));
    session.tick();
    session.on_event(ChannelEvent::Sample(stamped(2.0, 2.0, 0.0, 3.0)));
    session.tick();

    assert_eq!(peer.drain_commands(), vec![CALM.to_string(), "STOP".to_string()]);
    assert!(session.last_emitted().is_empty());
}

#[tokio::test]
async fn overlapping_ranges_go_out_together_and_changes_resend_the_batch() {
    let mut session = new_session(SessionSettings::default());
    let mut connector = MemoryConnector::new();
    let mut peer = connector.push_link();
    let sub = connector.connect().await.unwrap();
    session.begin_connect();
    session.attach(sub.sink);
    session.on_event(ChannelEvent::Connected);

    // alpha 10 and beta 5 are both inside their windows.
    session.on_event(ChannelEvent::Sample(stamped(10.0, 5.0, 0.0, 1.0)));
    assert_eq!(session.active().len(), 2);
    assert_eq!(peer.drain_commands(), vec![CALM.to_string(), FOCUS.to_string()]);

    session.on_event(ChannelEvent::Sample(stamped(20.0, 5.0, 0.0, 2.0)));
    assert_eq!(peer.drain_commands(), vec![FOCUS.to_string()]);
}

#[tokio::test]
async fn log_keeps_the_ten_newest_lines() {
    let mut session = new_session(SessionSettings::default());
    let mut connector = MemoryConnector::new();
    let _peer = connector.push_link();
    let sub = connector.connect().await.unwrap();
    session.begin_connect();
    session.attach(sub.sink);
    session.on_event(ChannelEvent::Connected);

    for i in 0..15 {
        session.on_event(ChannelEvent::Sample(stamped(1.0, 1.0, 0.0, i as f64)));
    }
    let log = session.log().to_vec();
    assert_eq!(log.len(), 10);
    assert!(log[0].starts_with("[14]"), "{}", log[0]);
    assert!(log[9].starts_with("[5]"), "{}", log[9]);
}

#[tokio::test(start_paused = true)]
async fn retries_run_out_into_error_status() {
    let mut session = new_session(SessionSettings {
        connect_attempts: 3,
        retry_delay: Duration::from_millis(200),
        ..SessionSettings::default()
    });
    let mut connector = MemoryConnector::new();
    for _ in 0..3 {
        connector.push_failure("connection refused");
    }

    let result = session.run(&mut connector, std::future::pending()).await;

    assert!(matches!(result, Err(ChannelError::RetriesExhausted(3))));
    assert_eq!(connector.attempts(), 3);
    assert_eq!(session.status(), ConnectionStatus::Error);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.notices().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn a_later_attempt_can_succeed_and_a_restart_reconnects() {
    let mut session = new_session(SessionSettings::default());
    let mut connector = MemoryConnector::new();
    connector.push_failure("not yet");
    let first = connector.push_link();
    let second = connector.push_link();

    first.send(ChannelEvent::Connected).await;
    first.send(ChannelEvent::Disconnected).await;
    let result = session.run(&mut connector, std::future::pending()).await;
    assert!(matches!(result, Err(ChannelError::Closed)));
    assert_eq!(connector.attempts(), 2);
    assert!(first.is_closed());
    assert_eq!(session.status(), ConnectionStatus::Disconnected);

    // Starting again uses a fresh subscription.
    second.send(ChannelEvent::Connected).await;
    second.send(ChannelEvent::Error("server restarting".into())).await;
    let result = session.run(&mut connector, std::future::pending()).await;
    assert!(matches!(result, Err(ChannelError::Rejected(_))));
    assert!(second.is_closed());
    assert_eq!(session.status(), ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn dropped_server_ends_the_session() {
    let mut session = new_session(SessionSettings::default());
    let mut connector = MemoryConnector::new();
    let peer = connector.push_link();
    peer.send(ChannelEvent::Connected).await;
    drop(peer);

    let result = session.run(&mut connector, std::future::pending()).await;
    assert!(matches!(result, Err(ChannelError::Closed)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn teardown_releases_channel_and_audio_after_mid_playback_errors() {
    let mut session = new_session(SessionSettings::default());
    let mut connector = MemoryConnector::new();
    let mut peer = connector.push_link();
    let sub = connector.connect().await.unwrap();
    session.begin_connect();
    session.attach(sub.sink);
    session.on_event(ChannelEvent::Connected);

    // "calm" active, PSD inside the window: both clips loop.
    session.on_event(ChannelEvent::Sample(stamped(10.0, 2.0, 20.0, 1.0)));
    assert_eq!(session.snapshot().playing, vec!["rain".to_string(), "wind".to_string()]);

    // The audio stack starts failing and the server goes away mid-playback.
    let backend = session.audio_mut().backend_mut();
    backend.fail_on("rain", "stop");
    backend.fail_on("wind", "unload");
    peer.fail_close();
    session.on_event(ChannelEvent::Error("transport reset".into()));

    assert_eq!(session.audio().backend().open_handles(), 0);
    let (loads, unloads) = session.audio().backend().balance();
    assert_eq!(loads, unloads);
    assert!(session.audio().playing().is_empty());
    assert!(peer.is_closed());
    assert_eq!(peer.close_calls(), 1);
    assert_eq!(peer.drain_commands(), vec![CALM.to_string(), "STOP".to_string()]);
    assert_eq!(session.status(), ConnectionStatus::Error);
    assert_eq!(session.audio().errors().len(), 2);
}

#[tokio::test]
async fn a_failing_clip_does_not_block_the_others() {
    let mut session = new_session(SessionSettings::default());
    session.audio_mut().backend_mut().fail_on("rain", "load");
    let mut connector = MemoryConnector::new();
    let _peer = connector.push_link();
    let sub = connector.connect().await.unwrap();
    session.begin_connect();
    session.attach(sub.sink);
    session.on_event(ChannelEvent::Connected);

    session.on_event(ChannelEvent::Sample(stamped(10.0, 2.0, 20.0, 1.0)));
    assert_eq!(session.snapshot().playing, vec!["wind".to_string()]);
    assert_eq!(session.snapshot().audio_errors.len(), 1);
    assert_eq!(session.state(), SessionState::Live);

    session.stop();
    assert_eq!(session.audio().backend().open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_connecting_leaves_nothing_behind() {
    let mut session = new_session(SessionSettings {
        retry_delay: Duration::from_secs(60),
        ..SessionSettings::default()
    });
    let mut connector = MemoryConnector::new();
    connector.push_failure("down");

    let shutdown = tokio::time::sleep(Duration::from_secs(5));
    let result = session.run(&mut connector, shutdown).await;

    assert!(result.is_ok());
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.holds_channel());
}

#[tokio::test(start_paused = true)]
async fn simulator_drives_a_full_session() {
    let mut session = new_session(SessionSettings {
        tick_interval: Duration::from_secs(1),
        ..SessionSettings::default()
    });
    let mut connector = SimConnector::new(SimConfig {
        interval: Duration::from_millis(100),
        seed: Some(42),
    });
    let snapshots = session.subscribe();

    let shutdown = tokio::time::sleep(Duration::from_secs(30));
    let result = session.run(&mut connector, shutdown).await;

    assert!(result.is_ok());
    assert_eq!(session.log().len(), 10);
    assert!(session.commands_sent() > 0);
    assert_eq!(session.audio().backend().open_handles(), 0);
    assert_eq!(snapshots.borrow().state, SessionState::Idle);
}
