//! Integration tests for Hikari Core

use async_trait::async_trait;
use hikari_core::{
    testing::{RecordingFactory, StaticFetcher, TransportCall},
    surface::OwnershipChange,
    ControlItem, ControllerEvent, EpisodeDescriptor, Error, FaultKind, FaultRecord, Key,
    KeyPress, KeyboardHub, MediaSurface, MemorySurface, PlaybackController, PlayerConfig, PlayerEvent,
    RecoveryState, TransportAdapter, TransportKind, ViewCounter,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

const MASTER: &str = "https://cdn.example.com/ep1/master.m3u8";

fn episode(id: &str, url: &str) -> EpisodeDescriptor {
    EpisodeDescriptor::new(id, "Departure", 1, url)
}

fn recorded(controller: &mut PlaybackController) -> Arc<Mutex<Vec<ControllerEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    controller.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
    events
}

fn fake_controller(
    factory: RecordingFactory,
) -> (PlaybackController, Arc<MemorySurface>, KeyboardHub) {
    let surface = Arc::new(MemorySurface::new());
    let hub = KeyboardHub::new();
    let controller = PlaybackController::new(
        PlayerConfig::default(),
        Box::new(factory),
        surface.clone(),
        hub.clone(),
    )
    .unwrap();
    (controller, surface, hub)
}

fn hls_controller(fetcher: StaticFetcher) -> (PlaybackController, Arc<MemorySurface>) {
    let surface = Arc::new(MemorySurface::new());
    let config = PlayerConfig::default();
    let adapter = TransportAdapter::with_fetcher(config.transport.clone(), Arc::new(fetcher));
    let controller = PlaybackController::new(
        config,
        Box::new(adapter),
        surface.clone(),
        KeyboardHub::new(),
    )
    .unwrap();
    (controller, surface)
}

/// Handle events until `done` holds
async fn pump_until(controller: &mut PlaybackController, done: impl Fn(&PlaybackController) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done(controller) {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        tokio::time::timeout(remaining, controller.recv_event())
            .await
            .expect("condition not reached in time");
    }
}

fn emit(controller: &mut PlaybackController, event: PlayerEvent) {
    controller.event_sink().unwrap().emit(event);
    controller.process_pending();
}

#[derive(Default)]
struct CountingViews {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl ViewCounter for CountingViews {
    async fn record_view(&self, episode_id: &str) -> hikari_core::Result<()> {
        self.calls.lock().unwrap().push(episode_id.to_string());
        if self.fail {
            return Err(Error::ViewReport {
                episode_id: episode_id.to_string(),
                reason: "HTTP 500".into(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Telemetry Tests
// =============================================================================

#[tokio::test]
async fn test_view_counted_once_per_session() {
    let views = Arc::new(CountingViews::default());
    let (controller, _, _) = fake_controller(RecordingFactory::new(TransportKind::Software));
    let mut controller = controller.with_view_counter(views.clone());
    let events = recorded(&mut controller);

    assert_ok!(controller.bind(episode("ep-1", MASTER)));
    for t in 0..120 {
        emit(&mut controller, PlayerEvent::TimeUpdate { position: t as f64 });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let crossed = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ControllerEvent::ViewThresholdCrossed { .. }))
        .count();
    assert_eq!(crossed, 1);
    assert_eq!(*views.calls.lock().unwrap(), vec!["ep-1".to_string()]);

    // A new session counts again
    assert_ok!(controller.bind(episode("ep-2", MASTER)));
    emit(&mut controller, PlayerEvent::TimeUpdate { position: 45.0 });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(views.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_view_report_failure_is_swallowed() {
    let views = Arc::new(CountingViews {
        fail: true,
        ..Default::default()
    });
    let (controller, _, _) = fake_controller(RecordingFactory::new(TransportKind::Software));
    let mut controller = controller.with_view_counter(views.clone());
    let events = recorded(&mut controller);

    assert_ok!(controller.bind(episode("ep-1", MASTER)));
    emit(&mut controller, PlayerEvent::TimeUpdate { position: 31.0 });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(views.calls.lock().unwrap().len(), 1);
    assert_eq!(controller.recovery_state(), Some(RecoveryState::Healthy));
    assert!(controller.has_transport());
    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ControllerEvent::FatalError { .. })));
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_rebind_releases_before_attach() {
    let fetcher = StaticFetcher::vod(MASTER, &[(2_800_000, 720), (800_000, 360)], 3);
    let (mut controller, surface) = hls_controller(fetcher);

    let first = controller.bind(episode("ep-1", MASTER)).unwrap();
    let second = controller.bind(episode("ep-2", MASTER)).unwrap();
    let third = controller.bind(episode("ep-3", MASTER)).unwrap();

    assert_eq!(
        surface.ownership_history(),
        vec![
            OwnershipChange::Claimed(first),
            OwnershipChange::Released(first),
            OwnershipChange::Claimed(second),
            OwnershipChange::Released(second),
            OwnershipChange::Claimed(third),
        ]
    );
    assert_eq!(controller.transport_kind(), Some(TransportKind::Software));

    drop(controller);
    assert_eq!(surface.owner(), None);
}

#[tokio::test]
async fn test_software_session_reaches_ladder_and_buffers() {
    let fetcher = StaticFetcher::vod(MASTER, &[(2_800_000, 720), (800_000, 360)], 3);
    let (mut controller, surface) = hls_controller(fetcher);

    controller.bind(episode("ep-1", MASTER)).unwrap();
    pump_until(&mut controller, |c| c.levels().is_some()).await;

    let menu = controller.quality_menu().unwrap();
    assert_eq!(menu.items.len(), 2);
    assert_eq!(menu.items[0].label, "720p");
    assert!(controller.controls().contains(&ControlItem::Quality));

    pump_until(&mut controller, |_| surface.buffered_chunks() >= 1).await;
    assert!(surface.buffered_end() > 0.0);
}

#[tokio::test]
async fn test_single_rendition_has_no_quality_control() {
    let media_url = "https://cdn.example.com/ep2/index.m3u8";
    let fetcher = StaticFetcher::new()
        .with_text(media_url, hikari_core::testing::media_playlist(2))
        .with_bytes("https://cdn.example.com/ep2/seg0.ts", hikari_core::testing::ts_segment(4))
        .with_bytes("https://cdn.example.com/ep2/seg1.ts", hikari_core::testing::ts_segment(4));
    let (mut controller, _) = hls_controller(fetcher);

    controller.bind(episode("ep-2", media_url)).unwrap();
    pump_until(&mut controller, |c| c.levels().is_some()).await;

    assert_eq!(controller.levels().unwrap().len(), 1);
    assert!(controller.quality_menu().is_none());
    assert!(!controller.controls().contains(&ControlItem::Quality));
}

#[tokio::test]
async fn test_native_playback_when_no_media_source() {
    let surface = Arc::new(MemorySurface::with_capabilities(false, true));
    let config = PlayerConfig::default();
    let adapter = TransportAdapter::with_fetcher(config.transport.clone(), Arc::new(StaticFetcher::new()));
    let mut controller =
        PlaybackController::new(config, Box::new(adapter), surface.clone(), KeyboardHub::new()).unwrap();

    controller.bind(episode("ep-1", MASTER)).unwrap();
    assert_eq!(controller.transport_kind(), Some(TransportKind::Native));
    assert_eq!(surface.native_source().unwrap().as_str(), MASTER);
    assert!(controller.quality_menu().is_none());
}

// =============================================================================
// Quality Tests
// =============================================================================

#[tokio::test]
async fn test_select_current_level_emits_nothing() {
    let fetcher = StaticFetcher::vod(MASTER, &[(2_800_000, 720), (800_000, 360), (5_000_000, 1080)], 3);
    let (mut controller, _) = hls_controller(fetcher);
    let events = recorded(&mut controller);

    controller.bind(episode("ep-1", MASTER)).unwrap();
    pump_until(&mut controller, |c| c.levels().is_some()).await;
    let current = controller.active_level().unwrap();

    let before = events.lock().unwrap().len();
    assert!(!controller.select_level(current).unwrap());
    assert_eq!(events.lock().unwrap().len(), before);

    let other = (current + 1) % 3;
    assert!(controller.select_level(other).unwrap());
    assert!(!controller.select_level(other).unwrap());
    let manual_switches = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ControllerEvent::LevelSwitched { index, .. } if *index == other))
        .count();
    assert_eq!(manual_switches, 1);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_first_network_fault_restarts() {
    let factory = RecordingFactory::new(TransportKind::Software);
    let log = factory.log();
    let (mut controller, surface, _) = fake_controller(factory);
    let id = controller.bind(episode("ep-1", MASTER)).unwrap();
    surface.set_current_time(42.0);

    emit(&mut controller, PlayerEvent::Fault(FaultRecord::fatal(FaultKind::Network, "FRAG_LOAD")));

    assert_eq!(log.calls().last(), Some(&TransportCall::StartLoad(id, 42.0)));
    assert_eq!(
        controller.recovery_state(),
        Some(RecoveryState::Recovering(FaultKind::Network))
    );
    assert!(controller.has_transport());
}

#[test]
fn test_unrecoverable_fault_never_retries() {
    let factory = RecordingFactory::new(TransportKind::Software);
    let log = factory.log();
    let (mut controller, surface, _) = fake_controller(factory);
    let events = recorded(&mut controller);
    controller.bind(episode("ep-1", MASTER)).unwrap();

    emit(&mut controller, PlayerEvent::Fault(FaultRecord::fatal(FaultKind::Other, "NO_RENDITION")));
    emit(&mut controller, PlayerEvent::Fault(FaultRecord::fatal(FaultKind::Network, "FRAG_LOAD")));
    emit(&mut controller, PlayerEvent::Fault(FaultRecord::fatal(FaultKind::Media, "FRAG_PARSE")));

    assert_eq!(controller.recovery_state(), Some(RecoveryState::Terminal));
    assert_eq!(
        log.count(|c| matches!(c, TransportCall::StartLoad(..) | TransportCall::RecoverMedia(..))),
        0
    );
    assert_eq!(surface.owner(), None);

    let fatal: Vec<ControllerEvent> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ControllerEvent::FatalError { .. }))
        .cloned()
        .collect();
    assert_eq!(
        fatal,
        vec![ControllerEvent::FatalError {
            kind: FaultKind::Other,
            detail: "NO_RENDITION".into()
        }]
    );
}

#[test]
fn test_non_fatal_fault_keeps_playing() {
    let factory = RecordingFactory::new(TransportKind::Software);
    let log = factory.log();
    let (mut controller, _, _) = fake_controller(factory);
    controller.bind(episode("ep-1", MASTER)).unwrap();

    emit(&mut controller, PlayerEvent::Fault(FaultRecord::non_fatal(FaultKind::Media, "BUFFER_FULL")));
    assert_eq!(controller.recovery_state(), Some(RecoveryState::Healthy));
    assert_eq!(log.calls().len(), 1);
}

#[tokio::test]
async fn test_unparseable_manifest_is_terminal() {
    let fetcher = StaticFetcher::new().with_text(MASTER, "<html>maintenance</html>");
    let (mut controller, surface) = hls_controller(fetcher);
    let events = recorded(&mut controller);

    controller.bind(episode("ep-1", MASTER)).unwrap();
    pump_until(&mut controller, |c| c.recovery_state() == Some(RecoveryState::Terminal)).await;

    assert!(!controller.has_transport());
    assert_eq!(surface.owner(), None);
    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        ControllerEvent::FatalError { kind: FaultKind::Other, .. }
    )));
}

#[tokio::test]
async fn test_persistently_corrupt_segment_becomes_terminal() {
    let fetcher = StaticFetcher::vod(MASTER, &[(800_000, 360)], 3).with_bytes(
        "https://cdn.example.com/ep1/v0/seg1.ts",
        bytes::Bytes::from_static(b"garbage"),
    );
    let (mut controller, surface) = hls_controller(fetcher);
    let events = recorded(&mut controller);

    controller.bind(episode("ep-1", MASTER)).unwrap();
    pump_until(&mut controller, |c| c.recovery_state() == Some(RecoveryState::Terminal)).await;

    assert_eq!(surface.decoder_resets(), 1);
    assert!(!controller.has_transport());
    let events = events.lock().unwrap();
    let recoveries = events
        .iter()
        .filter(|e| matches!(
            e,
            ControllerEvent::RecoveryStateChanged { state: RecoveryState::Recovering(FaultKind::Media) }
        ))
        .count();
    assert_eq!(recoveries, 1);
    let fatal = events
        .iter()
        .filter(|e| matches!(e, ControllerEvent::FatalError { kind: FaultKind::Media, .. }))
        .count();
    assert_eq!(fatal, 1);
}

// =============================================================================
// Keyboard Tests
// =============================================================================

#[test]
fn test_arrow_left_seeks_back_ten_seconds() {
    let (mut controller, surface, hub) = fake_controller(RecordingFactory::new(TransportKind::Software));
    controller.bind(episode("ep-1", MASTER)).unwrap();
    surface.set_duration(Some(1440.0));
    surface.set_current_time(25.0);

    assert_eq!(hub.dispatch(KeyPress::new(Key::ArrowLeft)), 1);
    controller.process_pending();
    assert_eq!(surface.current_time(), 15.0);

    surface.set_current_time(4.0);
    hub.dispatch(KeyPress::new(Key::ArrowLeft));
    controller.process_pending();
    assert_eq!(surface.current_time(), 0.0);
}

#[test]
fn test_keys_suppressed_in_text_field() {
    let (mut controller, surface, hub) = fake_controller(RecordingFactory::new(TransportKind::Software));
    controller.bind(episode("ep-1", MASTER)).unwrap();
    surface.set_current_time(25.0);

    for key in [Key::Space, Key::ArrowLeft, Key::KeyM, Key::KeyF] {
        assert_eq!(hub.dispatch(KeyPress::in_text_field(key)), 0);
    }
    controller.process_pending();

    assert!(surface.is_paused());
    assert_eq!(surface.current_time(), 25.0);
    assert!(!surface.is_muted());
    assert!(!surface.is_fullscreen());
}

#[test]
fn test_teardown_removes_key_listener() {
    let (mut controller, surface, hub) = fake_controller(RecordingFactory::new(TransportKind::Software));
    controller.bind(episode("ep-1", MASTER)).unwrap();
    assert_eq!(hub.listener_count(), 1);

    controller.bind(episode("ep-2", MASTER)).unwrap();
    assert_eq!(hub.listener_count(), 1);

    controller.release();
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(hub.dispatch(KeyPress::new(Key::Space)), 0);
    assert_eq!(controller.process_pending(), 0);
    assert!(surface.is_paused());
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_invalid_config_rejected() {
    let mut config = PlayerConfig::default();
    config.transport.max_buffer_length = 900.0;
    let result = PlaybackController::new(
        config,
        Box::new(RecordingFactory::new(TransportKind::Software)),
        Arc::new(MemorySurface::new()),
        KeyboardHub::new(),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
