//! Integration tests for Roll Core

use roll_core::{
    attr,
    config::LoopBounds,
    message::drain,
    scanner::DocumentMutation,
    sim::{SimCapture, SimDocument, SimMedia},
    AudioMode, DocumentRef, EngineChannels, EngineConfig, Error, Inbound, MediaElement,
    MediaEvent, MediaId, Outbound, PersistedState, RollConfig, RollEngine, TabId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Helpers
// =============================================================================

/// Log to the test writer; `RUST_LOG=roll_core=debug` shows engine traces
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with(capture: Arc<SimCapture>) -> (RollEngine, EngineChannels) {
    init_tracing();
    RollEngine::new(EngineConfig::default(), capture)
}

fn playing(at: f64) -> Arc<SimMedia> {
    let media = Arc::new(SimMedia::new(1280.0, 720.0));
    media.start_playing(at);
    media
}

fn page_with(media: &[Arc<SimMedia>]) -> Arc<SimDocument> {
    let root = Arc::new(SimDocument::new("Watch page"));
    for m in media {
        root.add_media(m.clone());
    }
    root
}

fn id_of(media: &SimMedia) -> MediaId {
    MediaId(media.attribute(attr::ROLL_ID).unwrap())
}

fn kinds(channels: &mut EngineChannels) -> Vec<&'static str> {
    drain(&mut channels.notifications)
        .iter()
        .map(|record| record.message.name())
        .collect()
}

async fn open(engine: &RollEngine, tab: u32, root: &Arc<SimDocument>, url: &str) {
    let root: DocumentRef = root.clone();
    engine
        .open_tab(TabId(tab), root, &PersistedState::new(url))
        .await
        .unwrap();
}

async fn current_config(engine: &RollEngine, tab: u32) -> RollConfig {
    engine
        .sessions()
        .with(TabId(tab), |session| (*session.config()).clone())
        .await
        .unwrap()
}

// =============================================================================
// Scanning Tests
// =============================================================================

#[tokio::test]
async fn test_badge_lists_candidates() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let idle = Arc::new(SimMedia::new(1280.0, 720.0).with_source("https://cdn.example.org/clips/intro.mp4"));
    let main = playing(12.0);
    let root = page_with(&[idle.clone(), main.clone()]);

    open(&engine, 1, &root, "https://example.org/watch").await;

    let records = drain(&mut channels.notifications);
    assert_eq!(records.len(), 1);
    match &records[0].message {
        Outbound::BadgeUpdate { count, summaries, .. } => {
            assert_eq!(*count, 2);
            assert_eq!(summaries[0].name, "intro.mp4");
            assert_eq!(summaries[1].name, "video 2");
            assert!(summaries[1].is_real);
            assert!(!summaries[0].is_real);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_open_tab_outside_runtime() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let root = page_with(&[playing(1.0)]);

    tokio_test::block_on(open(&engine, 1, &root, "https://example.org/"));
    assert_eq!(kinds(&mut channels), vec!["BADGE_UPDATE"]);
    assert_eq!(tokio_test::block_on(engine.sessions().tabs()), vec![TabId(1)]);
}

#[tokio::test]
async fn test_nested_frames_are_scanned() {
    let (engine, _channels) = engine_with(Arc::new(SimCapture::new()));
    let inner = Arc::new(SimDocument::new("embed"));
    let embedded = playing(3.0);
    inner.add_media(embedded.clone());
    let root = page_with(&[]);
    root.add_frame("https://player.example.org/embed/1", inner);
    root.add_cross_origin_frame("https://ads.example.net/slot");

    let root_ref: DocumentRef = root.clone();
    let report = engine
        .open_tab(TabId(1), root_ref, &PersistedState::new("https://example.org/"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.added, vec![id_of(&embedded)]);
    assert_eq!(report.skipped_frames, 1);
    assert_eq!(current_config(&engine, 1).await.iframes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mutation_burst_rescans_once() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let root = page_with(&[playing(1.0)]);
    open(&engine, 1, &root, "https://example.org/").await;
    drain(&mut channels.notifications);

    let video_added = DocumentMutation {
        target: "DIV".to_string(),
        added: vec!["VIDEO".to_string()],
        ..Default::default()
    };
    let unrelated = DocumentMutation {
        target: "SPAN".to_string(),
        ..Default::default()
    };

    root.add_media(Arc::new(SimMedia::new(320.0, 180.0)));
    for _ in 0..5 {
        engine
            .handle(Inbound::DocumentMutated {
                tab_id: TabId(1),
                mutations: vec![unrelated.clone(), video_added.clone()],
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(engine.run_due_rescans(&mut channels.rescans).await, 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.run_due_rescans(&mut channels.rescans).await, 1);
    assert_eq!(kinds(&mut channels), vec!["BADGE_UPDATE"]);
    assert_eq!(current_config(&engine, 1).await.video_number, 2);
}

#[tokio::test(start_paused = true)]
async fn test_irrelevant_mutations_do_not_schedule() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let root = page_with(&[playing(1.0)]);
    open(&engine, 1, &root, "https://example.org/").await;

    engine
        .handle(Inbound::DocumentMutated {
            tab_id: TabId(1),
            mutations: vec![DocumentMutation {
                target: "P".to_string(),
                added: vec!["#text".to_string()],
                ..Default::default()
            }],
        })
        .await
        .unwrap();

    assert!(!engine.scheduler().is_pending(TabId(1)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.run_due_rescans(&mut channels.rescans).await, 0);
}

// =============================================================================
// Real Player Tests
// =============================================================================

#[tokio::test]
async fn test_play_promotes_and_moves_watchers() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let first = playing(8.0);
    let second = Arc::new(SimMedia::new(1280.0, 720.0));
    let root = page_with(&[first.clone(), second.clone()]);
    open(&engine, 1, &root, "https://example.org/").await;
    drain(&mut channels.notifications);

    // three candidate listeners plus three attribute watchers on the real one
    assert_eq!(first.total_listeners(), 6);
    assert_eq!(second.total_listeners(), 3);

    first.update(|s| s.paused = true);
    second.start_playing(0.5);
    engine
        .handle(Inbound::MediaEvent {
            tab_id: TabId(1),
            media_id: id_of(&second),
            event: MediaEvent::Play,
        })
        .await
        .unwrap();

    assert_eq!(first.total_listeners(), 3);
    assert_eq!(second.total_listeners(), 6);
    let real = engine
        .sessions()
        .with(TabId(1), |session| session.real_player().cloned())
        .await
        .unwrap();
    assert_eq!(real, Some(id_of(&second)));
    assert_eq!(kinds(&mut channels), vec!["BADGE_UPDATE"]);
}

#[tokio::test]
async fn test_rate_change_synced_into_config() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let main = playing(2.0);
    let root = page_with(&[main.clone()]);
    open(&engine, 1, &root, "https://example.org/").await;
    drain(&mut channels.notifications);

    main.set_playback_rate(1.5);
    engine
        .handle(Inbound::MediaEvent {
            tab_id: TabId(1),
            media_id: id_of(&main),
            event: MediaEvent::RateChange,
        })
        .await
        .unwrap();

    assert_eq!(kinds(&mut channels), vec!["STORAGE_UPDATED"]);
    assert_eq!(current_config(&engine, 1).await.playback_rate, 1.5);
}

// =============================================================================
// AB Loop Tests
// =============================================================================

#[tokio::test]
async fn test_ab_loop_through_messages() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let main = playing(2.0);
    let root = page_with(&[main.clone()]);
    open(&engine, 1, &root, "https://example.org/").await;

    let mut config = current_config(&engine, 1).await;
    config.ab_loop = LoopBounds::new("00:10", "00:20");
    engine
        .handle(Inbound::ConfigUpdated { tab_id: TabId(1), config })
        .await
        .unwrap();
    assert_eq!(main.seeks(), vec![10.0]);

    main.set_current_time(15.0);
    engine
        .handle(Inbound::MediaEvent {
            tab_id: TabId(1),
            media_id: id_of(&main),
            event: MediaEvent::TimeUpdate,
        })
        .await
        .unwrap();
    assert_eq!(main.seeks(), vec![10.0]);

    main.set_current_time(20.25);
    engine
        .handle(Inbound::MediaEvent {
            tab_id: TabId(1),
            media_id: id_of(&main),
            event: MediaEvent::TimeUpdate,
        })
        .await
        .unwrap();
    assert_eq!(main.seeks(), vec![10.0, 10.0]);

    let mut config = current_config(&engine, 1).await;
    config.ab_loop.on = false;
    engine
        .handle(Inbound::ConfigUpdated { tab_id: TabId(1), config })
        .await
        .unwrap();
    drain(&mut channels.notifications);

    main.set_current_time(25.0);
    engine
        .handle(Inbound::MediaEvent {
            tab_id: TabId(1),
            media_id: id_of(&main),
            event: MediaEvent::TimeUpdate,
        })
        .await
        .unwrap();
    assert_eq!(main.seeks().len(), 2);
}

#[tokio::test]
async fn test_invalid_loop_bounds_leave_loop_off() {
    let (engine, _channels) = engine_with(Arc::new(SimCapture::new()));
    let main = playing(2.0);
    let root = page_with(&[main.clone()]);
    open(&engine, 1, &root, "https://example.org/").await;

    let mut config = current_config(&engine, 1).await;
    config.ab_loop = LoopBounds::new("1:xx", "00:20");
    engine
        .handle(Inbound::ConfigUpdated { tab_id: TabId(1), config })
        .await
        .unwrap();

    assert!(main.seeks().is_empty());
    let armed = engine
        .sessions()
        .with(TabId(1), |session| session.looper().is_armed())
        .await
        .unwrap();
    assert!(!armed);
}

// =============================================================================
// Ad Skip Tests
// =============================================================================

#[tokio::test]
async fn test_ad_fast_forward_and_restore() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let main = playing(30.0);
    let root = page_with(&[main.clone()]);
    open(&engine, 1, &root, "https://www.youtube.com/watch?v=abc").await;
    drain(&mut channels.notifications);

    let ad = |showing| Inbound::MediaEvent {
        tab_id: TabId(1),
        media_id: id_of(&main),
        event: MediaEvent::AdState { showing },
    };

    engine.handle(ad(true)).await.unwrap();
    assert_eq!(main.snapshot().playback_rate, 16.0);
    engine.handle(ad(true)).await.unwrap();
    assert_eq!(main.snapshot().playback_rate, 16.0);
    assert!(kinds(&mut channels).is_empty());

    engine.handle(ad(false)).await.unwrap();
    assert_eq!(main.snapshot().playback_rate, 1.0);
    assert_eq!(kinds(&mut channels), vec!["STORAGE_UPDATED"]);
    assert_eq!(current_config(&engine, 1).await.playback_rate, 1.0);
}

#[tokio::test]
async fn test_unknown_site_has_no_ad_watch() {
    let (engine, _channels) = engine_with(Arc::new(SimCapture::new()));
    let main = playing(30.0);
    let root = page_with(&[main.clone()]);
    open(&engine, 1, &root, "https://example.org/").await;

    let watching = engine
        .sessions()
        .with(TabId(1), |session| session.ad_skipper().is_watching())
        .await
        .unwrap();
    assert!(!watching);
    assert_eq!(main.listener_count(roll_core::host::EventKind::AdState), 0);
}

// =============================================================================
// Audio Tests
// =============================================================================

#[tokio::test]
async fn test_concurrent_audio_requests_share_stream() {
    let capture = Arc::new(SimCapture::new());
    capture.set_latency(Some(Duration::from_millis(20)));
    let (engine, mut channels) = engine_with(capture.clone());

    let request = || Inbound::AudioCreate {
        tab_id: TabId(5),
        mode: AudioMode::Stream,
        fallback_on_fail: true,
        config: RollConfig::default(),
    };
    let (a, b) = tokio::join!(engine.handle(request()), engine.handle(request()));

    let expected = Some(Outbound::AudioModeResult {
        tab_id: TabId(5),
        mode: Some(AudioMode::Stream),
    });
    assert_eq!(a.unwrap(), expected);
    assert_eq!(b.unwrap(), expected);
    assert_eq!(capture.streams_acquired(), 1);
    assert_eq!(kinds(&mut channels), vec!["UPDATE_STREAM_AUDIO"]);
}

#[tokio::test]
async fn test_audio_failure_reported() {
    let capture = Arc::new(SimCapture::new());
    capture.set_stream_fails(true);
    let (engine, mut channels) = engine_with(capture);

    let reply = engine
        .handle(Inbound::AudioCreate {
            tab_id: TabId(5),
            mode: AudioMode::Stream,
            fallback_on_fail: false,
            config: RollConfig::default(),
        })
        .await
        .unwrap();

    assert_eq!(
        reply,
        Some(Outbound::AudioModeResult {
            tab_id: TabId(5),
            mode: None,
        })
    );
    let records = drain(&mut channels.notifications);
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].message, Outbound::AudioFailed { .. }));
}

#[tokio::test]
async fn test_audio_failure_over_element_pipeline() {
    let capture = Arc::new(SimCapture::new());
    let (engine, mut channels) = engine_with(capture.clone());
    let create = |mode| Inbound::AudioCreate {
        tab_id: TabId(5),
        mode,
        fallback_on_fail: false,
        config: RollConfig::default(),
    };

    engine.handle(create(AudioMode::Element)).await.unwrap();
    drain(&mut channels.notifications);

    capture.set_stream_fails(true);
    let reply = engine.handle(create(AudioMode::Stream)).await.unwrap();
    assert_eq!(
        reply,
        Some(Outbound::AudioModeResult {
            tab_id: TabId(5),
            mode: None,
        })
    );
    assert_eq!(kinds(&mut channels), vec!["AUDIO_FAILED"]);
    assert_eq!(engine.audio().mode(TabId(5)).await, Some(AudioMode::Element));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_audio_request_does_not_block_retry() {
    let capture = Arc::new(SimCapture::new());
    capture.set_latency(Some(Duration::from_millis(50)));
    let (engine, mut channels) = engine_with(capture.clone());
    let create = || Inbound::AudioCreate {
        tab_id: TabId(6),
        mode: AudioMode::Stream,
        fallback_on_fail: true,
        config: RollConfig::default(),
    };

    let abandoned = tokio::time::timeout(Duration::from_millis(5), engine.handle(create())).await;
    assert!(abandoned.is_err());
    assert!(!engine.audio().state(TabId(6)).await.creating);

    let reply = engine.handle(create()).await.unwrap();
    assert_eq!(
        reply,
        Some(Outbound::AudioModeResult {
            tab_id: TabId(6),
            mode: Some(AudioMode::Stream),
        })
    );
    assert_eq!(capture.streams_acquired(), 1);
    assert_eq!(kinds(&mut channels), vec!["UPDATE_STREAM_AUDIO"]);
}

#[tokio::test]
async fn test_audio_update_recreates_lost_surface() {
    let capture = Arc::new(SimCapture::new());
    let (engine, mut channels) = engine_with(capture.clone());

    engine
        .handle(Inbound::AudioUpdate {
            tab_id: TabId(2),
            config: RollConfig::default(),
        })
        .await
        .unwrap();
    assert_eq!(engine.audio().mode(TabId(2)).await, Some(AudioMode::Stream));

    capture.close_surface();
    engine
        .handle(Inbound::AudioUpdate {
            tab_id: TabId(2),
            config: RollConfig::default(),
        })
        .await
        .unwrap();

    assert_eq!(capture.surfaces_created(), 2);
    assert_eq!(
        kinds(&mut channels),
        vec!["UPDATE_STREAM_AUDIO", "UPDATE_STREAM_AUDIO"]
    );
}

#[tokio::test]
async fn test_reset_restores_initial_audio_state() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));

    engine
        .handle(Inbound::AudioCreate {
            tab_id: TabId(3),
            mode: AudioMode::Stream,
            fallback_on_fail: true,
            config: RollConfig::default(),
        })
        .await
        .unwrap();
    engine
        .handle(Inbound::AudioReset { tab_id: TabId(3) })
        .await
        .unwrap();

    assert_eq!(engine.audio().state(TabId(3)).await, Default::default());
    assert_eq!(
        kinds(&mut channels),
        vec!["UPDATE_STREAM_AUDIO", "RESET_AUDIO", "DELETE_AUDIO"]
    );
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_disable_and_reenable() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let main = playing(4.0);
    let root = page_with(&[main.clone()]);
    open(&engine, 1, &root, "https://example.org/").await;

    let mut config = current_config(&engine, 1).await;
    config.playback_rate = 2.0;
    engine
        .handle(Inbound::ConfigUpdated { tab_id: TabId(1), config })
        .await
        .unwrap();
    assert_eq!(main.snapshot().playback_rate, 2.0);
    drain(&mut channels.notifications);

    engine.handle(Inbound::Disable { tab_id: TabId(1) }).await.unwrap();
    assert_eq!(main.total_listeners(), 0);
    assert_eq!(main.snapshot().playback_rate, 1.0);
    assert_eq!(main.attribute(attr::ROLL_ACTIVE).as_deref(), Some("false"));
    assert_eq!(kinds(&mut channels), vec!["DISABLED"]);

    let err = engine
        .handle(Inbound::RequestRescan { tab_id: TabId(1) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionDisabled(TabId(1))));

    let mut config = current_config(&engine, 1).await;
    config.enable = true;
    engine
        .handle(Inbound::ConfigUpdated { tab_id: TabId(1), config })
        .await
        .unwrap();
    assert!(engine.scheduler().is_pending(TabId(1)));

    engine
        .handle(Inbound::RequestRescan { tab_id: TabId(1) })
        .await
        .unwrap();
    assert!(!engine.scheduler().is_pending(TabId(1)));
    assert_eq!(main.total_listeners(), 6);
}

#[tokio::test]
async fn test_tab_close_releases_everything() {
    let capture = Arc::new(SimCapture::new());
    let (engine, mut channels) = engine_with(capture);
    let main = playing(4.0);
    let root = page_with(&[main.clone()]);
    open(&engine, 7, &root, "https://www.youtube.com/watch?v=xyz").await;
    engine
        .handle(Inbound::AudioUpdate {
            tab_id: TabId(7),
            config: RollConfig::default(),
        })
        .await
        .unwrap();
    drain(&mut channels.notifications);

    engine.handle(Inbound::TabClosed { tab_id: TabId(7) }).await.unwrap();

    assert_eq!(main.total_listeners(), 0);
    assert!(engine.sessions().is_empty().await);
    assert_eq!(engine.audio().tab_count().await, 0);
    assert_eq!(kinds(&mut channels), vec!["RESET_AUDIO", "DELETE_AUDIO"]);

    // closing again is harmless
    engine.handle(Inbound::TabClosed { tab_id: TabId(7) }).await.unwrap();
    assert!(kinds(&mut channels).is_empty());
}

#[tokio::test]
async fn test_video_selection_applies_config() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    let a = playing(4.0);
    let b = Arc::new(SimMedia::new(640.0, 360.0));
    let root = page_with(&[a.clone(), b.clone()]);
    open(&engine, 1, &root, "https://example.org/").await;

    let mut config = current_config(&engine, 1).await;
    config.looping = true;
    engine
        .handle(Inbound::ConfigUpdated { tab_id: TabId(1), config })
        .await
        .unwrap();
    assert!(b.snapshot().looping);
    drain(&mut channels.notifications);

    engine
        .handle(Inbound::VideoCheckUpdate {
            tab_id: TabId(1),
            ids: vec![id_of(&a)],
        })
        .await
        .unwrap();

    assert!(a.snapshot().looping);
    assert!(!b.snapshot().looping);
    assert_eq!(b.attribute(attr::ROLL_CHECK).as_deref(), Some("false"));
    assert_eq!(b.attribute(attr::ROLL_ACTIVE).as_deref(), Some("false"));
    assert_eq!(kinds(&mut channels), vec!["STORAGE_UPDATED", "BADGE_UPDATE"]);
}

#[tokio::test]
async fn test_persisted_origin_record_wins() {
    let (engine, _channels) = engine_with(Arc::new(SimCapture::new()));
    let root = page_with(&[playing(1.0)]);
    let origin = RollConfig {
        deg: 90,
        ..Default::default()
    };
    let snapshot = RollConfig {
        deg: 180,
        ..Default::default()
    };
    let persisted = PersistedState::new("https://example.org/watch")
        .with_tab_snapshot(TabId(1), snapshot)
        .with_origin_record(origin);

    let root_ref: DocumentRef = root;
    engine.open_tab(TabId(1), root_ref, &persisted).await.unwrap();

    let config = current_config(&engine, 1).await;
    assert_eq!(config.deg, 90);
    assert!(config.is_init);
    assert_eq!(config.tab_id, TabId(1));
}

// =============================================================================
// Wire Format Tests
// =============================================================================

#[tokio::test]
async fn test_notification_wire_shape() {
    let (engine, mut channels) = engine_with(Arc::new(SimCapture::new()));
    engine
        .dispatch(Inbound::AudioReset { tab_id: TabId(1) })
        .await;
    engine.outbox().publish(Outbound::ResetAudio { tab_id: TabId(1) });

    let record = drain(&mut channels.notifications).remove(0);
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["type"], "RESET_AUDIO");
    assert_eq!(value["tabId"], 1);
    assert!(value["id"].is_string());
    assert!(value["timestamp"].is_string());
}

#[test]
fn test_inbound_from_json() {
    let message: Inbound = serde_json::from_str(
        r#"{"type":"VIDEO_CHECK_UPDATE","tabId":4,"ids":["a","b"]}"#,
    )
    .unwrap();
    assert_eq!(
        message,
        Inbound::VideoCheckUpdate {
            tab_id: TabId(4),
            ids: vec![MediaId::from("a"), MediaId::from("b")],
        }
    );
}
