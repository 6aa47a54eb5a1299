// File: tunebot-core/tests/session_tests.rs
//
// End-to-end tests of the playback session state machine with fake
// collaborators: an in-memory resolver, a pipeline factory backed by duplex
// pipes (the test feeds or starves the "audio"), and a voice connector that
// hands out real PcmWriterSinks over a null output.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use tunebot_core::Error;
use tunebot_core::eventbus::{BotEvent, EventBus, SessionEndReason};
use tunebot_core::pipeline::{ActivePipeline, PipelineControl, PipelineFactory, PlaybackEvent};
use tunebot_core::resolver::TrackResolver;
use tunebot_core::session::{SessionConfig, SessionRegistry};
use tunebot_core::voice::{PcmWriterSink, VoiceConnector, VoiceSink};
use tunebot_common::models::{SearchCandidate, TrackMetadata};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeResolver {
    metadata_delay: Option<Duration>,
    fail_stream_for: StdMutex<HashSet<String>>,
}

impl FakeResolver {
    fn fail_stream(&self, locator: &str) {
        self.fail_stream_for
            .lock()
            .unwrap()
            .insert(locator.to_string());
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve_metadata(&self, locator: &str) -> Result<TrackMetadata, Error> {
        if let Some(delay) = self.metadata_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(TrackMetadata {
            title: format!("Title of {locator}"),
            canonical_locator: locator.to_string(),
            duration_secs: Some(100),
            thumbnail: None,
        })
    }

    async fn resolve_stream_address(&self, locator: &str) -> Result<String, Error> {
        if self.fail_stream_for.lock().unwrap().contains(locator) {
            return Err(Error::ResolutionFailed(format!("no stream for {locator}")));
        }
        Ok(format!("https://cdn.example/{locator}"))
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchCandidate>, Error> {
        Ok(vec![])
    }
}

struct SpawnRecord {
    offset_secs: f64,
    writer: Option<DuplexStream>,
}

/// Every spawn hands the session the read half of a duplex pipe; the test
/// keeps the write half and plays "ffmpeg" by feeding or starving it.
#[derive(Clone, Default)]
struct FakePipelineFactory {
    spawns: Arc<StdMutex<Vec<SpawnRecord>>>,
}

impl FakePipelineFactory {
    fn spawn_count(&self) -> usize {
        self.spawns.lock().unwrap().len()
    }

    fn take_writer(&self, index: usize) -> DuplexStream {
        self.spawns.lock().unwrap()[index]
            .writer
            .take()
            .expect("writer already taken")
    }

    fn offset(&self, index: usize) -> f64 {
        self.spawns.lock().unwrap()[index].offset_secs
    }
}

#[async_trait]
impl PipelineFactory for FakePipelineFactory {
    async fn spawn(
        &self,
        _stream_address: &str,
        offset_secs: f64,
        generation: u64,
        _events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<ActivePipeline, Error> {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let (kill_tx, _kill_rx) = oneshot::channel();
        self.spawns.lock().unwrap().push(SpawnRecord {
            offset_secs,
            writer: Some(writer),
        });
        Ok(ActivePipeline {
            generation,
            audio: Box::new(reader),
            control: PipelineControl::new(kill_tx),
        })
    }
}

#[derive(Clone, Default)]
struct FakeConnector {
    fail_join: bool,
    last_sink: Arc<StdMutex<Option<Arc<PcmWriterSink<tokio::io::Sink>>>>>,
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    async fn join(
        &self,
        _guild_id: Id<GuildMarker>,
        _channel_id: Id<ChannelMarker>,
    ) -> Result<Arc<dyn VoiceSink>, Error> {
        if self.fail_join {
            return Err(Error::ConnectionFailed("gateway unreachable".into()));
        }
        let sink = Arc::new(PcmWriterSink::new(tokio::io::sink()));
        *self.last_sink.lock().unwrap() = Some(sink.clone());
        Ok(sink)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    registry: Arc<SessionRegistry>,
    resolver: Arc<FakeResolver>,
    factory: FakePipelineFactory,
    connector: FakeConnector,
    bus: Arc<EventBus>,
}

fn harness_with(resolver: FakeResolver, connector: FakeConnector) -> Harness {
    let resolver = Arc::new(resolver);
    let factory = FakePipelineFactory::default();
    let bus = Arc::new(EventBus::new());
    let registry = SessionRegistry::new(
        resolver.clone(),
        Arc::new(factory.clone()),
        Arc::new(connector.clone()),
        bus.clone(),
        SessionConfig {
            start_timeout: Duration::from_millis(200),
            advance_delay: Duration::from_millis(20),
        },
    );
    Harness {
        registry,
        resolver,
        factory,
        connector,
        bus,
    }
}

fn harness() -> Harness {
    harness_with(FakeResolver::default(), FakeConnector::default())
}

fn guild(n: u64) -> Id<GuildMarker> {
    Id::new(n)
}

fn channel(n: u64) -> Id<ChannelMarker> {
    Id::new(n)
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Wait for the Nth pipeline spawn, then feed it one PCM chunk so the sink
/// reports Started. Returns the writer; dropping it ends the "track".
async fn feed_pipeline(factory: &FakePipelineFactory, index: usize) -> DuplexStream {
    let factory_for_wait = factory.clone();
    wait_for("pipeline spawn", move || {
        factory_for_wait.spawn_count() > index
    })
    .await;
    let mut writer = factory.take_writer(index);
    writer.write_all(&[0u8; 3840]).await.unwrap();
    writer
}

async fn next_event_matching(
    rx: &mut mpsc::Receiver<BotEvent>,
    pred: impl Fn(&BotEvent) -> bool,
) -> BotEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for bus event")
            .expect("event bus closed");
        if pred(&event) {
            return event;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_enqueue_preserves_order() {
    let h = harness();
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    let a = session.enqueue("a", "a", "alice").await.unwrap();
    assert!(a.started);
    assert_eq!(a.position, 0);
    assert_eq!(a.track.title, "Title of a");
    let _writer = feed_pipeline(&h.factory, 0).await;

    let b = session.enqueue("b", "b", "bob").await.unwrap();
    assert!(!b.started);
    assert_eq!(b.position, 1);
    let c = session.enqueue("c", "c", "carol").await.unwrap();
    assert_eq!(c.position, 2);

    let snapshot = session.list_queue().await.unwrap();
    let titles: Vec<&str> = snapshot.tracks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Title of a", "Title of b", "Title of c"]);
}

#[tokio::test]
async fn test_duplicate_enqueue_rejected_without_mutation() {
    let h = harness();
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    let _writer = feed_pipeline(&h.factory, 0).await;

    let err = session.enqueue("a", "a", "bob").await.unwrap_err();
    assert!(matches!(err, Error::DuplicateTrack(title) if title == "Title of a"));

    let snapshot = session.list_queue().await.unwrap();
    assert_eq!(snapshot.tracks.len(), 1);
}

#[tokio::test]
async fn test_concurrent_enqueue_rejected_while_resolving() {
    let h = harness_with(
        FakeResolver {
            metadata_delay: Some(Duration::from_millis(150)),
            ..Default::default()
        },
        FakeConnector::default(),
    );
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.enqueue("a", "a", "alice").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = session.enqueue("b", "b", "bob").await.unwrap_err();
    assert!(matches!(err, Error::Busy));

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_join_failure_tears_down_session() {
    let h = harness_with(
        FakeResolver::default(),
        FakeConnector {
            fail_join: true,
            ..Default::default()
        },
    );
    let mut events = h.bus.subscribe(None).await;
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    // The enqueue itself is accepted; the join failure happens afterwards.
    session.enqueue("a", "a", "alice").await.unwrap();

    let ended = next_event_matching(&mut events, |e| {
        matches!(e, BotEvent::SessionEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        BotEvent::SessionEnded {
            reason: SessionEndReason::ConnectionFailed,
            ..
        }
    ));
    let registry = h.registry.clone();
    wait_for("registry cleanup", move || registry.get(guild(1)).is_none()).await;
}

#[tokio::test]
async fn test_failed_resolution_skips_to_next_track() {
    let h = harness();
    h.resolver.fail_stream("a");
    let mut events = h.bus.subscribe(None).await;
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    session.enqueue("b", "b", "bob").await.unwrap();

    let failed = next_event_matching(&mut events, |e| {
        matches!(e, BotEvent::TrackFailed { .. })
    })
    .await;
    if let BotEvent::TrackFailed { title, .. } = failed {
        assert_eq!(title, "Title of a");
    }

    // "a" never reaches the pipeline stage, so spawn 0 belongs to "b".
    let _writer = feed_pipeline(&h.factory, 0).await;
    let np = session.now_playing().await.unwrap();
    assert_eq!(np.track.title, "Title of b");
}

#[tokio::test]
async fn test_watchdog_skips_track_that_never_starts() {
    let h = harness();
    let mut events = h.bus.subscribe(None).await;
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    session.enqueue("b", "b", "bob").await.unwrap();

    // Never feed spawn 0; the watchdog should give up on it.
    let failed = next_event_matching(&mut events, |e| {
        matches!(e, BotEvent::TrackFailed { .. })
    })
    .await;
    if let BotEvent::TrackFailed { title, reason, .. } = failed {
        assert_eq!(title, "Title of a");
        assert!(reason.contains("no audio"), "unexpected reason: {reason}");
    }

    let _writer = feed_pipeline(&h.factory, 1).await;
    let np = session.now_playing().await.unwrap();
    assert_eq!(np.track.title, "Title of b");
}

#[tokio::test]
async fn test_track_end_advances_to_next() {
    let h = harness();
    let mut events = h.bus.subscribe(None).await;
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    session.enqueue("b", "b", "bob").await.unwrap();

    let writer = feed_pipeline(&h.factory, 0).await;
    next_event_matching(&mut events, |e| {
        matches!(e, BotEvent::TrackStarted { track, .. } if track.title == "Title of a")
    })
    .await;

    drop(writer); // EOF ends the track
    let _writer_b = feed_pipeline(&h.factory, 1).await;
    next_event_matching(&mut events, |e| {
        matches!(e, BotEvent::TrackStarted { track, .. } if track.title == "Title of b")
    })
    .await;

    let snapshot = session.list_queue().await.unwrap();
    assert_eq!(snapshot.tracks.len(), 1);
    assert_eq!(snapshot.tracks[0].title, "Title of b");
}

#[tokio::test]
async fn test_queue_exhaustion_removes_session() {
    let h = harness();
    let mut events = h.bus.subscribe(None).await;
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    let writer = feed_pipeline(&h.factory, 0).await;
    drop(writer);

    let ended = next_event_matching(&mut events, |e| {
        matches!(e, BotEvent::SessionEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        BotEvent::SessionEnded {
            reason: SessionEndReason::QueueExhausted,
            ..
        }
    ));
    let registry = h.registry.clone();
    wait_for("registry cleanup", move || registry.get(guild(1)).is_none()).await;
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_stop_clears_queue_and_removes_session() {
    let h = harness();
    let mut events = h.bus.subscribe(None).await;
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    let _writer = feed_pipeline(&h.factory, 0).await;
    session.enqueue("b", "b", "bob").await.unwrap();

    session.stop().await.unwrap();

    let ended = next_event_matching(&mut events, |e| {
        matches!(e, BotEvent::SessionEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        BotEvent::SessionEnded {
            reason: SessionEndReason::Stopped,
            ..
        }
    ));
    let registry = h.registry.clone();
    wait_for("registry cleanup", move || registry.get(guild(1)).is_none()).await;
}

#[tokio::test]
async fn test_volume_change_applies_to_live_sink() {
    let h = harness();
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    let _writer = feed_pipeline(&h.factory, 0).await;

    let applied = session.set_volume(7).await.unwrap();
    assert_eq!(applied, 7);
    let sink = h.connector.last_sink.lock().unwrap().clone().unwrap();
    assert!((sink.gain() - 0.7).abs() < 1e-6);

    let err = session.set_volume(11).await.unwrap_err();
    assert!(matches!(err, Error::InvalidVolume(11)));
}

#[tokio::test]
async fn test_seek_respawns_pipeline_and_clamps_rewind() {
    let h = harness();
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    let _writer = feed_pipeline(&h.factory, 0).await;
    let np = session.now_playing().await.unwrap();
    assert!(np.elapsed_secs <= 1);

    let offset = session.seek_forward(30).await.unwrap();
    assert!((30..=31).contains(&offset), "offset was {offset}");
    let factory = h.factory.clone();
    wait_for("seek respawn", move || factory.spawn_count() == 2).await;
    assert!((h.factory.offset(1) - 30.0).abs() < 1.5);

    // Rewinding past the start clamps to zero.
    let offset = session.seek_backward(9999).await.unwrap();
    assert_eq!(offset, 0);
    let factory = h.factory.clone();
    wait_for("rewind respawn", move || factory.spawn_count() == 3).await;
    assert_eq!(h.factory.offset(2), 0.0);

    let err = session.seek_forward(0).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSeekAmount));
}

#[tokio::test]
async fn test_sessions_are_isolated_per_guild() {
    let h = harness();
    let s1 = h.registry.get_or_create(guild(1), channel(10), channel(11));
    let s2 = h.registry.get_or_create(guild(2), channel(20), channel(21));

    s1.enqueue("a", "a", "alice").await.unwrap();
    let _w1 = feed_pipeline(&h.factory, 0).await;
    s2.enqueue("b", "b", "bob").await.unwrap();
    let _w2 = feed_pipeline(&h.factory, 1).await;
    assert_eq!(h.registry.len(), 2);

    s1.stop().await.unwrap();
    let registry = h.registry.clone();
    wait_for("guild 1 cleanup", move || registry.get(guild(1)).is_none()).await;

    let np = s2.now_playing().await.unwrap();
    assert_eq!(np.track.title, "Title of b");
}

#[tokio::test]
async fn test_pause_resume_roundtrip() {
    let h = harness();
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    let _writer = feed_pipeline(&h.factory, 0).await;

    assert!(session.pause().await.unwrap());
    assert!(!session.pause().await.unwrap()); // already paused
    let np = session.now_playing().await.unwrap();
    assert!(np.paused);

    assert!(session.resume().await.unwrap());
    assert!(!session.resume().await.unwrap());
}

#[tokio::test]
async fn test_commands_after_teardown_report_no_session() {
    let h = harness();
    let session = h.registry.get_or_create(guild(1), channel(10), channel(11));

    session.enqueue("a", "a", "alice").await.unwrap();
    let _writer = feed_pipeline(&h.factory, 0).await;
    session.stop().await.unwrap();

    let handle = session.clone();
    wait_for("session closed", move || handle.is_closed()).await;
    let err = session.skip().await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));
}
