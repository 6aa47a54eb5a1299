// File: src/session/task.rs
//
// The session state machine. Runs as one tokio task per guild, consuming its
// mailbox until the queue empties, the session is stopped, or the voice join
// fails, then tears itself down and removes itself from the registry.
//
// Every timer, stream resolution and playback signal is tagged with the
// generation current when it was scheduled; anything carrying a stale
// generation is discarded, which is how superseded pipelines (skip, seek,
// stop-then-restart) are prevented from corrupting the state machine.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use crate::Error;
use crate::eventbus::{BotEvent, EventBus, SessionEndReason};
use crate::pipeline::{
    ActivePipeline, PipelineControl, PipelineFactory, PlaybackEvent, PlaybackEventKind,
};
use crate::resolver::TrackResolver;
use crate::voice::{VoiceConnector, VoiceSink};
use tunebot_common::models::{NowPlaying, QueueSnapshot, Track};

use super::registry::SessionRegistry;
use super::state::{Advance, QueueState};
use super::{EnqueueOutcome, SessionConfig, SessionHandle, SessionMsg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Between tracks (advance damping) or before the first enqueue lands.
    Idle,
    /// Waiting for the head track's stream address.
    Resolving,
    /// Pipeline spawned, no audio heard yet; the watchdog is armed.
    Starting,
    /// Audio is flowing.
    Playing,
}

/// Whether the mailbox loop keeps running after a message.
enum Flow {
    Continue,
    Stop(SessionEndReason),
}

pub(super) fn spawn(
    registry: Arc<SessionRegistry>,
    guild_id: Id<GuildMarker>,
    voice_channel_id: Id<ChannelMarker>,
    text_channel_id: Id<ChannelMarker>,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();

    // Pipeline monitors and the voice sink report on a separate channel;
    // forward those signals into the mailbox so they serialize with commands.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<PlaybackEvent>();
    let bridge_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if bridge_tx.send(SessionMsg::Playback(event)).is_err() {
                break;
            }
        }
    });

    let task = SessionTask {
        guild_id,
        voice_channel_id,
        text_channel_id,
        resolver: registry.resolver.clone(),
        pipelines: registry.pipelines.clone(),
        voice: registry.voice.clone(),
        event_bus: registry.event_bus.clone(),
        config: registry.config.clone(),
        registry,
        self_tx: tx.clone(),
        events_tx,
        queue: QueueState::new(),
        phase: Phase::Idle,
        paused: false,
        announced: false,
        generation: 0,
        sink: None,
        pipeline: None,
        stream_address: None,
        base_offset: 0.0,
        playback_started: None,
    };
    tokio::spawn(task.run(rx));

    SessionHandle {
        guild_id,
        voice_channel_id,
        text_channel_id,
        tx,
    }
}

struct SessionTask {
    guild_id: Id<GuildMarker>,
    voice_channel_id: Id<ChannelMarker>,
    text_channel_id: Id<ChannelMarker>,
    resolver: Arc<dyn TrackResolver>,
    pipelines: Arc<dyn PipelineFactory>,
    voice: Arc<dyn VoiceConnector>,
    event_bus: Arc<EventBus>,
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    self_tx: mpsc::UnboundedSender<SessionMsg>,
    events_tx: mpsc::UnboundedSender<PlaybackEvent>,

    queue: QueueState,
    phase: Phase,
    paused: bool,
    /// Set once the head track's start has been announced; seek restarts the
    /// pipeline without re-announcing.
    announced: bool,
    generation: u64,
    sink: Option<Arc<dyn VoiceSink>>,
    pipeline: Option<PipelineControl>,
    stream_address: Option<String>,
    /// Seconds into the track where the current pipeline began decoding.
    base_offset: f64,
    playback_started: Option<Instant>,
}

impl SessionTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMsg>) {
        info!("session started for guild {}", self.guild_id);
        while let Some(msg) = rx.recv().await {
            match self.handle(msg).await {
                Flow::Continue => {}
                Flow::Stop(reason) => {
                    self.teardown(reason).await;
                    break;
                }
            }
        }
        debug!("session task for guild {} exited", self.guild_id);
    }

    async fn handle(&mut self, msg: SessionMsg) -> Flow {
        match msg {
            SessionMsg::Enqueue {
                locator,
                fallback_title,
                requested_by,
                reply,
            } => {
                if let Err(e) = self.queue.check_enqueue(&locator) {
                    let _ = reply.send(Err(e));
                    return Flow::Continue;
                }
                self.queue.processing = true;
                let resolver = self.resolver.clone();
                let self_tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let result = resolver.resolve_metadata(&locator).await;
                    let _ = self_tx.send(SessionMsg::MetadataResolved {
                        locator,
                        fallback_title,
                        requested_by,
                        result,
                        reply,
                    });
                });
                Flow::Continue
            }

            SessionMsg::MetadataResolved {
                locator,
                fallback_title,
                requested_by,
                result,
                reply,
            } => {
                self.queue.processing = false;
                let (track, metadata_error) = match result {
                    Ok(meta) => (
                        Track {
                            title: meta.title,
                            locator: meta.canonical_locator,
                            duration_secs: meta.duration_secs,
                            thumbnail: meta.thumbnail,
                            requested_by,
                            stream_address: None,
                        },
                        None,
                    ),
                    Err(e) => {
                        warn!(
                            "metadata resolution failed for {locator} in guild {}: {e}",
                            self.guild_id
                        );
                        (
                            Track {
                                title: fallback_title,
                                locator,
                                duration_secs: None,
                                thumbnail: None,
                                requested_by,
                                stream_address: None,
                            },
                            Some(e.to_string()),
                        )
                    }
                };
                // The canonical locator can differ from the one admitted
                // before resolution, so re-check for duplicates.
                if let Some(existing) = self.queue.find_by_locator(&track.locator) {
                    let _ = reply.send(Err(Error::DuplicateTrack(existing.title.clone())));
                    return Flow::Continue;
                }
                let started = self.queue.push(track.clone());
                let position = self.queue.len() - 1;
                let _ = reply.send(Ok(EnqueueOutcome {
                    track,
                    position,
                    started,
                    metadata_error,
                }));
                if started {
                    self.start_playback().await
                } else {
                    Flow::Continue
                }
            }

            SessionMsg::Skip { reply } => {
                let _ = reply.send(Ok(()));
                // A skip is the current track ending early; repeat/loop
                // policy applies exactly as on a natural completion.
                self.complete_current().await
            }

            SessionMsg::Stop { reply } => {
                self.queue.clear_all();
                let _ = reply.send(Ok(()));
                Flow::Stop(SessionEndReason::Stopped)
            }

            SessionMsg::Pause { reply } => {
                let result = match &self.sink {
                    Some(sink) if !self.paused => {
                        sink.pause().await;
                        self.paused = true;
                        Ok(true)
                    }
                    Some(_) => Ok(false),
                    None => Err(Error::NoActiveSession),
                };
                let _ = reply.send(result);
                Flow::Continue
            }

            SessionMsg::Resume { reply } => {
                let result = match &self.sink {
                    Some(sink) if self.paused => {
                        sink.resume().await;
                        self.paused = false;
                        Ok(true)
                    }
                    Some(_) => Ok(false),
                    None => Err(Error::NoActiveSession),
                };
                let _ = reply.send(result);
                Flow::Continue
            }

            SessionMsg::SetVolume { volume, reply } => {
                let result = self.queue.set_volume(volume);
                if result.is_ok() {
                    if let Some(sink) = &self.sink {
                        sink.set_gain(self.queue.gain()).await;
                    }
                }
                let _ = reply.send(result);
                Flow::Continue
            }

            SessionMsg::ToggleLoop { reply } => {
                self.queue.loop_queue = !self.queue.loop_queue;
                let _ = reply.send(Ok(self.queue.loop_queue));
                Flow::Continue
            }

            SessionMsg::ToggleRepeat { reply } => {
                self.queue.repeat_current = !self.queue.repeat_current;
                let _ = reply.send(Ok(self.queue.repeat_current));
                Flow::Continue
            }

            SessionMsg::RemoveAt { index, reply } => {
                let _ = reply.send(self.queue.remove_at(index));
                Flow::Continue
            }

            SessionMsg::Clear { reply } => {
                let _ = reply.send(Ok(self.queue.clear_upcoming()));
                Flow::Continue
            }

            SessionMsg::Shuffle { reply } => {
                let _ = reply.send(self.queue.shuffle_upcoming(&mut rand::rng()));
                Flow::Continue
            }

            SessionMsg::Seek { delta_secs, reply } => {
                if delta_secs == 0 {
                    let _ = reply.send(Err(Error::InvalidSeekAmount));
                    return Flow::Continue;
                }
                if self.stream_address.is_none()
                    || !matches!(self.phase, Phase::Starting | Phase::Playing)
                {
                    let _ = reply.send(Err(Error::SeekUnavailable));
                    return Flow::Continue;
                }
                let new_offset = (self.elapsed_secs() + delta_secs as f64).max(0.0);
                self.paused = false;
                let _ = reply.send(Ok(new_offset.round() as u64));
                self.spawn_pipeline(new_offset).await
            }

            SessionMsg::NowPlaying { reply } => {
                let result = match self.queue.head() {
                    Some(track) => {
                        let mut elapsed = self.elapsed_secs() as u64;
                        if let Some(duration) = track.duration_secs {
                            elapsed = elapsed.min(duration);
                        }
                        Ok(NowPlaying {
                            track: track.clone(),
                            elapsed_secs: elapsed,
                            paused: self.paused,
                        })
                    }
                    None => Err(Error::NoActiveSession),
                };
                let _ = reply.send(result);
                Flow::Continue
            }

            SessionMsg::ListQueue { reply } => {
                let _ = reply.send(Ok(QueueSnapshot {
                    tracks: self.queue.tracks().to_vec(),
                    volume: self.queue.volume,
                    loop_queue: self.queue.loop_queue,
                    repeat_current: self.queue.repeat_current,
                    paused: self.paused,
                }));
                Flow::Continue
            }

            SessionMsg::StreamResolved { generation, result } => {
                if generation != self.generation || self.phase != Phase::Resolving {
                    debug!("discarding stale stream resolution (generation {generation})");
                    return Flow::Continue;
                }
                match result {
                    Ok(address) => {
                        self.stream_address = Some(address);
                        self.spawn_pipeline(0.0).await
                    }
                    Err(e) => self.fail_current(e.to_string()).await,
                }
            }

            SessionMsg::Playback(event) => {
                if event.generation != self.generation {
                    debug!("discarding stale playback event (generation {})", event.generation);
                    return Flow::Continue;
                }
                match event.kind {
                    PlaybackEventKind::Started => {
                        if self.phase == Phase::Starting {
                            self.phase = Phase::Playing;
                            self.playback_started = Some(Instant::now());
                            if !self.announced {
                                self.announced = true;
                                if let Some(track) = self.queue.head() {
                                    self.event_bus
                                        .publish(BotEvent::TrackStarted {
                                            guild_id: self.guild_id,
                                            channel_id: self.text_channel_id,
                                            track: track.clone(),
                                        })
                                        .await;
                                }
                            }
                        }
                        Flow::Continue
                    }
                    PlaybackEventKind::Finished => self.complete_current().await,
                    PlaybackEventKind::Failed(reason) => {
                        if matches!(self.phase, Phase::Starting | Phase::Playing) {
                            self.fail_current(reason).await
                        } else {
                            Flow::Continue
                        }
                    }
                }
            }

            SessionMsg::Watchdog { generation } => {
                if generation != self.generation || self.phase != Phase::Starting {
                    return Flow::Continue;
                }
                let timeout = self.config.start_timeout.as_secs();
                self.fail_current(Error::PipelineStartTimeout(timeout).to_string())
                    .await
            }

            SessionMsg::AdvanceTick { generation } => {
                if generation != self.generation || self.phase != Phase::Idle {
                    return Flow::Continue;
                }
                if self.queue.is_empty() {
                    Flow::Stop(SessionEndReason::QueueExhausted)
                } else {
                    self.start_playback().await
                }
            }
        }
    }

    /// Begin playing the head track: join voice if needed, then resolve its
    /// stream address off-mailbox.
    async fn start_playback(&mut self) -> Flow {
        let (locator, title) = match self.queue.head() {
            Some(track) => (track.locator.clone(), track.title.clone()),
            None => return Flow::Stop(SessionEndReason::QueueExhausted),
        };

        if self.sink.is_none() {
            match self.voice.join(self.guild_id, self.voice_channel_id).await {
                Ok(sink) => {
                    sink.set_gain(self.queue.gain()).await;
                    self.sink = Some(sink);
                }
                Err(e) => {
                    error!(
                        "voice join failed for guild {} channel {}: {e}",
                        self.guild_id, self.voice_channel_id
                    );
                    self.event_bus
                        .publish(BotEvent::TrackFailed {
                            guild_id: self.guild_id,
                            channel_id: self.text_channel_id,
                            title,
                            reason: e.to_string(),
                        })
                        .await;
                    return Flow::Stop(SessionEndReason::ConnectionFailed);
                }
            }
        }

        self.phase = Phase::Resolving;
        self.paused = false;
        self.announced = false;
        self.stream_address = None;
        self.playback_started = None;
        let generation = self.bump_generation();
        let resolver = self.resolver.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = resolver.resolve_stream_address(&locator).await;
            let _ = self_tx.send(SessionMsg::StreamResolved { generation, result });
        });
        Flow::Continue
    }

    /// Spawn (or respawn, for seek) the transcode pipeline at `offset` and
    /// hand its audio to the voice sink. Arms the start watchdog.
    async fn spawn_pipeline(&mut self, offset: f64) -> Flow {
        let Some(address) = self.stream_address.clone() else {
            return self
                .fail_current("stream address missing at pipeline spawn".to_string())
                .await;
        };
        let Some(sink) = self.sink.clone() else {
            return self
                .fail_current("voice sink missing at pipeline spawn".to_string())
                .await;
        };

        // Supersede whatever was running before the new pipeline exists, so
        // its death rattle carries a stale generation.
        let generation = self.bump_generation();
        if let Some(old) = self.pipeline.take() {
            old.kill();
        }
        sink.stop().await;

        let spawned = self
            .pipelines
            .spawn(&address, offset, generation, self.events_tx.clone())
            .await;
        match spawned {
            Ok(ActivePipeline { audio, control, .. }) => {
                self.pipeline = Some(control);
                self.base_offset = offset;
                self.playback_started = Some(Instant::now());
                self.phase = Phase::Starting;
                if let Err(e) = sink
                    .play(audio, generation, self.queue.gain(), self.events_tx.clone())
                    .await
                {
                    return self.fail_current(e.to_string()).await;
                }
                let watchdog_tx = self.self_tx.clone();
                let timeout = self.config.start_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = watchdog_tx.send(SessionMsg::Watchdog { generation });
                });
                Flow::Continue
            }
            Err(e) => self.fail_current(e.to_string()).await,
        }
    }

    /// The head track is unplayable: report it, drop it (loop/repeat never
    /// resurrect a failed track) and move on after the damping delay.
    async fn fail_current(&mut self, reason: String) -> Flow {
        let title = self
            .queue
            .head()
            .map(|t| t.title.clone())
            .unwrap_or_default();
        warn!("track '{title}' failed in guild {}: {reason}", self.guild_id);
        self.event_bus
            .publish(BotEvent::TrackFailed {
                guild_id: self.guild_id,
                channel_id: self.text_channel_id,
                title,
                reason,
            })
            .await;
        self.stop_pipeline().await;
        self.queue.drop_head();
        if self.queue.is_empty() {
            return Flow::Stop(SessionEndReason::QueueExhausted);
        }
        self.schedule_advance();
        Flow::Continue
    }

    /// The head track finished (or was skipped): apply the completion policy
    /// and either move on or end the session.
    async fn complete_current(&mut self) -> Flow {
        self.stop_pipeline().await;
        match self.queue.advance() {
            Advance::Replay | Advance::Next => {
                self.schedule_advance();
                Flow::Continue
            }
            Advance::Emptied => Flow::Stop(SessionEndReason::QueueExhausted),
        }
    }

    async fn stop_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.kill();
        }
        if let Some(sink) = &self.sink {
            sink.stop().await;
        }
    }

    /// Go idle and arm the delayed advance timer. Anything that changes the
    /// generation in the meantime cancels the tick.
    fn schedule_advance(&mut self) {
        self.phase = Phase::Idle;
        self.paused = false;
        self.playback_started = None;
        let generation = self.bump_generation();
        let tx = self.self_tx.clone();
        let delay = self.config.advance_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionMsg::AdvanceTick { generation });
        });
    }

    async fn teardown(&mut self, reason: SessionEndReason) {
        info!("session for guild {} ending: {:?}", self.guild_id, reason);
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.kill();
        }
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.disconnect().await {
                warn!("voice disconnect failed for guild {}: {e}", self.guild_id);
            }
        }
        self.registry.remove(self.guild_id);
        self.event_bus
            .publish(BotEvent::SessionEnded {
                guild_id: self.guild_id,
                reason,
            })
            .await;
    }

    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn elapsed_secs(&self) -> f64 {
        match self.playback_started {
            Some(since) => self.base_offset + since.elapsed().as_secs_f64(),
            None => self.base_offset,
        }
    }
}
