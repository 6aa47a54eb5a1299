// File: src/session/mod.rs
//
// Per-guild playback sessions. Each session is a tokio task with an mpsc
// mailbox; every command for a session goes through that one mailbox, so all
// queue mutations serialize. Only the enqueue metadata fetch runs off the
// mailbox, guarded by the queue's `processing` flag.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use crate::Error;
use crate::pipeline::PlaybackEvent;
use tunebot_common::models::{NowPlaying, QueueSnapshot, Track, TrackMetadata};

pub mod registry;
pub mod state;
mod task;

pub use registry::SessionRegistry;

/// Timing knobs for the session state machine. Tests shrink these.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a freshly spawned pipeline gets to produce its first audio
    /// before the track is treated as broken and skipped.
    pub start_timeout: Duration,
    /// Delay before re-triggering resolution after a track ends or fails,
    /// damping rapid failure loops.
    pub advance_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            advance_delay: Duration::from_millis(500),
        }
    }
}

/// What an accepted enqueue ended up doing.
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub track: Track,
    /// 0-based position in the queue; 0 means it is now the head.
    pub position: usize,
    /// True when the queue was empty and playback was kicked off.
    pub started: bool,
    /// Set when metadata resolution failed and the caller-supplied title
    /// stood in for the real one.
    pub metadata_error: Option<String>,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// Mailbox messages. The public half maps 1:1 onto `SessionHandle` methods;
/// the private half carries resolution results, playback signals and timers
/// back into the state machine.
pub(crate) enum SessionMsg {
    Enqueue {
        locator: String,
        fallback_title: String,
        requested_by: String,
        reply: Reply<EnqueueOutcome>,
    },
    Skip {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<bool>,
    },
    Resume {
        reply: Reply<bool>,
    },
    SetVolume {
        volume: i64,
        reply: Reply<u8>,
    },
    ToggleLoop {
        reply: Reply<bool>,
    },
    ToggleRepeat {
        reply: Reply<bool>,
    },
    RemoveAt {
        index: i64,
        reply: Reply<Track>,
    },
    Clear {
        reply: Reply<usize>,
    },
    Shuffle {
        reply: Reply<()>,
    },
    Seek {
        delta_secs: i64,
        reply: Reply<u64>,
    },
    NowPlaying {
        reply: Reply<NowPlaying>,
    },
    ListQueue {
        reply: Reply<QueueSnapshot>,
    },

    // Internal:
    MetadataResolved {
        locator: String,
        fallback_title: String,
        requested_by: String,
        result: Result<TrackMetadata, Error>,
        reply: Reply<EnqueueOutcome>,
    },
    StreamResolved {
        generation: u64,
        result: Result<String, Error>,
    },
    Playback(PlaybackEvent),
    Watchdog {
        generation: u64,
    },
    AdvanceTick {
        generation: u64,
    },
}

/// Cheap, cloneable handle to one guild's session task.
#[derive(Clone)]
pub struct SessionHandle {
    pub guild_id: Id<GuildMarker>,
    pub voice_channel_id: Id<ChannelMarker>,
    pub text_channel_id: Id<ChannelMarker>,
    tx: mpsc::UnboundedSender<SessionMsg>,
}

impl SessionHandle {
    /// True once the session task has torn itself down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        msg: SessionMsg,
        rx: oneshot::Receiver<Result<T, Error>>,
    ) -> Result<T, Error> {
        self.tx.send(msg).map_err(|_| Error::NoActiveSession)?;
        rx.await.map_err(|_| Error::NoActiveSession)?
    }

    pub async fn enqueue(
        &self,
        locator: &str,
        fallback_title: &str,
        requested_by: &str,
    ) -> Result<EnqueueOutcome, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionMsg::Enqueue {
                locator: locator.to_string(),
                fallback_title: fallback_title.to_string(),
                requested_by: requested_by.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn skip(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::Skip { reply }, rx).await
    }

    pub async fn stop(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::Stop { reply }, rx).await
    }

    /// Returns false when playback was already paused.
    pub async fn pause(&self) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::Pause { reply }, rx).await
    }

    /// Returns false when playback was not paused.
    pub async fn resume(&self) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::Resume { reply }, rx).await
    }

    pub async fn set_volume(&self, volume: i64) -> Result<u8, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::SetVolume { volume, reply }, rx).await
    }

    /// Returns the new flag value.
    pub async fn toggle_loop(&self) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::ToggleLoop { reply }, rx).await
    }

    /// Returns the new flag value.
    pub async fn toggle_repeat(&self) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::ToggleRepeat { reply }, rx).await
    }

    /// 1-based index into the queue excluding the current track.
    pub async fn remove_at(&self, index: i64) -> Result<Track, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::RemoveAt { index, reply }, rx).await
    }

    /// Returns the number of upcoming tracks dropped.
    pub async fn clear(&self) -> Result<usize, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::Clear { reply }, rx).await
    }

    pub async fn shuffle(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::Shuffle { reply }, rx).await
    }

    /// Returns the new playback offset in seconds.
    pub async fn seek_forward(&self, secs: u64) -> Result<u64, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionMsg::Seek {
                delta_secs: secs as i64,
                reply,
            },
            rx,
        )
        .await
    }

    /// Returns the new playback offset in seconds, clamped at 0.
    pub async fn seek_backward(&self, secs: u64) -> Result<u64, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionMsg::Seek {
                delta_secs: -(secs as i64),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn now_playing(&self) -> Result<NowPlaying, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::NowPlaying { reply }, rx).await
    }

    pub async fn list_queue(&self) -> Result<QueueSnapshot, Error> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionMsg::ListQueue { reply }, rx).await
    }
}
