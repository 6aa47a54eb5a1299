// File: src/voice/mod.rs
//
// The voice output seam. A `VoiceConnector` joins a guild voice channel and
// hands back a `VoiceSink`; the sink consumes the pipeline's PCM stream,
// applies the session's gain, and reports generation-tagged playback signals
// back to the session.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use crate::Error;
use crate::pipeline::{AudioStream, PlaybackEvent};

pub mod writer;

pub use writer::PcmWriterSink;

#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn join(
        &self,
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
    ) -> Result<Arc<dyn VoiceSink>, Error>;
}

#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Start streaming `audio`, superseding any stream already playing on
    /// this sink. Signals are tagged with `generation`.
    async fn play(
        &self,
        audio: AudioStream,
        generation: u64,
        gain: f32,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<(), Error>;

    /// Multiplicative gain on the decoded samples, 0.0–1.0. Takes effect
    /// immediately, no restart.
    async fn set_gain(&self, gain: f32);

    async fn pause(&self);

    async fn resume(&self);

    /// Stop the current stream without leaving the channel.
    async fn stop(&self);

    /// Stop and release the voice connection.
    async fn disconnect(&self) -> Result<(), Error>;
}
