// File: src/platforms/discord/voice.rs
//
// Voice channel membership via the gateway (`UpdateVoiceState` on the shard
// that owns the guild) plus a `PcmWriterSink` over an injected audio output.
// The output endpoint is a factory so the transport (UDP socket, pipe, test
// buffer) is decided by whoever wires the bot together.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, info};
use twilight_gateway::MessageSender;
use twilight_model::gateway::payload::outgoing::UpdateVoiceState;
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use crate::Error;
use crate::pipeline::{AudioStream, PlaybackEvent};
use crate::voice::{PcmWriterSink, VoiceConnector, VoiceSink};

pub type AudioOutput = Box<dyn AsyncWrite + Send + Unpin>;
pub type AudioOutputFactory = Arc<dyn Fn() -> AudioOutput + Send + Sync>;

pub struct DiscordVoiceConnector {
    senders: Vec<MessageSender>,
    output_factory: AudioOutputFactory,
}

impl DiscordVoiceConnector {
    pub fn new(senders: Vec<MessageSender>, output_factory: AudioOutputFactory) -> Self {
        Self {
            senders,
            output_factory,
        }
    }

    /// Discord routes a guild to shard `(guild_id >> 22) % shard_count`.
    fn sender_for(&self, guild_id: Id<GuildMarker>) -> Result<&MessageSender, Error> {
        if self.senders.is_empty() {
            return Err(Error::ConnectionFailed("no gateway shards running".into()));
        }
        let index = (guild_id.get() >> 22) as usize % self.senders.len();
        Ok(&self.senders[index])
    }
}

#[async_trait]
impl VoiceConnector for DiscordVoiceConnector {
    async fn join(
        &self,
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
    ) -> Result<Arc<dyn VoiceSink>, Error> {
        let sender = self.sender_for(guild_id)?;
        sender
            .command(&UpdateVoiceState::new(guild_id, Some(channel_id), true, false))
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        info!("joined voice channel {channel_id} in guild {guild_id}");

        let sink = DiscordVoiceSink {
            inner: PcmWriterSink::new((self.output_factory)()),
            sender: sender.clone(),
            guild_id,
        };
        Ok(Arc::new(sink))
    }
}

/// A `PcmWriterSink` that also leaves the voice channel on disconnect.
struct DiscordVoiceSink {
    inner: PcmWriterSink<AudioOutput>,
    sender: MessageSender,
    guild_id: Id<GuildMarker>,
}

#[async_trait]
impl VoiceSink for DiscordVoiceSink {
    async fn play(
        &self,
        audio: AudioStream,
        generation: u64,
        gain: f32,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<(), Error> {
        self.inner.play(audio, generation, gain, events).await
    }

    async fn set_gain(&self, gain: f32) {
        self.inner.set_gain(gain).await;
    }

    async fn pause(&self) {
        self.inner.pause().await;
    }

    async fn resume(&self) {
        self.inner.resume().await;
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.inner.disconnect().await?;
        self.sender
            .command(&UpdateVoiceState::new(self.guild_id, None, false, false))
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        debug!("left voice channel in guild {}", self.guild_id);
        Ok(())
    }
}
