//! src/eventbus/mod.rs
//!
//! Provides an in-process event bus that supports guaranteed delivery
//! to multiple subscribers via bounded MPSC queues. Playback sessions
//! publish their notifications here; the server renders them back into
//! the originating text channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use tunebot_common::models::Track;

/// Why a playback session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The last track finished (or was removed) and nothing was left to play.
    QueueExhausted,
    /// An explicit stop command.
    Stopped,
    /// The voice channel join failed, so nothing could ever play.
    ConnectionFailed,
}

/// Global event type that various parts of the bot can publish or subscribe to.
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// An inbound chat line, already stripped down to what the bot cares about.
    ChatMessage {
        channel_id: Id<ChannelMarker>,
        user: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// A track started streaming for a guild. `channel_id` is the text channel
    /// the session announces into.
    TrackStarted {
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
        track: Track,
    },

    /// A track could not be resolved or died mid-stream and was skipped.
    TrackFailed {
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
        title: String,
        reason: String,
    },

    /// A session was torn down and removed from the registry.
    SessionEnded {
        guild_id: Id<GuildMarker>,
        reason: SessionEndReason,
    },

    /// System-wide event for debugging or administration.
    SystemMessage(String),
}

impl BotEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            BotEvent::ChatMessage { .. } => "chat_message",
            BotEvent::TrackStarted { .. } => "track_started",
            BotEvent::TrackFailed { .. } => "track_failed",
            BotEvent::SessionEnded { .. } => "session_ended",
            BotEvent::SystemMessage(_) => "system_message",
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<BotEvent>` for guaranteed delivery.
///
/// - If the subscriber's channel buffer fills, `publish` will await
///   until there's space (backpressure).
/// - If the subscriber has dropped the `Receiver`, the channel is closed
///   and sending returns an error.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<BotEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Default size for each subscriber's buffer.
const DEFAULT_BUFFER_SIZE: usize = 10000;

impl EventBus {
    /// Create a new, empty event bus.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<BotEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    /// Publish an event to all subscribers.
    pub async fn publish(&self, event: BotEvent) {
        let senders = {
            let subs = self.subscribers.lock().await;
            subs.clone()
        };
        for s in senders {
            let _ = s.send(event.clone()).await;
        }
    }

    /// Convenience method: publish a `ChatMessage` event.
    pub async fn publish_chat(&self, channel_id: Id<ChannelMarker>, user: &str, text: &str) {
        let event = BotEvent::ChatMessage {
            channel_id,
            user: user.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.publish(event).await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
