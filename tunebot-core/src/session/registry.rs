// File: src/session/registry.rs
//
// One playback session per guild. The registry owns the shared collaborators
// (resolver, pipeline factory, voice connector, event bus) and hands each
// spawned session clones of them.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use crate::eventbus::EventBus;
use crate::pipeline::PipelineFactory;
use crate::resolver::TrackResolver;
use crate::voice::VoiceConnector;

use super::{SessionConfig, SessionHandle, task};

pub struct SessionRegistry {
    sessions: DashMap<Id<GuildMarker>, SessionHandle>,
    pub(crate) resolver: Arc<dyn TrackResolver>,
    pub(crate) pipelines: Arc<dyn PipelineFactory>,
    pub(crate) voice: Arc<dyn VoiceConnector>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        pipelines: Arc<dyn PipelineFactory>,
        voice: Arc<dyn VoiceConnector>,
        event_bus: Arc<EventBus>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            resolver,
            pipelines,
            voice,
            event_bus,
            config,
        })
    }

    /// The live session for a guild, if any.
    pub fn get(&self, guild_id: Id<GuildMarker>) -> Option<SessionHandle> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    /// The live session for a guild, or a freshly spawned one bound to the
    /// given voice and text channels. A handle whose task has already torn
    /// down is replaced, not returned.
    pub fn get_or_create(
        self: &Arc<Self>,
        guild_id: Id<GuildMarker>,
        voice_channel_id: Id<ChannelMarker>,
        text_channel_id: Id<ChannelMarker>,
    ) -> SessionHandle {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    let handle =
                        task::spawn(self.clone(), guild_id, voice_channel_id, text_channel_id);
                    occupied.insert(handle.clone());
                    handle
                } else {
                    occupied.get().clone()
                }
            }
            Entry::Vacant(vacant) => {
                let handle =
                    task::spawn(self.clone(), guild_id, voice_channel_id, text_channel_id);
                vacant.insert(handle.clone());
                handle
            }
        }
    }

    /// Sessions remove themselves here during teardown.
    pub(crate) fn remove(&self, guild_id: Id<GuildMarker>) {
        self.sessions.remove(&guild_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
