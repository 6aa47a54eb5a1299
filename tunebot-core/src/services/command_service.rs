// File: src/services/command_service.rs
//
// Chat command surface. Parses prefixed lines, routes them to the session
// registry and the playlist service, and renders plain-text replies. Core
// errors become user-facing `❌ …` lines here; nothing below this layer talks
// to chat directly.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker, UserMarker};

use crate::Error;
use crate::resolver::TrackResolver;
use crate::services::PlaylistService;
use crate::session::{SessionHandle, SessionRegistry};
use crate::utils::time::{format_time, progress_bar};
use tunebot_common::models::PlaylistEntry;

const SEARCH_LIMIT: usize = 3;
const QUEUE_PAGE: usize = 10;
const DEFAULT_SEEK_SECS: u64 = 10;

/// Everything the command surface needs to know about the inbound message.
#[derive(Debug, Clone)]
pub struct ChatCommandContext {
    pub guild_id: Id<GuildMarker>,
    pub channel_id: Id<ChannelMarker>,
    pub user_id: Id<UserMarker>,
    pub username: String,
    /// The invoker's current voice channel, from the gateway cache.
    pub voice_channel_id: Option<Id<ChannelMarker>>,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub texts: Vec<String>,
}

pub struct MusicCommandService {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn TrackResolver>,
    playlists: Arc<PlaylistService>,
    prefix: String,
    url_pattern: Regex,
}

impl MusicCommandService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn TrackResolver>,
        playlists: Arc<PlaylistService>,
        prefix: impl Into<String>,
    ) -> Result<Self, Error> {
        let url_pattern = Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+$")
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Self {
            registry,
            resolver,
            playlists,
            prefix: prefix.into(),
            url_pattern,
        })
    }

    /// Handle one chat line. `None` means the line was not a command for us
    /// (no prefix, or an unrecognized command word).
    pub async fn handle_chat_line(
        &self,
        ctx: &ChatCommandContext,
        text: &str,
    ) -> Option<CommandResponse> {
        let rest = text.trim().strip_prefix(&self.prefix)?;
        let mut parts = rest.split_whitespace();
        let command = parts.next()?.to_lowercase();
        let args: Vec<&str> = parts.collect();

        debug!(
            "command '{command}' from {} in guild {}",
            ctx.username, ctx.guild_id
        );
        match self.dispatch(ctx, &command, &args).await {
            Ok(Some(texts)) => Some(CommandResponse { texts }),
            Ok(None) => None,
            Err(e) => Some(CommandResponse {
                texts: vec![format!("❌ {e}")],
            }),
        }
    }

    async fn dispatch(
        &self,
        ctx: &ChatCommandContext,
        command: &str,
        args: &[&str],
    ) -> Result<Option<Vec<String>>, Error> {
        let lines = match command {
            "play" | "p" => self.cmd_play(ctx, args).await?,
            "skip" => {
                self.active_session(ctx)?.skip().await?;
                vec!["⏭️ Skipped.".to_string()]
            }
            "stop" => {
                self.active_session(ctx)?.stop().await?;
                vec!["⏹️ Stopped and cleared the queue.".to_string()]
            }
            "pause" => {
                if self.active_session(ctx)?.pause().await? {
                    vec!["⏸️ Paused.".to_string()]
                } else {
                    vec!["Playback is already paused.".to_string()]
                }
            }
            "resume" => {
                if self.active_session(ctx)?.resume().await? {
                    vec!["▶️ Resumed.".to_string()]
                } else {
                    vec!["Playback is not paused.".to_string()]
                }
            }
            "volume" | "vol" => self.cmd_volume(ctx, args).await?,
            "np" | "nowplaying" => self.cmd_now_playing(ctx).await?,
            "queue" | "q" => self.cmd_queue(ctx).await?,
            "loop" => {
                if self.active_session(ctx)?.toggle_loop().await? {
                    vec!["🔁 Queue loop enabled.".to_string()]
                } else {
                    vec!["🔁 Queue loop disabled.".to_string()]
                }
            }
            "repeat" => {
                if self.active_session(ctx)?.toggle_repeat().await? {
                    vec!["🔂 Repeating the current track.".to_string()]
                } else {
                    vec!["🔂 Repeat disabled.".to_string()]
                }
            }
            "remove" => self.cmd_remove(ctx, args).await?,
            "clear" => {
                let dropped = self.active_session(ctx)?.clear().await?;
                vec![format!("🧹 Cleared {dropped} upcoming track(s).")]
            }
            "shuffle" => {
                self.active_session(ctx)?.shuffle().await?;
                vec!["🔀 Queue shuffled.".to_string()]
            }
            "forward" | "fwd" => {
                let secs = parse_seek_amount(args)?;
                let offset = self.active_session(ctx)?.seek_forward(secs).await?;
                vec![format!("⏩ Jumped to {}.", format_time(offset))]
            }
            "rewind" | "rwd" => {
                let secs = parse_seek_amount(args)?;
                let offset = self.active_session(ctx)?.seek_backward(secs).await?;
                vec![format!("⏪ Jumped back to {}.", format_time(offset))]
            }
            "playlist" | "pl" => self.cmd_playlist(ctx, args).await?,
            "help" => self.cmd_help(),
            _ => return Ok(None),
        };
        Ok(Some(lines))
    }

    /// The guild's live session, for commands that only make sense while
    /// something is playing. Never creates one.
    fn active_session(&self, ctx: &ChatCommandContext) -> Result<SessionHandle, Error> {
        require_voice(ctx)?;
        self.registry
            .get(ctx.guild_id)
            .ok_or(Error::NoActiveSession)
    }

    async fn cmd_play(
        &self,
        ctx: &ChatCommandContext,
        args: &[&str],
    ) -> Result<Vec<String>, Error> {
        let voice_channel = require_voice(ctx)?;
        if args.is_empty() {
            return Ok(vec![format!(
                "Usage: {}play <link or search terms>",
                self.prefix
            )]);
        }
        let input = args.join(" ");

        if !self.url_pattern.is_match(&input) {
            return self.render_search(&input).await;
        }

        let session = self
            .registry
            .get_or_create(ctx.guild_id, voice_channel, ctx.channel_id);
        let outcome = session.enqueue(&input, &input, &ctx.username).await?;

        let mut lines = Vec::new();
        if outcome.started {
            lines.push(format!("⏳ Loading **{}**…", outcome.track.title));
        } else {
            lines.push(format!(
                "✅ Added **{}** to the queue (position {}).",
                outcome.track.title, outcome.position
            ));
        }
        if let Some(reason) = outcome.metadata_error {
            lines.push(format!("⚠️ Could not fetch track details: {reason}"));
        }
        Ok(lines)
    }

    async fn render_search(&self, query: &str) -> Result<Vec<String>, Error> {
        let candidates = self.resolver.search(query, SEARCH_LIMIT).await?;
        if candidates.is_empty() {
            return Ok(vec![format!("No results for '{query}'.")]);
        }
        let mut lines = vec![format!("🔎 Results for '{query}':")];
        for (i, candidate) in candidates.iter().enumerate() {
            let duration = candidate
                .duration_secs
                .map(format_time)
                .unwrap_or_else(|| "?".to_string());
            let channel = candidate.channel.as_deref().unwrap_or("unknown");
            lines.push(format!(
                "{}. **{}** ({duration}) — {channel}\n   <{}>",
                i + 1,
                candidate.title,
                candidate.locator
            ));
        }
        lines.push(format!("Queue one with `{}play <link>`.", self.prefix));
        Ok(lines)
    }

    async fn cmd_volume(
        &self,
        ctx: &ChatCommandContext,
        args: &[&str],
    ) -> Result<Vec<String>, Error> {
        match args.first() {
            // Reading the volume is a view command like np/queue; only
            // changing it requires being in the voice channel.
            None => {
                let session = self
                    .registry
                    .get(ctx.guild_id)
                    .ok_or(Error::NoActiveSession)?;
                let snapshot = session.list_queue().await?;
                Ok(vec![format!("🔊 Volume is {}/10.", snapshot.volume)])
            }
            Some(raw) => {
                let volume: i64 = raw
                    .parse()
                    .map_err(|_| Error::Parse(format!("'{raw}' is not a number")))?;
                let applied = self.active_session(ctx)?.set_volume(volume).await?;
                Ok(vec![format!("🔊 Volume set to {applied}/10.")])
            }
        }
    }

    async fn cmd_now_playing(&self, ctx: &ChatCommandContext) -> Result<Vec<String>, Error> {
        let session = self
            .registry
            .get(ctx.guild_id)
            .ok_or(Error::NoActiveSession)?;
        let np = session.now_playing().await?;
        let mut lines = vec![format!(
            "🎵 **{}** (requested by {}){}",
            np.track.title,
            np.track.requested_by,
            if np.paused { " — paused" } else { "" }
        )];
        match np.track.duration_secs {
            Some(duration) => lines.push(format!(
                "{} {} {}",
                format_time(np.elapsed_secs),
                progress_bar(np.elapsed_secs, duration),
                format_time(duration)
            )),
            None => lines.push(format!("{} elapsed", format_time(np.elapsed_secs))),
        }
        Ok(lines)
    }

    async fn cmd_queue(&self, ctx: &ChatCommandContext) -> Result<Vec<String>, Error> {
        let session = self
            .registry
            .get(ctx.guild_id)
            .ok_or(Error::NoActiveSession)?;
        let snapshot = session.list_queue().await?;
        let Some(head) = snapshot.tracks.first() else {
            return Err(Error::NoActiveSession);
        };

        let mut lines = vec![format!(
            "Now: **{}**{}",
            head.title,
            if snapshot.paused { " (paused)" } else { "" }
        )];
        let upcoming = &snapshot.tracks[1..];
        for (i, track) in upcoming.iter().take(QUEUE_PAGE).enumerate() {
            let duration = track
                .duration_secs
                .map(format_time)
                .unwrap_or_else(|| "?".to_string());
            lines.push(format!("{}. **{}** ({duration})", i + 1, track.title));
        }
        if upcoming.len() > QUEUE_PAGE {
            lines.push(format!("…and {} more.", upcoming.len() - QUEUE_PAGE));
        }
        lines.push(format!(
            "Volume {}/10 | loop {} | repeat {}",
            snapshot.volume,
            on_off(snapshot.loop_queue),
            on_off(snapshot.repeat_current)
        ));
        Ok(lines)
    }

    async fn cmd_remove(
        &self,
        ctx: &ChatCommandContext,
        args: &[&str],
    ) -> Result<Vec<String>, Error> {
        let raw = args.first().ok_or_else(|| {
            Error::Parse(format!("Usage: {}remove <queue position>", self.prefix))
        })?;
        let index: i64 = raw
            .parse()
            .map_err(|_| Error::Parse(format!("'{raw}' is not a number")))?;
        let removed = self.active_session(ctx)?.remove_at(index).await?;
        Ok(vec![format!("🗑️ Removed **{}**.", removed.title)])
    }

    async fn cmd_playlist(
        &self,
        ctx: &ChatCommandContext,
        args: &[&str],
    ) -> Result<Vec<String>, Error> {
        let usage = || {
            Error::Parse(format!(
                "Usage: {}playlist <create|add|remove|list|play|delete> …",
                self.prefix
            ))
        };
        let sub = args.first().ok_or_else(usage)?.to_lowercase();
        match sub.as_str() {
            "create" => {
                let name = args.get(1).ok_or_else(usage)?;
                self.playlists.create(name, &ctx.username).await?;
                Ok(vec![format!("📝 Created playlist **{name}**.")])
            }
            "delete" => {
                let name = args.get(1).ok_or_else(usage)?;
                self.playlists
                    .delete(name, &ctx.username, ctx.is_admin)
                    .await?;
                Ok(vec![format!("🗑️ Deleted playlist **{name}**.")])
            }
            "add" => {
                let name = args.get(1).ok_or_else(usage)?;
                let locator = args.get(2).ok_or_else(usage)?.to_string();
                // Best-effort title; an unresolvable locator is still saved.
                let entry = match self.resolver.resolve_metadata(&locator).await {
                    Ok(meta) => PlaylistEntry {
                        locator: meta.canonical_locator,
                        title: meta.title,
                    },
                    Err(e) => {
                        warn!("could not resolve '{locator}' for playlist add: {e}");
                        PlaylistEntry {
                            title: locator.clone(),
                            locator,
                        }
                    }
                };
                let title = entry.title.clone();
                let len = self
                    .playlists
                    .add_entry(name, &ctx.username, ctx.is_admin, entry)
                    .await?;
                Ok(vec![format!(
                    "➕ Added **{title}** to **{name}** ({len} track(s))."
                )])
            }
            "remove" => {
                let name = args.get(1).ok_or_else(usage)?;
                let raw = args.get(2).ok_or_else(usage)?;
                let index: i64 = raw
                    .parse()
                    .map_err(|_| Error::Parse(format!("'{raw}' is not a number")))?;
                let removed = self
                    .playlists
                    .remove_entry(name, &ctx.username, ctx.is_admin, index)
                    .await?;
                Ok(vec![format!(
                    "🗑️ Removed **{}** from **{name}**.",
                    removed.title
                )])
            }
            "list" => match args.get(1) {
                Some(name) => {
                    let playlist = self.playlists.get(name).await?;
                    if playlist.tracks.is_empty() {
                        return Ok(vec![format!("**{}** is empty.", playlist.name)]);
                    }
                    let mut lines = vec![format!(
                        "**{}** (by {}):",
                        playlist.name, playlist.creator
                    )];
                    for (i, entry) in playlist.tracks.iter().enumerate() {
                        lines.push(format!("{}. {}", i + 1, entry.title));
                    }
                    Ok(lines)
                }
                None => {
                    let all = self.playlists.list().await;
                    if all.is_empty() {
                        return Ok(vec!["No playlists saved yet.".to_string()]);
                    }
                    Ok(all
                        .iter()
                        .map(|p| {
                            format!("• **{}** — {} track(s), by {}", p.name, p.tracks.len(), p.creator)
                        })
                        .collect())
                }
            },
            "play" => {
                let name = args.get(1).ok_or_else(usage)?;
                self.play_playlist(ctx, name).await
            }
            _ => Err(usage()),
        }
    }

    /// Enqueue a saved playlist in order. Entries that fail to enqueue
    /// (duplicates, dead locators) are skipped, not fatal.
    async fn play_playlist(
        &self,
        ctx: &ChatCommandContext,
        name: &str,
    ) -> Result<Vec<String>, Error> {
        let voice_channel = require_voice(ctx)?;
        let playlist = self.playlists.get(name).await?;
        if playlist.tracks.is_empty() {
            return Ok(vec![format!("**{}** is empty.", playlist.name)]);
        }

        let session = self
            .registry
            .get_or_create(ctx.guild_id, voice_channel, ctx.channel_id);
        let mut queued = 0usize;
        let mut skipped = 0usize;
        for entry in &playlist.tracks {
            match session
                .enqueue(&entry.locator, &entry.title, &ctx.username)
                .await
            {
                Ok(_) => queued += 1,
                Err(e) => {
                    warn!("playlist '{}': skipping '{}': {e}", playlist.name, entry.title);
                    skipped += 1;
                }
            }
        }

        let mut lines = vec![format!(
            "▶️ Queued {queued} track(s) from **{}**.",
            playlist.name
        )];
        if skipped > 0 {
            lines.push(format!("⚠️ {skipped} track(s) could not be added."));
        }
        Ok(lines)
    }

    fn cmd_help(&self) -> Vec<String> {
        let p = &self.prefix;
        vec![
            "**Commands:**".to_string(),
            format!("`{p}play <link or terms>` — queue a track or search"),
            format!("`{p}skip` `{p}stop` `{p}pause` `{p}resume`"),
            format!("`{p}np` — current track, `{p}queue` — upcoming tracks"),
            format!("`{p}volume [0-10]` `{p}loop` `{p}repeat` `{p}shuffle`"),
            format!("`{p}remove <n>` `{p}clear`"),
            format!("`{p}forward [secs]` `{p}rewind [secs]`"),
            format!("`{p}playlist <create|add|remove|list|play|delete> …`"),
        ]
    }
}

fn require_voice(ctx: &ChatCommandContext) -> Result<Id<ChannelMarker>, Error> {
    ctx.voice_channel_id.ok_or(Error::NotInVoiceChannel)
}

fn parse_seek_amount(args: &[&str]) -> Result<u64, Error> {
    match args.first() {
        None => Ok(DEFAULT_SEEK_SECS),
        Some(raw) => match raw.parse::<i64>() {
            Ok(secs) if secs > 0 => Ok(secs as u64),
            _ => Err(Error::InvalidSeekAmount),
        },
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
