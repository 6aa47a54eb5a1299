// tunebot-server/src/main.rs
//
// The bot binary: parse args, wire the resolver/pipeline/voice stack into a
// session registry, connect to Discord, then run two loops until ctrl-c:
// inbound chat messages through the command service, and event-bus playback
// notifications back out to the announce channels.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use tunebot_core::eventbus::{BotEvent, EventBus, SessionEndReason};
use tunebot_core::pipeline::{FfmpegPipelineFactory, PipelineFactory};
use tunebot_core::platforms::PlatformIntegration;
use tunebot_core::platforms::discord::DiscordPlatform;
use tunebot_core::platforms::discord::voice::{AudioOutput, AudioOutputFactory};
use tunebot_core::platforms::discord::DiscordVoiceConnector;
use tunebot_core::repositories::JsonFilePlaylistRepository;
use tunebot_core::resolver::{TrackResolver, YtDlpResolver};
use tunebot_core::services::{ChatCommandContext, MusicCommandService, PlaylistService};
use tunebot_core::session::{SessionConfig, SessionRegistry};
use tunebot_core::utils::time::format_time;
use tunebot_core::voice::VoiceConnector;

#[derive(Parser, Debug, Clone)]
#[command(name = "tunebot")]
#[command(author, version, about = "tunebot - Discord music bot")]
struct Args {
    /// Chat command prefix
    #[arg(long, default_value = "!")]
    prefix: String,

    /// Where saved playlists are persisted
    #[arg(long, default_value = "playlists.json")]
    playlists_file: PathBuf,

    /// yt-dlp binary to spawn for resolution
    #[arg(long, default_value = "yt-dlp")]
    ytdlp_bin: String,

    /// ffmpeg binary to spawn for transcoding
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg_bin: String,

    /// Write decoded PCM (s16le 48k stereo) to this path instead of
    /// discarding it; point it at a FIFO to feed an external transport.
    #[arg(long)]
    pcm_out: Option<PathBuf>,

    /// Bot token; falls back to the DISCORD_TOKEN env var
    #[arg(long)]
    token: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("tunebot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!(
        "tunebot starting. prefix={}, playlists={}",
        args.prefix,
        args.playlists_file.display()
    );

    let token = match args.token.clone() {
        Some(t) => t,
        None => std::env::var("DISCORD_TOKEN")
            .context("no --token given and DISCORD_TOKEN is not set")?,
    };

    let event_bus = Arc::new(EventBus::new());
    let resolver: Arc<dyn TrackResolver> = Arc::new(YtDlpResolver::new(&args.ytdlp_bin));
    let pipelines: Arc<dyn PipelineFactory> = Arc::new(FfmpegPipelineFactory::new(&args.ffmpeg_bin));

    let mut platform = DiscordPlatform::new(token);
    platform.connect().await?;

    let voice: Arc<dyn VoiceConnector> = Arc::new(DiscordVoiceConnector::new(
        platform.shard_senders(),
        audio_output_factory(args.pcm_out.clone()),
    ));
    let registry = SessionRegistry::new(
        resolver.clone(),
        pipelines,
        voice,
        event_bus.clone(),
        SessionConfig::default(),
    );
    let playlist_repo = Arc::new(JsonFilePlaylistRepository::new(args.playlists_file.clone()));
    let playlists = Arc::new(PlaylistService::new(playlist_repo).await?);
    let commands = Arc::new(MusicCommandService::new(
        registry.clone(),
        resolver,
        playlists,
        args.prefix.clone(),
    )?);

    let platform = Arc::new(platform);

    // Playback announcements: event bus -> originating text channel.
    let announce_platform = platform.clone();
    let mut bus_rx = event_bus.subscribe(None).await;
    let announce_task = tokio::spawn(async move {
        while let Some(event) = bus_rx.recv().await {
            if let Some((channel_id, text)) = render_announcement(&event) {
                if let Err(e) = announce_platform
                    .send_message(&channel_id, &text)
                    .await
                {
                    error!("failed to announce in channel {channel_id}: {e}");
                }
            }
        }
    });

    // Inbound chat -> command service -> replies.
    let message_platform = platform.clone();
    let message_task = tokio::spawn(async move {
        while let Some(msg) = message_platform.next_message_event().await {
            let ctx = ChatCommandContext {
                guild_id: msg.guild_id,
                channel_id: msg.channel_id,
                user_id: msg.user_id,
                username: msg.username.clone(),
                voice_channel_id: msg.voice_channel_id,
                is_admin: msg.is_admin,
            };
            let commands = commands.clone();
            let reply_platform = message_platform.clone();
            tokio::spawn(async move {
                if let Some(response) = commands.handle_chat_line(&ctx, &msg.text).await {
                    let text = response.texts.join("\n");
                    if let Err(e) = reply_platform
                        .send_message(&ctx.channel_id.to_string(), &text)
                        .await
                    {
                        error!("failed to reply in channel {}: {e}", ctx.channel_id);
                    }
                }
            });
        }
        warn!("inbound message stream ended");
    });

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    event_bus.shutdown();
    announce_task.abort();
    message_task.abort();
    Ok(())
}

/// Where decoded PCM goes. Without `--pcm-out` the audio is discarded, which
/// still exercises the whole pipeline (useful for dry runs).
fn audio_output_factory(pcm_out: Option<PathBuf>) -> AudioOutputFactory {
    Arc::new(move || match &pcm_out {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Box::new(tokio::fs::File::from_std(file)) as AudioOutput,
            Err(e) => {
                error!("could not open {} for PCM output: {e}", path.display());
                Box::new(tokio::io::sink()) as AudioOutput
            }
        },
        None => Box::new(tokio::io::sink()) as AudioOutput,
    })
}

fn render_announcement(event: &BotEvent) -> Option<(String, String)> {
    match event {
        BotEvent::TrackStarted {
            channel_id, track, ..
        } => {
            let duration = track
                .duration_secs
                .map(format_time)
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            Some((
                channel_id.to_string(),
                format!(
                    "🎵 Now playing: **{}**{duration} — requested by {}",
                    track.title, track.requested_by
                ),
            ))
        }
        BotEvent::TrackFailed {
            channel_id,
            title,
            reason,
            ..
        } => Some((
            channel_id.to_string(),
            format!("⚠️ Skipping **{title}**: {reason}"),
        )),
        BotEvent::SessionEnded { reason, .. } => {
            // Stop and join-failure already produce a direct reply; only the
            // natural end of the queue is worth announcing, and that has no
            // channel to go to without the session. Logged instead.
            if matches!(reason, SessionEndReason::QueueExhausted) {
                info!("queue exhausted: {:?}", reason);
            }
            None
        }
        _ => None,
    }
}
