// src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Failures surfaced to the user by the playback core:
    #[error("'{0}' is already in the queue")]
    DuplicateTrack(String),

    #[error("another track is still being added to this queue, try again in a moment")]
    Busy,

    #[error("invalid queue position {index}; pick a number between 1 and {max}")]
    InvalidIndex { index: i64, max: usize },

    #[error("volume must be between 0 and 10, got {0}")]
    InvalidVolume(i64),

    #[error("seek amount must be a positive number of seconds")]
    InvalidSeekAmount,

    #[error("nothing is streaming yet, seeking is unavailable")]
    SeekUnavailable,

    #[error("could not resolve track: {0}")]
    ResolutionFailed(String),

    #[error("no audio received within {0} seconds of starting the transcoder")]
    PipelineStartTimeout(u64),

    #[error("transcode pipeline error: {0}")]
    PipelineRuntimeError(String),

    #[error("voice connection failed: {0}")]
    ConnectionFailed(String),

    #[error("nothing is playing on this server")]
    NoActiveSession,

    #[error("not enough tracks in the queue for that")]
    NotEnoughTracks,

    #[error("you need to be in a voice channel to use that")]
    NotInVoiceChannel,

    // Playlist store failures:
    #[error("no playlist named '{0}'")]
    PlaylistNotFound(String),

    #[error("a playlist named '{0}' already exists")]
    PlaylistExists(String),

    #[error("only the playlist creator or an admin can do that")]
    PlaylistForbidden,

    // Ambient failures:
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
