use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One saved {locator, title} pair inside a playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub locator: String,
    pub title: String,
}

/// A named, persisted collection of tracks. Lives independently of any
/// playback session; names are unique case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    pub creator: String,
    pub tracks: Vec<PlaylistEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
