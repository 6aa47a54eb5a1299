use serde::{Deserialize, Serialize};

/// One playable audio item in a session queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Display title. May start out as the raw user input and be replaced
    /// once real metadata is fetched.
    pub title: String,
    /// Canonical locator (the track's webpage URL). This is the identity key
    /// for "already queued" checks.
    pub locator: String,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    /// Username of whoever asked for the track.
    pub requested_by: String,
    /// Directly fetchable audio address, resolved lazily right before playback.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stream_address: Option<String>,
}

/// Metadata the resolver returns for a locator.
#[derive(Debug, Clone)]
pub struct TrackMetadata {
    pub title: String,
    pub canonical_locator: String,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
}

/// One hit from a platform search.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub title: String,
    pub locator: String,
    pub duration_secs: Option<u64>,
    pub channel: Option<String>,
}
