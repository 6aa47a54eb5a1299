// File: src/resolver/mod.rs
//
// The Track Resolver turns user-supplied locators or search text into track
// metadata and directly fetchable audio stream addresses. Everything else in
// the bot talks to it through this trait so the playback core can be tested
// without touching the network.

use async_trait::async_trait;

use crate::Error;
use tunebot_common::models::{SearchCandidate, TrackMetadata};

pub mod ytdlp;

pub use ytdlp::YtDlpResolver;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Fetch title/duration/thumbnail and the canonical locator for a track.
    async fn resolve_metadata(&self, locator: &str) -> Result<TrackMetadata, Error>;

    /// Resolve a directly fetchable audio stream address for a track.
    async fn resolve_stream_address(&self, locator: &str) -> Result<String, Error>;

    /// Search the platform, returning up to `limit` candidates.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchCandidate>, Error>;
}
