// File: src/repositories/mod.rs

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Error;
use tunebot_common::models::Playlist;

pub mod json_file;

pub use json_file::JsonFilePlaylistRepository;

/// Persistence seam for saved playlists. Keys are lowercase playlist names.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaylistRepository: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, Playlist>, Error>;
    async fn save_all(&self, playlists: &HashMap<String, Playlist>) -> Result<(), Error>;
}
