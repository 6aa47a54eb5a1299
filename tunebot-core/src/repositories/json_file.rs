// File: src/repositories/json_file.rs
//
// Playlist persistence as one pretty-printed JSON file. A missing file reads
// as an empty map; every save rewrites the whole file.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::Error;
use tunebot_common::models::Playlist;

use super::PlaylistRepository;

pub struct JsonFilePlaylistRepository {
    path: PathBuf,
}

impl JsonFilePlaylistRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PlaylistRepository for JsonFilePlaylistRepository {
    async fn load_all(&self) -> Result<HashMap<String, Playlist>, Error> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let playlists: HashMap<String, Playlist> = serde_json::from_slice(&bytes)?;
                debug!(
                    "loaded {} playlist(s) from {}",
                    playlists.len(),
                    self.path.display()
                );
                Ok(playlists)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_all(&self, playlists: &HashMap<String, Playlist>) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(playlists)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}
