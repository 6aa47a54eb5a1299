// File: src/services/playlist_service.rs
//
// Saved playlists: an in-memory map loaded once at startup and written back
// through the repository after every mutation. Names are unique
// case-insensitively; only the creator (or an admin) may modify or delete.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::Error;
use crate::repositories::PlaylistRepository;
use tunebot_common::models::{Playlist, PlaylistEntry};

pub struct PlaylistService {
    repository: Arc<dyn PlaylistRepository>,
    playlists: Mutex<HashMap<String, Playlist>>,
}

impl PlaylistService {
    pub async fn new(repository: Arc<dyn PlaylistRepository>) -> Result<Self, Error> {
        let playlists = repository.load_all().await?;
        info!("playlist store ready with {} playlist(s)", playlists.len());
        Ok(Self {
            repository,
            playlists: Mutex::new(playlists),
        })
    }

    pub async fn create(&self, name: &str, creator: &str) -> Result<(), Error> {
        let key = name.to_lowercase();
        let mut playlists = self.playlists.lock().await;
        if playlists.contains_key(&key) {
            return Err(Error::PlaylistExists(name.to_string()));
        }
        let now = chrono::Utc::now();
        playlists.insert(
            key,
            Playlist {
                name: name.to_string(),
                creator: creator.to_string(),
                tracks: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        self.repository.save_all(&playlists).await
    }

    pub async fn delete(&self, name: &str, requester: &str, is_admin: bool) -> Result<(), Error> {
        let key = name.to_lowercase();
        let mut playlists = self.playlists.lock().await;
        let playlist = playlists
            .get(&key)
            .ok_or_else(|| Error::PlaylistNotFound(name.to_string()))?;
        check_owner(playlist, requester, is_admin)?;
        playlists.remove(&key);
        self.repository.save_all(&playlists).await
    }

    /// Append an entry. Returns the playlist's new length.
    pub async fn add_entry(
        &self,
        name: &str,
        requester: &str,
        is_admin: bool,
        entry: PlaylistEntry,
    ) -> Result<usize, Error> {
        let key = name.to_lowercase();
        let mut playlists = self.playlists.lock().await;
        let playlist = playlists
            .get_mut(&key)
            .ok_or_else(|| Error::PlaylistNotFound(name.to_string()))?;
        check_owner(playlist, requester, is_admin)?;
        if let Some(existing) = playlist.tracks.iter().find(|e| e.locator == entry.locator) {
            return Err(Error::DuplicateTrack(existing.title.clone()));
        }
        playlist.tracks.push(entry);
        playlist.updated_at = chrono::Utc::now();
        let len = playlist.tracks.len();
        self.repository.save_all(&playlists).await?;
        Ok(len)
    }

    /// Remove by 1-based index over the whole playlist.
    pub async fn remove_entry(
        &self,
        name: &str,
        requester: &str,
        is_admin: bool,
        index: i64,
    ) -> Result<PlaylistEntry, Error> {
        let key = name.to_lowercase();
        let mut playlists = self.playlists.lock().await;
        let playlist = playlists
            .get_mut(&key)
            .ok_or_else(|| Error::PlaylistNotFound(name.to_string()))?;
        check_owner(playlist, requester, is_admin)?;
        let max = playlist.tracks.len();
        if index < 1 || index as usize > max {
            return Err(Error::InvalidIndex { index, max });
        }
        let removed = playlist.tracks.remove(index as usize - 1);
        playlist.updated_at = chrono::Utc::now();
        self.repository.save_all(&playlists).await?;
        Ok(removed)
    }

    pub async fn get(&self, name: &str) -> Result<Playlist, Error> {
        let playlists = self.playlists.lock().await;
        playlists
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::PlaylistNotFound(name.to_string()))
    }

    /// All playlists, sorted by name for stable chat output.
    pub async fn list(&self) -> Vec<Playlist> {
        let playlists = self.playlists.lock().await;
        let mut all: Vec<Playlist> = playlists.values().cloned().collect();
        all.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        all
    }
}

fn check_owner(playlist: &Playlist, requester: &str, is_admin: bool) -> Result<(), Error> {
    if is_admin || playlist.creator == requester {
        Ok(())
    } else {
        Err(Error::PlaylistForbidden)
    }
}
