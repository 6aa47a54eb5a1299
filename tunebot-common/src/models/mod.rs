pub mod playlist;
pub mod session;
pub mod track;

pub use playlist::{Playlist, PlaylistEntry};
pub use session::{NowPlaying, QueueSnapshot};
pub use track::{SearchCandidate, Track, TrackMetadata};
