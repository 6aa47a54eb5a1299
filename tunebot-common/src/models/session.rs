use super::track::Track;

/// Snapshot of the currently playing track, for `!np`.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub track: Track,
    pub elapsed_secs: u64,
    pub paused: bool,
}

/// Snapshot of a session's queue and flags, for `!queue`.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    /// Head = currently playing.
    pub tracks: Vec<Track>,
    pub volume: u8,
    pub loop_queue: bool,
    pub repeat_current: bool,
    pub paused: bool,
}
