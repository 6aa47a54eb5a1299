// File: src/session/state.rs
//
// Pure queue-and-flags logic for a playback session. No I/O, no tasks:
// everything here is synchronous so the queue invariants can be tested
// without spawning a session.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::Error;
use tunebot_common::models::Track;

pub const DEFAULT_VOLUME: u8 = 5;
pub const MAX_VOLUME: u8 = 10;

/// What to do after the current track finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// `repeat_current` is on: same head, play it again.
    Replay,
    /// Move on to the (possibly rotated-in) new head.
    Next,
    /// Nothing left; the session must be torn down.
    Emptied,
}

/// The ordered track queue plus playback flags. Head = currently playing.
#[derive(Debug)]
pub struct QueueState {
    tracks: Vec<Track>,
    pub volume: u8,
    pub loop_queue: bool,
    pub repeat_current: bool,
    /// Guards the enqueue-resolve-append window; no two enqueue resolutions
    /// may interleave their append step.
    pub processing: bool,
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            volume: DEFAULT_VOLUME,
            loop_queue: false,
            repeat_current: false,
            processing: false,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn head(&self) -> Option<&Track> {
        self.tracks.first()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Output gain for the voice sink, 0.0–1.0.
    pub fn gain(&self) -> f32 {
        self.volume as f32 / MAX_VOLUME as f32
    }

    pub fn find_by_locator(&self, locator: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.locator == locator)
    }

    /// Admission check for a new enqueue: duplicate first, then the
    /// in-flight-resolution guard. No mutation.
    pub fn check_enqueue(&self, locator: &str) -> Result<(), Error> {
        if let Some(existing) = self.find_by_locator(locator) {
            return Err(Error::DuplicateTrack(existing.title.clone()));
        }
        if self.processing {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Append to the tail. Returns true when the track became the head,
    /// i.e. playback should start.
    pub fn push(&mut self, track: Track) -> bool {
        self.tracks.push(track);
        self.tracks.len() == 1
    }

    /// Apply the completion policy after a track ends. `repeat_current`
    /// takes precedence over `loop_queue`.
    pub fn advance(&mut self) -> Advance {
        if self.tracks.is_empty() {
            return Advance::Emptied;
        }
        if self.repeat_current {
            return Advance::Replay;
        }
        if self.loop_queue {
            let finished = self.tracks.remove(0);
            self.tracks.push(finished);
        } else {
            self.tracks.remove(0);
        }
        if self.tracks.is_empty() {
            Advance::Emptied
        } else {
            Advance::Next
        }
    }

    /// Discard the head unconditionally (failure path; loop/repeat flags do
    /// not apply to failed tracks).
    pub fn drop_head(&mut self) -> Option<Track> {
        if self.tracks.is_empty() {
            None
        } else {
            Some(self.tracks.remove(0))
        }
    }

    /// Remove by 1-based index into the queue excluding the head.
    pub fn remove_at(&mut self, index: i64) -> Result<Track, Error> {
        let max = self.tracks.len().saturating_sub(1);
        if index < 1 || index as usize > max {
            return Err(Error::InvalidIndex { index, max });
        }
        Ok(self.tracks.remove(index as usize))
    }

    /// Truncate to exactly `[head]`. Returns how many tracks were dropped.
    pub fn clear_upcoming(&mut self) -> usize {
        let dropped = self.tracks.len().saturating_sub(1);
        self.tracks.truncate(1);
        dropped
    }

    /// Unbiased shuffle of everything except the head. Needs at least two
    /// non-head tracks to be meaningful.
    pub fn shuffle_upcoming<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), Error> {
        if self.tracks.len() < 3 {
            return Err(Error::NotEnoughTracks);
        }
        self.tracks[1..].shuffle(rng);
        Ok(())
    }

    pub fn set_volume(&mut self, volume: i64) -> Result<u8, Error> {
        if !(0..=MAX_VOLUME as i64).contains(&volume) {
            return Err(Error::InvalidVolume(volume));
        }
        self.volume = volume as u8;
        Ok(self.volume)
    }

    pub fn clear_all(&mut self) {
        self.tracks.clear();
    }
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn track(locator: &str) -> Track {
        Track {
            title: format!("Track {locator}"),
            locator: locator.to_string(),
            duration_secs: Some(120),
            thumbnail: None,
            requested_by: "tester".to_string(),
            stream_address: None,
        }
    }

    fn filled(locators: &[&str]) -> QueueState {
        let mut q = QueueState::new();
        for l in locators {
            q.push(track(l));
        }
        q
    }

    fn order(q: &QueueState) -> Vec<String> {
        q.tracks().iter().map(|t| t.locator.clone()).collect()
    }

    #[test]
    fn enqueue_order_matches_call_order() {
        let q = filled(&["a", "b", "c"]);
        assert_eq!(order(&q), vec!["a", "b", "c"]);
    }

    #[test]
    fn first_push_becomes_head() {
        let mut q = QueueState::new();
        assert!(q.push(track("a")));
        assert!(!q.push(track("b")));
    }

    #[test]
    fn duplicate_locator_is_rejected_without_mutation() {
        let q = filled(&["a", "b"]);
        let err = q.check_enqueue("b").unwrap_err();
        assert!(matches!(err, Error::DuplicateTrack(t) if t == "Track b"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn processing_flag_rejects_with_busy() {
        let mut q = filled(&["a"]);
        q.processing = true;
        assert!(matches!(q.check_enqueue("b"), Err(Error::Busy)));
        // Duplicate still wins over Busy.
        assert!(matches!(
            q.check_enqueue("a"),
            Err(Error::DuplicateTrack(_))
        ));
    }

    #[test]
    fn remove_at_range_policy() {
        let mut q = filled(&["a", "b", "c"]);
        assert!(matches!(
            q.remove_at(0),
            Err(Error::InvalidIndex { index: 0, max: 2 })
        ));
        assert!(matches!(q.remove_at(3), Err(Error::InvalidIndex { .. })));
        assert!(matches!(q.remove_at(-1), Err(Error::InvalidIndex { .. })));
        assert_eq!(order(&q), vec!["a", "b", "c"], "no mutation on error");

        let removed = q.remove_at(1).unwrap();
        assert_eq!(removed.locator, "b");
        assert_eq!(order(&q), vec!["a", "c"]);
    }

    #[test]
    fn clear_keeps_exactly_head()  {
        let mut q = filled(&["a", "b", "c", "d"]);
        assert_eq!(q.clear_upcoming(), 3);
        assert_eq!(order(&q), vec!["a"]);
        assert_eq!(q.clear_upcoming(), 0);
    }

    #[test]
    fn shuffle_keeps_head_and_multiset() {
        let mut q = filled(&["a", "b", "c", "d", "e"]);
        let mut rng = StdRng::seed_from_u64(42);
        q.shuffle_upcoming(&mut rng).unwrap();

        assert_eq!(q.head().unwrap().locator, "a");
        let mut tail = order(&q)[1..].to_vec();
        tail.sort();
        assert_eq!(tail, vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn shuffle_needs_two_upcoming_tracks() {
        let mut q = filled(&["a", "b"]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            q.shuffle_upcoming(&mut rng),
            Err(Error::NotEnoughTracks)
        ));
    }

    #[test]
    fn loop_rotation_cycles_the_queue() {
        let mut q = filled(&["a", "b", "c"]);
        q.loop_queue = true;

        assert_eq!(q.advance(), Advance::Next);
        assert_eq!(order(&q), vec!["b", "c", "a"]);
        assert_eq!(q.advance(), Advance::Next);
        assert_eq!(order(&q), vec!["c", "a", "b"]);
        assert_eq!(q.advance(), Advance::Next);
        assert_eq!(order(&q), vec!["a", "b", "c"]);
    }

    #[test]
    fn repeat_takes_precedence_and_preserves_queue() {
        let mut q = filled(&["a", "b"]);
        q.repeat_current = true;
        q.loop_queue = true;

        for _ in 0..5 {
            assert_eq!(q.advance(), Advance::Replay);
            assert_eq!(q.len(), 2);
            assert_eq!(q.head().unwrap().locator, "a");
        }
    }

    #[test]
    fn advance_without_flags_drops_head_then_empties() {
        let mut q = filled(&["a", "b"]);
        assert_eq!(q.advance(), Advance::Next);
        assert_eq!(order(&q), vec!["b"]);
        assert_eq!(q.advance(), Advance::Emptied);
        assert!(q.is_empty());
    }

    #[test]
    fn volume_bounds_are_inclusive() {
        let mut q = QueueState::new();
        assert_eq!(q.volume, DEFAULT_VOLUME);
        assert_eq!(q.set_volume(0).unwrap(), 0);
        assert_eq!(q.set_volume(10).unwrap(), 10);
        assert!(matches!(q.set_volume(-1), Err(Error::InvalidVolume(-1))));
        assert!(matches!(q.set_volume(11), Err(Error::InvalidVolume(11))));
        assert_eq!(q.volume, 10, "rejection leaves volume unchanged");
    }

    #[test]
    fn gain_scales_linearly() {
        let mut q = QueueState::new();
        q.set_volume(10).unwrap();
        assert!((q.gain() - 1.0).abs() < f32::EPSILON);
        q.set_volume(0).unwrap();
        assert!(q.gain().abs() < f32::EPSILON);
    }
}
