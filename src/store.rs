// Recorded timeline state: one track per rendition, plus the playlist-level
// counters that must survive window eviction.

use crate::segment::Segment;
use std::collections::VecDeque;

/// Recorded timeline for a single rendition.
#[derive(Debug, Clone)]
pub struct Track {
    /// Source media-sequence observed at the last merge.
    pub media_seq: u64,
    /// Entry count of the source playlist at the last merge.
    pub source_seg_count: usize,
    /// Recorded entries, oldest first. Eviction pops the front.
    pub seg_list: VecDeque<Segment>,
    next_index: u64,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            media_seq: 0,
            source_seg_count: 0,
            seg_list: VecDeque::new(),
            next_index: 1,
        }
    }
}

impl Track {
    /// Index the next appended media entry will receive. Indexes are 1-based
    /// and monotonic per track; the counter lives on the track itself, so it
    /// survives eviction even when every retained entry is gone.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Take the next index, advancing the counter.
    pub(crate) fn claim_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// Number of media entries currently retained (sentinel excluded).
    pub fn indexed_count(&self) -> usize {
        self.seg_list.iter().filter(|seg| seg.is_media()).count()
    }

    /// Summed duration of retained media, in seconds.
    pub fn total_duration(&self) -> f64 {
        self.seg_list.iter().filter_map(|seg| seg.duration).sum()
    }

    /// Duration of the newest media entry, if any.
    pub fn last_duration(&self) -> Option<f64> {
        self.seg_list.iter().rev().find_map(|seg| seg.duration)
    }

    /// A finalized track ends with the end-of-stream sentinel and accepts no
    /// further appends.
    pub fn is_finalized(&self) -> bool {
        self.seg_list.back().is_some_and(|seg| seg.endlist)
    }
}

/// All recorded tracks plus output playlist counters.
///
/// Video tracks are keyed by bandwidth; audio and subtitle tracks by
/// `(group, language)`. Registration order is preserved, and the first video
/// track registered is the primary: it alone drives the shared counters and
/// duration accounting, so every rendition's output advances in lockstep.
#[derive(Debug, Clone, Default)]
pub struct SegmentStore {
    video: Vec<(u64, Track)>,
    audio: Vec<((String, String), Track)>,
    subtitles: Vec<((String, String), Track)>,

    /// Output `#EXT-X-MEDIA-SEQUENCE`, incremented once per evicted entry.
    pub media_sequence: u64,
    /// Output `#EXT-X-DISCONTINUITY-SEQUENCE`, incremented when an evicted
    /// entry carried a discontinuity marker.
    pub discontinuity_sequence: u64,
    /// Largest source target duration observed so far.
    pub target_duration: u64,

    dseq_seeded: bool,
}

impl SegmentStore {
    pub fn video_bandwidths(&self) -> impl Iterator<Item = u64> + '_ {
        self.video.iter().map(|(bw, _)| *bw)
    }

    pub fn video_tracks(&self) -> &[(u64, Track)] {
        &self.video
    }

    pub fn audio_tracks(&self) -> &[((String, String), Track)] {
        &self.audio
    }

    pub fn subtitle_tracks(&self) -> &[((String, String), Track)] {
        &self.subtitles
    }

    pub fn video_track(&self, bandwidth: u64) -> Option<&Track> {
        self.video
            .iter()
            .find(|(bw, _)| *bw == bandwidth)
            .map(|(_, track)| track)
    }

    pub fn audio_track(&self, group: &str, language: &str) -> Option<&Track> {
        lookup(&self.audio, group, language)
    }

    pub fn subtitle_track(&self, group: &str, language: &str) -> Option<&Track> {
        lookup(&self.subtitles, group, language)
    }

    /// Video track for `bandwidth`, registered on first use. Registration
    /// order fixes which track is primary.
    pub(crate) fn video_track_mut(&mut self, bandwidth: u64) -> &mut Track {
        let pos = match self.video.iter().position(|(bw, _)| *bw == bandwidth) {
            Some(pos) => pos,
            None => {
                self.video.push((bandwidth, Track::default()));
                self.video.len() - 1
            }
        };
        &mut self.video[pos].1
    }

    pub(crate) fn audio_track_mut(&mut self, group: &str, language: &str) -> &mut Track {
        lookup_mut(&mut self.audio, group, language)
    }

    pub(crate) fn subtitle_track_mut(&mut self, group: &str, language: &str) -> &mut Track {
        lookup_mut(&mut self.subtitles, group, language)
    }

    /// The first-registered video track.
    pub fn primary(&self) -> Option<&Track> {
        self.video.first().map(|(_, track)| track)
    }

    /// Retained duration of the primary track, in seconds.
    pub fn primary_duration(&self) -> f64 {
        self.primary().map_or(0.0, Track::total_duration)
    }

    /// Duration of the primary track's newest entry, used to pace the
    /// refresh loop.
    pub fn last_primary_duration(&self) -> Option<f64> {
        self.primary().and_then(Track::last_duration)
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty() && self.subtitles.is_empty()
    }

    /// Adopt the source's discontinuity-sequence base the first time one is
    /// observed. Later source values are ignored; from here on the counter
    /// moves only with eviction.
    pub(crate) fn seed_discontinuity_sequence(&mut self, value: u64) {
        if !self.dseq_seeded {
            self.discontinuity_sequence = value;
            self.dseq_seeded = true;
        }
    }

    pub(crate) fn observe_target_duration(&mut self, value: u64) {
        self.target_duration = self.target_duration.max(value);
    }

    /// Drop the oldest entry from every track at once.
    ///
    /// Eviction is all-or-nothing: if any track has nothing to give up, no
    /// track loses anything, which keeps renditions in lockstep. The shared
    /// counters advance according to what the primary track lost.
    pub(crate) fn evict_oldest(&mut self) -> bool {
        let evictable = |track: &Track| track.seg_list.front().is_some_and(Segment::is_media);
        let all_ready = self.video.iter().all(|(_, t)| evictable(t))
            && self.audio.iter().all(|(_, t)| evictable(t))
            && self.subtitles.iter().all(|(_, t)| evictable(t));
        if self.video.is_empty() || !all_ready {
            return false;
        }

        let mut primary_had_discontinuity = false;
        for (pos, (_, track)) in self.video.iter_mut().enumerate() {
            if let Some(evicted) = track.seg_list.pop_front()
                && pos == 0
            {
                primary_had_discontinuity = evicted.discontinuity;
            }
        }
        for (_, track) in self.audio.iter_mut().chain(self.subtitles.iter_mut()) {
            track.seg_list.pop_front();
        }

        self.media_sequence += 1;
        if primary_had_discontinuity {
            self.discontinuity_sequence += 1;
        }
        true
    }
}

fn lookup<'a>(
    tracks: &'a [((String, String), Track)],
    group: &str,
    language: &str,
) -> Option<&'a Track> {
    tracks
        .iter()
        .find(|((g, l), _)| g == group && l == language)
        .map(|(_, track)| track)
}

fn lookup_mut<'a>(
    tracks: &'a mut Vec<((String, String), Track)>,
    group: &str,
    language: &str,
) -> &'a mut Track {
    let pos = match tracks
        .iter()
        .position(|((g, l), _)| g == group && l == language)
    {
        Some(pos) => pos,
        None => {
            tracks.push(((group.to_string(), language.to_string()), Track::default()));
            tracks.len() - 1
        }
    };
    &mut tracks[pos].1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(index: u64, duration: f64) -> Segment {
        Segment {
            index: Some(index),
            duration: Some(duration),
            uri: Some(format!("https://cdn.example.com/seg-{index}.ts")),
            ..Segment::default()
        }
    }

    #[test]
    fn next_index_starts_at_one() {
        let track = Track::default();
        assert_eq!(track.next_index(), 1);
    }

    #[test]
    fn claimed_indexes_are_sequential() {
        let mut track = Track::default();
        for _ in 0..5 {
            let index = track.claim_index();
            track.seg_list.push_back(media(index, 10.0));
        }
        assert_eq!(track.next_index(), 6);
        assert_eq!(track.indexed_count(), 5);
        assert_eq!(track.total_duration(), 50.0);

        track.seg_list.push_back(Segment::endlist());
        assert_eq!(track.next_index(), 6);
        assert!(track.is_finalized());
    }

    #[test]
    fn next_index_survives_draining_the_whole_list() {
        // A single entry longer than the window can leave the list empty;
        // numbering must still continue where it left off.
        let mut track = Track::default();
        for _ in 0..3 {
            let index = track.claim_index();
            track.seg_list.push_back(media(index, 10.0));
        }
        while track.seg_list.pop_front().is_some() {}
        assert!(track.seg_list.is_empty());
        assert_eq!(track.next_index(), 4);
        assert_eq!(track.claim_index(), 4);
    }

    #[test]
    fn registration_order_fixes_primary() {
        let mut store = SegmentStore::default();
        store.video_track_mut(800_000).seg_list.push_back(media(1, 4.0));
        store.video_track_mut(2_000_000);
        assert_eq!(store.video_bandwidths().collect::<Vec<_>>(), vec![
            800_000, 2_000_000
        ]);
        assert_eq!(store.primary_duration(), 4.0);
    }

    #[test]
    fn eviction_moves_both_counters() {
        let mut store = SegmentStore::default();
        {
            let track = store.video_track_mut(1_000_000);
            let mut first = media(1, 10.0);
            first.discontinuity = true;
            track.seg_list.push_back(first);
            track.seg_list.push_back(media(2, 10.0));
        }
        {
            let track = store.audio_track_mut("aac", "en");
            track.seg_list.push_back(media(1, 10.0));
            track.seg_list.push_back(media(2, 10.0));
        }

        assert!(store.evict_oldest());
        assert_eq!(store.media_sequence, 1);
        assert_eq!(store.discontinuity_sequence, 1);
        assert_eq!(store.video_track(1_000_000).unwrap().indexed_count(), 1);
        assert_eq!(store.audio_track("aac", "en").unwrap().indexed_count(), 1);

        assert!(store.evict_oldest());
        assert_eq!(store.media_sequence, 2);
        assert_eq!(store.discontinuity_sequence, 1);

        // Nothing left anywhere; eviction refuses rather than desyncing.
        assert!(!store.evict_oldest());
        assert_eq!(store.media_sequence, 2);
    }

    #[test]
    fn eviction_is_all_or_nothing() {
        let mut store = SegmentStore::default();
        store.video_track_mut(1_000_000).seg_list.push_back(media(1, 6.0));
        store.audio_track_mut("aac", "en");
        assert!(!store.evict_oldest());
        assert_eq!(store.video_track(1_000_000).unwrap().indexed_count(), 1);
        assert_eq!(store.media_sequence, 0);
    }

    #[test]
    fn discontinuity_sequence_seeds_once() {
        let mut store = SegmentStore::default();
        store.seed_discontinuity_sequence(7);
        store.seed_discontinuity_sequence(12);
        assert_eq!(store.discontinuity_sequence, 7);
    }

    #[test]
    fn target_duration_keeps_maximum() {
        let mut store = SegmentStore::default();
        store.observe_target_duration(6);
        store.observe_target_duration(10);
        store.observe_target_duration(4);
        assert_eq!(store.target_duration, 10);
    }
}
