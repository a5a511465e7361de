// Batch-to-store reconciliation: work out which tail of each fetched
// playlist is genuinely new and append it with recorder-assigned indexes.

use crate::events::StreamType;
use crate::segment::Segment;
use crate::store::{SegmentStore, Track};
use crate::sync::{FetchedTrack, TrackBatch};
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub(crate) struct MergeOutcome {
    /// New entries appended across all tracks.
    pub new_segments: usize,
    /// Seconds of new primary-track media, for record-duration accounting.
    pub appended_duration: f64,
}

/// Merge one aligned batch into the store.
///
/// Tracks are registered on first sight, so the batch's video order fixes
/// the primary track. Finalized tracks ignore further batches.
pub(crate) fn merge_batch(store: &mut SegmentStore, batch: &TrackBatch) -> MergeOutcome {
    for (_, fetched) in &batch.video {
        store.observe_target_duration(fetched.playlist.target_duration);
    }
    if let Some((_, fetched)) = batch.video.first() {
        store.seed_discontinuity_sequence(fetched.playlist.discontinuity_sequence);
    }

    let mut outcome = MergeOutcome::default();
    for (pos, (bandwidth, fetched)) in batch.video.iter().enumerate() {
        let track = store.video_track_mut(*bandwidth);
        let (added, duration) = merge_track(track, fetched, batch.stream_type);
        outcome.new_segments += added;
        if pos == 0 {
            outcome.appended_duration = duration;
        }
    }
    for ((group, language), fetched) in &batch.audio {
        let track = store.audio_track_mut(group, language);
        outcome.new_segments += merge_track(track, fetched, batch.stream_type).0;
    }
    for ((group, language), fetched) in &batch.subtitles {
        let track = store.subtitle_track_mut(group, language);
        outcome.new_segments += merge_track(track, fetched, batch.stream_type).0;
    }

    if outcome.new_segments > 0 {
        debug!(
            added = outcome.new_segments,
            primary_secs = outcome.appended_duration,
            "Merged playlist batch"
        );
    }
    outcome
}

fn merge_track(track: &mut Track, fetched: &FetchedTrack, stream_type: StreamType) -> (usize, f64) {
    if track.is_finalized() {
        return (0, 0.0);
    }

    let playlist = &fetched.playlist;
    let source_count = playlist.segments.len();
    let new_count = new_entry_count(track, fetched, stream_type);

    let mut added = 0usize;
    let mut duration = 0.0f64;
    for raw in playlist.segments.iter().skip(source_count - new_count) {
        let segment = Segment::from_media_segment(raw, track.claim_index(), &fetched.base_url);
        trace!(index = ?segment.index, uri = ?segment.uri, "Appending segment");
        duration += segment.duration.unwrap_or(0.0);
        track.seg_list.push_back(segment);
        added += 1;
    }

    track.media_seq = playlist.media_sequence;
    track.source_seg_count = source_count;
    (added, duration)
}

/// How many entries at the tail of the fetched playlist have not been
/// recorded yet.
///
/// A live window slides, so growth is the change in entry count plus the
/// change in media-sequence. Event and finished playlists only append, so
/// growth is the entry count beyond what was already indexed; that total is
/// read off the index counter, which our own eviction never rewinds.
fn new_entry_count(track: &Track, fetched: &FetchedTrack, stream_type: StreamType) -> usize {
    let playlist = &fetched.playlist;
    let source_count = playlist.segments.len();

    let fresh = track.next_index() == 1 && track.source_seg_count == 0;
    if fresh {
        return source_count;
    }

    let raw = if stream_type == StreamType::Live {
        (source_count as i64 - track.source_seg_count as i64)
            + (playlist.media_sequence as i64 - track.media_seq as i64)
    } else {
        source_count as i64 - (track.next_index() as i64 - 1)
    };
    raw.clamp(0, source_count as i64) as usize
}
