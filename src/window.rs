// Post-merge housekeeping: sliding-window enforcement and end-of-stream
// finalization.

use crate::segment::Segment;
use crate::store::SegmentStore;
use tracing::trace;

/// Evict oldest entries until the primary track's retained duration fits
/// inside `window_secs`. Eviction stops early if any track cannot give up an
/// entry, so renditions never drift apart.
pub(crate) fn enforce_window(store: &mut SegmentStore, window_secs: f64) {
    while store.primary_duration() > window_secs {
        if !store.evict_oldest() {
            break;
        }
        trace!(
            media_sequence = store.media_sequence,
            retained_secs = store.primary_duration(),
            "Evicted oldest segment"
        );
    }
}

/// Append the end-of-stream sentinel to every track that does not already
/// carry one. Returns how many tracks were finalized; zero means the store
/// was already fully finalized and nothing changed.
pub(crate) fn finalize(store: &mut SegmentStore) -> usize {
    let mut finalized = 0;
    let bandwidths: Vec<u64> = store.video_bandwidths().collect();
    for bandwidth in bandwidths {
        let track = store.video_track_mut(bandwidth);
        if !track.is_finalized() {
            track.seg_list.push_back(Segment::endlist());
            finalized += 1;
        }
    }
    let audio_keys: Vec<(String, String)> = store
        .audio_tracks()
        .iter()
        .map(|(key, _)| key.clone())
        .collect();
    for (group, language) in audio_keys {
        let track = store.audio_track_mut(&group, &language);
        if !track.is_finalized() {
            track.seg_list.push_back(Segment::endlist());
            finalized += 1;
        }
    }
    let subtitle_keys: Vec<(String, String)> = store
        .subtitle_tracks()
        .iter()
        .map(|(key, _)| key.clone())
        .collect();
    for (group, language) in subtitle_keys {
        let track = store.subtitle_track_mut(&group, &language);
        if !track.is_finalized() {
            track.seg_list.push_back(Segment::endlist());
            finalized += 1;
        }
    }
    finalized
}
