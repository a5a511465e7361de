use crate::store::SegmentStore;
use std::sync::Arc;

/// Playlist type detected from the most recent fetch batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamType {
    /// Nothing fetched yet.
    #[default]
    None,
    /// Sliding-window live playlist.
    Live,
    /// Append-only event playlist.
    Event,
    /// Finished playlist carrying an explicit end marker. Terminal.
    Vod,
}

impl StreamType {
    /// Classify raw playlist text. An explicit end marker wins over an
    /// event-type declaration; absence of both implies a live playlist.
    pub fn detect(text: &str) -> Self {
        if text.contains("#EXT-X-ENDLIST") {
            Self::Vod
        } else if text.contains("#EXT-X-PLAYLIST-TYPE:EVENT") {
            Self::Event
        } else {
            Self::Live
        }
    }

    pub fn is_vod(self) -> bool {
        self == Self::Vod
    }
}

/// Notifications delivered to recorder consumers.
///
/// Snapshots are immutable: the playhead clones its state into an `Arc` before
/// sending, so consumers can never observe (or cause) a mid-tick mutation.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// At least one track received new entries this tick, or the store was
    /// just finalized with an end-of-stream marker.
    SegmentsAdded {
        segments: Arc<SegmentStore>,
        stream_type: StreamType,
    },
}
