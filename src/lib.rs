//! HLS recording engine.
//!
//! Points a playhead at a live, event, or finished HLS source and maintains a
//! synchronized local copy of every rendition's timeline: video variants,
//! audio and subtitle renditions, encryption keys, ad markers, and timed
//! metadata. Recorded tracks are served back as append-style event playlists
//! with stable, recorder-owned numbering, so the output is playable mid-
//! recording and unaffected by source restarts.
//!
//! ```no_run
//! use hls_recorder::{HlsRecorder, RecorderConfig};
//!
//! # async fn demo() -> Result<(), hls_recorder::RecorderError> {
//! let config = RecorderConfig::default().with_record_duration(120.0);
//! let recorder = HlsRecorder::new("https://example.com/live/master.m3u8", config)?;
//! let (handle, mut events) = recorder.start().await?;
//!
//! while let Some(event) = events.recv().await {
//!     let _snapshot = event?;
//! }
//! let playlist = handle.render_media(800_000);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
mod merge;
pub mod playhead;
mod retry;
pub mod segment;
pub mod serialize;
pub mod store;
mod sync;
mod window;

pub use config::RecorderConfig;
pub use error::RecorderError;
pub use events::{RecorderEvent, StreamType};
pub use fetch::{HttpManifestFetcher, ManifestFetcher};
pub use playhead::{HlsRecorder, PlayheadState, RecorderHandle};
pub use segment::{AdCue, DateRangeInfo, Segment, SegmentKey, SegmentMap};
pub use store::{SegmentStore, Track};
