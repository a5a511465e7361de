use crate::events::StreamType;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Per-fetch timeout applied to every playlist request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(3000);
/// Delay between synchronization retries when variants disagree or a fetch fails.
pub const DEFAULT_SYNC_RETRY_DELAY: Duration = Duration::from_millis(1500);
/// Attempts before a tick is abandoned with no progress.
pub const DEFAULT_SYNC_RETRY_ATTEMPTS: u32 = 10;
/// Tick cadence used before the first segment duration is known.
pub const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_secs(6);
/// Sliding window applied to live sources that did not configure one.
pub const DEFAULT_LIVE_WINDOW_SECS: f64 = 300.0;

/// Recorder behavior knobs.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Stop recording once this many seconds of primary-track media have been
    /// ingested. `None` records until the source ends or `stop()` is called.
    pub record_duration: Option<f64>,

    /// Sliding window size in seconds. `None` means unbounded for event/VOD
    /// sources; live sources fall back to [`DEFAULT_LIVE_WINDOW_SECS`] so a
    /// live recording can never grow without bound.
    pub window_size: Option<f64>,

    /// Append an end-of-stream marker when the recording stops because the
    /// target record duration was reached.
    pub finalize_with_endlist: bool,

    /// Reserved: ingest VOD sources at real-time pace. Accepted but not acted
    /// upon by the current playhead.
    pub vod_real_time: bool,

    /// Independent timeout for each playlist fetch.
    pub fetch_timeout: Duration,

    /// Maximum attempts per tick to obtain one aligned batch of playlists.
    pub sync_retry_attempts: u32,

    /// Fixed backoff between synchronization attempts.
    pub sync_retry_delay: Duration,

    /// Tick interval fallback when the last segment duration is unknown.
    pub default_segment_duration: Duration,

    /// Lower bound on the tick interval so the playhead never busy-spins.
    pub min_tick_interval: Duration,

    /// Window applied to live sources when `window_size` is unset.
    pub live_default_window: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_duration: None,
            window_size: None,
            finalize_with_endlist: false,
            vod_real_time: false,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            sync_retry_attempts: DEFAULT_SYNC_RETRY_ATTEMPTS,
            sync_retry_delay: DEFAULT_SYNC_RETRY_DELAY,
            default_segment_duration: DEFAULT_SEGMENT_DURATION,
            min_tick_interval: Duration::from_millis(2),
            live_default_window: DEFAULT_LIVE_WINDOW_SECS,
        }
    }
}

impl RecorderConfig {
    pub fn with_record_duration(mut self, seconds: f64) -> Self {
        self.record_duration = Some(seconds);
        self
    }

    pub fn with_window_size(mut self, seconds: f64) -> Self {
        self.window_size = Some(seconds);
        self
    }

    pub fn with_endlist_on_stop(mut self, enabled: bool) -> Self {
        self.finalize_with_endlist = enabled;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Retry policy for the synchronizer: a fixed delay, no jitter, no
    /// exponential growth. Divergent variants converge on the origin's next
    /// update, so backing off further only adds latency.
    pub(crate) fn sync_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.sync_retry_attempts, self.sync_retry_delay)
    }

    /// The window to enforce after a merge, if any.
    pub(crate) fn effective_window(&self, stream_type: StreamType) -> Option<f64> {
        match self.window_size {
            Some(size) => Some(size),
            None if stream_type == StreamType::Live => Some(self.live_default_window),
            None => None,
        }
    }
}
