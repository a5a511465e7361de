// The recording playhead: a loop that fetches one aligned batch per tick,
// merges it, enforces the window, and notifies consumers. Consumers interact
// through `RecorderHandle` and the event channel; the store itself is only
// ever touched by the playhead task.

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::events::{RecorderEvent, StreamType};
use crate::fetch::{HttpManifestFetcher, ManifestFetcher};
use crate::merge::merge_batch;
use crate::serialize;
use crate::store::SegmentStore;
use crate::sync::VariantSynchronizer;
use crate::window;
use m3u8_rs::MasterPlaylist;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

/// Lifecycle of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayheadState {
    #[default]
    Idle,
    Running,
    /// Ended normally: source finished, target duration reached, or stopped
    /// by the caller.
    Stopped,
    /// Ended on an unrecoverable error, delivered on the event channel.
    Crashed,
}

/// Entry point: validates the source and starts the recording loop.
pub struct HlsRecorder {
    source: Url,
    config: RecorderConfig,
    fetcher: Arc<dyn ManifestFetcher>,
}

impl HlsRecorder {
    pub fn new(source: &str, config: RecorderConfig) -> Result<Self, RecorderError> {
        let url = validate_source(source)?;
        let fetcher = Arc::new(HttpManifestFetcher::new(config.fetch_timeout));
        Ok(Self {
            source: url,
            config,
            fetcher,
        })
    }

    /// Same as [`new`](Self::new) but with a caller-supplied transport.
    pub fn with_fetcher(
        source: &str,
        config: RecorderConfig,
        fetcher: Arc<dyn ManifestFetcher>,
    ) -> Result<Self, RecorderError> {
        let url = validate_source(source)?;
        Ok(Self {
            source: url,
            config,
            fetcher,
        })
    }

    /// Perform the initial load and spawn the recording loop.
    ///
    /// Resolves once the first batch has been ingested, so a successful
    /// return means the source was reachable and parseable. The receiver
    /// carries snapshot events and, at most once, a fatal error.
    pub async fn start(
        self,
    ) -> Result<
        (
            RecorderHandle,
            mpsc::Receiver<Result<RecorderEvent, RecorderError>>,
        ),
        RecorderError,
    > {
        let (events_tx, events_rx) = mpsc::channel(32);
        let config = Arc::new(self.config);
        let token = CancellationToken::new();
        let snapshot = Arc::new(RwLock::new(Arc::new(SegmentStore::default())));
        let state = Arc::new(RwLock::new(PlayheadState::Running));
        let master = Arc::new(RwLock::new(None));

        let mut playhead = Playhead {
            config: Arc::clone(&config),
            sync: VariantSynchronizer::new(self.fetcher, Arc::clone(&config), self.source),
            store: SegmentStore::default(),
            stream_type: StreamType::None,
            recorded_duration: 0.0,
            events_tx,
            snapshot: Arc::clone(&snapshot),
            state: Arc::clone(&state),
            token: token.clone(),
        };

        // Initial load happens inline so unreachable sources fail fast.
        match playhead.tick().await {
            Ok(added) => {
                *master.write() = playhead.sync.master().cloned();
                info!(stream_type = ?playhead.stream_type, "Recording started");
                playhead.after_tick(added).await;
            }
            Err(e) => {
                *state.write() = PlayheadState::Stopped;
                return Err(e);
            }
        }

        let join = tokio::spawn(playhead.run());
        let handle = RecorderHandle {
            token,
            snapshot,
            state,
            master,
            join: Mutex::new(Some(join)),
        };
        Ok((handle, events_rx))
    }
}

fn validate_source(source: &str) -> Result<Url, RecorderError> {
    let url = Url::parse(source)
        .map_err(|e| RecorderError::invalid_source(source, e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(RecorderError::invalid_source(
            source,
            "only http and https sources are supported",
        ));
    }
    if !url.path().contains(".m3u8") {
        return Err(RecorderError::invalid_source(
            source,
            "source does not point at an .m3u8 playlist",
        ));
    }
    Ok(url)
}

struct Playhead {
    config: Arc<RecorderConfig>,
    sync: VariantSynchronizer,
    store: SegmentStore,
    stream_type: StreamType,
    recorded_duration: f64,
    events_tx: mpsc::Sender<Result<RecorderEvent, RecorderError>>,
    snapshot: Arc<RwLock<Arc<SegmentStore>>>,
    state: Arc<RwLock<PlayheadState>>,
    token: CancellationToken,
}

impl Playhead {
    async fn run(mut self) {
        loop {
            if *self.state.read() != PlayheadState::Running {
                break;
            }
            if self.token.is_cancelled() {
                self.handle_external_stop().await;
                break;
            }

            let started = tokio::time::Instant::now();
            let added = match self.tick().await {
                Ok(added) => added,
                Err(e) => {
                    error!(error = %e, "Recording failed");
                    let _ = self.events_tx.send(Err(e)).await;
                    *self.state.write() = PlayheadState::Crashed;
                    break;
                }
            };
            if self.after_tick(added).await {
                break;
            }

            // Refresh at the pace of the source: one segment duration per
            // tick, minus the time this tick already spent.
            let interval = self
                .store
                .last_primary_duration()
                .map(Duration::from_secs_f64)
                .unwrap_or(self.config.default_segment_duration);
            let sleep_for = interval
                .saturating_sub(started.elapsed())
                .max(self.config.min_tick_interval);
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    self.handle_external_stop().await;
                    break;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// One fetch-merge-window round, returning how many entries were added.
    /// A tick that made no progress (retries exhausted, or cancellation
    /// mid-fetch) is not an error.
    async fn tick(&mut self) -> Result<usize, RecorderError> {
        let Some(batch) = self.sync.fetch_instant(&self.token).await? else {
            self.publish_snapshot();
            return Ok(0);
        };

        // VOD is terminal; a later fetch can never demote it.
        if !self.stream_type.is_vod() {
            self.stream_type = batch.stream_type;
        }

        let merged = merge_batch(&mut self.store, &batch);
        self.recorded_duration += merged.appended_duration;

        if self.stream_type.is_vod() {
            window::finalize(&mut self.store);
        } else if let Some(window_secs) = self.config.effective_window(self.stream_type) {
            window::enforce_window(&mut self.store, window_secs);
        }

        self.publish_snapshot();
        Ok(merged.new_segments)
    }

    /// Post-tick bookkeeping shared by the initial load and the loop.
    /// Returns true when the recording is over.
    async fn after_tick(&mut self, added: usize) -> bool {
        if self.stream_type.is_vod() {
            self.emit_segments().await;
            *self.state.write() = PlayheadState::Stopped;
            info!(
                recorded_secs = self.recorded_duration,
                "Source ended, recording complete"
            );
            return true;
        }

        if let Some(limit) = self.config.record_duration
            && self.recorded_duration >= limit
        {
            let mut finalized = false;
            if self.config.finalize_with_endlist {
                self.stream_type = StreamType::Vod;
                finalized = window::finalize(&mut self.store) > 0;
                self.publish_snapshot();
            }
            if added > 0 || finalized {
                self.emit_segments().await;
            }
            *self.state.write() = PlayheadState::Stopped;
            info!(
                recorded_secs = self.recorded_duration,
                "Target record duration reached"
            );
            return true;
        }

        if added > 0 {
            self.emit_segments().await;
        }
        false
    }

    /// Stop requested through the handle. The recording is sealed with an
    /// end-of-stream marker so the output plays back as a finished asset.
    async fn handle_external_stop(&mut self) {
        let finalized = window::finalize(&mut self.store) > 0;
        if finalized {
            self.stream_type = StreamType::Vod;
        }
        self.publish_snapshot();
        if finalized {
            self.emit_segments().await;
        }
        *self.state.write() = PlayheadState::Stopped;
        info!(
            recorded_secs = self.recorded_duration,
            "Recording stopped by caller"
        );
    }

    fn publish_snapshot(&self) {
        *self.snapshot.write() = Arc::new(self.store.clone());
    }

    async fn emit_segments(&self) {
        let event = RecorderEvent::SegmentsAdded {
            segments: Arc::clone(&self.snapshot.read()),
            stream_type: self.stream_type,
        };
        // A dropped receiver is fine; the handle still works.
        let _ = self.events_tx.send(Ok(event)).await;
    }
}

/// Caller-side control surface for a running recording.
pub struct RecorderHandle {
    token: CancellationToken,
    snapshot: Arc<RwLock<Arc<SegmentStore>>>,
    state: Arc<RwLock<PlayheadState>>,
    master: Arc<RwLock<Option<MasterPlaylist>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RecorderHandle {
    /// Request a stop. The playhead finalizes the recording and transitions
    /// to [`PlayheadState::Stopped`]; await [`join`](Self::join) to observe
    /// completion.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for the recording loop to finish. Later calls return
    /// immediately; the handle stays usable for state and render queries
    /// afterwards.
    pub async fn join(&self) {
        let task = self.join.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn state(&self) -> PlayheadState {
        *self.state.read()
    }

    /// The latest published snapshot of recorded segments.
    pub fn segments(&self) -> Arc<SegmentStore> {
        Arc::clone(&self.snapshot.read())
    }

    /// Render the recorded video track for `bandwidth` as playlist text.
    pub fn render_media(&self, bandwidth: u64) -> Option<String> {
        serialize::render_media(&self.segments(), bandwidth)
    }

    pub fn render_audio(&self, group: &str, language: &str) -> Option<String> {
        serialize::render_audio(&self.segments(), group, language)
    }

    pub fn render_subtitle(&self, group: &str, language: &str) -> Option<String> {
        serialize::render_subtitle(&self.segments(), group, language)
    }

    /// Render the multivariant playlist with URIs rewritten to the
    /// recorder's naming scheme. `None` for single-variant sources.
    pub fn render_multivariant(&self) -> Option<String> {
        self.master
            .read()
            .as_ref()
            .and_then(serialize::render_multivariant)
    }
}

impl fmt::Debug for RecorderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
