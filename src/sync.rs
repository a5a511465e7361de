// Multi-rendition fetch with alignment: every tick fetches all track
// playlists together and hands the playhead either one coherent batch or
// nothing at all.

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::events::StreamType;
use crate::fetch::ManifestFetcher;
use crate::retry::{RetryAction, retry_with_backoff};
use futures::future::join_all;
use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist, Playlist};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Bandwidth key used when the source is a bare media playlist with no
/// multivariant wrapper.
pub(crate) const SINGLE_VARIANT_BANDWIDTH: u64 = 1;

/// Resolved track layout discovered from the source.
#[derive(Debug, Clone)]
struct TrackMap {
    video: Vec<(u64, Url)>,
    audio: Vec<((String, String), Url)>,
    subtitles: Vec<((String, String), Url)>,
}

/// One fetched and parsed track playlist, with the base URL its relative
/// segment URIs resolve against.
#[derive(Debug)]
pub(crate) struct FetchedTrack {
    pub playlist: MediaPlaylist,
    pub base_url: Url,
}

/// A coherent snapshot of every track, fetched in one round.
#[derive(Debug)]
pub(crate) struct TrackBatch {
    pub stream_type: StreamType,
    pub video: Vec<(u64, FetchedTrack)>,
    pub audio: Vec<((String, String), FetchedTrack)>,
    pub subtitles: Vec<((String, String), FetchedTrack)>,
}

/// Fetches all track playlists for a source and refuses to release a batch
/// whose live variants disagree on media-sequence. Disagreement and transient
/// transport failures are retried on a fixed delay; a tick that exhausts its
/// retries yields no batch rather than an error, and the next tick starts
/// fresh.
pub(crate) struct VariantSynchronizer {
    fetcher: Arc<dyn ManifestFetcher>,
    config: Arc<RecorderConfig>,
    source: Url,
    track_map: Option<TrackMap>,
    master: Option<MasterPlaylist>,
}

impl VariantSynchronizer {
    pub(crate) fn new(
        fetcher: Arc<dyn ManifestFetcher>,
        config: Arc<RecorderConfig>,
        source: Url,
    ) -> Self {
        Self {
            fetcher,
            config,
            source,
            track_map: None,
            master: None,
        }
    }

    /// The source's multivariant playlist, once discovered. Absent when the
    /// source pointed straight at a media playlist.
    pub(crate) fn master(&self) -> Option<&MasterPlaylist> {
        self.master.as_ref()
    }

    /// Fetch one aligned batch of all track playlists.
    ///
    /// `Ok(None)` means this tick made no progress but the recording should
    /// continue: retries were exhausted on a transient failure, or the token
    /// fired mid-fetch.
    pub(crate) async fn fetch_instant(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Option<TrackBatch>, RecorderError> {
        match self.ensure_track_map(token).await {
            Ok(()) => {}
            Err(RecorderError::Cancelled) => return Ok(None),
            Err(e) => return Err(e),
        }
        let Some(map) = self.track_map.as_ref() else {
            return Err(RecorderError::internal("track map missing after discovery"));
        };

        let policy = self.config.sync_retry_policy();
        let result = retry_with_backoff(&policy, token, |_| async {
            match self.fetch_batch_once(map).await {
                Ok(batch) => RetryAction::Success(batch),
                Err(e) if e.is_retryable() => RetryAction::Retry(e),
                Err(e) => RetryAction::Fail(e),
            }
        })
        .await;

        match result {
            Ok(batch) => Ok(Some(batch)),
            Err(RecorderError::Cancelled) => Ok(None),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Playlist synchronization gave up for this tick");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Discover the track layout on first use. A multivariant source yields
    /// one video track per variant plus any audio and subtitle renditions; a
    /// media-playlist source yields a single video track.
    async fn ensure_track_map(&mut self, token: &CancellationToken) -> Result<(), RecorderError> {
        if self.track_map.is_some() {
            return Ok(());
        }

        let policy = self.config.sync_retry_policy();
        let fetcher = Arc::clone(&self.fetcher);
        let source = self.source.clone();
        let (map, master) = retry_with_backoff(&policy, token, |_| {
            let fetcher = Arc::clone(&fetcher);
            let source = source.clone();
            async move {
                match discover(fetcher.as_ref(), &source).await {
                    Ok(found) => RetryAction::Success(found),
                    Err(e) if e.is_retryable() => RetryAction::Retry(e),
                    Err(e) => RetryAction::Fail(e),
                }
            }
        })
        .await?;

        info!(
            video = map.video.len(),
            audio = map.audio.len(),
            subtitles = map.subtitles.len(),
            multivariant = master.is_some(),
            "Resolved source track layout"
        );
        self.track_map = Some(map);
        self.master = master;
        Ok(())
    }

    /// One fetch round over every track, in layout order. Fails on the first
    /// permanent error, otherwise on the first transient one; live batches
    /// additionally fail as misaligned when variants disagree on
    /// media-sequence.
    async fn fetch_batch_once(&self, map: &TrackMap) -> Result<TrackBatch, RecorderError> {
        let urls: Vec<&Url> = map
            .video
            .iter()
            .map(|(_, url)| url)
            .chain(map.audio.iter().map(|(_, url)| url))
            .chain(map.subtitles.iter().map(|(_, url)| url))
            .collect();

        let texts = join_all(urls.iter().map(|url| self.fetcher.fetch_text(url))).await;

        // Surface a permanent error over a transient one so the caller stops
        // retrying a batch that can never succeed.
        if let Some(fatal) = texts
            .iter()
            .filter_map(|r| r.as_ref().err())
            .find(|e| !e.is_retryable())
        {
            return Err(fatal.clone());
        }
        let texts = texts.into_iter().collect::<Result<Vec<_>, _>>()?;

        let stream_type = batch_stream_type(&texts);

        let mut tracks = Vec::with_capacity(texts.len());
        for (url, text) in urls.iter().zip(&texts) {
            tracks.push(FetchedTrack {
                playlist: parse_media_playlist(text, url)?,
                base_url: base_url_of(url),
            });
        }

        if stream_type == StreamType::Live && tracks.len() > 1 {
            let sequences: Vec<u64> = tracks.iter().map(|t| t.playlist.media_sequence).collect();
            if sequences.windows(2).any(|pair| pair[0] != pair[1]) {
                debug!(?sequences, "Variants disagree on media-sequence");
                return Err(RecorderError::Misaligned { sequences });
            }
        }

        let mut tracks = tracks.into_iter();
        let video = map
            .video
            .iter()
            .map(|(bw, _)| *bw)
            .zip(tracks.by_ref())
            .collect();
        let audio = map
            .audio
            .iter()
            .map(|(key, _)| key.clone())
            .zip(tracks.by_ref())
            .collect();
        let subtitles = map
            .subtitles
            .iter()
            .map(|(key, _)| key.clone())
            .zip(tracks.by_ref())
            .collect();

        Ok(TrackBatch {
            stream_type,
            video,
            audio,
            subtitles,
        })
    }
}

async fn discover(
    fetcher: &dyn ManifestFetcher,
    source: &Url,
) -> Result<(TrackMap, Option<MasterPlaylist>), RecorderError> {
    let text = fetcher.fetch_text(source).await?;
    match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => {
            let map = track_map_from_master(&master, source)?;
            Ok((map, Some(master)))
        }
        Ok(Playlist::MediaPlaylist(_)) => {
            let map = TrackMap {
                video: vec![(SINGLE_VARIANT_BANDWIDTH, source.clone())],
                audio: Vec::new(),
                subtitles: Vec::new(),
            };
            Ok((map, None))
        }
        Err(e) => Err(RecorderError::playlist(format!(
            "failed to parse playlist at {source}: {e}"
        ))),
    }
}

fn track_map_from_master(master: &MasterPlaylist, source: &Url) -> Result<TrackMap, RecorderError> {
    let mut video: Vec<(u64, Url)> = Vec::new();
    for variant in &master.variants {
        if variant.is_i_frame {
            continue;
        }
        if video.iter().any(|(bw, _)| *bw == variant.bandwidth) {
            // Bandwidth is the rendition key in the output; a duplicate
            // would silently shadow the first.
            warn!(
                bandwidth = variant.bandwidth,
                "Skipping variant with duplicate bandwidth"
            );
            continue;
        }
        video.push((variant.bandwidth, resolve_track_url(source, &variant.uri)?));
    }

    let mut audio: Vec<((String, String), Url)> = Vec::new();
    let mut subtitles: Vec<((String, String), Url)> = Vec::new();
    for alternative in &master.alternatives {
        let Some(uri) = alternative.uri.as_deref() else {
            continue;
        };
        let language = alternative
            .language
            .clone()
            .unwrap_or_else(|| alternative.name.clone());
        let key = (alternative.group_id.clone(), language);
        let target = match alternative.media_type {
            AlternativeMediaType::Audio => &mut audio,
            AlternativeMediaType::Subtitles => &mut subtitles,
            _ => continue,
        };
        if target.iter().any(|(existing, _)| *existing == key) {
            continue;
        }
        target.push((key, resolve_track_url(source, uri)?));
    }

    if video.is_empty() {
        return Err(RecorderError::playlist(format!(
            "multivariant playlist at {source} declares no usable variants"
        )));
    }
    Ok(TrackMap {
        video,
        audio,
        subtitles,
    })
}

fn resolve_track_url(source: &Url, uri: &str) -> Result<Url, RecorderError> {
    source
        .join(uri)
        .map_err(|e| RecorderError::playlist(format!("unresolvable track URI `{uri}`: {e}")))
}

fn parse_media_playlist(text: &str, url: &Url) -> Result<MediaPlaylist, RecorderError> {
    match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MediaPlaylist(playlist)) => Ok(playlist),
        Ok(Playlist::MasterPlaylist(_)) => Err(RecorderError::playlist(format!(
            "expected media playlist at {url}, found multivariant"
        ))),
        Err(e) => Err(RecorderError::playlist(format!(
            "failed to parse playlist at {url}: {e}"
        ))),
    }
}

/// Strip the playlist filename, leaving the directory segment URIs resolve
/// against.
fn base_url_of(url: &Url) -> Url {
    url.join(".").unwrap_or_else(|_| url.clone())
}

/// One type for the whole batch: an end marker anywhere finishes the stream,
/// an event declaration anywhere makes it an event, otherwise it is live.
fn batch_stream_type(texts: &[String]) -> StreamType {
    let mut detected = StreamType::Live;
    for text in texts {
        match StreamType::detect(text) {
            StreamType::Vod => return StreamType::Vod,
            StreamType::Event => detected = StreamType::Event,
            _ => {}
        }
    }
    detected
}
