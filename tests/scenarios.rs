// End-to-end recorder scenarios against scripted sources. Time is paused so
// the tick pacing runs on the test clock.

use async_trait::async_trait;
use hls_recorder::{
    HlsRecorder, ManifestFetcher, PlayheadState, RecorderConfig, RecorderError, StreamType,
};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use url::Url;

/// Scripted playlist source: each URL serves its queued responses in order
/// and then repeats the last one forever.
#[derive(Default)]
struct MockSource {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MockSource {
    fn script(self, url: &str, steps: Vec<String>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
        self
    }
}

#[async_trait]
impl ManifestFetcher for MockSource {
    async fn fetch_text(&self, url: &Url) -> Result<String, RecorderError> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(url.as_str())
            .ok_or_else(|| RecorderError::playlist(format!("no script for {url}")))?;
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_default())
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| RecorderError::playlist(format!("script for {url} is empty")))
        }
    }
}

fn live_playlist(media_sequence: u64, duration: f64, names: &[String]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-TARGETDURATION:10\n");
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{media_sequence}");
    for name in names {
        let _ = writeln!(out, "#EXTINF:{duration:.1},");
        let _ = writeln!(out, "{name}");
    }
    out
}

/// Live playlists for `rounds` consecutive fetches: the window slides by one
/// segment per fetch.
fn sliding_script(prefix: &str, start: u64, window: usize, rounds: usize, duration: f64) -> Vec<String> {
    (0..rounds)
        .map(|round| {
            let media_sequence = start + round as u64;
            let names: Vec<String> = (media_sequence..media_sequence + window as u64)
                .map(|i| format!("{prefix}-{i}.ts"))
                .collect();
            live_playlist(media_sequence, duration, &names)
        })
        .collect()
}

fn event_playlist(count: usize, duration: f64, ended: bool) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-PLAYLIST-TYPE:EVENT\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for i in 1..=count {
        let _ = writeln!(out, "#EXTINF:{duration:.1},");
        let _ = writeln!(out, "seg-{i}.ts");
    }
    if ended {
        out.push_str("#EXT-X-ENDLIST\n");
    }
    out
}

const MASTER: &str = concat!(
    "#EXTM3U\n",
    "#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n",
    "v800/playlist.m3u8\n",
    "#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n",
    "v2000/playlist.m3u8\n",
);

#[tokio::test(start_paused = true)]
async fn live_recording_stops_at_target_duration() {
    let source = MockSource::default()
        .script("https://origin.test/live/master.m3u8", vec![MASTER.to_string()])
        .script(
            "https://origin.test/live/v800/playlist.m3u8",
            sliding_script("v800", 100, 3, 20, 10.0),
        )
        .script(
            "https://origin.test/live/v2000/playlist.m3u8",
            sliding_script("v2000", 100, 3, 20, 10.0),
        );

    let config = RecorderConfig::default()
        .with_record_duration(120.0)
        .with_endlist_on_stop(true);
    let recorder = HlsRecorder::with_fetcher(
        "https://origin.test/live/master.m3u8",
        config,
        Arc::new(source),
    )
    .unwrap();

    let (handle, mut events) = recorder.start().await.unwrap();
    let mut saw_vod = false;
    while let Some(event) = events.recv().await {
        let Ok(hls_recorder::RecorderEvent::SegmentsAdded { stream_type, .. }) = event else {
            panic!("unexpected error event");
        };
        if stream_type == StreamType::Vod {
            saw_vod = true;
        }
    }
    assert!(saw_vod);
    assert_eq!(handle.state(), PlayheadState::Stopped);

    // Preload takes the 3-segment window, then one segment per tick until
    // 120 seconds of primary media are recorded.
    let low = handle.render_media(800_000).unwrap();
    let high = handle.render_media(2_000_000).unwrap();
    for text in [&low, &high] {
        assert_eq!(text.matches("#EXTINF").count(), 12);
        assert!(text.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));
        assert!(text.ends_with("#EXT-X-ENDLIST\n"));
    }
    // Recorder numbering starts at the first observed segment, whatever the
    // source's media-sequence said.
    assert!(low.contains("https://origin.test/live/v800/v800-100.ts"));
    assert!(high.contains("https://origin.test/live/v2000/v2000-100.ts"));

    let multivariant = handle.render_multivariant().unwrap();
    assert!(multivariant.contains("master800000.m3u8"));
    assert!(multivariant.contains("master2000000.m3u8"));

    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn event_source_ends_with_endlist() {
    let source = MockSource::default().script(
        "https://origin.test/event/playlist.m3u8",
        vec![
            event_playlist(5, 10.0, false),
            event_playlist(10, 10.0, false),
            event_playlist(15, 10.0, true),
        ],
    );
    let recorder = HlsRecorder::with_fetcher(
        "https://origin.test/event/playlist.m3u8",
        RecorderConfig::default(),
        Arc::new(source),
    )
    .unwrap();

    let (handle, mut events) = recorder.start().await.unwrap();
    while let Some(event) = events.recv().await {
        event.unwrap();
    }
    handle.join().await;
    // The handle stays queryable after join; a second join is a no-op.
    handle.join().await;
    assert_eq!(handle.state(), PlayheadState::Stopped);

    let text = handle.render_media(1).unwrap();
    assert_eq!(text.matches("#EXTINF").count(), 15);
    assert!(text.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));
    assert!(text.contains("https://origin.test/event/seg-1.ts"));
    assert!(text.contains("https://origin.test/event/seg-15.ts"));
    assert!(text.ends_with("#EXT-X-ENDLIST\n"));
}

#[tokio::test(start_paused = true)]
async fn sliding_window_evicts_and_renumbers() {
    let source = MockSource::default().script(
        "https://origin.test/live/playlist.m3u8",
        sliding_script("seg", 0, 3, 40, 10.0),
    );
    let config = RecorderConfig::default().with_window_size(60.0);
    let recorder = HlsRecorder::with_fetcher(
        "https://origin.test/live/playlist.m3u8",
        config,
        Arc::new(source),
    )
    .unwrap();

    let (handle, mut events) = recorder.start().await.unwrap();
    let mut received = 0;
    while let Some(event) = events.recv().await {
        event.unwrap();
        received += 1;
        if received == 12 {
            handle.stop();
        }
    }
    handle.join().await;
    assert_eq!(handle.state(), PlayheadState::Stopped);

    let snapshot = handle.segments();
    let track = snapshot.video_track(1).unwrap();
    assert!(track.is_finalized());
    // 10-second segments against a 60-second window: at most 6 retained.
    assert!(track.indexed_count() <= 6);
    // Output media-sequence counts evictions, and indexes stay monotonic:
    // the oldest retained entry is always eviction count + 1.
    assert!(snapshot.media_sequence > 0);
    assert_eq!(track.seg_list[0].index, Some(snapshot.media_sequence + 1));

    let text = handle.render_media(1).unwrap();
    assert!(text.contains(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", snapshot.media_sequence)));
    assert!(text.ends_with("#EXT-X-ENDLIST\n"));
}

#[tokio::test(start_paused = true)]
async fn misaligned_variants_retry_until_agreement() {
    let laggard = sliding_script("a", 5, 3, 1, 10.0);
    let current = sliding_script("a", 6, 3, 1, 10.0);
    let source = MockSource::default()
        .script("https://origin.test/live/master.m3u8", vec![MASTER.to_string()])
        .script(
            "https://origin.test/live/v800/playlist.m3u8",
            vec![
                laggard[0].clone(),
                laggard[0].clone(),
                current[0].clone(),
            ],
        )
        .script(
            "https://origin.test/live/v2000/playlist.m3u8",
            sliding_script("b", 6, 3, 1, 10.0),
        );
    let recorder = HlsRecorder::with_fetcher(
        "https://origin.test/live/master.m3u8",
        RecorderConfig::default(),
        Arc::new(source),
    )
    .unwrap();

    let (handle, mut events) = recorder.start().await.unwrap();
    handle.stop();
    while events.recv().await.is_some() {}
    handle.join().await;

    // The two misaligned rounds were discarded whole; only the agreeing
    // round was merged, exactly once.
    let snapshot = handle.segments();
    let track = snapshot.video_track(800_000).unwrap();
    assert_eq!(track.indexed_count(), 3);
    assert_eq!(track.media_seq, 6);
    assert_eq!(
        track.seg_list[0].uri.as_deref(),
        Some("https://origin.test/live/v800/a-6.ts")
    );
    assert_eq!(
        snapshot.video_track(2_000_000).unwrap().indexed_count(),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn markers_survive_into_rendered_output() {
    let playlist = concat!(
        "#EXTM3U\n",
        "#EXT-X-VERSION:6\n",
        "#EXT-X-TARGETDURATION:10\n",
        "#EXT-X-MEDIA-SEQUENCE:0\n",
        "#EXT-X-KEY:METHOD=AES-128,URI=\"../keys/k1.bin\",IV=0x9c7db8778570d05c3177c349fd9236aa,KEYFORMAT=\"identity\"\n",
        "#EXT-X-PROGRAM-DATE-TIME:2026-01-10T12:00:00+00:00\n",
        "#EXTINF:10.0,\n",
        "seg-1.ts\n",
        "#EXT-OATCLS-SCTE35:/DA0AAAAAAAA\n",
        "#EXT-X-CUE-OUT:DURATION=30\n",
        "#EXTINF:10.0,\n",
        "seg-2.ts\n",
        "#EXT-X-CUE-IN\n",
        "#EXTINF:10.0,\n",
        "seg-3.ts\n",
        "#EXT-X-ENDLIST\n",
    );
    let source = MockSource::default().script(
        "https://origin.test/vod/media/playlist.m3u8",
        vec![playlist.to_string()],
    );
    let recorder = HlsRecorder::with_fetcher(
        "https://origin.test/vod/media/playlist.m3u8",
        RecorderConfig::default(),
        Arc::new(source),
    )
    .unwrap();

    let (handle, mut events) = recorder.start().await.unwrap();
    while events.recv().await.is_some() {}
    handle.join().await;
    assert_eq!(handle.state(), PlayheadState::Stopped);

    let text = handle.render_media(1).unwrap();
    assert!(text.contains(
        "#EXT-X-KEY:METHOD=AES-128,URI=\"https://origin.test/vod/keys/k1.bin\",IV=0x9c7db8778570d05c3177c349fd9236aa,KEYFORMAT=\"identity\"\n"
    ));
    assert!(text.contains("#EXT-X-PROGRAM-DATE-TIME:2026-01-10T12:00:00+00:00\n"));
    assert!(text.contains("#EXT-OATCLS-SCTE35:/DA0AAAAAAAA\n"));
    assert!(text.contains("#EXT-X-CUE-OUT:DURATION=30\n"));
    assert!(text.contains("#EXT-X-CUE-IN\n"));
    assert!(text.contains("https://origin.test/vod/media/seg-1.ts\n"));

    // The rendered playlist is itself valid and re-parseable.
    let parsed = m3u8_rs::parse_playlist_res(text.as_bytes()).unwrap();
    let m3u8_rs::Playlist::MediaPlaylist(media) = parsed else {
        panic!("rendered output is not a media playlist");
    };
    assert_eq!(media.segments.len(), 3);
    let key = media.segments[0].key.as_ref().unwrap();
    assert_eq!(
        key.uri.as_deref(),
        Some("https://origin.test/vod/keys/k1.bin")
    );
}

#[tokio::test(start_paused = true)]
async fn unreachable_source_fails_start() {
    let recorder = HlsRecorder::with_fetcher(
        "https://origin.test/missing/playlist.m3u8",
        RecorderConfig::default(),
        Arc::new(MockSource::default()),
    )
    .unwrap();
    let err = recorder.start().await.unwrap_err();
    assert!(matches!(err, RecorderError::Playlist { .. }));
}
