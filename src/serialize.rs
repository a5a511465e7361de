// Playlist output. Recorded tracks are rendered as append-style event
// playlists; the multivariant playlist is re-emitted with track URIs
// rewritten to the recorder's own naming scheme.

use crate::store::{SegmentStore, Track};
use m3u8_rs::{AlternativeMediaType, KeyMethod, MasterPlaylist};
use std::fmt::Write as _;

/// Output playlist for the video track at `bandwidth`. `None` when the track
/// is unknown, still empty, or the video tracks are momentarily out of step
/// with each other.
pub fn render_media(store: &SegmentStore, bandwidth: u64) -> Option<String> {
    if !counts_agree(store.video_tracks().iter().map(|(_, t)| t)) {
        return None;
    }
    let track = store.video_track(bandwidth)?;
    render_track(store, track)
}

/// Output playlist for the audio track keyed by `(group, language)`.
pub fn render_audio(store: &SegmentStore, group: &str, language: &str) -> Option<String> {
    if !counts_agree(store.audio_tracks().iter().map(|(_, t)| t)) {
        return None;
    }
    let track = store.audio_track(group, language)?;
    render_track(store, track)
}

/// Output playlist for the subtitle track keyed by `(group, language)`.
pub fn render_subtitle(store: &SegmentStore, group: &str, language: &str) -> Option<String> {
    if !counts_agree(store.subtitle_tracks().iter().map(|(_, t)| t)) {
        return None;
    }
    let track = store.subtitle_track(group, language)?;
    render_track(store, track)
}

/// Re-emit the source's multivariant playlist with every track URI pointing
/// at the recorder's own playlists: `master{bandwidth}.m3u8` for variants and
/// `master-{group}_{language}.m3u8` for alternative renditions. I-frame
/// variants are dropped since the recorder keeps no track for them.
pub fn render_multivariant(master: &MasterPlaylist) -> Option<String> {
    let mut rewritten = master.clone();
    rewritten.variants.retain(|variant| !variant.is_i_frame);
    for variant in &mut rewritten.variants {
        variant.uri = format!("master{}.m3u8", variant.bandwidth);
    }
    for alternative in &mut rewritten.alternatives {
        if alternative.uri.is_none() {
            continue;
        }
        if !matches!(
            alternative.media_type,
            AlternativeMediaType::Audio | AlternativeMediaType::Subtitles
        ) {
            continue;
        }
        let language = alternative
            .language
            .clone()
            .unwrap_or_else(|| alternative.name.clone());
        alternative.uri = Some(format!("master-{}_{}.m3u8", alternative.group_id, language));
    }

    let mut buf: Vec<u8> = Vec::new();
    rewritten.write_to(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

fn counts_agree<'a>(tracks: impl Iterator<Item = &'a Track>) -> bool {
    let mut counts = tracks.map(Track::indexed_count);
    let Some(first) = counts.next() else {
        return true;
    };
    counts.all(|count| count == first)
}

fn render_track(store: &SegmentStore, track: &Track) -> Option<String> {
    if track.seg_list.is_empty() {
        return None;
    }

    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:EVENT\n");
    out.push_str("#EXT-X-VERSION:6\n");
    out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", store.target_duration);
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", store.media_sequence);
    if store.discontinuity_sequence > 0 {
        let _ = writeln!(
            out,
            "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
            store.discontinuity_sequence
        );
    }

    for segment in &track.seg_list {
        if segment.endlist {
            out.push_str("#EXT-X-ENDLIST\n");
            continue;
        }

        if let Some(map) = &segment.map {
            let _ = write!(out, "#EXT-X-MAP:URI=\"{}\"", map.uri);
            if let Some(byte_range) = &map.byte_range {
                let _ = write!(out, ",BYTERANGE=\"{}", byte_range.length);
                if let Some(offset) = byte_range.offset {
                    let _ = write!(out, "@{offset}");
                }
                out.push('"');
            }
            out.push('\n');
        }

        if segment.discontinuity {
            out.push_str("#EXT-X-DISCONTINUITY\n");
        }

        if let Some(cue) = &segment.cue {
            if cue.r#in {
                out.push_str("#EXT-X-CUE-IN\n");
            }
            if cue.out {
                if let Some(scte) = &cue.scte_data {
                    let _ = writeln!(out, "#EXT-OATCLS-SCTE35:{scte}");
                }
                if let Some(asset) = &cue.asset_data {
                    let _ = writeln!(out, "#EXT-X-ASSET:{asset}");
                }
                let _ = writeln!(out, "#EXT-X-CUE-OUT:DURATION={}", cue.duration);
            }
            if let Some(elapsed) = cue.cont {
                if let Some(scte) = &cue.scte_data {
                    let _ = writeln!(
                        out,
                        "#EXT-X-CUE-OUT-CONT:ElapsedTime={elapsed},Duration={},SCTE35={scte}",
                        cue.duration
                    );
                } else {
                    let _ = writeln!(out, "#EXT-X-CUE-OUT-CONT:{elapsed}/{}", cue.duration);
                }
            }
        }

        let timestamp = segment
            .datetime
            .or(segment.daterange.as_ref().map(|dr| dr.start_date));
        if let Some(timestamp) = timestamp {
            let _ = writeln!(out, "#EXT-X-PROGRAM-DATE-TIME:{}", timestamp.to_rfc3339());
        }

        if let Some(daterange) = &segment.daterange {
            let _ = write!(out, "#EXT-X-DATERANGE:ID=\"{}\"", daterange.id);
            if let Some(class) = &daterange.class {
                let _ = write!(out, ",CLASS=\"{class}\"");
            }
            let _ = write!(
                out,
                ",START-DATE=\"{}\"",
                daterange.start_date.to_rfc3339()
            );
            if let Some(end_date) = &daterange.end_date {
                let _ = write!(out, ",END-DATE=\"{}\"", end_date.to_rfc3339());
            }
            if let Some(duration) = daterange.duration {
                let _ = write!(out, ",DURATION={duration:.3}");
            }
            if let Some(planned) = daterange.planned_duration {
                let _ = write!(out, ",PLANNED-DURATION={planned:.3}");
            }
            if daterange.end_on_next {
                out.push_str(",END-ON-NEXT=YES");
            }
            out.push('\n');
        }

        if let Some(key) = &segment.key {
            let method = match &key.method {
                KeyMethod::None => "NONE",
                KeyMethod::AES128 => "AES-128",
                KeyMethod::SampleAES => "SAMPLE-AES",
                KeyMethod::Other(other) => other.as_str(),
            };
            let _ = write!(out, "#EXT-X-KEY:METHOD={method}");
            if let Some(uri) = &key.uri {
                let _ = write!(out, ",URI=\"{uri}\"");
            }
            if let Some(iv) = &key.iv {
                let _ = write!(out, ",IV={iv}");
            }
            if let Some(keyformat) = &key.keyformat {
                let _ = write!(out, ",KEYFORMAT=\"{keyformat}\"");
            }
            if let Some(versions) = &key.keyformatversions {
                let _ = write!(out, ",KEYFORMATVERSIONS=\"{versions}\"");
            }
            out.push('\n');
        }

        if let (Some(duration), Some(uri)) = (segment.duration, &segment.uri) {
            let _ = writeln!(out, "#EXTINF:{duration:.3},");
            let _ = writeln!(out, "{uri}");
        }
    }

    Some(out)
}
