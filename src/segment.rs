// Canonical segment model: one playlist entry with its marker tags folded in,
// URIs resolved to absolute form at ingestion time.

use chrono::{DateTime, FixedOffset};
use m3u8_rs::{KeyMethod, MediaSegment};
use tracing::error;
use url::Url;

/// Encryption descriptor attached to an entry. The key URI is absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentKey {
    pub method: KeyMethod,
    pub uri: Option<String>,
    pub iv: Option<String>,
    pub keyformat: Option<String>,
    pub keyformatversions: Option<String>,
}

/// Fragmented-container initialization descriptor. The init URI is absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMap {
    pub uri: String,
    pub byte_range: Option<m3u8_rs::ByteRange>,
}

/// Named timed-metadata interval.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRangeInfo {
    pub id: String,
    pub class: Option<String>,
    pub start_date: DateTime<FixedOffset>,
    pub end_date: Option<DateTime<FixedOffset>>,
    pub duration: Option<f64>,
    pub planned_duration: Option<f64>,
    pub end_on_next: bool,
}

/// Ad-marker descriptor assembled from the cue tag family.
#[derive(Debug, Clone, PartialEq)]
pub struct AdCue {
    pub out: bool,
    pub r#in: bool,
    /// Elapsed seconds into the break, present only for continuation tags.
    pub cont: Option<f64>,
    pub duration: f64,
    /// Opaque SCTE-35 signaling payload, carried verbatim.
    pub scte_data: Option<String>,
    pub asset_data: Option<String>,
}

/// One addressable unit of a rendition's timeline.
///
/// `index` is assigned by the recorder and is independent of the source's
/// media-sequence numbering, so re-serialized output stays stable across
/// source restarts. The `endlist` sentinel carries no URI, duration or index
/// and is always the last entry of a finalized track.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segment {
    pub index: Option<u64>,
    pub duration: Option<f64>,
    pub uri: Option<String>,
    pub discontinuity: bool,
    pub key: Option<SegmentKey>,
    pub map: Option<SegmentMap>,
    pub datetime: Option<DateTime<FixedOffset>>,
    pub daterange: Option<DateRangeInfo>,
    pub cue: Option<AdCue>,
    pub endlist: bool,
}

impl Segment {
    /// The end-of-stream sentinel.
    pub fn endlist() -> Self {
        Self {
            endlist: true,
            ..Self::default()
        }
    }

    /// Normalize one parsed playlist entry. Relative URIs (segment, key, map)
    /// are resolved against the playlist's base URL; marker attributes are
    /// populated only when the corresponding source tag is present.
    pub fn from_media_segment(raw: &MediaSegment, index: u64, base_url: &Url) -> Self {
        let key = raw.key.as_ref().map(|key| SegmentKey {
            method: key.method.clone(),
            uri: key.uri.as_deref().map(|uri| resolve_uri(base_url, uri)),
            iv: key.iv.clone(),
            keyformat: key.keyformat.clone(),
            keyformatversions: key.keyformatversions.clone(),
        });

        let map = raw.map.as_ref().map(|map| SegmentMap {
            uri: resolve_uri(base_url, &map.uri),
            byte_range: map.byte_range.clone(),
        });

        let daterange = raw.daterange.as_ref().map(|dr| DateRangeInfo {
            id: dr.id.clone(),
            class: dr.class.clone(),
            start_date: dr.start_date,
            end_date: dr.end_date,
            duration: dr.duration,
            planned_duration: dr.planned_duration,
            end_on_next: dr.end_on_next,
        });

        Self {
            index: Some(index),
            duration: Some(raw.duration as f64),
            uri: Some(resolve_uri(base_url, &raw.uri)),
            discontinuity: raw.discontinuity,
            key,
            map,
            datetime: raw.program_date_time,
            daterange,
            cue: parse_cue_tags(raw),
            endlist: false,
        }
    }

    /// A media entry, as opposed to the endlist sentinel.
    pub fn is_media(&self) -> bool {
        self.index.is_some()
    }
}

/// Resolve a possibly-relative URI against a base URL. Already-absolute URIs
/// pass through untouched; an unresolvable URI is kept as-is rather than
/// dropping the entry.
pub(crate) fn resolve_uri(base_url: &Url, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    match base_url.join(uri) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            error!("Failed to resolve URI '{uri}' against '{base_url}': {e}");
            uri.to_string()
        }
    }
}

// Cue tags are not first-class in the parser; they arrive as raw `#EXT-*`
// tag/rest pairs attached to the segment they precede.
fn parse_cue_tags(raw: &MediaSegment) -> Option<AdCue> {
    let mut out = false;
    let mut cue_in = false;
    let mut cont: Option<f64> = None;
    let mut duration = 0.0;
    let mut scte_data: Option<String> = None;
    let mut asset_data: Option<String> = None;

    for tag in &raw.unknown_tags {
        match tag.tag.as_str() {
            "X-CUE-IN" => cue_in = true,
            "X-CUE-OUT" => {
                out = true;
                if let Some(rest) = tag.rest.as_deref() {
                    duration = parse_cue_out_duration(rest).unwrap_or(duration);
                }
            }
            "X-CUE-OUT-CONT" => {
                if let Some(rest) = tag.rest.as_deref() {
                    let (elapsed, total, scte) = parse_cue_out_cont(rest);
                    cont = elapsed;
                    if let Some(total) = total {
                        duration = total;
                    }
                    if scte.is_some() {
                        scte_data = scte;
                    }
                } else {
                    cont = Some(0.0);
                }
            }
            "OATCLS-SCTE35" => scte_data = tag.rest.clone(),
            "X-ASSET" => asset_data = tag.rest.clone(),
            _ => {}
        }
    }

    if out || cue_in || cont.is_some() || asset_data.is_some() {
        Some(AdCue {
            out,
            r#in: cue_in,
            cont,
            duration,
            scte_data,
            asset_data,
        })
    } else {
        None
    }
}

/// `#EXT-X-CUE-OUT` payload: either a bare duration or `DURATION=n`.
fn parse_cue_out_duration(rest: &str) -> Option<f64> {
    let value = rest
        .split(',')
        .find_map(|part| {
            let (k, v) = part.split_once('=')?;
            k.trim().eq_ignore_ascii_case("DURATION").then_some(v)
        })
        .unwrap_or(rest);
    value.trim().parse::<f64>().ok()
}

/// `#EXT-X-CUE-OUT-CONT` payload: `ElapsedTime=e,Duration=d,SCTE35=s`
/// attribute form, or the compact `elapsed/duration` form.
fn parse_cue_out_cont(rest: &str) -> (Option<f64>, Option<f64>, Option<String>) {
    if rest.contains('=') {
        let mut elapsed = None;
        let mut duration = None;
        let mut scte = None;
        for part in rest.split(',') {
            let Some((k, v)) = part.split_once('=') else {
                continue;
            };
            let key = k.trim();
            let value = v.trim();
            if key.eq_ignore_ascii_case("ElapsedTime") {
                elapsed = value.parse::<f64>().ok();
            } else if key.eq_ignore_ascii_case("Duration") {
                duration = value.parse::<f64>().ok();
            } else if key.eq_ignore_ascii_case("SCTE35") {
                scte = Some(value.to_string());
            }
        }
        (elapsed, duration, scte)
    } else if let Some((elapsed, duration)) = rest.split_once('/') {
        (
            elapsed.trim().parse::<f64>().ok(),
            duration.trim().parse::<f64>().ok(),
            None,
        )
    } else {
        (rest.trim().parse::<f64>().ok(), None, None)
    }
}
