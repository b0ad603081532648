#![forbid(unsafe_code)]

//! Typed video rows shared by every phase of a run.
//!
//! A run builds [`VideoSnapshot`]s from the platform, turns them into enriched
//! [`VideoRecord`]s and later pairs each record with [`GeneratedMetadata`].
//! Nothing here touches the network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Appended to every description we write. Videos carrying it are never
/// processed again.
pub const PROCESSED_MARKER: &str = "\n#atualizado";

/// Platform limit for a video description, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 5000;
/// Platform limit for the comma-joined tag list, in characters.
pub const MAX_TAGS_CHARS: usize = 500;
/// Longest single tag we keep, in characters.
pub const MAX_TAG_CHARS: usize = 30;

/// Separator used whenever a tag list is flattened into one string.
pub const TAG_SEPARATOR: &str = ", ";

/// Label used for category codes missing from [`CATEGORIES`].
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// YouTube video categories as exposed by `videoCategories.list`.
pub const CATEGORIES: &[(u32, &str)] = &[
    (1, "Film & Animation"),
    (2, "Autos & Vehicles"),
    (10, "Music"),
    (15, "Pets & Animals"),
    (17, "Sports"),
    (18, "Short Movies"),
    (19, "Travel & Events"),
    (20, "Gaming"),
    (21, "Videoblogging"),
    (22, "People & Blogs"),
    (23, "Comedy"),
    (24, "Entertainment"),
    (25, "News & Politics"),
    (26, "Howto & Style"),
    (27, "Education"),
    (28, "Science & Technology"),
    (29, "Nonprofits & Activism"),
    (30, "Movies"),
    (31, "Anime/Animation"),
    (32, "Action/Adventure"),
    (33, "Classics"),
    (34, "Comedy"),
    (35, "Documentary"),
    (36, "Drama"),
    (37, "Family"),
    (38, "Foreign"),
    (39, "Horror"),
    (40, "Sci-Fi/Fantasy"),
    (41, "Thriller"),
    (42, "Shorts"),
    (43, "Shows"),
    (44, "Trailers"),
];

/// Flattened view of a single `videos.list` item, before any derived fields
/// are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSnapshot {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: u32,
    pub published_at: Option<DateTime<Utc>>,
    /// ISO-8601 period as returned by `contentDetails.duration`.
    pub duration: String,
    pub view_count: u64,
    pub like_count: u64,
    pub dislike_count: u64,
    pub comment_count: u64,
}

/// Analytics derived locally from raw counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Always at least 1.
    pub days_since_publish: u64,
    pub views_per_day: u64,
    pub reactions: u64,
}

impl Metrics {
    pub fn compute(
        snapshot: &VideoSnapshot,
        published_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let elapsed = (now - published_at).num_days();
        let days_since_publish = u64::try_from(elapsed).unwrap_or(0).max(1);
        Self {
            days_since_publish,
            views_per_day: snapshot.view_count / days_since_publish,
            reactions: snapshot
                .like_count
                .saturating_add(snapshot.comment_count)
                .saturating_add(snapshot.dislike_count),
        }
    }
}

/// One row of the extraction table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub video_url: String,
    pub channel_name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category_id: u32,
    pub category: String,
    pub published_at: DateTime<Utc>,
    pub duration_minutes: u64,
    pub view_count: u64,
    pub like_count: u64,
    pub dislike_count: u64,
    pub comment_count: u64,
    pub metrics: Metrics,
}

impl VideoRecord {
    /// Whether a previous run already rewrote this video.
    pub fn is_processed(&self) -> bool {
        self.description.contains(PROCESSED_MARKER)
    }
}

/// Description and tags produced for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedMetadata {
    pub description: String,
    pub tags: Vec<String>,
}

impl GeneratedMetadata {
    pub fn serialized_tags(&self) -> String {
        serialize_tags(&self.tags)
    }
}

/// Turns a snapshot into a record tagged with its source channel. Timestamps
/// missing from the payload count as published `now`.
pub fn enrich(snapshot: VideoSnapshot, channel_name: &str, now: DateTime<Utc>) -> VideoRecord {
    let published_at = snapshot.published_at.unwrap_or(now);
    let metrics = Metrics::compute(&snapshot, published_at, now);
    VideoRecord {
        video_url: video_url(&snapshot.video_id),
        channel_name: channel_name.to_string(),
        category: category_label(snapshot.category_id).to_string(),
        duration_minutes: duration_minutes(&snapshot.duration),
        video_id: snapshot.video_id,
        title: snapshot.title,
        description: snapshot.description,
        tags: snapshot.tags,
        category_id: snapshot.category_id,
        published_at,
        view_count: snapshot.view_count,
        like_count: snapshot.like_count,
        dislike_count: snapshot.dislike_count,
        comment_count: snapshot.comment_count,
        metrics,
    }
}

pub fn enrich_all(
    snapshots: Vec<VideoSnapshot>,
    channel_name: &str,
    now: DateTime<Utc>,
) -> Vec<VideoRecord> {
    snapshots
        .into_iter()
        .map(|snapshot| enrich(snapshot, channel_name, now))
        .collect()
}

/// Resolves a category code. Codes outside the table map to
/// [`UNKNOWN_CATEGORY`] instead of failing the run.
pub fn category_label(code: u32) -> &'static str {
    CATEGORIES
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, label)| *label)
        .unwrap_or(UNKNOWN_CATEGORY)
}

/// Converts an ISO-8601 period such as `PT1H5M30S` into whole minutes.
///
/// Only the hour and minute components of the time part count; seconds are
/// dropped. A component that does not parse contributes 0, and input without
/// a time part yields 0.
pub fn duration_minutes(encoded: &str) -> u64 {
    let Some((_, time_part)) = encoded.trim().split_once('T') else {
        return 0;
    };

    let mut hours = 0;
    let mut minutes = 0;
    let mut digits = String::new();
    for ch in time_part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            digits.push(ch);
            continue;
        }
        let value = digits.parse::<u64>().ok();
        digits.clear();
        match ch {
            'H' => hours = value.unwrap_or(0),
            'M' => minutes = value.unwrap_or(0),
            _ => {}
        }
    }

    hours.saturating_mul(60).saturating_add(minutes)
}

pub fn video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Recovers the identifier from a canonical watch URL. Anything without a
/// `v=` is returned unchanged.
pub fn video_id_from_url(url: &str) -> &str {
    let tail = url.rsplit("v=").next().unwrap_or(url);
    tail.split('&').next().unwrap_or(tail)
}

pub fn serialize_tags(tags: &[String]) -> String {
    tags.join(TAG_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn snapshot(views: u64) -> VideoSnapshot {
        VideoSnapshot {
            video_id: "abc123".into(),
            title: "Opening traps".into(),
            description: "Learn the basics".into(),
            tags: vec!["chess".into()],
            category_id: 27,
            published_at: None,
            duration: "PT1H5M30S".into(),
            view_count: views,
            like_count: 7,
            dislike_count: 1,
            comment_count: 3,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn duration_minutes_reads_hours_and_minutes() {
        assert_eq!(duration_minutes("PT1H30M"), 90);
        assert_eq!(duration_minutes("PT45M"), 45);
        assert_eq!(duration_minutes("PT2H"), 120);
        assert_eq!(duration_minutes("PT1H5M30S"), 65);
        assert_eq!(duration_minutes("PT59S"), 0);
    }

    #[test]
    fn duration_minutes_defaults_malformed_input_to_zero() {
        for input in ["", "garbage", "P1D", "PTxH", "PTH", "PT.M", "12:30", "T"] {
            assert_eq!(duration_minutes(input), 0, "input {input:?}");
        }
    }

    #[test]
    fn duration_minutes_keeps_valid_component_next_to_broken_one() {
        assert_eq!(duration_minutes("PT1.5H20M"), 20);
        assert_eq!(duration_minutes("PT2HxM"), 120);
    }

    #[test]
    fn category_label_resolves_known_codes() {
        assert_eq!(category_label(27), "Education");
        assert_eq!(category_label(20), "Gaming");
        assert_eq!(category_label(1), "Film & Animation");
    }

    #[test]
    fn category_label_maps_unknown_codes() {
        assert_eq!(category_label(0), UNKNOWN_CATEGORY);
        assert_eq!(category_label(999), UNKNOWN_CATEGORY);
    }

    #[test]
    fn metrics_clamp_same_day_publish_to_one_day() {
        let snap = snapshot(100);
        let metrics = Metrics::compute(&snap, now(), now());
        assert_eq!(metrics.days_since_publish, 1);
        assert_eq!(metrics.views_per_day, 100);
    }

    #[test]
    fn metrics_divide_views_by_elapsed_days() {
        let snap = snapshot(50);
        let metrics = Metrics::compute(&snap, now() - Duration::days(10), now());
        assert_eq!(metrics.days_since_publish, 10);
        assert_eq!(metrics.views_per_day, 5);
        assert_eq!(metrics.reactions, 11);
    }

    #[test]
    fn metrics_clamp_future_timestamps() {
        let snap = snapshot(10);
        let metrics = Metrics::compute(&snap, now() + Duration::days(3), now());
        assert_eq!(metrics.days_since_publish, 1);
        assert_eq!(metrics.views_per_day, 10);
    }

    #[test]
    fn enrich_fills_derived_fields() {
        let mut snap = snapshot(300);
        snap.published_at = Some(now() - Duration::days(3));
        let record = enrich(snap, "chess-br", now());
        assert_eq!(record.channel_name, "chess-br");
        assert_eq!(record.video_url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(record.category, "Education");
        assert_eq!(record.duration_minutes, 65);
        assert_eq!(record.metrics.views_per_day, 100);
    }

    #[test]
    fn enrich_treats_missing_timestamp_as_now() {
        let record = enrich(snapshot(42), "chess-br", now());
        assert_eq!(record.published_at, now());
        assert_eq!(record.metrics.days_since_publish, 1);
    }

    #[test]
    fn video_id_from_url_handles_watch_urls() {
        assert_eq!(
            video_id_from_url("https://www.youtube.com/watch?v=abc123"),
            "abc123"
        );
        assert_eq!(
            video_id_from_url("https://www.youtube.com/watch?v=abc123&t=10"),
            "abc123"
        );
        assert_eq!(video_id_from_url("abc123"), "abc123");
    }

    #[test]
    fn processed_marker_is_detected() {
        let mut record = enrich(snapshot(1), "c", now());
        assert!(!record.is_processed());
        record.description.push_str(PROCESSED_MARKER);
        assert!(record.is_processed());
    }
}
