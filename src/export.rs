#![forbid(unsafe_code)]

//! Spreadsheet-friendly export of rows the update loop could not write.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::metadata::serialize_tags;
use crate::pipeline::FailedUpdate;

/// Flat CSV row; list columns are comma-joined.
#[derive(Debug, Serialize)]
struct FailedRow<'a> {
    video_id: &'a str,
    video_url: &'a str,
    channel_name: &'a str,
    title: &'a str,
    category_id: u32,
    category: &'a str,
    published: String,
    duration_minutes: u64,
    view_count: u64,
    like_count: u64,
    dislike_count: u64,
    comment_count: u64,
    days_since_publish: u64,
    views_per_day: u64,
    reactions: u64,
    description: &'a str,
    tags: String,
    new_description: &'a str,
    new_tags: String,
    failure_reason: String,
}

impl<'a> From<&'a FailedUpdate> for FailedRow<'a> {
    fn from(failed: &'a FailedUpdate) -> Self {
        let record = &failed.record;
        Self {
            video_id: &record.video_id,
            video_url: &record.video_url,
            channel_name: &record.channel_name,
            title: &record.title,
            category_id: record.category_id,
            category: &record.category,
            published: record.published_at.to_rfc3339(),
            duration_minutes: record.duration_minutes,
            view_count: record.view_count,
            like_count: record.like_count,
            dislike_count: record.dislike_count,
            comment_count: record.comment_count,
            days_since_publish: record.metrics.days_since_publish,
            views_per_day: record.metrics.views_per_day,
            reactions: record.metrics.reactions,
            description: &record.description,
            tags: serialize_tags(&record.tags),
            new_description: &failed.generated.description,
            new_tags: failed.generated.serialized_tags(),
            failure_reason: failed.reason.to_string(),
        }
    }
}

/// Writes `failed` to `path`. Nothing is written for an empty table; the
/// return value says whether a file was produced.
pub fn export_failures(path: &Path, failed: &[FailedUpdate]) -> Result<bool> {
    if failed.is_empty() {
        return Ok(false);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Creating {}", path.display()))?;
    for row in failed {
        writer
            .serialize(FailedRow::from(row))
            .with_context(|| format!("Writing row for {}", row.record.video_id))?;
    }
    writer
        .flush()
        .with_context(|| format!("Flushing {}", path.display()))?;
    Ok(true)
}
