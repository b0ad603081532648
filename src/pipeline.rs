#![forbid(unsafe_code)]

//! The three phases of a run: extraction across channels, generation of new
//! metadata and the write-back loop.
//!
//! Phases run strictly one after another and hand their table to the next
//! phase by value.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand_core::RngCore;
use std::fmt;
use std::thread;
use std::time::Duration;

use crate::config::ChannelConfig;
use crate::generation::{SeoWriter, TextGenerator};
use crate::metadata::{
    GeneratedMetadata, MAX_DESCRIPTION_CHARS, MAX_TAGS_CHARS, VideoRecord, enrich_all,
    video_id_from_url,
};
use crate::retry::{RetryPolicy, with_retry};
use crate::youtube::{
    SnippetUpdate, SnippetUpdateFields, VideoPlatform, fetch_upload_ids, fetch_video_details,
};

/// Pause after every attempted update call.
pub const UPDATE_DELAY: Duration = Duration::from_millis(500);

/// Pulls every upload of every channel, in configuration order.
///
/// Any failure restarts the whole extraction; once `policy` is exhausted the
/// error is returned to the caller.
pub fn extract_channels<P: VideoPlatform + ?Sized>(
    platform: &P,
    channels: &[ChannelConfig],
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<VideoRecord>> {
    with_retry(policy, "extraction", || extract_once(platform, channels, now))
}

fn extract_once<P: VideoPlatform + ?Sized>(
    platform: &P,
    channels: &[ChannelConfig],
    now: DateTime<Utc>,
) -> Result<Vec<VideoRecord>> {
    let mut records = Vec::new();
    for channel in channels {
        info!("Extracting data from {}", channel.name);
        let playlist_id = channel.uploads_playlist_id()?;
        let ids = fetch_upload_ids(platform, &playlist_id)
            .with_context(|| format!("channel {}", channel.name))?;
        let snapshots = fetch_video_details(platform, &ids)
            .with_context(|| format!("channel {}", channel.name))?;
        info!(
            "  {}: {} listed, {} with details",
            channel.name,
            ids.len(),
            snapshots.len()
        );
        records.extend(enrich_all(snapshots, &channel.name, now));
    }
    Ok(records)
}

/// Drops rows a previous run already rewrote.
pub fn filter_unprocessed(records: Vec<VideoRecord>) -> Vec<VideoRecord> {
    let total = records.len();
    let pending: Vec<VideoRecord> = records
        .into_iter()
        .filter(|record| !record.is_processed())
        .collect();
    if pending.len() < total {
        info!(
            "Skipping {} already updated video(s)",
            total - pending.len()
        );
    }
    pending
}

/// A record together with the metadata about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub record: VideoRecord,
    pub generated: GeneratedMetadata,
}

pub fn generate_updates<G, R>(
    writer: &SeoWriter<'_, G>,
    records: Vec<VideoRecord>,
    rng: &mut R,
) -> Vec<PendingUpdate>
where
    G: TextGenerator + ?Sized,
    R: RngCore + ?Sized,
{
    let total = records.len();
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            info!("[{}/{}] Generating metadata for {}", index + 1, total, record.title);
            let generated = writer.generate(&record, rng);
            PendingUpdate { record, generated }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The model produced nothing usable.
    EmptyDescription,
    DescriptionTooLong(usize),
    TagsTooLong(usize),
    /// The update call itself failed.
    Remote(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::EmptyDescription => write!(f, "generated description is empty"),
            FailureReason::DescriptionTooLong(len) => write!(
                f,
                "description has {len} characters (limit {MAX_DESCRIPTION_CHARS})"
            ),
            FailureReason::TagsTooLong(len) => {
                write!(f, "tags have {len} characters (limit {MAX_TAGS_CHARS})")
            }
            FailureReason::Remote(message) => write!(f, "update call failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpdate {
    pub record: VideoRecord,
    pub generated: GeneratedMetadata,
    pub reason: FailureReason,
}

/// Outcome of the write-back loop. Ids are listed in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    pub delay: Duration,
    /// Category code sent instead of each video's current one.
    pub category_override: Option<u32>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            delay: UPDATE_DELAY,
            category_override: None,
        }
    }
}

/// Rejects content the platform would refuse anyway.
pub fn check_limits(generated: &GeneratedMetadata) -> std::result::Result<(), FailureReason> {
    if generated.description.trim().is_empty() {
        return Err(FailureReason::EmptyDescription);
    }
    let description_len = generated.description.chars().count();
    if description_len > MAX_DESCRIPTION_CHARS {
        return Err(FailureReason::DescriptionTooLong(description_len));
    }
    let tags_len = generated.serialized_tags().chars().count();
    if tags_len > MAX_TAGS_CHARS {
        return Err(FailureReason::TagsTooLong(tags_len));
    }
    Ok(())
}

/// Request body for one pending update. The platform requires a category on
/// snippet updates, so the video's own code is sent unless overridden.
pub fn build_update(pending: &PendingUpdate, options: &UpdateOptions) -> SnippetUpdate {
    let category_id = options
        .category_override
        .unwrap_or(pending.record.category_id);
    SnippetUpdate {
        id: video_id_from_url(&pending.record.video_url).to_string(),
        snippet: SnippetUpdateFields {
            title: pending.record.title.clone(),
            description: pending.generated.description.clone(),
            tags: pending.generated.tags.clone(),
            category_id: (category_id != 0).then(|| category_id.to_string()),
        },
    }
}

/// Writes every pending update in order. A failing row is recorded and the
/// loop moves on; nothing here aborts the batch.
pub fn update_videos<P: VideoPlatform + ?Sized>(
    platform: &P,
    pending: Vec<PendingUpdate>,
    options: &UpdateOptions,
) -> UpdateReport {
    let mut report = UpdateReport::default();
    let total = pending.len();

    for (index, item) in pending.into_iter().enumerate() {
        let position = index + 1;
        if item.record.is_processed() {
            info!("[{position}/{total}] Already updated: {}", item.record.title);
            report.skipped.push(item.record.video_id);
            continue;
        }
        if let Err(reason) = check_limits(&item.generated) {
            warn!("[{position}/{total}] Failed: {} - {reason}", item.record.title);
            report.failed.push(FailedUpdate {
                record: item.record,
                generated: item.generated,
                reason,
            });
            continue;
        }

        let update = build_update(&item, options);
        match platform.update_snippet(&update) {
            Ok(()) => {
                info!("[{position}/{total}] Updated: {}", item.record.title);
                report.updated.push(update.id);
            }
            Err(err) => {
                warn!("[{position}/{total}] Failed: {} - {err:#}", item.record.title);
                report.failed.push(FailedUpdate {
                    record: item.record,
                    generated: item.generated,
                    reason: FailureReason::Remote(format!("{err:#}")),
                });
            }
        }

        if !options.delay.is_zero() {
            thread::sleep(options.delay);
        }
    }

    report
}
