#![forbid(unsafe_code)]

//! YouTube Data API v3 access: upload listing, batched detail lookups and
//! snippet updates.
//!
//! Everything above the HTTP layer talks to [`VideoPlatform`] so the
//! pagination and batching rules can be exercised without network access.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::metadata::VideoSnapshot;

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// Largest page the list endpoint serves and largest id batch the detail
/// endpoint accepts.
pub const MAX_PAGE_SIZE: usize = 50;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of `playlistItems.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPage {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub content_details: PlaylistItemDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemDetails {
    pub video_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

/// A `videos.list` item with the `snippet`, `statistics` and
/// `contentDetails` parts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<VideoSnippet>,
    #[serde(default)]
    pub statistics: Option<VideoStatistics>,
    #[serde(default)]
    pub content_details: Option<VideoContentDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Counters arrive as decimal strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    pub view_count: Option<String>,
    pub like_count: Option<String>,
    pub dislike_count: Option<String>,
    pub comment_count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoContentDetails {
    #[serde(default)]
    pub duration: String,
}

/// Body of a `videos.update` call with `part=snippet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnippetUpdate {
    pub id: String,
    pub snippet: SnippetUpdateFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetUpdateFields {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

/// The three platform endpoints a run depends on.
pub trait VideoPlatform {
    fn playlist_page(&self, playlist_id: &str, page_token: Option<&str>) -> Result<PlaylistPage>;
    fn video_details(&self, ids: &[String]) -> Result<Vec<VideoResource>>;
    fn update_snippet(&self, update: &SnippetUpdate) -> Result<()>;
}

/// Walks an upload playlist until the platform stops returning a
/// continuation token. Ids keep the platform's order; repeats are dropped.
pub fn fetch_upload_ids<P: VideoPlatform + ?Sized>(
    platform: &P,
    playlist_id: &str,
) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = platform
            .playlist_page(playlist_id, page_token.as_deref())
            .with_context(|| format!("listing playlist {playlist_id}"))?;
        pages += 1;
        for item in page.items {
            let video_id = item.content_details.video_id;
            if seen.insert(video_id.clone()) {
                ids.push(video_id);
            }
        }
        match page.next_page_token.filter(|token| !token.is_empty()) {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    debug!("playlist {playlist_id}: {} video(s) over {pages} page(s)", ids.len());
    Ok(ids)
}

/// Fetches details in chunks of [`MAX_PAGE_SIZE`]. Ids the platform no longer
/// knows are silently absent from the result.
pub fn fetch_video_details<P: VideoPlatform + ?Sized>(
    platform: &P,
    ids: &[String],
) -> Result<Vec<VideoSnapshot>> {
    let mut snapshots = Vec::with_capacity(ids.len());
    for batch in ids.chunks(MAX_PAGE_SIZE) {
        let items = platform
            .video_details(batch)
            .with_context(|| format!("fetching details for {} video(s)", batch.len()))?;
        snapshots.extend(items.into_iter().map(flatten_video));
    }
    Ok(snapshots)
}

/// Collapses the nested API shape into a flat snapshot. Missing counters and
/// tags become zero and empty.
pub fn flatten_video(resource: VideoResource) -> VideoSnapshot {
    let snippet = resource.snippet.unwrap_or_default();
    let stats = resource.statistics.unwrap_or_default();
    let details = resource.content_details.unwrap_or_default();
    VideoSnapshot {
        video_id: resource.id,
        title: snippet.title,
        description: snippet.description,
        tags: snippet.tags.unwrap_or_default(),
        category_id: snippet
            .category_id
            .as_deref()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0),
        published_at: snippet.published_at,
        duration: details.duration,
        view_count: parse_count(stats.view_count.as_deref()),
        like_count: parse_count(stats.like_count.as_deref()),
        dislike_count: parse_count(stats.dislike_count.as_deref()),
        comment_count: parse_count(stats.comment_count.as_deref()),
    }
}

fn parse_count(value: Option<&str>) -> u64 {
    value.and_then(|raw| raw.trim().parse().ok()).unwrap_or(0)
}

/// How requests identify themselves to the API.
#[derive(Clone)]
pub enum ApiAuth {
    /// Read-only calls against public data.
    ApiKey(String),
    /// OAuth access token; required for updates.
    Bearer(String),
}

/// Blocking HTTP implementation of [`VideoPlatform`].
pub struct YouTubeClient {
    agent: ureq::Agent,
    base_url: String,
    auth: ApiAuth,
}

impl YouTubeClient {
    pub fn new(auth: ApiAuth) -> Self {
        Self::with_base_url(auth, YOUTUBE_API_BASE)
    }

    pub fn with_base_url(auth: ApiAuth, base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn request(&self, method: &str, endpoint: &str) -> ureq::Request {
        let request = self
            .agent
            .request(method, &format!("{}/{endpoint}", self.base_url));
        match &self.auth {
            ApiAuth::ApiKey(key) => request.query("key", key),
            ApiAuth::Bearer(token) => request.set("Authorization", &format!("Bearer {token}")),
        }
    }
}

impl VideoPlatform for YouTubeClient {
    fn playlist_page(&self, playlist_id: &str, page_token: Option<&str>) -> Result<PlaylistPage> {
        let page_size = MAX_PAGE_SIZE.to_string();
        let mut request = self
            .request("GET", "playlistItems")
            .query("part", "contentDetails")
            .query("playlistId", playlist_id)
            .query("maxResults", &page_size);
        if let Some(token) = page_token {
            request = request.query("pageToken", token);
        }
        debug!("GET playlistItems {playlist_id} token={page_token:?}");
        let response = send(request.call(), "playlistItems.list")?;
        response
            .into_json()
            .context("decoding playlistItems.list response")
    }

    fn video_details(&self, ids: &[String]) -> Result<Vec<VideoResource>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > MAX_PAGE_SIZE {
            bail!("videos.list accepts at most {MAX_PAGE_SIZE} ids, got {}", ids.len());
        }
        let joined = ids.join(",");
        let request = self
            .request("GET", "videos")
            .query("part", "snippet,contentDetails,statistics")
            .query("id", &joined);
        debug!("GET videos ({} id(s))", ids.len());
        let response = send(request.call(), "videos.list")?;
        let parsed: VideoListResponse = response
            .into_json()
            .context("decoding videos.list response")?;
        Ok(parsed.items)
    }

    fn update_snippet(&self, update: &SnippetUpdate) -> Result<()> {
        let request = self.request("PUT", "videos").query("part", "snippet");
        debug!("PUT videos {}", update.id);
        send(request.send_json(update), "videos.update")?;
        Ok(())
    }
}

/// Converts HTTP status failures into errors that carry the response body.
fn send(result: Result<ureq::Response, ureq::Error>, call: &str) -> Result<ureq::Response> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(code, response)) => {
            let body = response
                .into_string()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("{call} returned {code}: {}", body.trim())
        }
        Err(err) => Err(err).with_context(|| format!("calling {call}")),
    }
}
