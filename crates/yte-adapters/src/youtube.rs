//! YouTube Data API trending client and the raw-item normalizer.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use yte_core::{channel_link, video_link, RegionCode, VideoDraft, MAX_PAGE_SIZE, MISSING_METRIC};
use yte_storage::HttpFetcher;

use crate::credentials::ApiKey;
use crate::{ApiError, ParseError, TrendingSource};

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const TRENDING_PARTS: &str = "snippet,contentDetails,statistics";

// --- YouTube Data API v3 response types ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingPage {
    #[serde(default)]
    pub items: Vec<RawVideoItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVideoItem {
    pub id: Option<String>,
    pub snippet: Option<RawSnippet>,
    pub content_details: Option<RawContentDetails>,
    pub statistics: Option<RawStatistics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnippet {
    pub published_at: Option<String>,
    pub channel_id: Option<String>,
    pub title: Option<String>,
    pub channel_title: Option<String>,
    pub thumbnails: Option<RawThumbnails>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThumbnails {
    pub default: Option<RawThumbnail>,
    pub medium: Option<RawThumbnail>,
    pub high: Option<RawThumbnail>,
    pub standard: Option<RawThumbnail>,
    pub maxres: Option<RawThumbnail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContentDetails {
    pub duration: Option<String>,
    pub region_restriction: Option<RawRegionRestriction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRegionRestriction {
    pub allowed: Option<Vec<String>>,
    pub blocked: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatistics {
    pub view_count: Option<RawCount>,
    pub like_count: Option<RawCount>,
    pub dislike_count: Option<RawCount>,
    pub comment_count: Option<RawCount>,
}

/// Counts arrive as decimal strings; plain numbers are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawCount {
    Number(i64),
    Text(String),
}

impl RawCount {
    fn value(&self) -> Option<i64> {
        match self {
            RawCount::Number(n) => Some(*n),
            RawCount::Text(s) => s.trim().parse().ok(),
        }
    }

    fn raw(&self) -> String {
        match self {
            RawCount::Number(n) => n.to_string(),
            RawCount::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailResolution {
    Standard,
    High,
    Maxres,
    Medium,
    Default,
}

/// `standard` first, then the fallbacks in this order.
pub const THUMBNAIL_PRIORITY: [ThumbnailResolution; 5] = [
    ThumbnailResolution::Standard,
    ThumbnailResolution::High,
    ThumbnailResolution::Maxres,
    ThumbnailResolution::Medium,
    ThumbnailResolution::Default,
];

impl RawThumbnails {
    pub fn get(&self, resolution: ThumbnailResolution) -> Option<&RawThumbnail> {
        match resolution {
            ThumbnailResolution::Standard => self.standard.as_ref(),
            ThumbnailResolution::High => self.high.as_ref(),
            ThumbnailResolution::Maxres => self.maxres.as_ref(),
            ThumbnailResolution::Medium => self.medium.as_ref(),
            ThumbnailResolution::Default => self.default.as_ref(),
        }
    }
}

pub fn select_thumbnail(thumbnails: Option<&RawThumbnails>) -> Option<String> {
    let thumbnails = thumbnails?;
    THUMBNAIL_PRIORITY.iter().find_map(|resolution| {
        thumbnails
            .get(*resolution)
            .and_then(|t| t.url.as_deref())
            .filter(|url| !url.trim().is_empty())
            .map(ToString::to_string)
    })
}

/// Integer division rounding to the nearest quotient, ties to even.
fn div_round_half_even(value: i64, unit: i64) -> i64 {
    let quotient = value.div_euclid(unit);
    let remainder = value.rem_euclid(unit);
    match (remainder * 2).cmp(&unit) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal if quotient % 2 == 0 => quotient,
        std::cmp::Ordering::Equal => quotient + 1,
    }
}

pub fn hours_since(published: DateTime<FixedOffset>, now: DateTime<Utc>) -> i64 {
    let now_in_source_tz = now.with_timezone(published.offset());
    let elapsed = now_in_source_tz.signed_duration_since(published);
    div_round_half_even(elapsed.num_milliseconds(), 3_600_000)
}

fn metric(
    statistics: Option<&RawStatistics>,
    video_id: &str,
    field: &'static str,
    pick: impl Fn(&RawStatistics) -> Option<&RawCount>,
) -> Result<i64, ParseError> {
    match statistics.and_then(pick) {
        None => Ok(MISSING_METRIC),
        Some(count) => count.value().ok_or_else(|| ParseError::InvalidMetric {
            video_id: video_id.to_string(),
            field,
            value: count.raw(),
        }),
    }
}

fn required<'a>(
    value: Option<&'a String>,
    video_id: &str,
    field: &'static str,
) -> Result<&'a str, ParseError> {
    value
        .map(String::as_str)
        .ok_or_else(|| ParseError::MissingField {
            video_id: video_id.to_string(),
            field,
        })
}

/// Convert one raw trending item into a flat draft. `now` anchors
/// `hours_since_publishing`.
pub fn normalize_video(item: &RawVideoItem, now: DateTime<Utc>) -> Result<VideoDraft, ParseError> {
    let video_id = required(item.id.as_ref(), "<unknown>", "id")?;
    let snippet = item.snippet.as_ref();
    let video_title = required(snippet.and_then(|s| s.title.as_ref()), video_id, "snippet.title")?;
    let channel_name = required(
        snippet.and_then(|s| s.channel_title.as_ref()),
        video_id,
        "snippet.channelTitle",
    )?;
    let channel_id = required(
        snippet.and_then(|s| s.channel_id.as_ref()),
        video_id,
        "snippet.channelId",
    )?;
    let published_raw = required(
        snippet.and_then(|s| s.published_at.as_ref()),
        video_id,
        "snippet.publishedAt",
    )?;
    let published_ts = DateTime::parse_from_rfc3339(published_raw).map_err(|source| {
        ParseError::InvalidTimestamp {
            video_id: video_id.to_string(),
            value: published_raw.to_string(),
            source,
        }
    })?;

    let video_thumbnail_link = select_thumbnail(snippet.and_then(|s| s.thumbnails.as_ref()));
    let tags = snippet
        .and_then(|s| s.tags.as_ref())
        .map(|tags| tags.join(","));
    let blocked_in_countries = item
        .content_details
        .as_ref()
        .and_then(|d| d.region_restriction.as_ref())
        .and_then(|r| r.blocked.as_ref())
        .map(|blocked| blocked.join(","));

    let statistics = item.statistics.as_ref();
    let likes_count = metric(statistics, video_id, "likeCount", |s| s.like_count.as_ref())?;
    let dislikes_count = metric(statistics, video_id, "dislikeCount", |s| s.dislike_count.as_ref())?;
    let views_count = metric(statistics, video_id, "viewCount", |s| s.view_count.as_ref())?;
    let comments_count = metric(statistics, video_id, "commentCount", |s| s.comment_count.as_ref())?;

    Ok(VideoDraft {
        video_id: video_id.to_string(),
        video_title: video_title.to_string(),
        video_link: video_link(video_id),
        channel_link: channel_link(channel_id),
        channel_id: channel_id.to_string(),
        channel_name: channel_name.to_string(),
        published_ts,
        hours_since_publishing: hours_since(published_ts, now),
        tags,
        likes_count,
        dislikes_count,
        views_count,
        comments_count,
        blocked_in_countries,
        video_thumbnail_link,
    })
}

#[derive(Debug, Clone)]
pub struct YouTubeDataApi {
    http: HttpFetcher,
    api_key: ApiKey,
    base_url: String,
}

impl YouTubeDataApi {
    pub fn new(http: HttpFetcher, api_key: ApiKey) -> Self {
        Self {
            http,
            api_key,
            base_url: YOUTUBE_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TrendingSource for YouTubeDataApi {
    async fn fetch_trending_page(
        &self,
        region: &RegionCode,
        max_results: u32,
    ) -> Result<Vec<RawVideoItem>, ApiError> {
        let url = format!("{}/videos", self.base_url);
        let max_results = max_results.clamp(1, MAX_PAGE_SIZE).to_string();
        let response = self
            .http
            .execute("youtube.videos.list", |client| {
                client.get(&url).query(&[
                    ("part", TRENDING_PARTS),
                    ("chart", "mostPopular"),
                    ("maxResults", max_results.as_str()),
                    ("regionCode", region.as_str()),
                    ("key", self.api_key.expose()),
                ])
            })
            .await
            .map_err(|source| {
                warn!(%region, status = ?source.status(), "trending request failed");
                ApiError::Fetch {
                    region: region.clone(),
                    source,
                }
            })?;

        let page: TrendingPage =
            serde_json::from_slice(&response.body).map_err(|source| ApiError::Malformed {
                region: region.clone(),
                source,
            })?;
        debug!(%region, items = page.items.len(), "trending page fetched");
        Ok(page.items)
    }
}
