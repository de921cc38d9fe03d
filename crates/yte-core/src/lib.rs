//! Core domain model for the YouTube trending explorer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "yte-core";

/// Largest page the trending endpoint serves in one call.
pub const MAX_PAGE_SIZE: u32 = 50;

pub const DEFAULT_REGIONS: [&str; 4] = ["US", "GB", "RU", "DE"];

pub const VIDEO_LINK_PREFIX: &str = "https://www.youtube.com/watch?v=";
pub const CHANNEL_LINK_PREFIX: &str = "https://www.youtube.com/channel/";

/// Sentinel stored in a metric column when the platform omits the statistic.
pub const MISSING_METRIC: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid region code `{0}`: expected two ASCII letters")]
pub struct InvalidRegionCode(pub String);

/// Two-letter country code selecting a localized trending list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

impl RegionCode {
    pub fn parse(input: &str) -> Result<Self, InvalidRegionCode> {
        let trimmed = input.trim();
        if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(InvalidRegionCode(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn defaults() -> Vec<RegionCode> {
        DEFAULT_REGIONS
            .iter()
            .map(|code| RegionCode(code.to_string()))
            .collect()
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RegionCode {
    type Err = InvalidRegionCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RegionCode {
    type Error = InvalidRegionCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RegionCode> for String {
    fn from(value: RegionCode) -> Self {
        value.0
    }
}

/// Normalized per-video fields produced from one raw trending item, before the
/// aggregator attaches ranking context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDraft {
    pub video_id: String,
    pub video_title: String,
    pub video_link: String,
    pub channel_link: String,
    pub channel_id: String,
    pub channel_name: String,
    pub published_ts: DateTime<FixedOffset>,
    pub hours_since_publishing: i64,
    pub tags: Option<String>,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub views_count: i64,
    pub comments_count: i64,
    pub blocked_in_countries: Option<String>,
    pub video_thumbnail_link: Option<String>,
}

impl VideoDraft {
    pub fn into_record(
        self,
        trending_position: u32,
        region: RegionCode,
        created_ts: NaiveDateTime,
    ) -> VideoRecord {
        VideoRecord {
            video_id: self.video_id,
            video_title: self.video_title,
            video_link: self.video_link,
            channel_link: self.channel_link,
            channel_id: self.channel_id,
            channel_name: self.channel_name,
            published_ts: self.published_ts,
            hours_since_publishing: self.hours_since_publishing,
            tags: self.tags,
            likes_count: self.likes_count,
            dislikes_count: self.dislikes_count,
            views_count: self.views_count,
            comments_count: self.comments_count,
            blocked_in_countries: self.blocked_in_countries,
            video_thumbnail_link: self.video_thumbnail_link,
            trending_position,
            region,
            created_ts,
        }
    }
}

/// One row of a snapshot. Field order is the column order on disk, keyed by
/// `video_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub video_title: String,
    pub video_link: String,
    pub channel_link: String,
    pub channel_id: String,
    pub channel_name: String,
    pub published_ts: DateTime<FixedOffset>,
    pub hours_since_publishing: i64,
    pub tags: Option<String>,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub views_count: i64,
    pub comments_count: i64,
    pub blocked_in_countries: Option<String>,
    pub video_thumbnail_link: Option<String>,
    /// 1-based rank within the region's response, in response order.
    pub trending_position: u32,
    pub region: RegionCode,
    /// Local wall-clock time the region page was fetched.
    pub created_ts: NaiveDateTime,
}

impl VideoRecord {
    pub const COLUMNS: [&'static str; 18] = [
        "video_id",
        "video_title",
        "video_link",
        "channel_link",
        "channel_id",
        "channel_name",
        "published_ts",
        "hours_since_publishing",
        "tags",
        "likes_count",
        "dislikes_count",
        "views_count",
        "comments_count",
        "blocked_in_countries",
        "video_thumbnail_link",
        "trending_position",
        "region",
        "created_ts",
    ];
}

pub fn video_link(video_id: &str) -> String {
    format!("{VIDEO_LINK_PREFIX}{video_id}")
}

pub fn channel_link(channel_id: &str) -> String {
    format!("{CHANNEL_LINK_PREFIX}{channel_id}")
}
