//! Data models for the IPTV manager

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current time as an RFC3339 UTC string with second precision
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Stored channel row. A channel is identified by its stream URL and is
/// shared by every playlist, user and package that references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub stream_url: String,
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    pub group_title: String,
    pub created_at: String,
}

/// One entry produced by the M3U parser, not yet persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    pub name: String,
    pub stream_url: String,
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    pub group_title: String,
}

/// Where a playlist's M3U text comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Inline,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Url => "url",
            SourceKind::Inline => "inline",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "url" => Some(SourceKind::Url),
            "inline" => Some(SourceKind::Inline),
            _ => None,
        }
    }
}

/// Playlist metadata. Inline content is loaded separately since it can be large.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    #[serde(rename = "sourceType")]
    pub source_kind: SourceKind,
    pub source_url: String,
    pub created_at: String,
}

impl Playlist {
    pub fn public_url(&self) -> String {
        format!("/public/m3u/{}.m3u", self.id)
    }
}

/// Subscriber account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub app_key: String,
    pub playlist_id: Option<i64>,
    pub created_at: String,
}

/// Admin-curated bundle of channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub created_at: String,
}

/// Owner side of an ordered channel association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Playlist(i64),
    User(i64),
    Package(i64),
}

impl Owner {
    pub fn id(&self) -> i64 {
        match *self {
            Owner::Playlist(id) | Owner::User(id) | Owner::Package(id) => id,
        }
    }

    /// Association table holding this owner's channel positions
    pub fn table(&self) -> &'static str {
        match self {
            Owner::Playlist(_) => "playlist_channels",
            Owner::User(_) => "user_channels",
            Owner::Package(_) => "package_channels",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Owner::Playlist(_) => "playlist_id",
            Owner::User(_) => "user_id",
            Owner::Package(_) => "package_id",
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Playlist(id) => write!(f, "playlist {}", id),
            Owner::User(id) => write!(f, "user {}", id),
            Owner::Package(id) => write!(f, "package {}", id),
        }
    }
}
