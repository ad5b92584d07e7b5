//! Wire types shared by the API client, the session reducer and the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A radio station as returned by the backend catalog endpoints.
///
/// Field names follow the backend JSON (`stationuuid`, `favicon`, ...).
/// Unknown fields are ignored; missing optional fields fall back to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Station {
    #[serde(rename = "stationuuid")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country: String,
    /// Stream URL handed to the playback handle.
    #[serde(default)]
    pub url: String,
    /// Icon URL. Empty string means "no icon".
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub bitrate: u32,
    /// Comma-separated tag list, e.g. `"jazz,smooth jazz,lounge"`.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub homepage: String,
}

impl Station {
    /// First `n` non-empty, trimmed tags.
    pub fn tag_list(&self, n: usize) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .take(n)
            .collect()
    }

    /// Bitrate label, hidden when the catalog reports 0.
    pub fn bitrate_label(&self) -> Option<String> {
        (self.bitrate > 0).then(|| format!("{}kbps", self.bitrate))
    }
}

/// A country entry for the country selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Country {
    pub name: String,
    #[serde(default)]
    pub stationcount: u64,
}

impl Country {
    pub fn label(&self) -> String {
        format!("{} ({} stations)", self.name, self.stationcount)
    }
}

/// What kind of entity a comment is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[default]
    Station,
    Track,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "station",
            Self::Track => "track",
        }
    }
}

/// A comment in a station's thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub content: String,
    pub target_id: String,
    pub target_type: TargetType,
    #[serde(with = "naive_or_utc")]
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /api/comments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub content: String,
    pub author: String,
    pub target_id: String,
    pub target_type: TargetType,
}

/// Response of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Navigation tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Discover,
    Countries,
}

impl Tab {
    pub const ALL: [Tab; 2] = [Tab::Discover, Tab::Countries];

    pub fn label(self) -> &'static str {
        match self {
            Self::Discover => "Discover",
            Self::Countries => "Countries",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Discover => Self::Countries,
            Self::Countries => Self::Discover,
        }
    }
}

/// The backend stores UTC timestamps without an offset
/// (`2024-05-01T12:00:00.123000`); accept both that and RFC 3339.
mod naive_or_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
