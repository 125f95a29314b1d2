use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Follower count marker for "no number could be read next to this handle".
pub const UNPARSED_FOLLOWERS: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    TikTok,
    Instagram,
    Threads,
    Twitter,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "TikTok",
            Platform::Instagram => "Instagram",
            Platform::Threads => "Threads",
            Platform::Twitter => "Twitter",
            Platform::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    /// Unrecognised labels read back from storage map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "tiktok" => Platform::TikTok,
            "instagram" => Platform::Instagram,
            "threads" => Platform::Threads,
            "twitter" => Platform::Twitter,
            _ => Platform::Unknown,
        })
    }
}

/// One recorded follower count for an account, as seen on one screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub identity: String,
    pub platform: Platform,
    pub account: String,
    pub followers: i64,
    /// `None` when there was no usable previous observation.
    pub evolution: Option<i64>,
}

impl Observation {
    pub fn new(
        date: NaiveDate,
        identity: impl Into<String>,
        platform: Platform,
        account: impl Into<String>,
        followers: i64,
        evolution: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            date,
            identity: identity.into(),
            platform,
            account: account.into(),
            followers,
            evolution,
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.followers != UNPARSED_FOLLOWERS
    }
}
