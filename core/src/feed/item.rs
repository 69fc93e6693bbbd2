/// Feed items, pages, date groups and topic keys
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem<P> {
    /// Stable identifier shared by page fetches and the live stream
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Application data, never inspected by the reconciler
    pub payload: P,
    /// Set on live arrival, cleared by the presenter via `mark_seen`
    #[serde(default)]
    pub is_new: bool,
}

impl<P> FeedItem<P> {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, payload: P) -> Self {
        Self {
            id: id.into(),
            created_at,
            payload,
            is_new: false,
        }
    }

    /// Calendar date used as the group key (UTC, locale independent)
    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// Result of one page fetch
#[derive(Debug, Clone)]
pub struct FeedPage<P> {
    pub items: Vec<FeedItem<P>>,
    /// Whether an older page exists
    pub has_more: bool,
    pub page_index: u32,
}

/// Items sharing one calendar date, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct DateGroup<P> {
    pub date: NaiveDate,
    pub items: Vec<FeedItem<P>>,
}

impl<P> DateGroup<P> {
    /// ISO date string, e.g. "2024-03-01"
    pub fn date_key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// State of the live stream as seen by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Name of a live topic: "notices" or "notices/{batch}/{department}"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicKey(String);

impl TopicKey {
    /// Feed of every notice
    pub fn all() -> Self {
        Self("notices".to_string())
    }

    /// Feed of one batch within one department
    pub fn group(batch: &str, department: &str) -> Self {
        Self(format!(
            "notices/{}/{}",
            urlencoding::encode(batch),
            urlencoding::encode(department)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path used by the stream endpoint, e.g. "/topic/notices/22/04"
    pub fn url_path(&self) -> String {
        format!("/topic/{}", self.0)
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
