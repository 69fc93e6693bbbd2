/// Shared types for the presenter side of the feed
use crate::feed::ConnectionState;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Notifications broadcast by the reconciler after each mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// An unseen item arrived live or through a refresh
    ItemAdded { id: String, date: NaiveDate },
    /// The presenter should scroll to the bucket that was just touched
    ScrollToNewest { date: NaiveDate },
    /// A delivery carried an id that is already held
    DuplicateIgnored { id: String },
    ItemRemoved { id: String },
    ItemUpdated { id: String },
    /// A page fetch was merged
    PageLoaded {
        page: u32,
        added: usize,
        has_more: bool,
    },
    ConnectionChanged { state: ConnectionState },
}

/// Counters and pagination state, for status lines and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStats {
    pub item_count: usize,
    pub current_page: u32,
    pub has_more: bool,
    pub loading_older: bool,
    pub pages_loaded: u32,
    pub live_delivered: u64,
    pub duplicates_ignored: u64,
    pub connection_state: ConnectionState,
}
