/// Notice Feed - live group notices for the student portal
/// 
/// Merges paged snapshots from the notice API with a live event stream into
/// one deduplicated, date-grouped feed.

pub mod error;
pub mod config;
pub mod feed;
pub mod feed_types;
pub mod source;
pub mod poller;
pub mod render;

pub use error::{FeedError, Result};
pub use config::Config;
pub use feed::LiveFeedReconciler;
pub use poller::FallbackPoller;
