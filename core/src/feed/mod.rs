/// Feed model and reconciliation
pub mod item;
pub mod notice;
pub mod reconciler;

pub use item::{ConnectionState, DateGroup, FeedItem, FeedPage, TopicKey};
pub use notice::{decode_notice, NoticeDto, NoticePayload, PageEnvelope};
pub use reconciler::{LiveFeedReconciler, LoadOutcome, MergeOutcome, SkipReason};
