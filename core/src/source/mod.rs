/// Collaborators the reconciler pulls pages from and receives live items through
pub mod channel;
pub mod rest;
pub mod sse;

use crate::error::Result;
use crate::feed::{FeedItem, FeedPage, TopicKey};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

pub use channel::ChannelStream;
pub use rest::NoticeApiClient;
pub use sse::{SseParser, SseStream};

/// Paginated backend, page 0 holding the newest items
pub trait PagedFetchSource<P>: Send + Sync + 'static {
    fn fetch_page(
        &self,
        page_index: u32,
        page_size: u32,
    ) -> impl Future<Output = Result<FeedPage<P>>> + Send;
}

/// Callback invoked once per delivered item, in arrival order
pub type ItemCallback<P> = Arc<dyn Fn(FeedItem<P>) + Send + Sync>;

/// Push transport for live items.
///
/// Deliveries may be duplicated, arrive in any order relative to page
/// fetches, and are lost while disconnected.
pub trait LiveStream<P>: Send + Sync + 'static {
    fn subscribe(
        &self,
        topic: &TopicKey,
        on_item: ItemCallback<P>,
    ) -> impl Future<Output = Result<SubscriptionHandle>> + Send;

    /// Stop deliveries for `handle`. Unknown handles are ignored.
    fn unsubscribe(&self, handle: &SubscriptionHandle);

    fn is_connected(&self) -> bool;
}

/// Token for one live subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: Uuid,
    pub topic: TopicKey,
}

impl SubscriptionHandle {
    pub fn new(topic: TopicKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
        }
    }
}
