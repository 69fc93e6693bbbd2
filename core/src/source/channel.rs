/// In-process live stream backed by a tokio broadcast channel
use crate::error::{FeedError, Result};
use crate::feed::{FeedItem, TopicKey};
use crate::source::{ItemCallback, LiveStream, SubscriptionHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;

/// Publishes items to every subscriber of a topic.
///
/// Connectivity can be toggled to exercise the disconnected paths: while
/// disconnected, `subscribe` fails and `publish` drops the item, like a
/// broker that is unreachable.
pub struct ChannelStream<P> {
    tx: broadcast::Sender<(TopicKey, FeedItem<P>)>,
    connected: AtomicBool,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl<P: Clone + Send + Sync + 'static> ChannelStream<P> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            connected: AtomicBool::new(true),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver `item` on `topic`; returns how many subscriptions got it
    pub fn publish(&self, topic: &TopicKey, item: FeedItem<P>) -> usize {
        if !self.is_connected() {
            return 0;
        }
        self.tx.send((topic.clone(), item)).unwrap_or(0)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl<P: Clone + Send + Sync + 'static> Default for ChannelStream<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send + Sync + 'static> LiveStream<P> for ChannelStream<P> {
    async fn subscribe(&self, topic: &TopicKey, on_item: ItemCallback<P>) -> Result<SubscriptionHandle> {
        if !self.is_connected() {
            return Err(FeedError::StreamConnection(format!(
                "channel for {} is disconnected",
                topic
            )));
        }

        // Receiver exists before we return, so nothing published after this is missed
        let mut rx = self.tx.subscribe();
        let handle = SubscriptionHandle::new(topic.clone());
        let wanted = topic.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((topic, item)) => {
                        if topic == wanted {
                            on_item(item);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Subscriber on {} lagged {} items", wanted, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.tasks.lock().insert(handle.id, task);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(task) = self.tasks.lock().remove(&handle.id) {
            task.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl<P> Drop for ChannelStream<P> {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_reaches_matching_topic_only() {
        let stream: ChannelStream<u32> = ChannelStream::new();
        let topic = TopicKey::group("22", "04");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let on_item: ItemCallback<u32> = Arc::new(move |item| {
            let _ = tx.send(item.payload);
        });

        let handle = stream.subscribe(&topic, on_item).await.unwrap();
        assert_eq!(stream.subscription_count(), 1);

        stream.publish(&TopicKey::group("21", "04"), FeedItem::new("other", Utc::now(), 1));
        stream.publish(&topic, FeedItem::new("mine", Utc::now(), 2));

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, 2);

        stream.unsubscribe(&handle);
        assert_eq!(stream.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_refuses_subscriptions() {
        let stream: ChannelStream<u32> = ChannelStream::new();
        stream.set_connected(false);
        let on_item: ItemCallback<u32> = Arc::new(|_| {});
        let err = stream
            .subscribe(&TopicKey::all(), on_item)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::StreamConnection(_)));
        assert_eq!(stream.publish(&TopicKey::all(), FeedItem::new("x", Utc::now(), 1)), 0);
    }
}
