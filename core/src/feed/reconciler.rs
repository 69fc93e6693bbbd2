/// Live feed reconciliation: paged snapshots merged with a push stream
///
/// Items are held once per id. Whatever arrived first wins over a later page
/// fetch, and the grouped view is rebuilt from scratch on every read, so
/// out-of-order delivery corrects itself.
use crate::error::{FeedError, Result};
use crate::feed::{ConnectionState, DateGroup, FeedItem, TopicKey};
use crate::feed_types::{FeedEvent, FeedStats};
use crate::source::{ItemCallback, LiveStream, PagedFetchSource, SubscriptionHandle};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What `merge_incoming` did with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// Id already held, nothing changed
    Duplicate,
    /// Feed is torn down
    Ignored,
}

/// Why `load_older_page` did not fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotInitialized,
    Exhausted,
    InFlight,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded {
        page: u32,
        added: usize,
        has_more: bool,
    },
    Skipped(SkipReason),
    /// The fetch resolved after teardown and was dropped
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Initializing,
    Ready,
    TornDown,
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    LoadingOlder,
    Refreshing,
}

struct ReconcilerState<P> {
    items: HashMap<String, FeedItem<P>>,
    current_page: u32,
    has_more: bool,
    loading_older: bool,
    refreshing: bool,
    connection_state: ConnectionState,
    phase: Phase,
    /// Bumped on teardown; fetches started under an older value are dropped
    generation: u64,
    pages_loaded: u32,
    live_delivered: u64,
    duplicates_ignored: u64,
}

impl<P> ReconcilerState<P> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            current_page: 0,
            has_more: false,
            loading_older: false,
            refreshing: false,
            connection_state: ConnectionState::Disconnected,
            phase: Phase::Idle,
            generation: 0,
            pages_loaded: 0,
            live_delivered: 0,
            duplicates_ignored: 0,
        }
    }

    fn flag(&mut self, flag: Flag) -> &mut bool {
        match flag {
            Flag::LoadingOlder => &mut self.loading_older,
            Flag::Refreshing => &mut self.refreshing,
        }
    }

    /// Insert unseen items; held ids keep their current entry.
    fn absorb(&mut self, items: Vec<FeedItem<P>>, mark_new: bool) -> Vec<(String, NaiveDate)> {
        let mut added = Vec::new();
        for mut item in items {
            if let Entry::Vacant(slot) = self.items.entry(item.id.clone()) {
                item.is_new = mark_new;
                added.push((item.id.clone(), item.date()));
                slot.insert(item);
            }
        }
        added
    }
}

/// State shared with the live stream callback
struct Shared<P> {
    state: Mutex<ReconcilerState<P>>,
    events: broadcast::Sender<FeedEvent>,
}

impl<P> Shared<P> {
    fn emit(&self, event: FeedEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn merge_incoming(&self, mut item: FeedItem<P>) -> MergeOutcome {
        let id = item.id.clone();
        let date = item.date();
        let outcome = {
            let mut st = self.state.lock();
            if st.phase == Phase::TornDown {
                MergeOutcome::Ignored
            } else {
                st.live_delivered += 1;
                if st.items.contains_key(&id) {
                    st.duplicates_ignored += 1;
                    MergeOutcome::Duplicate
                } else {
                    item.is_new = true;
                    st.items.insert(id.clone(), item);
                    MergeOutcome::Inserted
                }
            }
        };

        match outcome {
            MergeOutcome::Inserted => {
                debug!("Live item {} merged into {}", id, date);
                self.emit(FeedEvent::ItemAdded { id, date });
                self.emit(FeedEvent::ScrollToNewest { date });
            }
            MergeOutcome::Duplicate => {
                debug!("Duplicate delivery of {} ignored", id);
                self.emit(FeedEvent::DuplicateIgnored { id });
            }
            MergeOutcome::Ignored => {}
        }
        outcome
    }

    fn set_connection_state(&self, state: ConnectionState) {
        let changed = {
            let mut st = self.state.lock();
            if st.phase == Phase::TornDown || st.connection_state == state {
                false
            } else {
                st.connection_state = state;
                true
            }
        };
        if changed {
            self.emit(FeedEvent::ConnectionChanged { state });
        }
    }

    fn announce_added(&self, added: &[(String, NaiveDate)]) {
        for (id, date) in added {
            self.emit(FeedEvent::ItemAdded {
                id: id.clone(),
                date: *date,
            });
        }
        if let Some(newest) = added.iter().map(|(_, date)| *date).max() {
            self.emit(FeedEvent::ScrollToNewest { date: newest });
        }
    }
}

/// Clears an in-flight flag when the fetch finishes, fails or is dropped
struct FlagGuard<'a, P> {
    shared: &'a Shared<P>,
    flag: Flag,
    generation: u64,
}

impl<P> Drop for FlagGuard<'_, P> {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        if st.generation == self.generation {
            *st.flag(self.flag) = false;
        }
    }
}

/// Deduplicated, date-grouped view over a paged source and a live stream
pub struct LiveFeedReconciler<P, S, L>
where
    P: Clone + Send + Sync + 'static,
    S: PagedFetchSource<P>,
    L: LiveStream<P>,
{
    source: Arc<S>,
    stream: Arc<L>,
    topic: TopicKey,
    page_size: u32,
    shared: Arc<Shared<P>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl<P, S, L> LiveFeedReconciler<P, S, L>
where
    P: Clone + Send + Sync + 'static,
    S: PagedFetchSource<P>,
    L: LiveStream<P>,
{
    pub fn new(source: Arc<S>, stream: Arc<L>, topic: TopicKey, page_size: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            stream,
            topic,
            page_size: page_size.max(1),
            shared: Arc::new(Shared {
                state: Mutex::new(ReconcilerState::new()),
                events,
            }),
            subscription: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Subscribe to mutation notifications
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }

    /// Fetch page 0, seed the feed, then attach the live stream.
    ///
    /// Only a failed page fetch is an error; a stream that cannot be reached
    /// leaves the feed usable in the `Disconnected` state.
    pub async fn initialize(&self) -> Result<()> {
        let generation = {
            let mut st = self.shared.state.lock();
            match st.phase {
                Phase::TornDown => return Err(FeedError::TornDown),
                Phase::Initializing | Phase::Ready => return Err(FeedError::AlreadyInitialized),
                Phase::Idle => {}
            }
            st.phase = Phase::Initializing;
            st.generation
        };

        let page = match self.source.fetch_page(0, self.page_size).await {
            Ok(page) => page,
            Err(e) => {
                let mut st = self.shared.state.lock();
                if st.phase == Phase::Initializing {
                    st.phase = Phase::Idle;
                }
                drop(st);
                warn!("Initial fetch for {} failed: {}", self.topic, e);
                return Err(e);
            }
        };

        let (added, has_more) = {
            let mut st = self.shared.state.lock();
            if st.phase != Phase::Initializing || st.generation != generation {
                debug!("Dropping initial page for {}: feed torn down", self.topic);
                return Err(FeedError::TornDown);
            }
            let added = st.absorb(page.items, false).len();
            st.has_more = page.has_more;
            st.current_page = 0;
            st.pages_loaded = 1;
            st.phase = Phase::Ready;
            (added, st.has_more)
        };

        info!(
            "Seeded feed {} with {} items (has_more: {})",
            self.topic, added, has_more
        );
        self.shared.emit(FeedEvent::PageLoaded {
            page: 0,
            added,
            has_more,
        });

        self.connect_stream().await;
        Ok(())
    }

    async fn connect_stream(&self) -> bool {
        self.shared.set_connection_state(ConnectionState::Connecting);

        let weak: Weak<Shared<P>> = Arc::downgrade(&self.shared);
        let on_item: ItemCallback<P> = Arc::new(move |item| {
            if let Some(shared) = weak.upgrade() {
                shared.merge_incoming(item);
            }
        });

        match self.stream.subscribe(&self.topic, on_item).await {
            Ok(handle) => {
                let mut slot = self.subscription.lock();
                if !self.is_live() {
                    self.stream.unsubscribe(&handle);
                    return false;
                }
                if let Some(old) = slot.replace(handle) {
                    self.stream.unsubscribe(&old);
                }
                drop(slot);
                info!("Subscribed to live topic {}", self.topic);
                self.shared.set_connection_state(ConnectionState::Connected);
                true
            }
            Err(e) => {
                warn!(
                    "Live stream for {} unavailable, showing fetched pages only: {}",
                    self.topic, e
                );
                self.shared.set_connection_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Merge one live delivery. Known ids are a no-op.
    pub fn merge_incoming(&self, item: FeedItem<P>) -> MergeOutcome {
        self.shared.merge_incoming(item)
    }

    /// Fetch the page after `current_page` and merge it.
    ///
    /// At most one such fetch runs at a time; concurrent calls are skipped.
    pub async fn load_older_page(&self) -> Result<LoadOutcome> {
        let (next, generation) = {
            let mut st = self.shared.state.lock();
            let skip = match st.phase {
                Phase::TornDown => Some(SkipReason::TornDown),
                Phase::Idle | Phase::Initializing => Some(SkipReason::NotInitialized),
                Phase::Ready if st.loading_older => Some(SkipReason::InFlight),
                Phase::Ready if !st.has_more => Some(SkipReason::Exhausted),
                Phase::Ready => None,
            };
            if let Some(reason) = skip {
                return Ok(LoadOutcome::Skipped(reason));
            }
            st.loading_older = true;
            (st.current_page + 1, st.generation)
        };
        let _guard = FlagGuard {
            shared: &self.shared,
            flag: Flag::LoadingOlder,
            generation,
        };

        debug!("Loading page {} of {}", next, self.topic);
        let page = match self.source.fetch_page(next, self.page_size).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Fetching page {} of {} failed: {}", next, self.topic, e);
                return Err(e);
            }
        };

        let (added, has_more) = {
            let mut st = self.shared.state.lock();
            if st.phase != Phase::Ready || st.generation != generation {
                debug!("Dropping page {} of {}: feed torn down", next, self.topic);
                return Ok(LoadOutcome::Discarded);
            }
            let added = st.absorb(page.items, false).len();
            st.has_more = page.has_more;
            st.current_page = st.current_page.max(next);
            st.pages_loaded += 1;
            (added, st.has_more)
        };

        self.shared.emit(FeedEvent::PageLoaded {
            page: next,
            added,
            has_more,
        });
        Ok(LoadOutcome::Loaded {
            page: next,
            added,
            has_more,
        })
    }

    /// Re-fetch page 0 and merge ids not yet held, flagged as new.
    ///
    /// Used while the stream is down to pick up what it would have delivered.
    /// Pagination state is left alone. Returns the number of items added.
    pub async fn refresh_latest(&self) -> Result<usize> {
        let generation = {
            let mut st = self.shared.state.lock();
            if st.phase != Phase::Ready || st.refreshing {
                return Ok(0);
            }
            st.refreshing = true;
            st.generation
        };
        let _guard = FlagGuard {
            shared: &self.shared,
            flag: Flag::Refreshing,
            generation,
        };

        let page = self.source.fetch_page(0, self.page_size).await?;

        let added = {
            let mut st = self.shared.state.lock();
            if st.phase != Phase::Ready || st.generation != generation {
                return Ok(0);
            }
            st.absorb(page.items, true)
        };

        if !added.is_empty() {
            info!("Refresh of {} found {} new items", self.topic, added.len());
            self.shared.announce_added(&added);
        }
        Ok(added.len())
    }

    /// Drop an item, e.g. after the backend confirmed its deletion.
    /// The id may be delivered again later.
    pub fn remove_item(&self, id: &str) -> bool {
        let removed = {
            let mut st = self.shared.state.lock();
            st.phase != Phase::TornDown && st.items.remove(id).is_some()
        };
        if removed {
            self.shared.emit(FeedEvent::ItemRemoved { id: id.to_string() });
        }
        removed
    }

    /// Replace timestamp and payload of a held item, keeping its `is_new` flag
    pub fn update_item(&self, item: FeedItem<P>) -> bool {
        let id = item.id.clone();
        let updated = {
            let mut st = self.shared.state.lock();
            if st.phase == Phase::TornDown {
                false
            } else if let Some(held) = st.items.get_mut(&id) {
                held.created_at = item.created_at;
                held.payload = item.payload;
                true
            } else {
                false
            }
        };
        if updated {
            self.shared.emit(FeedEvent::ItemUpdated { id });
        }
        updated
    }

    /// Clear the highlight of a live item
    pub fn mark_seen(&self, id: &str) -> bool {
        let mut st = self.shared.state.lock();
        if st.phase == Phase::TornDown {
            return false;
        }
        match st.items.get_mut(id) {
            Some(item) if item.is_new => {
                item.is_new = false;
                true
            }
            _ => false,
        }
    }

    /// Items grouped by date, groups and items oldest first
    pub fn grouped_view(&self) -> Vec<DateGroup<P>> {
        let items: Vec<FeedItem<P>> = self.shared.state.lock().items.values().cloned().collect();
        group_by_date(items)
    }

    pub fn get(&self, id: &str) -> Option<FeedItem<P>> {
        self.shared.state.lock().items.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.state.lock().items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_page(&self) -> u32 {
        self.shared.state.lock().current_page
    }

    pub fn has_more(&self) -> bool {
        self.shared.state.lock().has_more
    }

    pub fn is_loading_older(&self) -> bool {
        self.shared.state.lock().loading_older
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.lock().connection_state
    }

    /// False once torn down
    pub fn is_live(&self) -> bool {
        self.shared.state.lock().phase != Phase::TornDown
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().phase == Phase::Ready
    }

    pub fn stats(&self) -> FeedStats {
        let st = self.shared.state.lock();
        FeedStats {
            item_count: st.items.len(),
            current_page: st.current_page,
            has_more: st.has_more,
            loading_older: st.loading_older,
            pages_loaded: st.pages_loaded,
            live_delivered: st.live_delivered,
            duplicates_ignored: st.duplicates_ignored,
            connection_state: st.connection_state,
        }
    }

    /// Pull the transport's view of the connection into the feed state
    pub fn sync_connection_state(&self) -> ConnectionState {
        if !self.is_ready() {
            return self.connection_state();
        }
        let subscribed = self.subscription.lock().is_some();
        let state = if subscribed && self.stream.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.shared.set_connection_state(state);
        state
    }

    /// Re-subscribe if the stream dropped. Returns whether the feed is live.
    pub async fn reconnect_stream(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        if self.subscription.lock().is_some() && self.stream.is_connected() {
            return true;
        }
        if let Some(stale) = self.subscription.lock().take() {
            self.stream.unsubscribe(&stale);
        }
        self.connect_stream().await
    }

    /// Release the subscription and stop accepting results. Idempotent.
    pub fn teardown(&self) {
        let was_live = {
            let mut st = self.shared.state.lock();
            let was_live = st.phase != Phase::TornDown;
            st.phase = Phase::TornDown;
            st.loading_older = false;
            st.refreshing = false;
            st.generation += 1;
            st.connection_state = ConnectionState::Disconnected;
            was_live
        };

        if let Some(handle) = self.subscription.lock().take() {
            self.stream.unsubscribe(&handle);
        }

        if was_live {
            info!("Feed {} torn down", self.topic);
            self.shared.emit(FeedEvent::ConnectionChanged {
                state: ConnectionState::Disconnected,
            });
        }
    }
}

impl<P, S, L> Drop for LiveFeedReconciler<P, S, L>
where
    P: Clone + Send + Sync + 'static,
    S: PagedFetchSource<P>,
    L: LiveStream<P>,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Bucket items by calendar date; buckets and their items ascend in time.
/// Equal timestamps fall back to id order so the view is stable.
pub fn group_by_date<P>(items: impl IntoIterator<Item = FeedItem<P>>) -> Vec<DateGroup<P>> {
    let mut buckets: BTreeMap<NaiveDate, Vec<FeedItem<P>>> = BTreeMap::new();
    for item in items {
        buckets.entry(item.date()).or_default().push(item);
    }
    buckets
        .into_iter()
        .map(|(date, mut items)| {
            items.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            DateGroup { date, items }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedPage;
    use crate::source::ChannelStream;
    use chrono::{DateTime, TimeZone, Utc};

    struct FixedSource {
        items: Vec<FeedItem<String>>,
    }

    impl PagedFetchSource<String> for FixedSource {
        async fn fetch_page(&self, page_index: u32, _page_size: u32) -> Result<FeedPage<String>> {
            let items = if page_index == 0 { self.items.clone() } else { Vec::new() };
            Ok(FeedPage {
                items,
                has_more: false,
                page_index,
            })
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn item(id: &str, ts: DateTime<Utc>) -> FeedItem<String> {
        FeedItem::new(id, ts, format!("payload {}", id))
    }

    fn reconciler(
        items: Vec<FeedItem<String>>,
    ) -> LiveFeedReconciler<String, FixedSource, ChannelStream<String>> {
        LiveFeedReconciler::new(
            Arc::new(FixedSource { items }),
            Arc::new(ChannelStream::new()),
            TopicKey::group("22", "04"),
            10,
        )
    }

    #[test]
    fn test_group_by_date_orders_regardless_of_insertion() {
        let t1 = at(1, 8);
        let t2 = at(1, 9);
        let t3 = at(1, 10);
        let groups = group_by_date(vec![item("c", t3), item("a", t1), item("b", t2)]);
        assert_eq!(groups.len(), 1);
        let order: Vec<_> = groups[0].items.iter().map(|i| i.created_at).collect();
        assert_eq!(order, vec![t1, t2, t3]);
    }

    #[test]
    fn test_groups_ascend_by_date() {
        let groups = group_by_date(vec![item("x", at(3, 1)), item("y", at(1, 1)), item("z", at(2, 1))]);
        let keys: Vec<_> = groups.iter().map(|g| g.date_key()).collect();
        assert_eq!(keys, vec!["2024-03-01", "2024-03-02", "2024-03-03"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let feed = reconciler(Vec::new());
        assert_eq!(feed.merge_incoming(item("n1", at(1, 8))), MergeOutcome::Inserted);
        assert_eq!(feed.merge_incoming(item("n1", at(1, 8))), MergeOutcome::Duplicate);
        assert_eq!(feed.len(), 1);
        assert!(feed.get("n1").unwrap().is_new);

        let stats = feed.stats();
        assert_eq!(stats.live_delivered, 2);
        assert_eq!(stats.duplicates_ignored, 1);
    }

    #[test]
    fn test_live_merge_emits_scroll_to_newest() {
        let feed = reconciler(Vec::new());
        let mut events = feed.events();
        feed.merge_incoming(item("n1", at(2, 8)));
        assert_eq!(
            events.try_recv().unwrap(),
            FeedEvent::ItemAdded {
                id: "n1".into(),
                date: at(2, 8).date_naive()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            FeedEvent::ScrollToNewest {
                date: at(2, 8).date_naive()
            }
        );
    }

    #[test]
    fn test_remove_does_not_poison_id() {
        let feed = reconciler(Vec::new());
        feed.merge_incoming(item("n42", at(1, 8)));
        assert!(feed.remove_item("n42"));
        assert!(!feed.remove_item("n42"));
        assert_eq!(feed.merge_incoming(item("n42", at(1, 8))), MergeOutcome::Inserted);
        assert!(feed.contains("n42"));
    }

    #[test]
    fn test_update_and_mark_seen() {
        let feed = reconciler(Vec::new());
        feed.merge_incoming(item("n1", at(1, 8)));

        let mut edited = item("n1", at(1, 9));
        edited.payload = "edited".to_string();
        assert!(feed.update_item(edited));
        let held = feed.get("n1").unwrap();
        assert_eq!(held.payload, "edited");
        assert_eq!(held.created_at, at(1, 9));
        assert!(held.is_new);

        assert!(feed.mark_seen("n1"));
        assert!(!feed.mark_seen("n1"));
        assert!(!feed.get("n1").unwrap().is_new);
        assert!(!feed.update_item(item("missing", at(1, 9))));
    }

    #[tokio::test]
    async fn test_initialize_keeps_early_live_item() {
        let mut stale = item("n1", at(1, 8));
        stale.payload = "from page".to_string();
        let feed = reconciler(vec![stale, item("n2", at(1, 9))]);

        // Delivered before the initial fetch completes
        let mut fresh = item("n1", at(1, 8));
        fresh.payload = "from stream".to_string();
        feed.merge_incoming(fresh);

        feed.initialize().await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed.get("n1").unwrap().payload, "from stream");
        assert!(!feed.get("n2").unwrap().is_new);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_ignores_late_items() {
        let feed = reconciler(vec![item("n1", at(1, 8))]);
        feed.initialize().await.unwrap();
        feed.merge_incoming(item("n3", at(1, 10)));
        feed.teardown();
        feed.teardown();
        assert!(!feed.is_live());
        assert_eq!(feed.merge_incoming(item("n2", at(1, 9))), MergeOutcome::Ignored);
        assert_eq!(feed.len(), 2);

        // Snapshot stays readable but no longer changes
        assert!(!feed.mark_seen("n3"));
        assert!(feed.get("n3").unwrap().is_new);
        assert!(!feed.remove_item("n1"));
        assert!(!feed.update_item(item("n1", at(1, 11))));
        assert_eq!(feed.get("n1").unwrap().created_at, at(1, 8));
        assert_eq!(feed.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(feed.initialize().await, Err(FeedError::TornDown)));
    }
}
