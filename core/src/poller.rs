/// Fallback refresh while the live stream is down
///
/// Every tick the poller syncs the connection state; when the stream is not
/// connected it re-fetches the newest page and then tries to re-subscribe.
use crate::feed::{ConnectionState, LiveFeedReconciler};
use crate::source::{LiveStream, PagedFetchSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct FallbackPoller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FallbackPoller {
    /// Start polling on the current tokio runtime
    pub fn spawn<P, S, L>(reconciler: Arc<LiveFeedReconciler<P, S, L>>, period: Duration) -> Self
    where
        P: Clone + Send + Sync + 'static,
        S: PagedFetchSource<P>,
        L: LiveStream<P>,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if !reconciler.is_live() {
                    debug!("Feed {} gone, poller exiting", reconciler.topic());
                    break;
                }
                if reconciler.sync_connection_state() == ConnectionState::Connected {
                    continue;
                }

                match reconciler.refresh_latest().await {
                    Ok(0) => debug!("Fallback refresh of {}: nothing new", reconciler.topic()),
                    Ok(n) => info!("Fallback refresh of {} added {} items", reconciler.topic(), n),
                    Err(e) => warn!("Fallback refresh of {} failed: {}", reconciler.topic(), e),
                }

                if reconciler.reconnect_stream().await {
                    info!("Live stream for {} restored", reconciler.topic());
                }
            }
        });

        Self { shutdown, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the task and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!("Poller task ended abnormally: {}", e);
            }
        }
    }
}
