//! Process-wide reachability state for the remote API.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api_client::RemoteApi;

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// Single source of truth for "can we reach the remote API".
///
/// Cloning shares the same state. Transitions never start a sync on their own.
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    state: Arc<watch::Sender<bool>>,
    transitions: broadcast::Sender<bool>,
}

impl ConnectivityTracker {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(state),
            transitions,
        }
    }

    /// Tracker for contexts with no reachability signal; reports online until told otherwise.
    pub fn always_online() -> Self {
        Self::new(true)
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Stores `online` and notifies subscribers. Returns false when nothing changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            // Sent under the state lock so listeners see transitions in order.
            let _ = self.transitions.send(online);
            true
        });
        if changed {
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
        changed
    }

    pub fn went_online(&self) {
        self.set_online(true);
    }

    pub fn went_offline(&self) {
        self.set_online(false);
    }

    /// Receiver whose current value is the state at subscription time.
    /// Only the latest state is kept; use [`subscribe_fn`](Self::subscribe_fn) to see every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Calls `listener` with the current state now and again on every transition,
    /// until the returned [`Subscription`] is dropped. Must be called inside a tokio runtime.
    pub fn subscribe_fn<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let (initial, mut transitions) = {
            let state = self.state.borrow();
            (*state, self.transitions.subscribe())
        };
        listener(initial);

        let handle = tokio::spawn(async move {
            loop {
                match transitions.recv().await {
                    Ok(online) => listener(online),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connectivity listener missed {} transitions", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { handle }
    }

    /// Asks the server once whether it is reachable and records the answer.
    pub async fn probe_once<A>(&self, api: &A) -> bool
    where
        A: RemoteApi + ?Sized,
    {
        let online = match api.ping().await {
            Ok(()) => true,
            Err(e) if e.is_network() => {
                debug!("Reachability probe failed: {}", e);
                false
            }
            Err(_) => true,
        };
        self.set_online(online);
        online
    }

    /// Probes every `interval` until the returned [`Subscription`] is dropped.
    pub fn spawn_probe(&self, api: Arc<dyn RemoteApi>, interval: Duration) -> Subscription {
        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracker.probe_once(api.as_ref()).await;
            }
        });

        Subscription { handle }
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::always_online()
    }
}

/// Disposer for a listener or probe task. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::models::{Resource, ResourceType, Submission};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct PingOnly {
        reachable: AtomicBool,
    }

    #[async_trait]
    impl RemoteApi for PingOnly {
        async fn create(&self, _payload: &Submission) -> Result<Resource, ApiError> {
            unimplemented!()
        }

        async fn update(&self, _id: &str, _payload: &Submission) -> Result<Resource, ApiError> {
            unimplemented!()
        }

        async fn delete(&self, _resource_type: ResourceType, _id: &str) -> Result<(), ApiError> {
            unimplemented!()
        }

        async fn ping(&self) -> Result<(), ApiError> {
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ApiError::Network("connection refused".to_string()))
            }
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<bool>) -> bool {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("listener was not called")
            .expect("listener channel closed")
    }

    #[tokio::test]
    async fn test_listener_gets_current_state_then_transitions() {
        let tracker = ConnectivityTracker::new(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = tracker.subscribe_fn(move |online| {
            let _ = tx.send(online);
        });

        assert!(next(&mut rx).await);

        tracker.went_offline();
        assert!(!next(&mut rx).await);
        assert!(!tracker.is_online());

        // Repeated signal with no change does not notify.
        tracker.went_offline();
        tracker.went_online();
        assert!(next(&mut rx).await);
        assert!(subscription.is_active());

        subscription.unsubscribe();
        tracker.went_offline();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listener_sees_back_to_back_transitions() {
        let tracker = ConnectivityTracker::new(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = tracker.subscribe_fn(move |online| {
            let _ = tx.send(online);
        });

        tracker.went_offline();
        tracker.went_online();

        assert!(next(&mut rx).await);
        assert!(!next(&mut rx).await);
        assert!(next(&mut rx).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_set_online_reports_change() {
        let tracker = ConnectivityTracker::always_online();
        let shared = tracker.clone();
        assert!(!tracker.set_online(true));
        assert!(shared.set_online(false));
        assert!(!tracker.is_online());

        let mut receiver = tracker.subscribe();
        assert!(!*receiver.borrow_and_update());
        tracker.went_online();
        receiver.changed().await.unwrap();
        assert!(*receiver.borrow());
    }

    #[tokio::test]
    async fn test_probe_tracks_reachability() {
        let api = PingOnly {
            reachable: AtomicBool::new(false),
        };
        let tracker = ConnectivityTracker::new(true);

        assert!(!tracker.probe_once(&api).await);
        assert!(!tracker.is_online());

        api.reachable.store(true, Ordering::SeqCst);
        assert!(tracker.probe_once(&api).await);
        assert!(tracker.is_online());
    }

    #[tokio::test]
    async fn test_spawned_probe_feeds_tracker() {
        let api = Arc::new(PingOnly {
            reachable: AtomicBool::new(false),
        });
        let tracker = ConnectivityTracker::new(true);
        let mut receiver = tracker.subscribe();

        let probe = tracker.spawn_probe(api.clone(), Duration::from_millis(10));
        timeout(Duration::from_secs(1), receiver.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!tracker.is_online());
        drop(probe);
    }
}
