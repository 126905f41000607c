// Run lease renewal while a pass or recovery operation is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::traits::ContentStore;

const MIN_RENEW_PERIOD: Duration = Duration::from_millis(100);

/// Renews the lease every third of its TTL until stopped. If the store says
/// the lease belongs to someone else, renewal stops and [`is_lost`] turns true.
///
/// [`is_lost`]: LeaseHeartbeat::is_lost
pub struct LeaseHeartbeat {
    holder: String,
    lost: Arc<AtomicBool>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LeaseHeartbeat {
    /// Start renewing a lease `holder` has just acquired.
    pub fn start(store: Arc<dyn ContentStore>, holder: String, ttl: Duration) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let period = (ttl / 3).max(MIN_RENEW_PERIOD);

        let task = tokio::spawn({
            let holder = holder.clone();
            let lost = lost.clone();
            async move {
                let mut ticks = tokio::time::interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticks.tick().await;
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = ticks.tick() => {}
                    }
                    match store.try_acquire_lease(&holder, ttl).await {
                        Ok(true) => debug!(holder = %holder, "Sync lease renewed"),
                        Ok(false) => {
                            warn!(holder = %holder, "Sync lease taken by another pass");
                            lost.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => warn!(error = %e, "Sync lease renewal failed, retrying"),
                    }
                }
            }
        });

        Self {
            holder,
            lost,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// True once a renewal found the lease held by someone else.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stop renewing and wait for any renewal in progress to finish, so the
    /// lease can be released without a late renewal recreating it.
    pub async fn stop(mut self) -> String {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        std::mem::take(&mut self.holder)
    }
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    #[tokio::test]
    async fn renews_until_stopped() {
        let store = Arc::new(MemoryStore::new());
        assert!(store
            .try_acquire_lease("a", Duration::from_millis(300))
            .await
            .unwrap());

        let ttl = Duration::from_millis(300);
        let heartbeat = LeaseHeartbeat::start(store.clone(), "a".into(), ttl);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!heartbeat.is_lost());
        assert_eq!(heartbeat.stop().await, "a");

        // One acquire plus a renewal every 100ms.
        let attempts = store.lease_attempts();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(attempts >= 3, "{attempts} lease calls");
        assert_eq!(store.lease_attempts(), attempts);
    }

    #[tokio::test]
    async fn reports_a_lease_taken_over() {
        let store = Arc::new(MemoryStore::new().with_lease_held_by("other"));
        let ttl = Duration::from_millis(300);
        let heartbeat = LeaseHeartbeat::start(store.clone(), "a".into(), ttl);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(heartbeat.is_lost());
        assert_eq!(store.lease_holder().as_deref(), Some("other"));
    }
}
