//! Subscription manager for fanning out value updates.
//!
//! Lock order within the manager is index, then tracking table. Callers that
//! also hold the store's value-table lock must have taken it first.

use crate::error::{Result, StoreError};
use crate::types::{Data, Key, Reply, RequestId};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::types::OverflowPolicy;

/// Bookkeeping for one active subscription.
struct Tracking {
    request_id: RequestId,
    reply: Sender<Reply>,
    keys: Vec<Key>,
}

/// Result of handing a reply to a subscriber channel.
enum Delivery {
    Sent,
    Full,
    Disconnected,
}

impl Tracking {
    fn try_send(&self, reply: Reply) -> Delivery {
        match self.reply.try_send(reply) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
        }
    }
}

/// Owns the subscription index and the tracking table.
pub struct SubscriptionManager {
    /// Trackings interested in each key, in subscription order.
    index: RwLock<HashMap<Key, Vec<Arc<Tracking>>>>,
    /// Active trackings by request id.
    trackings: Mutex<HashMap<RequestId, Arc<Tracking>>>,
    overflow: OverflowPolicy,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new(overflow: OverflowPolicy) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            trackings: Mutex::new(HashMap::new()),
            overflow,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscription under every key it names.
    ///
    /// A key listed twice is indexed once, so each write is delivered once.
    /// Fails if `request_id` already names an active subscription.
    pub(crate) fn register(
        &self,
        request_id: RequestId,
        keys: Vec<Key>,
        reply: Sender<Reply>,
    ) -> Result<()> {
        let mut unique: Vec<Key> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        let tracking = Arc::new(Tracking {
            request_id,
            reply,
            keys: unique,
        });

        let mut index = self.index.write();
        let mut trackings = self.trackings.lock();
        if trackings.contains_key(&request_id) {
            return Err(StoreError::DuplicateRequestId(request_id));
        }
        Self::reap_disconnected(&mut index, &mut trackings);

        for key in &tracking.keys {
            index
                .entry(key.clone())
                .or_default()
                .push(Arc::clone(&tracking));
        }
        trackings.insert(request_id, tracking);
        Ok(())
    }

    /// Cancel a subscription, removing it from the tracking table and from
    /// every index bucket it was registered in.
    pub fn cancel(&self, request_id: RequestId) -> Result<()> {
        let mut index = self.index.write();
        let mut trackings = self.trackings.lock();

        let tracking = trackings
            .remove(&request_id)
            .ok_or(StoreError::SubscriptionNotFound(request_id))?;
        Self::unindex(&mut index, &tracking);

        debug!(%request_id, "subscription canceled");
        Ok(())
    }

    /// Drop the index bucket for a key that no longer exists.
    ///
    /// Live trackings stay in the tracking table; they simply stop receiving
    /// updates for this key. Trackings whose receiver is gone are removed,
    /// since no later publish may reach them.
    pub fn prune_key(&self, key: &Key) {
        let mut index = self.index.write();
        let Some(bucket) = index.remove(key) else {
            return;
        };
        debug!(%key, subscribers = bucket.len(), "subscriptions pruned");

        let mut trackings = self.trackings.lock();
        Self::reap_disconnected(&mut index, &mut trackings);
    }

    /// Remove every tracking whose receiver has been dropped.
    fn reap_disconnected(
        index: &mut HashMap<Key, Vec<Arc<Tracking>>>,
        trackings: &mut HashMap<RequestId, Arc<Tracking>>,
    ) {
        trackings.retain(|id, tracking| {
            if !tracking.reply.is_disconnected() {
                return true;
            }
            Self::unindex(index, tracking);
            debug!(request_id = %id, "disconnected subscriber removed");
            false
        });
    }

    /// Deliver a datapoint to every subscriber of `key`, in subscription order.
    pub fn publish(&self, key: &Key, data: &Data) {
        let mut to_remove = Vec::new();

        {
            let index = self.index.read();
            let Some(bucket) = index.get(key) else {
                return;
            };

            for tracking in bucket {
                let reply = Reply {
                    request_id: tracking.request_id,
                    node: key.node.clone(),
                    datapoints: vec![data.clone()],
                };

                match tracking.try_send(reply) {
                    Delivery::Sent => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                        trace!(request_id = %tracking.request_id, %key, "reply delivered");
                    }
                    Delivery::Full => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(request_id = %tracking.request_id, %key, "subscriber channel full, reply dropped");
                        if self.overflow == OverflowPolicy::DropSubscriber {
                            to_remove.push(tracking.request_id);
                        }
                    }
                    Delivery::Disconnected => {
                        to_remove.push(tracking.request_id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            self.remove_trackings(&to_remove);
        }
    }

    /// Remove subscriptions that can no longer be delivered to.
    fn remove_trackings(&self, ids: &[RequestId]) {
        let mut index = self.index.write();
        let mut trackings = self.trackings.lock();
        for id in ids {
            if let Some(tracking) = trackings.remove(id) {
                Self::unindex(&mut index, &tracking);
                warn!(request_id = %id, "subscriber removed");
            }
        }
    }

    fn unindex(index: &mut HashMap<Key, Vec<Arc<Tracking>>>, tracking: &Tracking) {
        for key in &tracking.keys {
            if let Some(bucket) = index.get_mut(key) {
                bucket.retain(|t| t.request_id != tracking.request_id);
                if bucket.is_empty() {
                    index.remove(key);
                }
            }
        }
    }

    /// Whether a request id names an active subscription.
    pub fn contains(&self, request_id: RequestId) -> bool {
        self.trackings.lock().contains_key(&request_id)
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.trackings.lock().len()
    }

    /// Number of keys with at least one subscriber.
    pub fn indexed_key_count(&self) -> usize {
        self.index.read().len()
    }

    /// Number of subscribers registered for a key.
    pub fn subscriber_count(&self, key: &Key) -> usize {
        self.index.read().get(key).map_or(0, Vec::len)
    }

    /// Replies handed to subscriber channels so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Replies discarded on full channels so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(OverflowPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    fn key(measurement: &str) -> Key {
        Key::new("node-1", measurement)
    }

    #[test]
    fn test_register_and_cancel() {
        let manager = SubscriptionManager::default();
        let (tx, _rx) = unbounded();

        manager.register(RequestId(1), vec![key("temp"), key("humidity")], tx).unwrap();
        assert_eq!(manager.subscription_count(), 1);
        assert_eq!(manager.indexed_key_count(), 2);
        assert!(manager.contains(RequestId(1)));

        manager.cancel(RequestId(1)).unwrap();
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(manager.indexed_key_count(), 0);
        assert!(!manager.contains(RequestId(1)));
    }

    #[test]
    fn test_cancel_unknown() {
        let manager = SubscriptionManager::default();
        let result = manager.cancel(RequestId(99));
        assert!(matches!(
            result,
            Err(StoreError::SubscriptionNotFound(RequestId(99)))
        ));
    }

    #[test]
    fn test_cancel_keeps_other_subscribers() {
        let manager = SubscriptionManager::default();
        let (tx1, rx1) = unbounded();
        let (tx2, rx2) = unbounded();

        manager.register(RequestId(1), vec![key("temp")], tx1).unwrap();
        manager.register(RequestId(2), vec![key("temp")], tx2).unwrap();
        manager.cancel(RequestId(1)).unwrap();

        assert_eq!(manager.subscriber_count(&key("temp")), 1);
        manager.publish(&key("temp"), &Data::at("temp", "20", 100));

        assert!(rx1.try_recv().is_err());
        let reply = rx2.try_recv().unwrap();
        assert_eq!(reply.request_id, RequestId(2));
    }

    #[test]
    fn test_duplicate_keys_delivered_once() {
        let manager = SubscriptionManager::default();
        let (tx, rx) = unbounded();

        manager.register(RequestId(1), vec![key("temp"), key("temp")], tx).unwrap();
        manager.publish(&key("temp"), &Data::at("temp", "20", 100));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let manager = SubscriptionManager::default();
        let (tx, rx) = unbounded();

        for id in 1..=3 {
            manager.register(RequestId(id), vec![key("temp")], tx.clone()).unwrap();
        }
        manager.publish(&key("temp"), &Data::at("temp", "20", 100));

        let ids: Vec<_> = rx.try_iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![RequestId(1), RequestId(2), RequestId(3)]);
        assert_eq!(manager.delivered(), 3);
    }

    #[test]
    fn test_full_channel_drops_newest() {
        let manager = SubscriptionManager::new(OverflowPolicy::DropNewest);
        let (tx, rx) = bounded(2);
        manager.register(RequestId(1), vec![key("temp")], tx).unwrap();

        for i in 0..5 {
            manager.publish(&key("temp"), &Data::at("temp", i.to_string(), 100 + i));
        }

        assert_eq!(manager.delivered(), 2);
        assert_eq!(manager.dropped(), 3);
        assert!(manager.contains(RequestId(1)));

        let values: Vec<_> = rx
            .try_iter()
            .map(|r| r.datapoints[0].value.clone())
            .collect();
        assert_eq!(values, vec!["0", "1"]);
    }

    #[test]
    fn test_full_channel_drops_subscriber() {
        let manager = SubscriptionManager::new(OverflowPolicy::DropSubscriber);
        let (tx, _rx) = bounded(1);
        manager.register(RequestId(1), vec![key("temp"), key("humidity")], tx).unwrap();

        manager.publish(&key("temp"), &Data::at("temp", "1", 100));
        manager.publish(&key("temp"), &Data::at("temp", "2", 101));

        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(manager.indexed_key_count(), 0);
    }

    #[test]
    fn test_disconnected_subscriber_removed() {
        let manager = SubscriptionManager::default();
        let (tx, rx) = unbounded();
        manager.register(RequestId(1), vec![key("temp")], tx).unwrap();
        drop(rx);

        manager.publish(&key("temp"), &Data::at("temp", "1", 100));

        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(manager.subscriber_count(&key("temp")), 0);
        assert_eq!(manager.dropped(), 0);
    }

    #[test]
    fn test_prune_key_keeps_tracking() {
        let manager = SubscriptionManager::default();
        let (tx, rx) = unbounded();
        manager.register(RequestId(1), vec![key("temp"), key("humidity")], tx).unwrap();

        manager.prune_key(&key("temp"));
        manager.publish(&key("temp"), &Data::at("temp", "1", 100));
        manager.publish(&key("humidity"), &Data::at("humidity", "40", 100));

        let replies: Vec<_> = rx.try_iter().collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].datapoints[0].measurement, "humidity");

        // Cancel tolerates the missing bucket.
        manager.cancel(RequestId(1)).unwrap();
        assert_eq!(manager.indexed_key_count(), 0);
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let manager = SubscriptionManager::default();
        let (tx1, rx1) = unbounded();
        let (tx2, _rx2) = unbounded();

        manager.register(RequestId(1), vec![key("temp")], tx1).unwrap();
        let result = manager.register(RequestId(1), vec![key("humidity")], tx2);
        assert!(matches!(
            result,
            Err(StoreError::DuplicateRequestId(RequestId(1)))
        ));
        assert_eq!(manager.subscriber_count(&key("humidity")), 0);

        manager.cancel(RequestId(1)).unwrap();
        manager.publish(&key("temp"), &Data::at("temp", "1", 100));

        assert!(rx1.try_recv().is_err());
        assert_eq!(manager.indexed_key_count(), 0);
    }

    #[test]
    fn test_prune_reaps_disconnected_tracking() {
        let manager = SubscriptionManager::default();
        let (tx1, rx1) = unbounded();
        let (tx2, _rx2) = unbounded();
        manager.register(RequestId(1), vec![key("temp"), key("humidity")], tx1).unwrap();
        manager.register(RequestId(2), vec![key("temp")], tx2).unwrap();
        drop(rx1);

        manager.prune_key(&key("temp"));

        assert!(!manager.contains(RequestId(1)));
        assert!(manager.contains(RequestId(2)));
        assert_eq!(manager.subscriber_count(&key("humidity")), 0);
        assert_eq!(manager.indexed_key_count(), 0);
    }

    #[test]
    fn test_register_reaps_unreachable_tracking() {
        let manager = SubscriptionManager::default();
        let (tx, rx) = unbounded();
        manager.register(RequestId(1), vec![key("temp")], tx).unwrap();

        // Receiver dropped after its only key was pruned: no publish reaches it.
        manager.prune_key(&key("temp"));
        drop(rx);
        assert!(manager.contains(RequestId(1)));

        let (tx2, _rx2) = unbounded();
        manager.register(RequestId(2), vec![key("humidity")], tx2).unwrap();

        assert!(!manager.contains(RequestId(1)));
        assert_eq!(manager.subscription_count(), 1);
    }
}
