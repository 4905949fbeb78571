//! Main Store struct tying the value table and subscriptions together.
//!
//! Locks are always acquired in the order value table, subscription index,
//! tracking table. The last two live inside [`SubscriptionManager`].

use crate::error::{Result, StoreError};
use crate::subscriptions::{OverflowPolicy, SubscriptionHandle, SubscriptionManager};
use crate::types::{Data, Key, Reply, Request, RequestId, StoreStats, Timestamp, Write};
use crossbeam_channel::bounded;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Store configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of channels created by `subscribe_channel`.
    /// Default: 1000
    pub buffer_size: usize,

    /// Behavior when a subscriber channel is full.
    pub overflow: OverflowPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(StoreError::InvalidConfig(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Latest values by node, then measurement.
type ValueTable = HashMap<String, HashMap<String, Data>>;

/// The in-memory latest-value store.
///
/// Keeps only the most recent reading per (node, measurement) and fans each
/// write out to the subscribers of the written keys.
pub struct Store {
    config: StoreConfig,

    /// Latest value table.
    values: RwLock<ValueTable>,

    /// Subscription index and tracking table.
    subscriptions: SubscriptionManager,

    /// Last minted request id.
    next_id: AtomicU64,
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::build(StoreConfig::default())
    }

    /// Create a store with a custom configuration.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        Self {
            subscriptions: SubscriptionManager::new(config.overflow),
            config,
            values: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    // --- Values ---

    /// Write a batch of readings for a node.
    ///
    /// Measurements stored for the node but absent from the batch are removed
    /// along with their subscription buckets. Readings without a timestamp
    /// are stamped with the current time. Each reading is published to the
    /// subscribers of its key. The returned id is not linked to any
    /// subscription.
    pub fn write(&self, write: Write) -> RequestId {
        let Write { node, datapoints } = write;

        let mut values = self.values.write();
        let stored = values.entry(node.clone()).or_insert_with(|| {
            debug!(%node, "node created");
            HashMap::new()
        });

        let stale: Vec<String> = {
            let incoming: HashSet<&str> =
                datapoints.iter().map(|d| d.measurement.as_str()).collect();
            stored
                .keys()
                .filter(|m| !incoming.contains(m.as_str()))
                .cloned()
                .collect()
        };
        for measurement in stale {
            stored.remove(&measurement);
            let key = Key::new(node.clone(), measurement);
            debug!(%key, "measurement pruned");
            self.subscriptions.prune_key(&key);
        }

        for mut data in datapoints {
            if !data.timestamp.is_set() {
                data.timestamp = Timestamp::now();
            }
            let key = Key::new(node.clone(), data.measurement.clone());
            self.subscriptions.publish(&key, &data);
            stored.insert(key.measurement, data);
        }
        drop(values);

        self.next_request_id()
    }

    /// Read the current values of the requested measurements and deliver
    /// them as a single reply on the request's channel.
    ///
    /// Measurements that do not exist under the node are skipped. Fails if
    /// the node has never been written.
    pub fn read_immediate(&self, request: Request) -> Result<RequestId> {
        let Request {
            node,
            measurements,
            reply,
        } = request;

        let datapoints: Vec<Data> = {
            let values = self.values.read();
            let stored = values
                .get(&node)
                .ok_or_else(|| StoreError::NodeNotFound(node.clone()))?;
            measurements
                .iter()
                .filter_map(|m| stored.get(m).cloned())
                .collect()
        };

        let request_id = self.next_request_id();
        reply
            .send(Reply {
                request_id,
                node,
                datapoints,
            })
            .map_err(|_| StoreError::ReplyChannelClosed)?;
        Ok(request_id)
    }

    /// Get the latest reading for a single key.
    pub fn latest(&self, node: &str, measurement: &str) -> Option<Data> {
        self.values.read().get(node)?.get(measurement).cloned()
    }

    // --- Subscriptions ---

    /// Subscribe to future writes of the requested measurements.
    ///
    /// Measurements that do not exist yet may be named; they start delivering
    /// once written. Fails if the node has never been written.
    pub fn subscribe(&self, request: Request) -> Result<RequestId> {
        let Request {
            node,
            measurements,
            reply,
        } = request;

        // Held until registration completes so the node cannot be written
        // concurrently.
        let values = self.values.read();
        if !values.contains_key(&node) {
            return Err(StoreError::NodeNotFound(node));
        }

        let request_id = self.next_request_id();
        let keys = measurements
            .into_iter()
            .map(|m| Key::new(node.clone(), m))
            .collect();
        self.subscriptions.register(request_id, keys, reply)?;
        drop(values);

        debug!(%request_id, %node, "subscription registered");
        Ok(request_id)
    }

    /// Subscribe using a bounded channel created by the store.
    ///
    /// The channel capacity is `StoreConfig::buffer_size`.
    pub fn subscribe_channel<I, S>(&self, node: &str, measurements: I) -> Result<SubscriptionHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, receiver) = bounded(self.config.buffer_size);
        let id = self.subscribe(Request::new(node, measurements, sender))?;
        Ok(SubscriptionHandle { id, receiver })
    }

    /// Cancel a subscription. No further replies are delivered for it.
    pub fn cancel(&self, request_id: RequestId) -> Result<()> {
        self.subscriptions.cancel(request_id)
    }

    /// Get active subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    // --- Enumeration ---

    /// Known node ids, in no particular order.
    pub fn node_list(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Known measurement names for a node, in no particular order.
    pub fn source_list(&self, node: &str) -> Result<Vec<String>> {
        let values = self.values.read();
        let stored = values
            .get(node)
            .ok_or_else(|| StoreError::NodeNotFound(node.to_string()))?;
        Ok(stored.keys().cloned().collect())
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let (node_count, value_count) = {
            let values = self.values.read();
            (values.len(), values.values().map(HashMap::len).sum())
        };

        StoreStats {
            node_count,
            value_count,
            subscription_count: self.subscriptions.subscription_count(),
            indexed_keys: self.subscriptions.indexed_key_count(),
            delivered: self.subscriptions.delivered(),
            dropped: self.subscriptions.dropped(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
