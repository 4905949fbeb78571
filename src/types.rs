//! Core types for the data router.

use crate::error::StoreError;
use crossbeam_channel::Sender;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix of the textual request id form.
const REQUEST_ID_PREFIX: &str = "REQ";

/// Minimum digit count of the textual request id form.
const REQUEST_ID_WIDTH: usize = 7;

/// Identifier minted by the store for writes, reads and subscriptions.
///
/// Rendered as `REQ` followed by a zero-padded sequence number, e.g.
/// `REQ0000042`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:0width$}", REQUEST_ID_PREFIX, self.0, width = REQUEST_ID_WIDTH)
    }
}

impl FromStr for RequestId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidRequestId(s.to_string());
        let digits = s.strip_prefix(REQUEST_ID_PREFIX).ok_or_else(invalid)?;
        if digits.len() < REQUEST_ID_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        digits.parse().map(RequestId).map_err(|_| invalid())
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Seconds since Unix epoch. Values below 1 mean "not set".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Never below 1, so a stamped reading always counts as set, even with a
    /// clock before the epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Timestamp(secs.max(1))
    }

    /// Whether the writer supplied a timestamp.
    pub fn is_set(self) -> bool {
        self.0 >= 1
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A (node, measurement) pair. The unit of storage and subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub node: String,
    pub measurement: String,
}

impl Key {
    pub fn new(node: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            measurement: measurement.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.measurement)
    }
}

/// A single reading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    /// Measurement name under the node.
    pub measurement: String,
    /// Reading, kept as text.
    pub value: String,
    /// When the reading was taken. Stamped by the store if unset.
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl Data {
    /// A reading without a timestamp; the store stamps it on write.
    pub fn new(measurement: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            value: value.into(),
            timestamp: Timestamp::default(),
        }
    }

    /// A reading with an explicit timestamp, stored verbatim.
    pub fn at(measurement: impl Into<String>, value: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            value: value.into(),
            timestamp: Timestamp(timestamp),
        }
    }
}

/// Message delivered to a reader or subscriber channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub request_id: RequestId,
    pub node: String,
    pub datapoints: Vec<Data>,
}

/// A read or subscribe request from the transport layer.
#[derive(Clone, Debug)]
pub struct Request {
    pub node: String,
    pub measurements: Vec<String>,
    /// Where replies are delivered.
    pub reply: Sender<Reply>,
}

impl Request {
    pub fn new<I, S>(node: impl Into<String>, measurements: I, reply: Sender<Reply>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            node: node.into(),
            measurements: measurements.into_iter().map(Into::into).collect(),
            reply,
        }
    }
}

/// A batch of readings for one node.
///
/// The batch is authoritative for the node: measurements stored for the node
/// but missing from the batch are pruned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub node: String,
    pub datapoints: Vec<Data>,
}

impl Write {
    pub fn new(node: impl Into<String>, datapoints: Vec<Data>) -> Self {
        Self {
            node: node.into(),
            datapoints,
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Known nodes.
    pub node_count: usize,
    /// Stored (node, measurement) values.
    pub value_count: usize,
    /// Active subscriptions.
    pub subscription_count: usize,
    /// Keys with at least one subscriber.
    pub indexed_keys: usize,
    /// Replies handed to subscriber channels.
    pub delivered: u64,
    /// Replies discarded because a subscriber channel was full.
    pub dropped: u64,
}
