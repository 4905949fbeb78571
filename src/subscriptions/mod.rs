//! Subscription index and tracking table.
//!
//! A subscription (a "tracking") names a set of (node, measurement) keys and
//! a reply channel. The same tracking is shared by the tracking table, keyed
//! by request id, and by every index bucket of the keys it names.
//!
//! Delivery never blocks: replies are handed over with `try_send`, and a full
//! channel is handled according to the configured [`OverflowPolicy`]. A
//! subscriber whose receiver was dropped is removed on the next delivery.
//!
//! # Example
//!
//! ```ignore
//! let store = Store::new();
//! store.write(Write::new("sensor-1", vec![Data::new("temp", "21.5")]));
//!
//! let handle = store.subscribe_channel("sensor-1", ["temp"])?;
//! while let Ok(reply) = handle.recv() {
//!     println!("{}: {:?}", reply.node, reply.datapoints);
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{OverflowPolicy, SubscriptionHandle};
