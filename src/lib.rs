//! # Data Router
//!
//! An in-process store that keeps the latest reading for every
//! (node, measurement) pair and fans new readings out to subscribers.
//!
//! ## Core Concepts
//!
//! - **Values**: Only the most recent reading per key is kept
//! - **Writes**: A write is authoritative for a node's measurement set
//! - **Subscriptions**: Per-key interest with a reply channel
//! - **Delivery**: Non-blocking hand-off with a configurable overflow policy
//!
//! ## Example
//!
//! ```ignore
//! use datarouter::{Data, Request, Store, Write};
//!
//! let store = Store::new();
//! store.write(Write::new("sensor-1", vec![Data::new("temp", "21.5")]));
//!
//! // Read current values once
//! let (tx, rx) = crossbeam_channel::unbounded();
//! store.read_immediate(Request::new("sensor-1", ["temp"], tx.clone()))?;
//! let reply = rx.recv()?;
//!
//! // Receive every future write of "temp"
//! let id = store.subscribe(Request::new("sensor-1", ["temp"], tx))?;
//! store.cancel(id)?;
//! ```

pub mod error;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use store::{Store, StoreConfig};
pub use subscriptions::{OverflowPolicy, SubscriptionHandle, SubscriptionManager};
pub use types::*;
