//! # Queue Engine Core
//!
//! In-process message queue engine with reservation-based delivery, delayed
//! visibility and HTTP push fan-out.
//!
//! This library provides:
//! - Pull queues: post, get (reserve), peek, delete, release, touch, clear
//! - Visibility timeouts that return unacknowledged messages to the queue
//! - Delayed messages that stay invisible until their delay elapses
//! - Push queues delivering to subscriber endpoints (multicast or unicast)
//!   with per-subscriber status, retries and explicit acknowledgment
//! - A registry creating queues on first use
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for queue operations and push delivery
//! - [`message`] - Identifiers, timestamps and message snapshots
//! - [`clock`] - Time sources
//! - [`store`] - Message records and state transitions
//! - [`scheduler`] - Time-ordered visibility index
//! - [`engine`] - Queue-scoped operations
//! - [`push`] - Push delivery state machine, transport and dispatcher
//! - [`retry`] - Backoff between push attempts
//! - [`registry`] - Name to queue mapping
//! - [`config`] - Engine configuration
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use queue_engine_core::{EngineConfig, PostOptions, QueueRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = QueueRegistry::new(EngineConfig::default())?;
//! let queue = registry.queue("orders")?;
//!
//! queue.post(vec![Bytes::from("hello")], PostOptions::new()).await?;
//! let messages = queue.get(1).await?;
//! queue.delete(&messages[0].id).await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod push;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;

// Re-export commonly used types at crate root for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, LoggingConfig, PushConfig, QueueSettings, SweepConfig};
pub use engine::{QueueEngine, QueueInfo, QueueUpdate};
pub use error::{ConfigurationError, PushError, QueueError, ValidationError};
pub use message::{Message, MessageId, MessageState, PostOptions, QueueId, QueueName, Timestamp};
pub use push::{
    DeliveryMode, DeliveryRequest, DeliveryResponse, DeliveryStatus, HttpPushTransport, PushDispatcher,
    PushMessage, PushTransport, PushType, Subscriber, SubscriptionStatus,
};
pub use registry::QueueRegistry;
pub use retry::BackoffPolicy;
