//! WebSocket transport: pooled frames, supervised connections, reconnect policy

pub mod classify;
pub mod connection;
pub mod message;
pub mod subscription;

pub use classify::{ErrorClassifier, ErrorMatcher, DEFAULT_RECONNECT_PATTERNS};
pub use connection::{ConnectHook, ConnectionManager, ConnectionState, FrameSender};
pub use message::Message;
pub use subscription::{batches, Subscription, SubscriptionSet, MAX_BATCH_SIZE};
