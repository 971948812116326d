//! Transfer notifications
//!
//! - `dispatcher` - Queueing, immediate delivery and the retry sweep
//! - `body` - JSON body POSTed to subscribers
//! - `memory_store` - Concurrent in-memory notification store
//! - `http` - `reqwest` transport

pub mod body;
pub mod dispatcher;
pub mod http;
pub mod memory_store;

pub use body::build_notification_body;
pub use dispatcher::{
    retry_delay, DeliveryOutcome, DispatcherConfig, DispatcherState, DispatcherStats,
    NotificationDispatcher,
};
pub use http::HttpSender;
pub use memory_store::{MemoryNotificationStore, MemorySession};
