//! Runtime components for the event-driven side of the service.
//!
//! - **`consumer`**: event bus consumer with reconnection and retry
//! - **`handlers`**: the handler trait consumers dispatch to
//! - **`retry`**: exponential backoff
//! - **`lifecycle`**: application startup and graceful shutdown

pub mod consumer;
pub mod handlers;
pub mod lifecycle;
pub mod retry;

pub use consumer::{ConsumerExit, EventConsumer, EventConsumerBuilder};
pub use handlers::{EventHandler, HandlerError};
pub use lifecycle::{Application, BackgroundTask, shutdown_signal};
pub use retry::{RetryPolicy, retry_with_predicate};
