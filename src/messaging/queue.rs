//! # Queue Client Abstraction
//!
//! The FIFO queue seam used by the enqueue coordinator and the stage
//! processors. Implementations own visibility timeouts and dequeue counting;
//! the pipeline only observes them.

use std::time::Duration;

use async_trait::async_trait;

use super::errors::MessagingResult;
use super::message::QueueMessage;

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create queue if it doesn't exist
    async fn create_queue_if_absent(&self, queue_name: &str) -> MessagingResult<()>;

    /// Send a raw body, returning the message id
    async fn send_message(&self, queue_name: &str, body: &str) -> MessagingResult<String>;

    /// Receive one message, hiding it from other consumers for `visibility_timeout`
    async fn receive_message(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<QueueMessage>>;

    /// Delete a received message using its pop receipt
    async fn delete_message(&self, queue_name: &str, message: &QueueMessage)
        -> MessagingResult<()>;

    /// Approximate number of messages in the queue
    async fn approximate_message_count(&self, queue_name: &str) -> MessagingResult<u64>;
}
