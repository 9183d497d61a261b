//! # In-Memory Queue Client
//!
//! Process-local `QueueClient` with visibility timeouts, pop receipts and
//! dequeue counting. Used by tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use super::message::QueueMessage;
use super::queue::QueueClient;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    dequeue_count: u32,
    pop_receipt: Option<String>,
    visible_at: Instant,
    inserted_at: SystemTime,
}

#[derive(Debug, Default)]
pub struct InMemoryQueueClient {
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue synchronously (test setup)
    pub fn create_queue(&self, queue_name: &str) {
        self.queues
            .lock()
            .entry(queue_name.to_string())
            .or_default();
    }

    pub fn queue_exists(&self, queue_name: &str) -> bool {
        self.queues.lock().contains_key(queue_name)
    }

    /// Bodies currently held by a queue, visible or not, oldest first
    pub fn messages(&self, queue_name: &str) -> Vec<String> {
        self.queues
            .lock()
            .get(queue_name)
            .map(|queue| queue.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, queue_name: &str) -> usize {
        self.queues
            .lock()
            .get(queue_name)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue_name: &str) -> bool {
        self.len(queue_name) == 0
    }

    /// Enqueue a body as if it had already been delivered `prior_deliveries` times
    pub fn send_redelivered(
        &self,
        queue_name: &str,
        body: &str,
        prior_deliveries: u32,
    ) -> MessagingResult<String> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let id = Uuid::new_v4().to_string();
        queue.push_back(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
            dequeue_count: prior_deliveries,
            pop_receipt: None,
            visible_at: Instant::now(),
            inserted_at: SystemTime::now(),
        });
        Ok(id)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn create_queue_if_absent(&self, queue_name: &str) -> MessagingResult<()> {
        if queue_name.trim().is_empty() {
            return Err(MessagingError::invalid_queue_name(
                queue_name,
                "queue name must not be empty",
            ));
        }
        self.create_queue(queue_name);
        Ok(())
    }

    async fn send_message(&self, queue_name: &str, body: &str) -> MessagingResult<String> {
        let id = self.send_redelivered(queue_name, body, 0)?;
        debug!(queue = %queue_name, message_id = %id, "📤 Message sent");
        Ok(id)
    }

    async fn receive_message(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<QueueMessage>> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Instant::now();
        let Some(stored) = queue.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        let pop_receipt = Uuid::new_v4().to_string();
        stored.dequeue_count = stored.dequeue_count.saturating_add(1);
        stored.pop_receipt = Some(pop_receipt.clone());
        stored.visible_at = now + visibility_timeout;

        Ok(Some(QueueMessage {
            id: stored.id.clone(),
            pop_receipt,
            dequeue_count: stored.dequeue_count,
            body: stored.body.clone(),
            inserted_at: stored.inserted_at,
        }))
    }

    async fn delete_message(
        &self,
        queue_name: &str,
        message: &QueueMessage,
    ) -> MessagingResult<()> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let position = queue
            .iter()
            .position(|m| m.id == message.id)
            .ok_or_else(|| MessagingError::message_not_found(queue_name, &message.id))?;

        if queue[position].pop_receipt.as_deref() != Some(message.pop_receipt.as_str()) {
            return Err(MessagingError::pop_receipt_mismatch(queue_name, &message.id));
        }

        queue.remove(position);
        Ok(())
    }

    async fn approximate_message_count(&self, queue_name: &str) -> MessagingResult<u64> {
        let queues = self.queues.lock();
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        Ok(queue.len() as u64)
    }
}
