//! # Messaging Module
//!
//! Queue-based messaging between the enqueue coordinator and the two stage
//! processors: the pipeline message format, the queue client seam and an
//! in-memory implementation of it.

pub mod errors;
pub mod memory;
pub mod message;
pub mod queue;

pub use errors::{MessagingError, MessagingResult};
pub use memory::InMemoryQueueClient;
pub use message::{BlobRef, PipelineRequest, QueueMessage};
pub use queue::QueueClient;
